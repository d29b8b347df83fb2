pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod models;
mod path;
pub mod router;
pub mod storage;
mod thumbnail;

pub use config::StorageConfig;
pub use controller::{ControllerKind, FileController};
pub use error::{ErrorKind, PathError, Result, StorageError};
pub use identity::FileIdentity;
pub use ledger::PermissionLedger;
pub use models::{Entry, EntryKind, GrantMode, Metadata, PersistedGrant, Size};
pub use router::ControllerRouter;
pub use storage::Storage;

#[cfg(test)]
pub(crate) mod testing {
    use storage_host::Device;

    use crate::{Storage, StorageConfig};

    /// Storage over an emulated device with default config
    pub fn storage_for(device: &Device) -> Storage {
        Storage::new(
            device.documents.clone(),
            device.media.clone(),
            device.grants.clone(),
            &StorageConfig::default(),
        )
    }
}
