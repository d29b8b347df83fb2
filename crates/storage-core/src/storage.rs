use std::sync::Arc;

use tracing::{debug, info};

use storage_platform::documents::DocumentProvider;
use storage_platform::grants::GrantTable;
use storage_platform::media::MediaStore;

use crate::config::StorageConfig;
use crate::controller::{ControllerKind, FileController};
use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::ledger::PermissionLedger;
use crate::models::{Entry, GrantMode, Metadata, PersistedGrant, Size};
use crate::router::ControllerRouter;

/// Caller-facing entry point. Every operation resolves the identity's
/// controller afresh and forwards to it.
pub struct Storage {
    router: ControllerRouter,
    ledger: PermissionLedger,
    thumbnail_size: u32,
}

impl Storage {
    pub fn new(
        documents: Arc<dyn DocumentProvider>,
        media: Arc<dyn MediaStore>,
        grants: Arc<dyn GrantTable>,
        config: &StorageConfig,
    ) -> Self {
        let ledger = PermissionLedger::new(grants);
        Self {
            router: ControllerRouter::new(documents, media, ledger.clone(), config),
            ledger,
            thumbnail_size: config.thumbnail_size,
        }
    }

    fn controller(&self, identity: &FileIdentity) -> Result<&dyn FileController> {
        self.router.resolve(identity)
    }

    /// Which subsystem owns `identity`
    pub fn resolve(&self, identity: &FileIdentity) -> Result<ControllerKind> {
        Ok(self.controller(identity)?.kind())
    }

    pub fn get_name(&self, identity: &FileIdentity) -> Result<String> {
        self.controller(identity)?.get_name(identity)
    }

    /// `None` for directories
    pub fn get_mime_type(&self, identity: &FileIdentity) -> Result<Option<String>> {
        self.controller(identity)?.get_mime_type(identity)
    }

    pub fn read_dir(&self, identity: &FileIdentity) -> Result<Vec<Entry>> {
        let entries = self.controller(identity)?.read_dir(identity)?;
        debug!("read_dir {}: {} entries", identity, entries.len());
        Ok(entries)
    }

    pub fn create_file(
        &self,
        dir: &FileIdentity,
        relative_path: &str,
        mime_type: Option<&str>,
    ) -> Result<FileIdentity> {
        let created = self
            .controller(dir)?
            .create_file(dir, relative_path, mime_type)?;
        info!("create {:?} in {} -> {}", relative_path, dir, created);
        Ok(created)
    }

    pub fn delete_file(&self, identity: &FileIdentity) -> Result<()> {
        self.controller(identity)?.delete_file(identity)
    }

    pub fn delete_empty_dir(&self, identity: &FileIdentity) -> Result<()> {
        self.controller(identity)?.delete_empty_dir(identity)
    }

    pub fn delete_dir_all(&self, identity: &FileIdentity) -> Result<()> {
        self.controller(identity)?.delete_dir_all(identity)
    }

    pub fn read(&self, identity: &FileIdentity) -> Result<Vec<u8>> {
        self.controller(identity)?.read(identity)
    }

    pub fn read_to_string(&self, identity: &FileIdentity) -> Result<String> {
        let data = self.read(identity)?;
        String::from_utf8(data).map_err(|e| {
            StorageError::provider("decode utf-8", identity.uri())(anyhow::Error::from(e))
        })
    }

    /// Replace the contents of an existing file
    pub fn write(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.controller(identity)?.write(identity, data)
    }

    pub fn append(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.controller(identity)?.append(identity, data)
    }

    pub fn get_metadata(&self, identity: &FileIdentity) -> Result<Metadata> {
        self.controller(identity)?.get_metadata(identity)
    }

    /// Copy the contents of `from` over `to`; both must already exist as files
    pub fn copy(&self, from: &FileIdentity, to: &FileIdentity) -> Result<()> {
        let data = self.read(from)?;
        self.write(to, &data)?;
        info!("copied {} bytes from {} to {}", data.len(), from, to);
        Ok(())
    }

    /// PNG thumbnail within `size` (the configured square when `None`).
    /// Unreadable or undecodable content gives `Ok(None)`.
    pub fn get_thumbnail(
        &self,
        identity: &FileIdentity,
        size: Option<Size>,
    ) -> Result<Option<Vec<u8>>> {
        let size = size.unwrap_or_else(|| Size::square(self.thumbnail_size));
        Ok(self.controller(identity)?.get_thumbnail(identity, size))
    }

    pub fn list_grants(&self) -> Result<Vec<PersistedGrant>> {
        self.ledger.list_all()
    }

    pub fn check_grant(&self, identity: &FileIdentity, mode: GrantMode) -> Result<bool> {
        self.controller(identity)?.check_grant(identity, mode)
    }

    pub fn take_grant(&self, identity: &FileIdentity) -> Result<()> {
        self.controller(identity)?.take_grant(identity)
    }

    pub fn release_grant(&self, identity: &FileIdentity) -> Result<()> {
        self.controller(identity)?.release_grant(identity)
    }

    pub fn release_all_grants(&self) -> Result<()> {
        self.ledger.release_all()
    }
}
