use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::identity::FileIdentity;
use crate::models::{Entry, GrantMode, Metadata, Size};
use crate::thumbnail;

pub mod document;
pub mod media;
pub mod raw;

pub use document::DocumentFileController;
pub use media::MediaFileController;
pub use raw::RawFileController;

/// Which storage subsystem a controller speaks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Raw,
    Media,
    Document,
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::Raw => f.write_str("raw"),
            ControllerKind::Media => f.write_str("media"),
            ControllerKind::Document => f.write_str("document"),
        }
    }
}

/// The uniform file-operation contract over one storage subsystem.
///
/// Directories report `None` from [`FileController::get_mime_type`] on every controller.
pub trait FileController: Send + Sync {
    fn kind(&self) -> ControllerKind;

    fn get_name(&self, identity: &FileIdentity) -> Result<String>;

    fn get_mime_type(&self, identity: &FileIdentity) -> Result<Option<String>>;

    /// Children of a directory, in no particular order
    fn read_dir(&self, identity: &FileIdentity) -> Result<Vec<Entry>>;

    /// Create an empty file at `relative_path` below `dir`, creating missing directories
    fn create_file(
        &self,
        dir: &FileIdentity,
        relative_path: &str,
        mime_type: Option<&str>,
    ) -> Result<FileIdentity>;

    fn delete_file(&self, identity: &FileIdentity) -> Result<()>;

    fn delete_empty_dir(&self, identity: &FileIdentity) -> Result<()>;

    fn delete_dir_all(&self, identity: &FileIdentity) -> Result<()>;

    fn read(&self, identity: &FileIdentity) -> Result<Vec<u8>>;

    /// Replace the whole contents of an existing file. Never creates one.
    fn write(&self, identity: &FileIdentity, data: &[u8]) -> Result<()>;

    /// Add `data` to the end of an existing file
    fn append(&self, identity: &FileIdentity, data: &[u8]) -> Result<()>;

    fn get_metadata(&self, identity: &FileIdentity) -> Result<Metadata>;

    /// Best effort: any failure to read or decode yields `None`
    fn get_thumbnail(&self, identity: &FileIdentity, size: Size) -> Option<Vec<u8>> {
        match self.read(identity) {
            Ok(data) => thumbnail::render(&data, size),
            Err(e) => {
                warn!("no thumbnail for {}: {}", identity, e.message());
                None
            }
        }
    }

    fn take_grant(&self, identity: &FileIdentity) -> Result<()>;

    fn check_grant(&self, identity: &FileIdentity, mode: GrantMode) -> Result<bool>;

    fn release_grant(&self, identity: &FileIdentity) -> Result<()>;
}
