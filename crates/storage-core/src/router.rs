use std::sync::Arc;

use tracing::debug;

use storage_platform::documents::DocumentProvider;
use storage_platform::media::MediaStore;

use crate::config::StorageConfig;
use crate::controller::{
    DocumentFileController, FileController, MediaFileController, RawFileController,
};
use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::ledger::PermissionLedger;

/// Picks the controller for an identity. Dispatch is a pure function of the identity.
pub struct ControllerRouter {
    document: DocumentFileController,
    media: MediaFileController,
    raw: RawFileController,
}

impl ControllerRouter {
    pub fn new(
        documents: Arc<dyn DocumentProvider>,
        media: Arc<dyn MediaStore>,
        ledger: PermissionLedger,
        config: &StorageConfig,
    ) -> Self {
        Self {
            document: DocumentFileController::new(
                documents,
                ledger.clone(),
                config.effective_page_size(),
                config.default_mime_type.clone(),
            ),
            media: MediaFileController::new(media, ledger, config.default_mime_type.clone()),
            raw: RawFileController::new(config.default_mime_type.clone()),
        }
    }

    /// First match wins: tree context or a provider document URI, then `content`, then `file`
    pub fn resolve(&self, identity: &FileIdentity) -> Result<&dyn FileController> {
        let controller: &dyn FileController = if identity.owning_tree_uri().is_some()
            || self.document.provider().is_document_uri(identity.uri())
        {
            &self.document
        } else {
            match identity.scheme() {
                Some("content") => &self.media,
                Some("file") => &self.raw,
                _ => {
                    return Err(StorageError::UnsupportedIdentity {
                        uri: identity.uri().to_string(),
                    })
                }
            }
        };
        debug!("{} -> {} controller", identity, controller.kind());
        Ok(controller)
    }
}
