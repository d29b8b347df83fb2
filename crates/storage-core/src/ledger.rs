use std::sync::Arc;

use tracing::{debug, info, warn};

use storage_platform::documents::is_tree_uri;
use storage_platform::grants::{GrantFlags, GrantTable, UriPermission};

use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::models::{GrantMode, PersistedGrant};

/// Pass-through view of the OS persisted-grant table.
///
/// Nothing is cached; every call queries the table again.
#[derive(Clone)]
pub struct PermissionLedger {
    table: Arc<dyn GrantTable>,
}

impl PermissionLedger {
    pub fn new(table: Arc<dyn GrantTable>) -> Self {
        Self { table }
    }

    fn permissions(&self) -> Result<Vec<UriPermission>> {
        self.table
            .persisted_permissions()
            .map_err(StorageError::provider("list persisted grants", "grant table"))
    }

    fn find(&self, uri: &str) -> Result<Option<UriPermission>> {
        Ok(self.permissions()?.into_iter().find(|p| p.uri == uri))
    }

    /// Every persisted grant. Tree grants come back as the identity of the tree's root directory.
    pub fn list_all(&self) -> Result<Vec<PersistedGrant>> {
        let grants = self
            .permissions()?
            .into_iter()
            .map(|p| {
                let tree = if is_tree_uri(&p.uri) {
                    FileIdentity::from_tree_uri(&p.uri)
                } else {
                    None
                };
                let is_tree_grant = tree.is_some();
                PersistedGrant {
                    identity: tree.unwrap_or_else(|| FileIdentity::new(p.uri)),
                    can_read: p.read,
                    can_write: p.write,
                    is_tree_grant,
                }
            })
            .collect();
        Ok(grants)
    }

    pub fn check(&self, identity: &FileIdentity, mode: GrantMode) -> Result<bool> {
        let held = self
            .find(identity.grant_uri())?
            .map(|p| p.flags())
            .unwrap_or_default();
        Ok(held.contains(mode.flags()))
    }

    /// Persist read and write access independently. A half the OS refuses is
    /// logged and skipped; a read-only grant is a valid result.
    pub fn take(&self, identity: &FileIdentity) -> Result<()> {
        let uri = identity.grant_uri();
        for (label, flags) in [("read", GrantFlags::READ), ("write", GrantFlags::WRITE)] {
            match self.table.take_persistable(uri, flags) {
                Ok(()) => debug!("persisted {} grant for {}", label, uri),
                Err(e) => warn!("could not persist {} grant for {}: {:#}", label, uri, e),
            }
        }
        Ok(())
    }

    /// Release exactly the flags held for the identity's grant URI; no grant is a no-op
    pub fn release(&self, identity: &FileIdentity) -> Result<()> {
        let uri = identity.grant_uri();
        let Some(permission) = self.find(uri)? else {
            debug!("no persisted grant for {}", uri);
            return Ok(());
        };
        self.release_permission(&permission)
    }

    /// Release every persisted grant, stopping at the first failure
    pub fn release_all(&self) -> Result<()> {
        let permissions = self.permissions()?;
        let count = permissions.len();
        for permission in &permissions {
            self.release_permission(permission)?;
        }
        info!("released {} persisted grants", count);
        Ok(())
    }

    fn release_permission(&self, permission: &UriPermission) -> Result<()> {
        let flags = permission.flags();
        if flags.is_empty() {
            return Ok(());
        }
        self.table
            .release_persistable(&permission.uri, flags)
            .map_err(StorageError::provider("release grant", &permission.uri))?;
        info!("released grant for {}", permission.uri);
        Ok(())
    }
}
