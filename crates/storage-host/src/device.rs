use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use storage_platform::documents::build_tree_uri;
use storage_platform::grants::GrantFlags;
use storage_platform::media::{MediaCollection, MediaValues, MediaStore};

use crate::documents::{DocumentState, MemoryDocumentProvider};
use crate::grants::{GrantState, MemoryGrantTable};
use crate::media::{MediaState, MemoryMediaStore};

/// Root document id of the emulated primary volume
pub const PRIMARY_ROOT: &str = "primary:";

/// Everything an emulated device stores, as written to a state file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub documents: DocumentState,
    #[serde(default)]
    pub media: MediaState,
    #[serde(default)]
    pub grants: GrantState,
}

/// The three storage providers of one emulated device
#[derive(Clone)]
pub struct Device {
    pub documents: Arc<MemoryDocumentProvider>,
    pub media: Arc<MemoryMediaStore>,
    pub grants: Arc<MemoryGrantTable>,
}

impl Device {
    /// Fresh device with an empty primary volume
    pub fn new() -> Result<Self> {
        Self::restore(DeviceSnapshot::default())
    }

    pub fn restore(snapshot: DeviceSnapshot) -> Result<Self> {
        let device = Self {
            documents: Arc::new(MemoryDocumentProvider::with_state(snapshot.documents)),
            media: Arc::new(MemoryMediaStore::with_state(snapshot.media)),
            grants: Arc::new(MemoryGrantTable::with_state(snapshot.grants)),
        };
        device.documents.add_root(PRIMARY_ROOT, "Internal storage")?;
        Ok(device)
    }

    pub fn snapshot(&self) -> Result<DeviceSnapshot> {
        Ok(DeviceSnapshot {
            documents: self.documents.snapshot()?,
            media: self.media.snapshot()?,
            grants: self.grants.snapshot()?,
        })
    }

    /// Load a device from a state file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read device state from {}", path.display()))?;
        let snapshot: DeviceSnapshot =
            serde_json::from_str(&data).with_context(|| "failed to parse device state JSON")?;
        Self::restore(snapshot)
    }

    /// Save the device to a state file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(&self.snapshot()?)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write device state to {}", path.display()))?;
        Ok(())
    }

    /// Act as the directory picker: make sure `document_id` exists, hand out a
    /// read/write session grant for its tree and return the tree URI.
    pub fn pick_dir(&self, document_id: &str) -> Result<String> {
        self.documents.ensure_dir(document_id)?;
        let tree_uri = build_tree_uri(self.documents.authority(), document_id);
        self.grants.grant_transient(&tree_uri, GrantFlags::READ_WRITE)?;
        info!("picked directory {}", tree_uri);
        Ok(tree_uri)
    }

    /// Act as the media picker: add a record with `data` and hand out a session grant for it
    pub fn pick_media(
        &self,
        collection: MediaCollection,
        values: &MediaValues,
        data: &[u8],
        flags: GrantFlags,
    ) -> Result<String> {
        let uri = self
            .media
            .insert_record(collection, values)?
            .ok_or_else(|| anyhow!("media store refused {}", values.display_name))?;
        self.media.write_record(&uri, data)?;
        self.grants.grant_transient(&uri, flags)?;
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_platform::grants::GrantTable;

    #[test]
    fn test_snapshot_restores_state() {
        let device = Device::new().unwrap();
        let tree = device.pick_dir("primary:Documents/notes").unwrap();
        device.grants.take_persistable(&tree, GrantFlags::READ).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/device.json");
        device.save(&path).unwrap();

        let restored = Device::load(&path).unwrap();
        assert!(restored.documents.contains("primary:Documents/notes").unwrap());
        assert_eq!(restored.grants.persisted_permissions().unwrap().len(), 1);
    }
}
