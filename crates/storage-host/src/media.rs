use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use storage_platform::media::{MediaCollection, MediaRecord, MediaStore, MediaValues};

use crate::{now_millis, unique_display_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    record: MediaRecord,
    #[serde(default)]
    data: Vec<u8>,
}

/// Serializable contents of a [`MemoryMediaStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaState {
    next_id: u64,
    records: BTreeMap<String, StoredRecord>,
}

/// Media library with one id sequence shared by all tables
pub struct MemoryMediaStore {
    state: Mutex<MediaState>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::with_state(MediaState::default())
    }

    pub fn with_state(state: MediaState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> Result<MediaState> {
        Ok(self.lock()?.clone())
    }

    pub fn record_count(&self) -> Result<usize> {
        Ok(self.lock()?.records.len())
    }

    fn update_data(&self, uri: &str, edit: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let mut state = self.lock()?;
        match state.records.get_mut(uri) {
            Some(stored) => {
                edit(&mut stored.data);
                stored.record.size = stored.data.len() as u64;
                stored.record.date_modified = now_millis();
                Ok(())
            }
            None => bail!("no such media record {}", uri),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MediaState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("media store state poisoned"))
    }
}

impl Default for MemoryMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaStore for MemoryMediaStore {
    fn query_record(&self, uri: &str) -> Result<Option<MediaRecord>> {
        let state = self.lock()?;
        Ok(state.records.get(uri).map(|stored| stored.record.clone()))
    }

    fn insert_record(
        &self,
        collection: MediaCollection,
        values: &MediaValues,
    ) -> Result<Option<String>> {
        if values.display_name.is_empty() {
            return Ok(None);
        }
        let mut state = self.lock()?;

        let name = unique_display_name(&values.display_name, |candidate| {
            state.records.values().any(|stored| {
                stored.record.collection == collection
                    && stored.record.relative_path == values.relative_path
                    && stored.record.display_name == candidate
            })
        });

        state.next_id += 1;
        let id = state.next_id;
        let uri = collection.record_uri(id);
        state.records.insert(
            uri.clone(),
            StoredRecord {
                record: MediaRecord {
                    id,
                    collection,
                    display_name: name,
                    mime_type: values.mime_type.clone(),
                    relative_path: values.relative_path.clone(),
                    size: 0,
                    date_modified: now_millis(),
                },
                data: Vec::new(),
            },
        );
        debug!("media insert {} ({})", uri, values.mime_type);
        Ok(Some(uri))
    }

    fn delete_record(&self, uri: &str) -> Result<usize> {
        let mut state = self.lock()?;
        if let Some(collection) = MediaCollection::from_content_uri(uri) {
            let before = state.records.len();
            state
                .records
                .retain(|_, stored| stored.record.collection != collection);
            let removed = before - state.records.len();
            debug!("deleted {} rows from table {}", removed, uri);
            return Ok(removed);
        }
        Ok(state.records.remove(uri).map(|_| 1).unwrap_or(0))
    }

    fn read_record(&self, uri: &str) -> Result<Vec<u8>> {
        let state = self.lock()?;
        match state.records.get(uri) {
            Some(stored) => Ok(stored.data.clone()),
            None => bail!("no such media record {}", uri),
        }
    }

    fn write_record(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.update_data(uri, |stored| *stored = data.to_vec())
    }

    fn append_record(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.update_data(uri, |stored| stored.extend_from_slice(data))
    }
}
