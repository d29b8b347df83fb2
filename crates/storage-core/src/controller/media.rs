use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::anyhow;
use tracing::{debug, info};

use storage_platform::media::{MediaCollection, MediaRecord, MediaStore, MediaValues};

use super::{ControllerKind, FileController};
use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::ledger::PermissionLedger;
use crate::models::{from_millis, Entry, EntryKind, GrantMode, Metadata};
use crate::path::{guess_mime_type, split_relative_path};

/// Records of the media library (`content://media/...`).
///
/// Records are flat: there are no directories to list or remove, and the
/// store decides where a new record's bytes live.
pub struct MediaFileController {
    store: Arc<dyn MediaStore>,
    ledger: PermissionLedger,
    default_mime_type: String,
}

impl MediaFileController {
    pub fn new(
        store: Arc<dyn MediaStore>,
        ledger: PermissionLedger,
        default_mime_type: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            default_mime_type: default_mime_type.into(),
        }
    }

    fn record(&self, identity: &FileIdentity) -> Result<MediaRecord> {
        self.store
            .query_record(identity.uri())
            .map_err(StorageError::provider("query media record", identity.uri()))?
            .ok_or_else(|| StorageError::NotFound {
                uri: identity.uri().to_string(),
            })
    }

    fn unsupported(operation: &'static str, identity: &FileIdentity) -> StorageError {
        StorageError::Unsupported {
            operation,
            uri: identity.uri().to_string(),
        }
    }

    fn delete_record(&self, identity: &FileIdentity) -> Result<()> {
        let rows = self
            .store
            .delete_record(identity.uri())
            .map_err(StorageError::provider("delete media record", identity.uri()))?;
        if rows == 0 {
            return Err(StorageError::DeleteFailed {
                uri: identity.uri().to_string(),
                source: anyhow!("no rows matched"),
            });
        }
        info!("deleted media record {}", identity.uri());
        Ok(())
    }
}

/// Table a new record of `mime_type` belongs in
fn collection_for(mime_type: &str) -> MediaCollection {
    match mime_type.split_once('/').map(|(family, _)| family) {
        Some("image") => MediaCollection::Images,
        Some("video") => MediaCollection::Video,
        Some("audio") => MediaCollection::Audio,
        _ => MediaCollection::Files,
    }
}

impl FileController for MediaFileController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Media
    }

    fn get_name(&self, identity: &FileIdentity) -> Result<String> {
        Ok(self.record(identity)?.display_name)
    }

    /// A table URI is the only directory-like media identity and has no MIME
    fn get_mime_type(&self, identity: &FileIdentity) -> Result<Option<String>> {
        if MediaCollection::from_content_uri(identity.uri()).is_some() {
            return Ok(None);
        }
        Ok(Some(self.record(identity)?.mime_type))
    }

    fn read_dir(&self, identity: &FileIdentity) -> Result<Vec<Entry>> {
        Err(Self::unsupported("read_dir", identity))
    }

    /// `dir` must be one of the media table URIs; the record lands in the table
    /// matching the MIME family, whatever table `dir` names.
    fn create_file(
        &self,
        dir: &FileIdentity,
        relative_path: &str,
        mime_type: Option<&str>,
    ) -> Result<FileIdentity> {
        let rel = split_relative_path(relative_path)?;
        if MediaCollection::from_content_uri(dir.uri()).is_none() {
            return Err(Self::unsupported("create_file", dir));
        }

        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => guess_mime_type(rel.file_name, &self.default_mime_type),
        };
        let collection = collection_for(&mime_type);
        let relative_dir = if rel.dirs.is_empty() {
            String::new()
        } else {
            format!("{}/", rel.dirs.join("/"))
        };
        let values = MediaValues {
            display_name: rel.file_name.to_string(),
            mime_type,
            relative_path: relative_dir,
        };

        let create_failed = |source| StorageError::CreateFailed {
            dir: dir.uri().to_string(),
            name: relative_path.to_string(),
            source,
        };
        let uri = self
            .store
            .insert_record(collection, &values)
            .map_err(create_failed)?
            .ok_or_else(|| create_failed(anyhow!("media store refused the insert")))?;

        info!("created media record {} ({:?})", uri, collection);
        Ok(FileIdentity::new(uri))
    }

    /// A table URI is a directory here; deleting it would empty the table
    fn delete_file(&self, identity: &FileIdentity) -> Result<()> {
        if MediaCollection::from_content_uri(identity.uri()).is_some() {
            return Err(StorageError::TypeMismatch {
                uri: identity.uri().to_string(),
                expected: EntryKind::File,
                actual: EntryKind::Dir,
            });
        }
        self.delete_record(identity)
    }

    fn delete_empty_dir(&self, identity: &FileIdentity) -> Result<()> {
        Err(Self::unsupported("delete_empty_dir", identity))
    }

    fn delete_dir_all(&self, identity: &FileIdentity) -> Result<()> {
        Err(Self::unsupported("delete_dir_all", identity))
    }

    fn read(&self, identity: &FileIdentity) -> Result<Vec<u8>> {
        self.store
            .read_record(identity.uri())
            .map_err(StorageError::provider("read media record", identity.uri()))
    }

    fn write(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.record(identity)?;
        self.store
            .write_record(identity.uri(), data)
            .map_err(StorageError::provider("write media record", identity.uri()))?;
        debug!("wrote {} bytes to {}", data.len(), identity.uri());
        Ok(())
    }

    fn append(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.record(identity)?;
        self.store
            .append_record(identity.uri(), data)
            .map_err(StorageError::provider("append media record", identity.uri()))?;
        debug!("appended {} bytes to {}", data.len(), identity.uri());
        Ok(())
    }

    fn get_metadata(&self, identity: &FileIdentity) -> Result<Metadata> {
        if MediaCollection::from_content_uri(identity.uri()).is_some() {
            return Ok(Metadata {
                kind: EntryKind::Dir,
                byte_size: None,
                last_modified: UNIX_EPOCH,
            });
        }
        let record = self.record(identity)?;
        Ok(Metadata {
            kind: EntryKind::File,
            byte_size: Some(record.size),
            last_modified: from_millis(Some(record.date_modified)),
        })
    }

    fn take_grant(&self, identity: &FileIdentity) -> Result<()> {
        self.ledger.take(identity)
    }

    fn check_grant(&self, identity: &FileIdentity, mode: GrantMode) -> Result<bool> {
        self.ledger.check(identity, mode)
    }

    fn release_grant(&self, identity: &FileIdentity) -> Result<()> {
        self.ledger.release(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;
    use storage_host::Device;

    /// Forwards to the emulated store and remembers every delete it is asked for
    struct RecordingStore {
        inner: Arc<dyn MediaStore>,
        deletes: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    impl MediaStore for RecordingStore {
        fn query_record(&self, uri: &str) -> anyhow::Result<Option<MediaRecord>> {
            self.inner.query_record(uri)
        }

        fn insert_record(
            &self,
            collection: MediaCollection,
            values: &MediaValues,
        ) -> anyhow::Result<Option<String>> {
            self.inner.insert_record(collection, values)
        }

        fn delete_record(&self, uri: &str) -> anyhow::Result<usize> {
            self.deletes.lock().unwrap().push(uri.to_string());
            self.inner.delete_record(uri)
        }

        fn read_record(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
            self.inner.read_record(uri)
        }

        fn write_record(&self, uri: &str, data: &[u8]) -> anyhow::Result<()> {
            self.inner.write_record(uri, data)
        }

        fn append_record(&self, uri: &str, data: &[u8]) -> anyhow::Result<()> {
            self.inner.append_record(uri, data)
        }
    }

    fn controller(device: &Device) -> MediaFileController {
        MediaFileController::new(
            device.media.clone(),
            PermissionLedger::new(device.grants.clone()),
            "application/octet-stream",
        )
    }

    fn downloads() -> FileIdentity {
        FileIdentity::new(MediaCollection::Files.content_uri())
    }

    #[test]
    fn test_collection_for_mime_family() {
        assert_eq!(collection_for("image/jpeg"), MediaCollection::Images);
        assert_eq!(collection_for("video/mp4"), MediaCollection::Video);
        assert_eq!(collection_for("audio/ogg"), MediaCollection::Audio);
        assert_eq!(collection_for("text/plain"), MediaCollection::Files);
        assert_eq!(collection_for("garbage"), MediaCollection::Files);
    }

    #[test]
    fn test_create_routes_by_mime_and_keeps_relative_dir() {
        let device = Device::new().unwrap();
        let c = controller(&device);

        let id = c.create_file(&downloads(), "Pictures/Trips/beach.jpg", None).unwrap();
        let (collection, _) = MediaCollection::parse_record_uri(id.uri()).unwrap();
        assert_eq!(collection, MediaCollection::Images);
        assert_eq!(c.get_name(&id).unwrap(), "beach.jpg");
        assert_eq!(c.get_mime_type(&id).unwrap().as_deref(), Some("image/jpeg"));

        let record = device.media.query_record(id.uri()).unwrap().unwrap();
        assert_eq!(record.relative_path, "Pictures/Trips/");

        let doc = c
            .create_file(&downloads(), "notes.bin", Some("application/pdf"))
            .unwrap();
        let (collection, _) = MediaCollection::parse_record_uri(doc.uri()).unwrap();
        assert_eq!(collection, MediaCollection::Files);
        assert_eq!(device.media.query_record(doc.uri()).unwrap().unwrap().relative_path, "");
    }

    #[test]
    fn test_create_needs_table_uri() {
        let device = Device::new().unwrap();
        let err = controller(&device)
            .create_file(&FileIdentity::new("content://media/external/file/1"), "a.txt", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_invalid_path_rejected() {
        let device = Device::new().unwrap();
        let err = controller(&device).create_file(&downloads(), "a/", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_read_dir_unsupported() {
        let device = Device::new().unwrap();
        let c = controller(&device);
        assert_eq!(c.read_dir(&downloads()).unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(c.get_mime_type(&downloads()).unwrap(), None);
    }

    #[test]
    fn test_delete_twice_fails() {
        let device = Device::new().unwrap();
        let c = controller(&device);
        let id = c.create_file(&downloads(), "song.mp3", None).unwrap();

        c.delete_file(&id).unwrap();
        assert_eq!(c.delete_file(&id).unwrap_err().kind(), ErrorKind::DeleteFailed);
        assert_eq!(c.get_name(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(c.delete_dir_all(&id).unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_read_write_and_grants() {
        let device = Device::new().unwrap();
        let c = controller(&device);
        let uri = device
            .pick_media(
                MediaCollection::Images,
                &MediaValues {
                    display_name: "cat.png".to_string(),
                    mime_type: "image/png".to_string(),
                    relative_path: "Pictures/".to_string(),
                },
                b"meow",
                storage_platform::grants::GrantFlags::READ_WRITE,
            )
            .unwrap();
        let id = FileIdentity::new(uri);

        assert_eq!(c.read(&id).unwrap(), b"meow");
        c.write(&id, b"purr").unwrap();
        assert_eq!(c.read(&id).unwrap(), b"purr");

        c.take_grant(&id).unwrap();
        assert!(c.check_grant(&id, GrantMode::ReadAndWrite).unwrap());
        c.release_grant(&id).unwrap();
        assert!(!c.check_grant(&id, GrantMode::Read).unwrap());
    }

    #[test]
    fn test_delete_file_on_table_deletes_nothing() {
        let device = Device::new().unwrap();
        let store = Arc::new(RecordingStore {
            inner: device.media.clone(),
            deletes: Mutex::new(Vec::new()),
        });
        let c = MediaFileController::new(
            store.clone(),
            PermissionLedger::new(device.grants.clone()),
            "application/octet-stream",
        );
        c.create_file(&downloads(), "a.jpg", None).unwrap();
        c.create_file(&downloads(), "b.jpg", None).unwrap();
        let images = FileIdentity::new(MediaCollection::Images.content_uri());

        let err = c.delete_file(&images).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(c.delete_file(&downloads()).unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert!(store.deletes().is_empty());
        assert_eq!(device.media.record_count().unwrap(), 2);
    }

    #[test]
    fn test_append_and_metadata() {
        let device = Device::new().unwrap();
        let c = controller(&device);
        let id = c.create_file(&downloads(), "Music/take.wav", None).unwrap();

        c.write(&id, b"RIFF").unwrap();
        c.append(&id, b"data").unwrap();
        assert_eq!(c.read(&id).unwrap(), b"RIFFdata");

        let meta = c.get_metadata(&id).unwrap();
        assert_eq!(meta.kind, EntryKind::File);
        assert_eq!(meta.byte_size, Some(8));
        assert!(meta.last_modified > UNIX_EPOCH);

        let table = c.get_metadata(&downloads()).unwrap();
        assert_eq!(table.kind, EntryKind::Dir);
        assert_eq!(table.byte_size, None);

        c.delete_file(&id).unwrap();
        assert_eq!(c.get_metadata(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(c.append(&id, b"x").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(c.write(&id, b"x").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
