use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use storage_platform::documents::{
    build_document_uri_using_tree, DocumentProvider, DocumentRow, DocumentUri, PageRequest,
    DIR_MIME_TYPE,
};

use super::{ControllerKind, FileController};
use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::ledger::PermissionLedger;
use crate::models::{from_millis, Entry, EntryKind, GrantMode, Metadata};
use crate::path::{guess_mime_type, split_relative_path};

/// Documents served by a document provider, usually inside a tree the user picked.
pub struct DocumentFileController {
    provider: Arc<dyn DocumentProvider>,
    ledger: PermissionLedger,
    page_size: usize,
    default_mime_type: String,
}

impl DocumentFileController {
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        ledger: PermissionLedger,
        page_size: usize,
        default_mime_type: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            ledger,
            page_size: page_size.max(1),
            default_mime_type: default_mime_type.into(),
        }
    }

    pub(crate) fn provider(&self) -> &dyn DocumentProvider {
        self.provider.as_ref()
    }

    fn row(&self, uri: &str) -> Result<DocumentRow> {
        self.provider
            .query_document(uri)
            .map_err(StorageError::provider("query document", uri))?
            .ok_or_else(|| StorageError::NotFound {
                uri: uri.to_string(),
            })
    }

    /// Row of `identity`, failing with `TypeMismatch` unless it is of the `expected` kind
    fn row_of_kind(&self, identity: &FileIdentity, expected: EntryKind) -> Result<DocumentRow> {
        let row = self.row(identity.uri())?;
        let actual = kind_of(&row);
        if actual != expected {
            return Err(StorageError::TypeMismatch {
                uri: identity.uri().to_string(),
                expected,
                actual,
            });
        }
        Ok(row)
    }

    fn tree<'a>(&self, identity: &'a FileIdentity) -> Result<&'a str> {
        identity
            .owning_tree_uri()
            .ok_or_else(|| StorageError::MissingTreeContext {
                uri: identity.uri().to_string(),
            })
    }

    /// One page of the children of the directory document `uri`
    fn children_page(&self, uri: &str, page: PageRequest) -> Result<(Vec<DocumentRow>, bool)> {
        let mut parsed = DocumentUri::parse(uri).ok_or_else(|| StorageError::UnsupportedIdentity {
            uri: uri.to_string(),
        })?;
        parsed.children = true;
        let children_uri = parsed.to_uri_string();

        let page = self
            .provider
            .query_children(&children_uri, page)
            .map_err(StorageError::provider("query children", uri))?;
        Ok((page.rows, page.has_more))
    }

    /// Every child of `uri`, page by page until the provider has no more rows
    fn children(&self, uri: &str) -> Result<Vec<DocumentRow>> {
        let mut rows = Vec::new();
        let mut request = PageRequest::first(self.page_size);
        loop {
            let (page, has_more) = self.children_page(uri, request)?;
            let fetched = page.len();
            rows.extend(page);
            if !has_more || fetched == 0 {
                break;
            }
            request = request.next();
        }
        debug!("{} children under {}", rows.len(), uri);
        Ok(rows)
    }

    fn child_identity(tree: &str, document_id: &str) -> Result<FileIdentity> {
        let uri = build_document_uri_using_tree(tree, document_id).ok_or_else(|| {
            StorageError::UnsupportedIdentity {
                uri: tree.to_string(),
            }
        })?;
        Ok(FileIdentity::with_tree(uri, tree))
    }

    fn create_document(
        &self,
        dir: &FileIdentity,
        parent_uri: &str,
        mime_type: &str,
        name: &str,
    ) -> Result<String> {
        let create_failed = |source| StorageError::CreateFailed {
            dir: dir.uri().to_string(),
            name: name.to_string(),
            source,
        };
        let uri = self
            .provider
            .create_document(parent_uri, mime_type, name)
            .map_err(create_failed)?
            .ok_or_else(|| create_failed(anyhow!("provider refused to create the document")))?;
        info!("created document {} ({})", uri, mime_type);
        Ok(uri)
    }

    fn delete_document(&self, identity: &FileIdentity) -> Result<()> {
        self.provider
            .delete_document(identity.uri())
            .map_err(|source| StorageError::DeleteFailed {
                uri: identity.uri().to_string(),
                source,
            })?;
        info!("deleted document {}", identity.uri());
        Ok(())
    }
}

fn kind_of(row: &DocumentRow) -> EntryKind {
    if row.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

impl FileController for DocumentFileController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Document
    }

    fn get_name(&self, identity: &FileIdentity) -> Result<String> {
        Ok(self.row(identity.uri())?.display_name)
    }

    fn get_mime_type(&self, identity: &FileIdentity) -> Result<Option<String>> {
        let row = self.row(identity.uri())?;
        Ok((!row.is_dir()).then_some(row.mime_type))
    }

    fn read_dir(&self, identity: &FileIdentity) -> Result<Vec<Entry>> {
        let tree = self.tree(identity)?;
        self.row_of_kind(identity, EntryKind::Dir)?;

        self.children(identity.uri())?
            .into_iter()
            .map(|row| -> Result<Entry> {
                let identity = Self::child_identity(tree, &row.document_id)?;
                let last_modified = from_millis(row.last_modified);
                Ok(if row.is_dir() {
                    Entry::Dir {
                        name: row.display_name,
                        identity,
                        last_modified,
                    }
                } else {
                    Entry::File {
                        name: row.display_name,
                        identity,
                        mime_type: row.mime_type,
                        last_modified,
                        byte_size: row.size.unwrap_or(0),
                    }
                })
            })
            .collect()
    }

    /// Walks the intermediate directories one segment at a time, reusing a
    /// directory child of the same name or creating it. Not atomic: a
    /// concurrent creator may produce a duplicate directory.
    fn create_file(
        &self,
        dir: &FileIdentity,
        relative_path: &str,
        mime_type: Option<&str>,
    ) -> Result<FileIdentity> {
        let rel = split_relative_path(relative_path)?;
        self.row_of_kind(dir, EntryKind::Dir)?;
        let tree = dir.owning_tree_uri();
        if !rel.dirs.is_empty() && tree.is_none() {
            return Err(StorageError::MissingTreeContext {
                uri: dir.uri().to_string(),
            });
        }

        let mut current = dir.uri().to_string();
        let mut index = 0;
        while index < rel.dirs.len() {
            let segment = rel.dirs[index];
            let existing = self
                .children(&current)?
                .into_iter()
                .find(|row| row.is_dir() && row.display_name == segment);
            current = match (existing, tree) {
                (Some(row), Some(tree)) => {
                    Self::child_identity(tree, &row.document_id)?.uri().to_string()
                }
                _ => self.create_document(dir, &current, DIR_MIME_TYPE, segment)?,
            };
            index += 1;
        }

        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => guess_mime_type(rel.file_name, &self.default_mime_type),
        };
        let uri = self.create_document(dir, &current, &mime_type, rel.file_name)?;
        Ok(match tree {
            Some(tree) => FileIdentity::with_tree(uri, tree),
            None => FileIdentity::new(uri),
        })
    }

    fn delete_file(&self, identity: &FileIdentity) -> Result<()> {
        self.row_of_kind(identity, EntryKind::File)?;
        self.delete_document(identity)
    }

    fn delete_empty_dir(&self, identity: &FileIdentity) -> Result<()> {
        self.row_of_kind(identity, EntryKind::Dir)?;
        let (first, _) = self.children_page(identity.uri(), PageRequest::first(1))?;
        if !first.is_empty() {
            return Err(StorageError::DirectoryNotEmpty {
                uri: identity.uri().to_string(),
            });
        }
        self.delete_document(identity)
    }

    fn delete_dir_all(&self, identity: &FileIdentity) -> Result<()> {
        self.row_of_kind(identity, EntryKind::Dir)?;
        self.delete_document(identity)
    }

    fn read(&self, identity: &FileIdentity) -> Result<Vec<u8>> {
        self.row_of_kind(identity, EntryKind::File)?;
        self.provider
            .read_document(identity.uri())
            .map_err(StorageError::provider("read document", identity.uri()))
    }

    fn write(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.row_of_kind(identity, EntryKind::File)?;
        self.provider
            .write_document(identity.uri(), data)
            .map_err(StorageError::provider("write document", identity.uri()))?;
        debug!("wrote {} bytes to {}", data.len(), identity.uri());
        Ok(())
    }

    fn append(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        self.row_of_kind(identity, EntryKind::File)?;
        self.provider
            .append_document(identity.uri(), data)
            .map_err(StorageError::provider("append document", identity.uri()))?;
        debug!("appended {} bytes to {}", data.len(), identity.uri());
        Ok(())
    }

    fn get_metadata(&self, identity: &FileIdentity) -> Result<Metadata> {
        let row = self.row(identity.uri())?;
        let kind = kind_of(&row);
        Ok(Metadata {
            kind,
            byte_size: match kind {
                EntryKind::File => Some(row.size.unwrap_or(0)),
                EntryKind::Dir => None,
            },
            last_modified: from_millis(row.last_modified),
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
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Size;
    use crate::thumbnail::sample_png;
    use storage_host::Device;
    use storage_platform::documents::{build_document_uri, EXTERNAL_STORAGE_AUTHORITY};

    fn setup(page_size: usize) -> (Device, DocumentFileController, FileIdentity) {
        let device = Device::new().unwrap();
        let tree = device.pick_dir("primary:Docs").unwrap();
        let controller = DocumentFileController::new(
            device.documents.clone(),
            PermissionLedger::new(device.grants.clone()),
            page_size,
            "application/octet-stream",
        );
        let root = FileIdentity::from_tree_uri(&tree).unwrap();
        (device, controller, root)
    }

    #[test]
    fn test_nested_create_makes_exactly_the_missing_entries() {
        let (device, c, root) = setup(256);
        let before = device.documents.document_count().unwrap();

        let file = c.create_file(&root, "a/b/c.txt", None).unwrap();
        assert_eq!(device.documents.document_count().unwrap(), before + 3);
        assert!(device.documents.contains("primary:Docs/a").unwrap());
        assert!(device.documents.contains("primary:Docs/a/b").unwrap());
        assert!(device.documents.contains("primary:Docs/a/b/c.txt").unwrap());

        assert_eq!(file.owning_tree_uri(), root.owning_tree_uri());
        assert_eq!(c.get_name(&file).unwrap(), "c.txt");
        assert_eq!(c.get_mime_type(&file).unwrap().as_deref(), Some("text/plain"));

        // second create reuses both directories, the provider renames the leaf
        let again = c.create_file(&root, "a/b/c.txt", None).unwrap();
        assert_eq!(device.documents.document_count().unwrap(), before + 4);
        assert_eq!(c.get_name(&again).unwrap(), "c (1).txt");
    }

    #[test]
    fn test_lookup_only_matches_directories() {
        let (device, c, root) = setup(256);
        c.create_file(&root, "a", Some("text/plain")).unwrap();

        let nested = c.create_file(&root, "a/x.txt", None).unwrap();
        assert!(device.documents.contains("primary:Docs/a (1)/x.txt").unwrap());
        assert_eq!(c.get_name(&nested).unwrap(), "x.txt");
    }

    #[test]
    fn test_read_dir_pages_through_children() {
        let (_device, c, root) = setup(1);
        for name in ["one.txt", "two.txt", "three.png"] {
            c.create_file(&root, name, None).unwrap();
        }
        c.create_file(&root, "sub/inner.txt", None).unwrap();

        let mut entries = c.read_dir(&root).unwrap();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["one.txt", "sub", "three.png", "two.txt"]);

        for entry in &entries {
            assert_eq!(entry.identity().owning_tree_uri(), root.owning_tree_uri());
        }
        let sub = entries.iter().find(|e| e.is_dir()).unwrap();
        assert_eq!(c.get_mime_type(sub.identity()).unwrap(), None);
        assert_eq!(c.read_dir(sub.identity()).unwrap().len(), 1);
    }

    #[test]
    fn test_read_dir_requires_tree() {
        let (_device, c, _root) = setup(256);
        let bare =
            FileIdentity::new(build_document_uri(EXTERNAL_STORAGE_AUTHORITY, "primary:Docs"));
        assert_eq!(c.read_dir(&bare).unwrap_err().kind(), ErrorKind::MissingTreeContext);
    }

    #[test]
    fn test_create_without_tree() {
        let (_device, c, _root) = setup(256);
        let bare =
            FileIdentity::new(build_document_uri(EXTERNAL_STORAGE_AUTHORITY, "primary:Docs"));

        let file = c.create_file(&bare, "single.txt", None).unwrap();
        assert_eq!(file.owning_tree_uri(), None);
        assert_eq!(c.get_name(&file).unwrap(), "single.txt");

        let err = c.create_file(&bare, "nested/single.txt", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTreeContext);
    }

    #[test]
    fn test_refused_creation_is_create_failed() {
        let (device, c, root) = setup(256);
        device.documents.refuse_creation_in("primary:Docs").unwrap();
        let err = c.create_file(&root, "x.txt", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CreateFailed);
    }

    #[test]
    fn test_delete_checks_kind_and_emptiness() {
        let (device, c, root) = setup(256);
        let file = c.create_file(&root, "d/f.txt", None).unwrap();
        let dir = c
            .read_dir(&root)
            .unwrap()
            .into_iter()
            .find(|e| e.is_dir())
            .unwrap();

        assert_eq!(c.delete_file(dir.identity()).unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            c.delete_empty_dir(dir.identity()).unwrap_err().kind(),
            ErrorKind::DirectoryNotEmpty
        );
        assert_eq!(c.delete_dir_all(&file).unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert!(device.documents.contains("primary:Docs/d/f.txt").unwrap());

        c.delete_file(&file).unwrap();
        c.delete_empty_dir(dir.identity()).unwrap();
        assert!(!device.documents.contains("primary:Docs/d").unwrap());
        assert_eq!(c.get_name(&file).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_dir_all_removes_subtree() {
        let (device, c, root) = setup(256);
        c.create_file(&root, "d/e/f.txt", None).unwrap();
        let tree = root.owning_tree_uri().unwrap();
        let dir = FileIdentity::with_tree(
            build_document_uri_using_tree(tree, "primary:Docs/d").unwrap(),
            tree,
        );
        c.delete_dir_all(&dir).unwrap();
        assert!(!device.documents.contains("primary:Docs/d/e/f.txt").unwrap());
        assert!(device.documents.contains("primary:Docs").unwrap());
    }

    #[test]
    fn test_read_write_and_thumbnail() {
        let (_device, c, root) = setup(256);
        let pic = c.create_file(&root, "pic.png", None).unwrap();
        assert_eq!(c.get_thumbnail(&pic, Size::square(16)), None);

        c.write(&pic, &sample_png(64, 32)).unwrap();
        let thumb = c.get_thumbnail(&pic, Size::square(16)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));

        assert_eq!(c.get_thumbnail(&root, Size::square(16)), None);
        assert_eq!(c.read(&root).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_append_and_metadata() {
        let (_device, c, root) = setup(256);
        let log = c.create_file(&root, "logs/app.log", None).unwrap();

        let empty = c.get_metadata(&log).unwrap();
        assert_eq!(empty.kind, EntryKind::File);
        assert_eq!(empty.byte_size, Some(0));

        c.write(&log, b"start\n").unwrap();
        c.append(&log, b"more\n").unwrap();
        assert_eq!(c.read(&log).unwrap(), b"start\nmore\n");
        let meta = c.get_metadata(&log).unwrap();
        assert_eq!(meta.byte_size, Some(11));
        assert!(meta.last_modified >= empty.last_modified);

        let root_meta = c.get_metadata(&root).unwrap();
        assert_eq!(root_meta.kind, EntryKind::Dir);
        assert_eq!(root_meta.byte_size, None);
        assert_eq!(c.append(&root, b"x").unwrap_err().kind(), ErrorKind::TypeMismatch);

        c.delete_file(&log).unwrap();
        assert_eq!(c.get_metadata(&log).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(c.append(&log, b"x").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
