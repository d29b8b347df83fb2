use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use super::{ControllerKind, FileController};
use crate::error::{Result, StorageError};
use crate::identity::FileIdentity;
use crate::models::{Entry, EntryKind, GrantMode, Metadata};
use crate::path::{guess_mime_type, numbered_name, split_relative_path};

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Truncate,
    Append,
}

/// Direct filesystem paths (`file://` identities).
///
/// There is no permission model here: grant operations are no-ops.
pub struct RawFileController {
    default_mime_type: String,
}

impl RawFileController {
    pub fn new(default_mime_type: impl Into<String>) -> Self {
        Self {
            default_mime_type: default_mime_type.into(),
        }
    }

    fn path_of(identity: &FileIdentity) -> Result<PathBuf> {
        identity
            .to_path()
            .ok_or_else(|| StorageError::UnsupportedIdentity {
                uri: identity.uri().to_string(),
            })
    }

    /// Kind of whatever `path` resolves to. A dangling symlink is a file.
    fn kind_of(identity: &FileIdentity, path: &Path) -> Result<EntryKind> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Dir),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if e.kind() == IoErrorKind::NotFound => Self::own_kind_of(identity, path),
            Err(e) => Err(StorageError::io(path)(e)),
        }
    }

    /// Kind of the entry at `path` itself: a symlink is a file whatever it points at
    fn own_kind_of(identity: &FileIdentity, path: &Path) -> Result<EntryKind> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Dir),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(StorageError::NotFound {
                uri: identity.uri().to_string(),
            }),
            Err(e) => Err(StorageError::io(path)(e)),
        }
    }

    fn ensure_kind(identity: &FileIdentity, actual: EntryKind, expected: EntryKind) -> Result<()> {
        if actual != expected {
            return Err(StorageError::TypeMismatch {
                uri: identity.uri().to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn expect_kind(identity: &FileIdentity, path: &Path, expected: EntryKind) -> Result<()> {
        Self::ensure_kind(identity, Self::kind_of(identity, path)?, expected)
    }

    /// Used by the delete verbs, which act on a symlink and never on its target
    fn expect_own_kind(identity: &FileIdentity, path: &Path, expected: EntryKind) -> Result<()> {
        Self::ensure_kind(identity, Self::own_kind_of(identity, path)?, expected)
    }

    /// Open an existing file for writing; never creates one
    fn open_existing(identity: &FileIdentity, path: &Path, mode: WriteMode) -> Result<fs::File> {
        Self::expect_kind(identity, path, EntryKind::File)?;
        let mut options = fs::OpenOptions::new();
        match mode {
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        options.open(path).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => StorageError::NotFound {
                uri: identity.uri().to_string(),
            },
            _ => StorageError::io(path)(e),
        })
    }

    fn delete_failed(identity: &FileIdentity) -> impl FnOnce(anyhow::Error) -> StorageError {
        let uri = identity.uri().to_string();
        move |source| StorageError::DeleteFailed { uri, source }
    }
}

impl FileController for RawFileController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Raw
    }

    fn get_name(&self, identity: &FileIdentity) -> Result<String> {
        let path = Self::path_of(identity)?;
        Self::kind_of(identity, &path)?;
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string()))
    }

    fn get_mime_type(&self, identity: &FileIdentity) -> Result<Option<String>> {
        let path = Self::path_of(identity)?;
        match Self::kind_of(identity, &path)? {
            EntryKind::Dir => Ok(None),
            EntryKind::File => Ok(Some(guess_mime_type(
                &path.to_string_lossy(),
                &self.default_mime_type,
            ))),
        }
    }

    fn read_dir(&self, identity: &FileIdentity) -> Result<Vec<Entry>> {
        let path = Self::path_of(identity)?;
        Self::expect_kind(identity, &path, EntryKind::Dir)?;

        let entries = fs::read_dir(&path).map_err(StorageError::io(&path))?;
        let mut result = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping dir entry: {}", e);
                    continue;
                }
            };
            let child = entry.path();
            let meta = match fs::metadata(&child) {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping {}: {}", child.display(), e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let last_modified = meta.modified().unwrap_or(UNIX_EPOCH);
            let identity = FileIdentity::from_path(&child);
            if meta.is_dir() {
                result.push(Entry::Dir {
                    name,
                    identity,
                    last_modified,
                });
            } else {
                result.push(Entry::File {
                    mime_type: guess_mime_type(&name, &self.default_mime_type),
                    name,
                    identity,
                    last_modified,
                    byte_size: meta.len(),
                });
            }
        }
        Ok(result)
    }

    fn create_file(
        &self,
        dir: &FileIdentity,
        relative_path: &str,
        _mime_type: Option<&str>,
    ) -> Result<FileIdentity> {
        let base = Self::path_of(dir)?;
        let rel = split_relative_path(relative_path)?;
        Self::expect_kind(dir, &base, EntryKind::Dir)?;

        let create_failed = |name: &str, source: anyhow::Error| StorageError::CreateFailed {
            dir: dir.uri().to_string(),
            name: name.to_string(),
            source,
        };

        let parent = rel.dirs.iter().fold(base, |p, segment| p.join(segment));
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create directories {}", parent.display()))
            .map_err(|e| create_failed(rel.file_name, e))?;

        // Never overwrite: try name, name(1), name(2), ... until one is free
        let mut n = 0u64;
        loop {
            let candidate = if n == 0 {
                rel.file_name.to_string()
            } else {
                numbered_name(rel.file_name, n)
            };
            let target = parent.join(&candidate);
            match fs::OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(_) => {
                    info!("created {}", target.display());
                    return Ok(FileIdentity::from_path(&target));
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    debug!("{} exists, trying next name", target.display());
                    n += 1;
                }
                Err(e) => return Err(create_failed(&candidate, e.into())),
            }
        }
    }

    fn delete_file(&self, identity: &FileIdentity) -> Result<()> {
        let path = Self::path_of(identity)?;
        Self::expect_own_kind(identity, &path, EntryKind::File)?;
        fs::remove_file(&path)
            .map_err(anyhow::Error::from)
            .map_err(Self::delete_failed(identity))?;
        info!("deleted file {}", path.display());
        Ok(())
    }

    fn delete_empty_dir(&self, identity: &FileIdentity) -> Result<()> {
        let path = Self::path_of(identity)?;
        Self::expect_own_kind(identity, &path, EntryKind::Dir)?;

        let mut children = fs::read_dir(&path).map_err(StorageError::io(&path))?;
        if children.next().is_some() {
            return Err(StorageError::DirectoryNotEmpty {
                uri: identity.uri().to_string(),
            });
        }
        fs::remove_dir(&path)
            .map_err(anyhow::Error::from)
            .map_err(Self::delete_failed(identity))?;
        info!("deleted empty directory {}", path.display());
        Ok(())
    }

    fn delete_dir_all(&self, identity: &FileIdentity) -> Result<()> {
        let path = Self::path_of(identity)?;
        Self::expect_own_kind(identity, &path, EntryKind::Dir)?;
        remove_tree(&path).map_err(Self::delete_failed(identity))?;
        info!("deleted directory tree {}", path.display());
        Ok(())
    }

    fn read(&self, identity: &FileIdentity) -> Result<Vec<u8>> {
        let path = Self::path_of(identity)?;
        Self::expect_kind(identity, &path, EntryKind::File)?;
        fs::read(&path).map_err(StorageError::io(&path))
    }

    fn write(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        let path = Self::path_of(identity)?;
        let mut file = Self::open_existing(identity, &path, WriteMode::Truncate)?;
        file.write_all(data).map_err(StorageError::io(&path))?;
        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn append(&self, identity: &FileIdentity, data: &[u8]) -> Result<()> {
        let path = Self::path_of(identity)?;
        let mut file = Self::open_existing(identity, &path, WriteMode::Append)?;
        file.write_all(data).map_err(StorageError::io(&path))?;
        debug!("appended {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn get_metadata(&self, identity: &FileIdentity) -> Result<Metadata> {
        let path = Self::path_of(identity)?;
        let kind = Self::kind_of(identity, &path)?;
        let meta = fs::metadata(&path)
            .or_else(|_| fs::symlink_metadata(&path))
            .map_err(StorageError::io(&path))?;
        Ok(Metadata {
            kind,
            byte_size: (kind == EntryKind::File).then_some(meta.len()),
            last_modified: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }

    fn take_grant(&self, identity: &FileIdentity) -> Result<()> {
        debug!("raw identity {} needs no grant", identity);
        Ok(())
    }

    /// Filesystem access is not a revocable grant; report whether the path is reachable
    fn check_grant(&self, identity: &FileIdentity, _mode: GrantMode) -> Result<bool> {
        let path = Self::path_of(identity)?;
        Ok(path.exists())
    }

    fn release_grant(&self, identity: &FileIdentity) -> Result<()> {
        debug!("raw identity {} holds no grant", identity);
        Ok(())
    }
}

/// Depth-first removal with an explicit stack. Stops at the first failure;
/// whatever was already removed stays removed. Symlinks are unlinked, never
/// followed, and a symlinked root is refused.
fn remove_tree(root: &Path) -> anyhow::Result<()> {
    let root_type = fs::symlink_metadata(root)
        .with_context(|| format!("failed to stat {}", root.display()))?
        .file_type();
    if !root_type.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let mut stack = vec![(root.to_path_buf(), false)];
    while let Some((dir, expanded)) = stack.pop() {
        if expanded {
            fs::remove_dir(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
            continue;
        }
        stack.push((dir.clone(), true));
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push((path, false));
            } else {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn controller() -> RawFileController {
        RawFileController::new("application/octet-stream")
    }

    #[test]
    fn test_create_twice_suffixes_before_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileIdentity::from_path(tmp.path());
        let c = controller();

        let first = c.create_file(&dir, "report.txt", None).unwrap();
        let second = c.create_file(&dir, "report.txt", None).unwrap();
        assert_ne!(first, second);
        assert_eq!(c.get_name(&first).unwrap(), "report.txt");
        assert_eq!(c.get_name(&second).unwrap(), "report(1).txt");
        assert!(tmp.path().join("report.txt").is_file());
        assert!(tmp.path().join("report(1).txt").is_file());

        let third = c.create_file(&dir, "report.txt", None).unwrap();
        assert_eq!(c.get_name(&third).unwrap(), "report(2).txt");
    }

    #[test]
    fn test_create_never_overwrites_contents() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.bin"), b"keep").unwrap();
        let dir = FileIdentity::from_path(tmp.path());

        controller().create_file(&dir, "a.bin", None).unwrap();
        assert_eq!(fs::read(tmp.path().join("a.bin")).unwrap(), b"keep");
    }

    #[test]
    fn test_create_nested_makes_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileIdentity::from_path(tmp.path());
        let id = controller().create_file(&dir, "x/y/z.md", None).unwrap();
        assert_eq!(id.to_path().unwrap(), tmp.path().join("x/y/z.md"));
    }

    #[test]
    fn test_directory_has_no_mime() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("pic.png"), b"").unwrap();
        let c = controller();

        let sub = FileIdentity::from_path(tmp.path().join("sub"));
        assert_eq!(c.get_mime_type(&sub).unwrap(), None);
        let pic = FileIdentity::from_path(tmp.path().join("pic.png"));
        assert_eq!(c.get_mime_type(&pic).unwrap().as_deref(), Some("image/png"));

        let entries = c.read_dir(&FileIdentity::from_path(tmp.path())).unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            match entry {
                Entry::Dir { name, .. } => assert_eq!(name, "sub"),
                Entry::File { name, mime_type, .. } => {
                    assert_eq!(name, "pic.png");
                    assert_eq!(mime_type, "image/png");
                }
            }
        }
    }

    #[test]
    fn test_delete_file_on_directory_is_type_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let sub = FileIdentity::from_path(tmp.path().join("sub"));

        let err = controller().delete_file(&sub).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(tmp.path().join("sub").is_dir());
    }

    #[test]
    fn test_delete_empty_dir_refuses_non_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/child.txt"), b"x").unwrap();
        let sub = FileIdentity::from_path(tmp.path().join("sub"));
        let c = controller();

        let err = c.delete_empty_dir(&sub).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryNotEmpty);
        assert!(tmp.path().join("sub/child.txt").is_file());

        fs::remove_file(tmp.path().join("sub/child.txt")).unwrap();
        c.delete_empty_dir(&sub).unwrap();
        assert!(!tmp.path().join("sub").exists());
    }

    #[test]
    fn test_delete_dir_all_removes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/one.txt"), b"1").unwrap();
        fs::write(root.join("a/b/c/two.txt"), b"2").unwrap();
        let c = controller();

        let file = FileIdentity::from_path(root.join("a/one.txt"));
        assert_eq!(c.delete_dir_all(&file).unwrap_err().kind(), ErrorKind::TypeMismatch);

        c.delete_dir_all(&FileIdentity::from_path(&root)).unwrap();
        assert!(!root.exists());
        assert!(tmp.path().exists());
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let ghost = FileIdentity::from_path(tmp.path().join("ghost"));
        assert_eq!(controller().get_name(&ghost).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_read_write_and_grants() {
        let tmp = tempfile::tempdir().unwrap();
        let c = controller();
        let id = c
            .create_file(&FileIdentity::from_path(tmp.path()), "notes.txt", None)
            .unwrap();
        c.write(&id, b"hello").unwrap();
        assert_eq!(c.read(&id).unwrap(), b"hello");

        c.take_grant(&id).unwrap();
        assert!(c.check_grant(&id, GrantMode::ReadAndWrite).unwrap());
        c.release_grant(&id).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_unlinked_not_descended() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("precious.txt"), b"keep").unwrap();
        fs::create_dir(tmp.path().join("app")).unwrap();
        let link_path = tmp.path().join("app/link");
        std::os::unix::fs::symlink(&outside, &link_path).unwrap();
        let link = FileIdentity::from_path(&link_path);
        let c = controller();

        // reads still see through the link
        assert_eq!(c.read_dir(&link).unwrap().len(), 1);

        let err = c.delete_dir_all(&link).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(c.delete_empty_dir(&link).unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert!(outside.join("precious.txt").is_file());

        c.delete_file(&link).unwrap();
        assert!(fs::symlink_metadata(&link_path).is_err());
        assert_eq!(fs::read(outside.join("precious.txt")).unwrap(), b"keep");
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_dir_all_unlinks_nested_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("precious.txt"), b"keep").unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("sub/link")).unwrap();

        controller().delete_dir_all(&FileIdentity::from_path(&root)).unwrap();
        assert!(!root.exists());
        assert!(outside.join("precious.txt").is_file());
    }

    #[test]
    fn test_write_never_creates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ghost = FileIdentity::from_path(tmp.path().join("ghost.txt"));
        let c = controller();

        assert_eq!(c.write(&ghost, b"x").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(c.append(&ghost, b"x").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!tmp.path().join("ghost.txt").exists());

        let dir = FileIdentity::from_path(tmp.path());
        assert_eq!(c.write(&dir, b"x").unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_append_and_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let c = controller();
        let dir = FileIdentity::from_path(tmp.path());
        let id = c.create_file(&dir, "log.txt", None).unwrap();

        c.write(&id, b"one\n").unwrap();
        c.append(&id, b"two\n").unwrap();
        assert_eq!(c.read(&id).unwrap(), b"one\ntwo\n");

        let meta = c.get_metadata(&id).unwrap();
        assert_eq!(meta.kind, EntryKind::File);
        assert_eq!(meta.byte_size, Some(8));
        assert!(meta.last_modified > UNIX_EPOCH);

        let dir_meta = c.get_metadata(&dir).unwrap();
        assert_eq!(dir_meta.kind, EntryKind::Dir);
        assert_eq!(dir_meta.byte_size, None);

        c.write(&id, b"reset").unwrap();
        assert_eq!(c.get_metadata(&id).unwrap().byte_size, Some(5));

        let ghost = FileIdentity::from_path(tmp.path().join("ghost"));
        assert_eq!(c.get_metadata(&ghost).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
