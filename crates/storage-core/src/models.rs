use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use storage_platform::grants::GrantFlags;

use crate::identity::FileIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Dir,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Dir => f.write_str("directory"),
        }
    }
}

/// A child found by a directory listing.
///
/// Entries are snapshots taken at listing time and may already be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Entry {
    File {
        name: String,
        identity: FileIdentity,
        mime_type: String,
        last_modified: SystemTime,
        byte_size: u64,
    },
    Dir {
        name: String,
        identity: FileIdentity,
        last_modified: SystemTime,
    },
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File { name, .. } | Entry::Dir { name, .. } => name,
        }
    }

    pub fn identity(&self) -> &FileIdentity {
        match self {
            Entry::File { identity, .. } | Entry::Dir { identity, .. } => identity,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::File { .. } => EntryKind::File,
            Entry::Dir { .. } => EntryKind::Dir,
        }
    }

    pub fn last_modified(&self) -> SystemTime {
        match self {
            Entry::File { last_modified, .. } | Entry::Dir { last_modified, .. } => *last_modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Dir
    }
}

/// Kind, size and modification time of a single file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub kind: EntryKind,
    /// `None` for directories
    pub byte_size: Option<u64>,
    pub last_modified: SystemTime,
}

/// A long-lived grant held in the OS permission table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedGrant {
    pub identity: FileIdentity,
    pub can_read: bool,
    pub can_write: bool,
    /// Covers a whole directory tree rather than a single document
    pub is_tree_grant: bool,
}

/// Access to check a persisted grant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantMode {
    Read,
    Write,
    ReadAndWrite,
}

impl GrantMode {
    pub fn flags(self) -> GrantFlags {
        match self {
            GrantMode::Read => GrantFlags::READ,
            GrantMode::Write => GrantFlags::WRITE,
            GrantMode::ReadAndWrite => GrantFlags::READ_WRITE,
        }
    }
}

/// Preferred thumbnail bounds in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

pub(crate) fn from_millis(millis: Option<u64>) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.unwrap_or(0))
}
