use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Read/write bits of a URI permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GrantFlags {
    pub read: bool,
    pub write: bool,
}

impl GrantFlags {
    pub const READ: GrantFlags = GrantFlags { read: true, write: false };
    pub const WRITE: GrantFlags = GrantFlags { read: false, write: true };
    pub const READ_WRITE: GrantFlags = GrantFlags { read: true, write: true };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    pub fn contains(self, other: GrantFlags) -> bool {
        (self.read || !other.read) && (self.write || !other.write)
    }
}

/// One entry of the OS persisted-permission table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriPermission {
    pub uri: String,
    pub read: bool,
    pub write: bool,
    /// Milliseconds since the Unix epoch
    pub persisted_time: u64,
}

impl UriPermission {
    pub fn flags(&self) -> GrantFlags {
        GrantFlags {
            read: self.read,
            write: self.write,
        }
    }
}

/// The OS table of long-lived URI grants held by this app
pub trait GrantTable: Send + Sync {
    fn persisted_permissions(&self) -> Result<Vec<UriPermission>>;

    /// Persist a grant the app currently holds; fails if the app holds no such grant
    fn take_persistable(&self, uri: &str, flags: GrantFlags) -> Result<()>;

    /// Drop the given bits; fails if they are not persisted for `uri`
    fn release_persistable(&self, uri: &str, flags: GrantFlags) -> Result<()>;
}
