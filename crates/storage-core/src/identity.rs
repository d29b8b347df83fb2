use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_platform::documents::{build_document_uri_using_tree, is_tree_uri, tree_document_id};

const FILE_PREFIX: &str = "file://";

/// Address of a file or directory in any of the storage subsystems.
///
/// `uri` is opaque outside the controller that owns it. When `owning_tree_uri`
/// is set, `uri` is a document inside that tree and the tree decides which
/// grant applies. Identities never hold an open resource.
///
/// JSON form: `{"uri":"content://...","documentTopTreeUri":null}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    uri: String,

    #[serde(rename = "documentTopTreeUri", alias = "owningTreeUri", default)]
    owning_tree_uri: Option<String>,
}

impl FileIdentity {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            owning_tree_uri: None,
        }
    }

    pub fn with_tree(uri: impl Into<String>, owning_tree_uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            owning_tree_uri: Some(owning_tree_uri.into()),
        }
    }

    /// The root directory of a tree, as returned by a directory picker
    pub fn from_tree_uri(tree_uri: &str) -> Option<Self> {
        if !is_tree_uri(tree_uri) {
            return None;
        }
        let root = tree_document_id(tree_uri)?;
        let uri = build_document_uri_using_tree(tree_uri, &root)?;
        Some(Self::with_tree(uri, tree_uri))
    }

    /// `file://` identity for a filesystem path; relative paths are made absolute
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let encoded: Vec<String> = path
            .to_string_lossy()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        Self::new(format!("{}{}", FILE_PREFIX, encoded.join("/")))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn owning_tree_uri(&self) -> Option<&str> {
        self.owning_tree_uri.as_deref()
    }

    /// URI scheme, e.g. `content` or `file`
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.uri.split_once(':')?;
        let valid = scheme
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then_some(scheme)
    }

    /// Filesystem path of a `file://` identity
    pub fn to_path(&self) -> Option<PathBuf> {
        let rest = self.uri.strip_prefix(FILE_PREFIX)?;
        let decoded = urlencoding::decode(rest).ok()?;
        if decoded.is_empty() {
            return None;
        }
        Some(PathBuf::from(decoded.into_owned()))
    }

    /// The URI persisted grants are keyed by: the owning tree if any, else the URI itself
    pub fn grant_uri(&self) -> &str {
        self.owning_tree_uri.as_deref().unwrap_or(&self.uri)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the JSON form; a bare URI string is accepted as an identity without tree
    pub fn from_json_str(value: &str) -> serde_json::Result<Self> {
        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            serde_json::from_str(trimmed)
        } else {
            Ok(Self::new(trimmed))
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owning_tree_uri {
            Some(tree) => write!(f, "{} (tree {})", self.uri, tree),
            None => f.write_str(&self.uri),
        }
    }
}
