use anyhow::Result;
use serde::{Deserialize, Serialize};

/// MIME type a document provider reports for directory rows
pub const DIR_MIME_TYPE: &str = "vnd.android.document/directory";

/// Authority of the primary shared-storage document provider
pub const EXTERNAL_STORAGE_AUTHORITY: &str = "com.android.externalstorage.documents";

const CONTENT_PREFIX: &str = "content://";

/// One row of a document metadata query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub document_id: String,
    pub display_name: String,
    pub mime_type: String,
    /// Milliseconds since the Unix epoch, if the provider reports it
    pub last_modified: Option<u64>,
    pub size: Option<u64>,
}

impl DocumentRow {
    pub fn is_dir(&self) -> bool {
        self.mime_type == DIR_MIME_TYPE
    }
}

/// Window into a child listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Rows returned for one [`PageRequest`]
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub has_more: bool,
}

/// Hierarchical document trees with cursor-style child enumeration.
///
/// All URIs are document URIs as produced by the `build_*` helpers in this module.
pub trait DocumentProvider: Send + Sync {
    /// Whether this provider serves documents under `authority`
    fn serves_authority(&self, authority: &str) -> bool;

    /// Whether `uri` names a single document of this provider (tree roots alone do not)
    fn is_document_uri(&self, uri: &str) -> bool {
        DocumentUri::parse(uri)
            .map(|d| d.document_id.is_some() && !d.children && self.serves_authority(&d.authority))
            .unwrap_or(false)
    }

    fn query_document(&self, uri: &str) -> Result<Option<DocumentRow>>;

    /// Query one page of the children of the document named by a children URI
    fn query_children(&self, children_uri: &str, page: PageRequest) -> Result<Page<DocumentRow>>;

    /// Create a document under `parent_uri`, returning its URI, or `None` if the provider refused
    fn create_document(
        &self,
        parent_uri: &str,
        mime_type: &str,
        display_name: &str,
    ) -> Result<Option<String>>;

    /// Delete a document (and, for directories, everything below it)
    fn delete_document(&self, uri: &str) -> Result<()>;

    fn read_document(&self, uri: &str) -> Result<Vec<u8>>;

    /// Replace the contents of a document
    fn write_document(&self, uri: &str, data: &[u8]) -> Result<()>;

    /// Add to the end of a document (open mode `wa`)
    fn append_document(&self, uri: &str, data: &[u8]) -> Result<()>;
}

/// Parsed form of a document, tree, or children URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUri {
    pub authority: String,
    pub tree_id: Option<String>,
    pub document_id: Option<String>,
    pub children: bool,
}

impl DocumentUri {
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(CONTENT_PREFIX)?;
        let mut parts = rest.split('/');
        let authority = parts.next().filter(|a| !a.is_empty())?.to_string();
        let segments: Vec<&str> = parts.collect();

        let (tree_id, document_id, children) = match segments.as_slice() {
            ["tree", tree] => (Some(decode(tree)?), None, false),
            ["tree", tree, "document", doc] => (Some(decode(tree)?), Some(decode(doc)?), false),
            ["tree", tree, "document", doc, "children"] => {
                (Some(decode(tree)?), Some(decode(doc)?), true)
            }
            ["document", doc] => (None, Some(decode(doc)?), false),
            ["document", doc, "children"] => (None, Some(decode(doc)?), true),
            _ => return None,
        };

        Some(Self {
            authority,
            tree_id,
            document_id,
            children,
        })
    }

    pub fn is_tree(&self) -> bool {
        self.tree_id.is_some()
    }

    pub fn to_uri_string(&self) -> String {
        let mut uri = format!("{}{}", CONTENT_PREFIX, self.authority);
        if let Some(tree) = &self.tree_id {
            uri.push_str("/tree/");
            uri.push_str(&urlencoding::encode(tree));
        }
        if let Some(doc) = &self.document_id {
            uri.push_str("/document/");
            uri.push_str(&urlencoding::encode(doc));
        }
        if self.children {
            uri.push_str("/children");
        }
        uri
    }
}

fn decode(segment: &str) -> Option<String> {
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}

/// `content://{authority}/tree/{tree_id}`
pub fn build_tree_uri(authority: &str, tree_id: &str) -> String {
    DocumentUri {
        authority: authority.to_string(),
        tree_id: Some(tree_id.to_string()),
        document_id: None,
        children: false,
    }
    .to_uri_string()
}

/// `content://{authority}/document/{document_id}`
pub fn build_document_uri(authority: &str, document_id: &str) -> String {
    DocumentUri {
        authority: authority.to_string(),
        tree_id: None,
        document_id: Some(document_id.to_string()),
        children: false,
    }
    .to_uri_string()
}

/// Document URI for `document_id`, scoped to the tree of `tree_uri`
pub fn build_document_uri_using_tree(tree_uri: &str, document_id: &str) -> Option<String> {
    let tree = DocumentUri::parse(tree_uri)?;
    Some(
        DocumentUri {
            authority: tree.authority,
            tree_id: Some(tree.tree_id?),
            document_id: Some(document_id.to_string()),
            children: false,
        }
        .to_uri_string(),
    )
}

/// Children listing URI for `parent_document_id`, scoped to the tree of `tree_uri`
pub fn build_child_documents_uri_using_tree(
    tree_uri: &str,
    parent_document_id: &str,
) -> Option<String> {
    let tree = DocumentUri::parse(tree_uri)?;
    Some(
        DocumentUri {
            authority: tree.authority,
            tree_id: Some(tree.tree_id?),
            document_id: Some(parent_document_id.to_string()),
            children: true,
        }
        .to_uri_string(),
    )
}

pub fn document_id(uri: &str) -> Option<String> {
    DocumentUri::parse(uri)?.document_id
}

pub fn tree_document_id(uri: &str) -> Option<String> {
    DocumentUri::parse(uri)?.tree_id
}

/// True for a bare tree URI (`.../tree/{id}` without a document part)
pub fn is_tree_uri(uri: &str) -> bool {
    DocumentUri::parse(uri)
        .map(|d| d.tree_id.is_some() && d.document_id.is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_document_uri_parts() {
        let tree = build_tree_uri(EXTERNAL_STORAGE_AUTHORITY, "primary:Download");
        assert_eq!(
            tree,
            "content://com.android.externalstorage.documents/tree/primary%3ADownload"
        );
        assert!(is_tree_uri(&tree));

        let doc = build_document_uri_using_tree(&tree, "primary:Download/a b").unwrap();
        let parsed = DocumentUri::parse(&doc).unwrap();
        assert_eq!(parsed.tree_id.as_deref(), Some("primary:Download"));
        assert_eq!(parsed.document_id.as_deref(), Some("primary:Download/a b"));
        assert!(!parsed.children);
        assert!(!is_tree_uri(&doc));
    }

    #[test]
    fn test_children_uri() {
        let tree = build_tree_uri("auth", "root");
        let children = build_child_documents_uri_using_tree(&tree, "root/x").unwrap();
        assert_eq!(children, "content://auth/tree/root/document/root%2Fx/children");
        assert!(DocumentUri::parse(&children).unwrap().children);
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(DocumentUri::parse("file:///sdcard/a.txt").is_none());
        assert!(DocumentUri::parse("content://media/external/images/media/3").is_none());
        assert!(DocumentUri::parse("content:///document/x").is_none());
        assert!(build_document_uri_using_tree("content://auth/document/x", "y").is_none());
    }

    #[test]
    fn test_plain_document_uri() {
        let doc = build_document_uri("auth", "primary:a.txt");
        assert_eq!(document_id(&doc).as_deref(), Some("primary:a.txt"));
        assert_eq!(tree_document_id(&doc), None);
    }
}
