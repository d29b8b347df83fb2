use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use storage_platform::documents::{
    build_document_uri, build_document_uri_using_tree, DocumentProvider, DocumentRow, DocumentUri,
    Page, PageRequest, DIR_MIME_TYPE, EXTERNAL_STORAGE_AUTHORITY,
};

use crate::{now_millis, unique_display_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentNode {
    name: String,
    mime_type: String,
    parent: Option<String>,
    last_modified: u64,
    #[serde(default)]
    data: Vec<u8>,
}

/// Serializable contents of a [`MemoryDocumentProvider`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentState {
    nodes: BTreeMap<String, DocumentNode>,
    #[serde(default)]
    refused_parents: BTreeSet<String>,
}

/// Shared-storage document provider with path-shaped document ids
/// (`primary:` for the volume root, `primary:Download/a.txt` below it).
pub struct MemoryDocumentProvider {
    authority: String,
    state: Mutex<DocumentState>,
}

impl MemoryDocumentProvider {
    pub fn new() -> Self {
        Self::with_state(DocumentState::default())
    }

    pub fn with_state(state: DocumentState) -> Self {
        Self {
            authority: EXTERNAL_STORAGE_AUTHORITY.to_string(),
            state: Mutex::new(state),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn snapshot(&self) -> Result<DocumentState> {
        Ok(self.lock()?.clone())
    }

    /// Register a volume root such as `primary:`
    pub fn add_root(&self, root_id: &str, name: &str) -> Result<()> {
        if !root_id.ends_with(':') {
            bail!("root document id must end with ':' (got {})", root_id);
        }
        let mut state = self.lock()?;
        state.nodes.entry(root_id.to_string()).or_insert_with(|| DocumentNode {
            name: name.to_string(),
            mime_type: DIR_MIME_TYPE.to_string(),
            parent: None,
            last_modified: now_millis(),
            data: Vec::new(),
        });
        Ok(())
    }

    /// Make sure every directory along `document_id` exists; the root must already be registered
    pub fn ensure_dir(&self, document_id: &str) -> Result<()> {
        let (root, path) = split_root(document_id)?;
        let mut state = self.lock()?;
        if !state.nodes.contains_key(root) {
            bail!("unknown root {}", root);
        }

        let mut parent = root.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let id = child_id(&parent, segment);
            match state.nodes.get(&id) {
                Some(node) if node.mime_type != DIR_MIME_TYPE => {
                    bail!("{} exists and is not a directory", id)
                }
                Some(_) => {}
                None => {
                    state.nodes.insert(
                        id.clone(),
                        DocumentNode {
                            name: segment.to_string(),
                            mime_type: DIR_MIME_TYPE.to_string(),
                            parent: Some(parent.clone()),
                            last_modified: now_millis(),
                            data: Vec::new(),
                        },
                    );
                }
            }
            parent = id;
        }
        Ok(())
    }

    /// Make the provider refuse every creation directly below `document_id`
    pub fn refuse_creation_in(&self, document_id: &str) -> Result<()> {
        self.lock()?.refused_parents.insert(document_id.to_string());
        Ok(())
    }

    pub fn contains(&self, document_id: &str) -> Result<bool> {
        Ok(self.lock()?.nodes.contains_key(document_id))
    }

    pub fn document_count(&self) -> Result<usize> {
        Ok(self.lock()?.nodes.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, DocumentState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("document provider state poisoned"))
    }

    /// Resolve a document URI of this provider to its id, enforcing tree scope
    fn resolve(&self, uri: &str) -> Result<DocumentUri> {
        let parsed = DocumentUri::parse(uri).ok_or_else(|| anyhow!("not a document URI: {}", uri))?;
        if parsed.authority != self.authority {
            bail!("unknown authority {}", parsed.authority);
        }
        let doc = parsed
            .document_id
            .as_deref()
            .ok_or_else(|| anyhow!("URI names no document: {}", uri))?;
        if let Some(tree) = parsed.tree_id.as_deref() {
            if !is_within(tree, doc) {
                bail!("document {} is outside tree {}", doc, tree);
            }
        }
        Ok(parsed)
    }

    fn update_data(&self, uri: &str, edit: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let parsed = self.resolve(uri)?;
        let id = parsed.document_id.unwrap_or_default();
        let mut state = self.lock()?;
        match state.nodes.get_mut(&id) {
            Some(node) if node.mime_type == DIR_MIME_TYPE => bail!("{} is a directory", id),
            Some(node) => {
                edit(&mut node.data);
                node.last_modified = now_millis();
                Ok(())
            }
            None => bail!("no such document {}", id),
        }
    }
}

impl Default for MemoryDocumentProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProvider for MemoryDocumentProvider {
    fn serves_authority(&self, authority: &str) -> bool {
        authority == self.authority
    }

    fn query_document(&self, uri: &str) -> Result<Option<DocumentRow>> {
        let parsed = self.resolve(uri)?;
        let id = parsed.document_id.unwrap_or_default();
        let state = self.lock()?;
        Ok(state.nodes.get(&id).map(|node| to_row(&id, node)))
    }

    fn query_children(&self, children_uri: &str, page: PageRequest) -> Result<Page<DocumentRow>> {
        let parsed = self.resolve(children_uri)?;
        if !parsed.children {
            bail!("not a children URI: {}", children_uri);
        }
        let parent = parsed.document_id.unwrap_or_default();
        let state = self.lock()?;
        match state.nodes.get(&parent) {
            Some(node) if node.mime_type == DIR_MIME_TYPE => {}
            Some(_) => bail!("{} is not a directory", parent),
            None => bail!("no such document {}", parent),
        }

        let mut children = state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(parent.as_str()));
        let rows: Vec<DocumentRow> = children
            .by_ref()
            .skip(page.offset)
            .take(page.limit)
            .map(|(id, node)| to_row(id, node))
            .collect();
        let has_more = children.next().is_some();

        debug!(
            "children of {}: {} rows (offset {}, more: {})",
            parent,
            rows.len(),
            page.offset,
            has_more
        );
        Ok(Page { rows, has_more })
    }

    fn create_document(
        &self,
        parent_uri: &str,
        mime_type: &str,
        display_name: &str,
    ) -> Result<Option<String>> {
        let parsed = self.resolve(parent_uri)?;
        let parent = parsed.document_id.clone().unwrap_or_default();
        if display_name.is_empty() || display_name.contains('/') {
            bail!("invalid display name {:?}", display_name);
        }

        let mut state = self.lock()?;
        match state.nodes.get(&parent) {
            Some(node) if node.mime_type == DIR_MIME_TYPE => {}
            Some(_) => bail!("parent {} is not a directory", parent),
            None => bail!("no such document {}", parent),
        }
        if state.refused_parents.contains(&parent) {
            return Ok(None);
        }

        let name = unique_display_name(display_name, |candidate| {
            state.nodes.contains_key(&child_id(&parent, candidate))
        });
        let id = child_id(&parent, &name);
        state.nodes.insert(
            id.clone(),
            DocumentNode {
                name,
                mime_type: mime_type.to_string(),
                parent: Some(parent.clone()),
                last_modified: now_millis(),
                data: Vec::new(),
            },
        );

        let uri = match parsed.tree_id.as_deref() {
            Some(_) => build_document_uri_using_tree(parent_uri, &id)
                .context("parent URI lost its tree")?,
            None => build_document_uri(&self.authority, &id),
        };
        Ok(Some(uri))
    }

    fn delete_document(&self, uri: &str) -> Result<()> {
        let parsed = self.resolve(uri)?;
        let id = parsed.document_id.unwrap_or_default();
        let mut state = self.lock()?;
        match state.nodes.get(&id) {
            None => bail!("no such document {}", id),
            Some(node) if node.parent.is_none() => bail!("cannot delete root {}", id),
            Some(_) => {}
        }
        state.nodes.retain(|key, _| key != &id && !is_within(&id, key));
        Ok(())
    }

    fn read_document(&self, uri: &str) -> Result<Vec<u8>> {
        let parsed = self.resolve(uri)?;
        let id = parsed.document_id.unwrap_or_default();
        let state = self.lock()?;
        match state.nodes.get(&id) {
            Some(node) if node.mime_type == DIR_MIME_TYPE => bail!("{} is a directory", id),
            Some(node) => Ok(node.data.clone()),
            None => bail!("no such document {}", id),
        }
    }

    fn write_document(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.update_data(uri, |stored| *stored = data.to_vec())
    }

    fn append_document(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.update_data(uri, |stored| stored.extend_from_slice(data))
    }
}

fn to_row(id: &str, node: &DocumentNode) -> DocumentRow {
    let is_dir = node.mime_type == DIR_MIME_TYPE;
    DocumentRow {
        document_id: id.to_string(),
        display_name: node.name.clone(),
        mime_type: node.mime_type.clone(),
        last_modified: Some(node.last_modified),
        size: if is_dir { None } else { Some(node.data.len() as u64) },
    }
}

fn child_id(parent: &str, name: &str) -> String {
    if parent.ends_with(':') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True if `doc` is `tree` or lies below it
fn is_within(tree: &str, doc: &str) -> bool {
    if doc == tree {
        return true;
    }
    if tree.ends_with(':') {
        return doc.starts_with(tree);
    }
    doc.strip_prefix(tree)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn split_root(document_id: &str) -> Result<(&str, &str)> {
    let colon = document_id
        .find(':')
        .ok_or_else(|| anyhow!("document id {} has no root", document_id))?;
    Ok(document_id.split_at(colon + 1))
}
