//! Content store boundary.
//!
//! A content store is a hierarchical tree of nodes addressed by absolute,
//! `/`-separated paths. Watchers only read from it and subscribe to its
//! change notifications; they never write.
//!
//! Two adapters are provided:
//! - [`memory`] - an in-process tree with sessions and synchronous dispatch
//! - [`fs`] - a directory on disk, observed through `notify`

mod error;
mod events;
pub mod fs;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use events::{
    ChangeEvent, ChangeListener, EventMask, SessionId, SubscriptionId, SubscriptionSpec,
};

/// Whether a node can have children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Container,
    Leaf,
}

/// Snapshot of a single node, as returned by [`ContentStore::children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub properties: BTreeMap<String, String>,
    /// Payload of a leaf node.
    pub content: Option<Vec<u8>>,
}

impl Node {
    pub fn container(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: node_name(&path).to_string(),
            path,
            kind: NodeKind::Container,
            properties: BTreeMap::new(),
            content: None,
        }
    }

    pub fn leaf(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let path = path.into();
        Self {
            name: node_name(&path).to_string(),
            path,
            kind: NodeKind::Leaf,
            properties: BTreeMap::new(),
            content: Some(content.into()),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind == NodeKind::Container
    }
}

/// Read and observe access to a content tree.
///
/// All methods take `&self`; implementations are shared by many watchers
/// and synchronize internally.
pub trait ContentStore: Send + Sync {
    /// Session this handle acts as. Used for `no_local` suppression.
    fn session_id(&self) -> SessionId;

    /// Resolve `path`, returning `None` when nothing exists there.
    fn item(&self, path: &str) -> StoreResult<Option<NodeKind>>;

    /// Direct children of the container at `path`, in a stable order.
    fn children(&self, path: &str) -> StoreResult<Vec<Node>>;

    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        listener: Arc<dyn ChangeListener>,
    ) -> StoreResult<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()>;
}

/// Validate an absolute store path and strip a trailing slash.
pub fn normalize_path(path: &str) -> StoreResult<String> {
    if !path.starts_with('/') {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "must be absolute".to_string(),
        });
    }
    if path == "/" {
        return Ok(path.to_string());
    }
    let trimmed = path.trim_end_matches('/');
    for segment in trimmed[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: format!("invalid segment '{segment}'"),
            });
        }
    }
    Ok(trimmed.to_string())
}

/// Parent of a normalized path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Append a child segment to a normalized path.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("/apps/install/").unwrap(), "/apps/install");
        assert!(normalize_path("apps").is_err());
        assert!(normalize_path("/apps//install").is_err());
        assert!(normalize_path("/apps/../etc").is_err());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_path("/apps/install"), Some("/apps"));
        assert_eq!(parent_path("/apps"), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(node_name("/apps/install"), "install");
        assert_eq!(child_path("/", "apps"), "/apps");
        assert_eq!(child_path("/apps", "install"), "/apps/install");
    }
}
