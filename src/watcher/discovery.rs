//! Discovery of folders to watch under configured roots.
//!
//! Roots are searched for containers whose name matches a pattern. Each
//! root is also watched for structural changes so that folders created
//! later get picked up on the next sweep.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{DirtyListener, FolderSpec, ScanDebouncer, WatchError};
use crate::store::{ContentStore, EventMask, NodeKind, SubscriptionId, SubscriptionSpec};

/// A subtree searched for watchable folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSpec {
    pub path: String,
    /// Priority given to every folder found under this root.
    pub priority: i64,
}

struct RootWatch {
    path: String,
    priority: i64,
    listener: Arc<DirtyListener>,
    subscription: Option<SubscriptionId>,
}

/// Finds watch folders under a set of roots.
pub struct FolderDiscovery {
    store: Arc<dyn ContentStore>,
    roots: Vec<RootWatch>,
    pattern: Regex,
    url_scheme: String,
}

impl std::fmt::Debug for FolderDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderDiscovery")
            .field("roots", &self.roots.iter().map(|r| &r.path).collect::<Vec<_>>())
            .field("pattern", &self.pattern.as_str())
            .field("url_scheme", &self.url_scheme)
            .finish()
    }
}

impl FolderDiscovery {
    /// Subscribe to every root. A root the store refuses to watch is still
    /// searched, it just will not trigger rediscovery on its own.
    pub fn new(
        store: Arc<dyn ContentStore>,
        roots: &[RootSpec],
        pattern: Regex,
        url_scheme: impl Into<String>,
        scheduler: Arc<ScanDebouncer>,
    ) -> Self {
        let roots = roots
            .iter()
            .map(|root| {
                let listener = Arc::new(DirtyListener::new(root.path.clone(), scheduler.clone()));
                let spec = SubscriptionSpec {
                    path: root.path.clone(),
                    deep: true,
                    mask: EventMask::STRUCTURE,
                    no_local: true,
                };
                let subscription = match store.subscribe(spec, listener.clone()) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!("[discovery] cannot watch root {}: {e}", root.path);
                        None
                    }
                };
                RootWatch {
                    path: root.path.clone(),
                    priority: root.priority,
                    listener,
                    subscription,
                }
            })
            .collect();

        Self {
            store,
            roots,
            pattern,
            url_scheme: url_scheme.into(),
        }
    }

    /// Whether any root saw a structural change since the last discovery.
    pub fn needs_scan(&self) -> bool {
        self.roots.iter().any(|root| root.listener.is_dirty())
    }

    /// Force the next [`needs_scan`](Self::needs_scan) to report true.
    pub fn mark_all_dirty(&self) {
        for root in &self.roots {
            root.listener.mark_dirty();
        }
    }

    /// Walk every root and return the folders found, in root order.
    ///
    /// Matched folders are not descended into. Missing roots contribute
    /// nothing.
    pub fn discover(&self) -> Result<Vec<FolderSpec>, WatchError> {
        for root in &self.roots {
            root.listener.clear();
        }

        let mut found = Vec::new();
        for root in &self.roots {
            let scan_error = |source| WatchError::Scan {
                path: root.path.clone(),
                source,
            };
            if self.store.item(&root.path).map_err(scan_error)? != Some(NodeKind::Container) {
                crate::debug_event!("discovery", "missing root", "{}", root.path);
                continue;
            }

            let mut pending = vec![root.path.clone()];
            while let Some(dir) = pending.pop() {
                let mut children = self.store.children(&dir).map_err(scan_error)?;
                // Reverse so the stack pops in store order.
                children.reverse();
                for child in children.into_iter().filter(|c| c.is_container()) {
                    if self.pattern.is_match(&child.name) {
                        found.push(FolderSpec::new(child.path, root.priority, &self.url_scheme));
                    } else {
                        pending.push(child.path);
                    }
                }
            }
        }

        crate::debug_event!("discovery", "found", "{} folder(s)", found.len());
        Ok(found)
    }
}

impl Drop for FolderDiscovery {
    fn drop(&mut self) {
        for root in &self.roots {
            let Some(id) = root.subscription else {
                continue;
            };
            if let Err(e) = self.store.unsubscribe(id) {
                tracing::warn!("[discovery] failed to stop watching {}: {e}", root.path);
            }
        }
    }
}
