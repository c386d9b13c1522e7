//! A single watched folder and its reconciliation state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{DirtyListener, ScanDebouncer, WatchError};
use crate::extract::ExtractorRegistry;
use crate::resource::{InstallableResource, ResourceFactory};
use crate::store::{ContentStore, NodeKind, SubscriptionId, SubscriptionSpec, normalize_path};

/// Construction parameters for a watched folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSpec {
    /// Root of the watched subtree.
    pub path: String,
    /// Ranking among folders; must be at least 1.
    pub priority: i64,
    /// Prefix for the identities of resources found here.
    pub url_scheme: String,
}

impl FolderSpec {
    pub fn new(path: impl Into<String>, priority: i64, url_scheme: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            priority,
            url_scheme: url_scheme.into(),
        }
    }
}

/// Outcome of one scan pass.
///
/// A resource that still exists with an unchanged digest appears in neither
/// list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// New resources, and resources whose digest changed.
    pub to_add: Vec<InstallableResource>,
    /// Identities of resources that disappeared.
    pub to_remove: Vec<String>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Watches one subtree of the store and computes what changed since the
/// previous scan.
///
/// Notifications only mark the folder dirty; [`WatchedFolder::scan`] does the
/// actual diffing. `scan` takes `&mut self`, so a folder can never be
/// scanned concurrently with itself.
pub struct WatchedFolder {
    path: String,
    priority: u32,
    url_scheme: String,
    store: Arc<dyn ContentStore>,
    extractors: Arc<ExtractorRegistry>,
    factory: Arc<dyn ResourceFactory>,
    listener: Arc<DirtyListener>,
    subscription: SubscriptionId,
    /// Last returned digest per resource identity.
    digests: HashMap<String, String>,
    /// Identities last reported as present.
    existing: HashSet<String>,
}

impl std::fmt::Debug for WatchedFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchedFolder")
            .field("path", &self.path)
            .field("priority", &self.priority)
            .field("url_scheme", &self.url_scheme)
            .field("subscription", &self.subscription)
            .field("resources", &self.existing.len())
            .finish()
    }
}

impl WatchedFolder {
    /// Start watching `spec.path`.
    ///
    /// Fails without touching the store when the priority is below 1, and
    /// with [`WatchError::Subscription`] when the store rejects the watch.
    pub fn new(
        store: Arc<dyn ContentStore>,
        spec: &FolderSpec,
        extractors: Arc<ExtractorRegistry>,
        factory: Arc<dyn ResourceFactory>,
        scheduler: Arc<ScanDebouncer>,
    ) -> Result<Self, WatchError> {
        let priority = match u32::try_from(spec.priority) {
            Ok(priority) if priority >= 1 => priority,
            _ => {
                return Err(WatchError::InvalidPriority {
                    path: spec.path.clone(),
                    priority: spec.priority,
                });
            }
        };
        let path = normalize_path(&spec.path).map_err(|source| WatchError::Subscription {
            path: spec.path.clone(),
            source,
        })?;

        let listener = Arc::new(DirtyListener::new(path.clone(), scheduler));
        let subscription = store
            .subscribe(SubscriptionSpec::subtree(path.clone()), listener.clone())
            .map_err(|source| WatchError::Subscription {
                path: path.clone(),
                source,
            })?;

        crate::log_event!("watcher", "watching", "{path} (priority {priority})");

        Ok(Self {
            path,
            priority,
            url_scheme: spec.url_scheme.clone(),
            store,
            extractors,
            factory,
            listener,
            subscription,
            digests: HashMap::new(),
            existing: HashSet::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn url_scheme(&self) -> &str {
        &self.url_scheme
    }

    /// Whether a change was seen since the last scan started.
    pub fn needs_scan(&self) -> bool {
        self.listener.is_dirty()
    }

    /// Request a scan as if a change had been observed.
    pub fn mark_dirty(&self) {
        crate::debug_event!("watcher", "scheduling scan", "{}", self.path);
        self.listener.mark_dirty();
    }

    /// Identities currently believed to exist.
    pub fn known_resources(&self) -> impl Iterator<Item = &str> {
        self.existing.iter().map(String::as_str)
    }

    /// Last recorded digest for a resource identity.
    pub fn digest_of(&self, url: &str) -> Option<&str> {
        self.digests.get(url).map(String::as_str)
    }

    /// Undo the bookkeeping of a scan result that never reached the
    /// installer, and mark the folder dirty.
    ///
    /// Added identities lose their digest and removed ones are known again,
    /// so the next scan reports each of them afresh: as added if the node
    /// is present, as removed if it is not.
    pub fn requeue(&mut self, result: &ScanResult) {
        for resource in &result.to_add {
            self.digests.remove(&resource.url);
            self.existing.insert(resource.url.clone());
        }
        for url in &result.to_remove {
            self.existing.insert(url.clone());
        }
        crate::debug_event!(
            "watcher",
            "requeued",
            "{}: {} add(s), {} removal(s)",
            self.path,
            result.to_add.len(),
            result.to_remove.len()
        );
        self.mark_dirty();
    }

    /// Compare the subtree against what was last reported.
    ///
    /// A missing root, or a root that is not a container, scans as empty so
    /// every previously known resource is reported removed.
    ///
    /// Store failures abort the pass. Known state is only updated once every
    /// child has been extracted, so an aborted pass leaves it untouched and
    /// a retry is safe.
    pub fn scan(&mut self) -> Result<ScanResult, WatchError> {
        crate::debug_event!("watcher", "scanning", "{}", self.path);

        // Cleared before reading, so changes landing mid-scan trigger another pass.
        self.listener.clear();

        let scan_error = |source| WatchError::Scan {
            path: self.path.clone(),
            source,
        };
        let children = match self.store.item(&self.path).map_err(scan_error)? {
            Some(NodeKind::Container) => self.store.children(&self.path).map_err(scan_error)?,
            _ => Vec::new(),
        };

        let mut result = ScanResult::default();
        let mut seen = HashSet::new();
        for child in &children {
            let Some(resource) = self.extractors.extract(
                &self.url_scheme,
                child,
                self.priority,
                self.factory.as_ref(),
            )?
            else {
                continue;
            };

            seen.insert(resource.url.clone());
            if self.digests.get(&resource.url) == Some(&resource.digest) {
                crate::debug_event!("watcher", "digest unchanged", "{}", resource.url);
            } else {
                result.to_add.push(resource);
            }
        }

        result.to_remove = self
            .existing
            .iter()
            .filter(|url| !seen.contains(*url))
            .cloned()
            .collect();
        result.to_remove.sort();
        for url in &result.to_remove {
            self.existing.remove(url);
            self.digests.remove(url);
        }

        for resource in &result.to_add {
            self.existing.insert(resource.url.clone());
            self.digests
                .insert(resource.url.clone(), resource.digest.clone());
        }

        if !result.is_empty() {
            crate::log_event!(
                "watcher",
                "scanned",
                "{}: {} to add, {} to remove",
                self.path,
                result.to_add.len(),
                result.to_remove.len()
            );
        }
        Ok(result)
    }
}

impl Drop for WatchedFolder {
    fn drop(&mut self) {
        if let Err(e) = self.store.unsubscribe(self.subscription) {
            tracing::warn!("[watcher] failed to stop watching {}: {e}", self.path);
        } else {
            crate::debug_event!("watcher", "stopped", "{}", self.path);
        }
    }
}
