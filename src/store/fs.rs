//! Filesystem-backed content store.
//!
//! Maps a directory on disk onto the content tree: directories are
//! containers, regular files are leaves whose content is the file bytes.
//! Dot-files are invisible.
//!
//! Each subscription owns a dedicated `notify::RecommendedWatcher` and a
//! delivery thread. The watch follows the subscribed path: while it does
//! not exist the nearest existing ancestor is watched instead, and once it
//! is (re)created the watch moves back onto it.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::{
    ChangeEvent, ChangeListener, ContentStore, EventMask, Node, NodeKind, SessionId, StoreError,
    StoreResult, SubscriptionId, SubscriptionSpec, child_path, normalize_path,
};

/// Session id reported by every filesystem store. The adapter never writes,
/// so `no_local` has nothing to suppress.
const FS_SESSION: SessionId = SessionId(0);

type SharedWatcher = Arc<Mutex<RecommendedWatcher>>;

pub struct FsStore {
    root: PathBuf,
    watchers: Mutex<HashMap<SubscriptionId, SharedWatcher>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStore")
            .field("root", &self.root)
            .field("subscriptions", &self.watchers.lock().len())
            .finish()
    }
}

impl FsStore {
    /// Open a store rooted at an existing directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        // Canonical so that notify's reported paths strip cleanly.
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(StoreError::InvalidPath {
                path: root.display().to_string(),
                reason: "store root must be a directory".to_string(),
            });
        }
        Ok(Self {
            root,
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a store path.
    pub fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let path = normalize_path(path)?;
        Ok(path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }

    fn read_node(&self, store_path: String, fs_path: &Path) -> StoreResult<Option<Node>> {
        let metadata = match std::fs::metadata(fs_path) {
            Ok(metadata) => metadata,
            // Raced with a delete between read_dir and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let node = if metadata.is_dir() {
            Node::container(store_path)
        } else if metadata.is_file() {
            match std::fs::read(fs_path) {
                Ok(content) => Node::leaf(store_path, content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        } else {
            return Ok(None);
        };
        Ok(Some(node))
    }
}

/// Convert a path reported by notify back into a store path.
fn to_store_path(root: &Path, fs_path: &Path) -> Option<String> {
    let relative = fs_path.strip_prefix(root).ok()?;
    let mut store_path = String::from("/");
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return None;
        };
        let segment = segment.to_str()?;
        if segment.starts_with('.') {
            return None;
        }
        store_path = child_path(&store_path, segment);
    }
    Some(store_path)
}

fn event_kind(kind: &EventKind) -> Option<EventMask> {
    match kind {
        EventKind::Create(_) => Some(EventMask::NODE_ADDED),
        EventKind::Remove(_) => Some(EventMask::NODE_REMOVED),
        // Renames show up as an add on one side and a remove on the other;
        // either way the parent's structure changed.
        EventKind::Modify(ModifyKind::Name(_)) => Some(EventMask::NODE_ADDED),
        EventKind::Modify(_) => Some(EventMask::PROPERTY_CHANGED),
        EventKind::Any | EventKind::Other => Some(EventMask::PROPERTY_CHANGED),
        EventKind::Access(_) => None,
    }
}

/// Where a subscription's notify watch currently sits.
struct Arming {
    root: PathBuf,
    /// Filesystem location of the subscribed path.
    target: PathBuf,
    mode: RecursiveMode,
    watched: Option<PathBuf>,
}

impl Arming {
    fn nearest_existing(&self) -> Option<PathBuf> {
        self.target
            .ancestors()
            .take_while(|path| path.starts_with(&self.root))
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Move the watch onto the nearest existing path. `force` re-watches
    /// even when that path is unchanged, for a target replaced in between.
    ///
    /// Returns whether the target itself was just armed.
    fn rearm(&mut self, watcher: &mut RecommendedWatcher, force: bool) -> notify::Result<bool> {
        let wanted = self.nearest_existing();
        if !force && wanted == self.watched {
            return Ok(false);
        }
        if let Some(old) = self.watched.take() {
            // The watch on a deleted directory is already gone.
            let _ = watcher.unwatch(&old);
        }
        let Some(path) = wanted else {
            return Ok(false);
        };

        let on_target = path == self.target;
        let mode = if on_target {
            self.mode
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&path, mode)?;
        crate::debug_event!("fs-store", "armed", "{}", path.display());
        self.watched = Some(path);
        Ok(on_target)
    }

    fn target_removed(&self, event: &notify::Result<Event>) -> bool {
        matches!(event, Ok(event)
            if matches!(event.kind, EventKind::Remove(_))
                && event.paths.iter().any(|path| *path == self.target))
    }
}

/// Store events for one notify callback.
///
/// A watch error means events may have been lost, so it turns into a change
/// on the subscribed path itself and the subscriber rescans.
fn to_changes(
    result: &notify::Result<Event>,
    root: &Path,
    spec: &SubscriptionSpec,
) -> Vec<ChangeEvent> {
    let event = match result {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("[fs-store] watch error under {}: {e}", spec.path);
            let kind = if spec.mask.contains(EventMask::PROPERTY_CHANGED) {
                EventMask::PROPERTY_CHANGED
            } else {
                spec.mask
            };
            return vec![ChangeEvent::new(kind, spec.path.clone(), None)];
        }
    };
    let Some(kind) = event_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter_map(|path| to_store_path(root, path))
        .map(|path| ChangeEvent::new(kind, path, None))
        .filter(|change| spec.accepts(change, FS_SESSION))
        .collect()
}

/// Forward a subscription's notify events to its listener, re-arming the
/// watch as the subscribed path comes and goes.
fn spawn_delivery(
    id: SubscriptionId,
    events: Receiver<notify::Result<Event>>,
    watcher: Weak<Mutex<RecommendedWatcher>>,
    mut arming: Arming,
    spec: SubscriptionSpec,
    listener: Arc<dyn ChangeListener>,
) -> StoreResult<()> {
    std::thread::Builder::new()
        .name(format!("fs-store-{}", id.0))
        .spawn(move || {
            for result in events {
                let mut changes = to_changes(&result, &arming.root, &spec);

                let Some(watcher) = watcher.upgrade() else {
                    break;
                };
                let force = arming.target_removed(&result);
                match arming.rearm(&mut watcher.lock(), force) {
                    Ok(true) => {
                        // Anything written before the watch landed is
                        // picked up by the rescan this triggers.
                        let added = ChangeEvent::new(EventMask::NODE_ADDED, spec.path.clone(), None);
                        if spec.accepts(&added, FS_SESSION) {
                            changes.push(added);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("[fs-store] cannot re-arm {}: {e}", spec.path),
                }
                drop(watcher);

                if !changes.is_empty() {
                    listener.on_events(&changes);
                }
            }
            crate::debug_event!("fs-store", "delivery stopped", "{id}");
        })?;
    Ok(())
}

impl ContentStore for FsStore {
    fn session_id(&self) -> SessionId {
        FS_SESSION
    }

    fn item(&self, path: &str) -> StoreResult<Option<NodeKind>> {
        let fs_path = self.resolve(path)?;
        match std::fs::metadata(&fs_path) {
            Ok(metadata) if metadata.is_dir() => Ok(Some(NodeKind::Container)),
            Ok(metadata) if metadata.is_file() => Ok(Some(NodeKind::Leaf)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn children(&self, path: &str) -> StoreResult<Vec<Node>> {
        let path = normalize_path(path)?;
        let fs_path = self.resolve(&path)?;
        let entries = match std::fs::read_dir(&fs_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            // Non-UTF-8 names cannot be addressed in the tree.
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                _ => {}
            }
        }
        names.sort();

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child = child_path(&path, &name);
            if let Some(node) = self.read_node(child, &fs_path.join(&name))? {
                children.push(node);
            }
        }
        Ok(children)
    }

    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        listener: Arc<dyn ChangeListener>,
    ) -> StoreResult<SubscriptionId> {
        let spec = SubscriptionSpec {
            path: normalize_path(&spec.path)?,
            ..spec
        };
        let mut arming = Arming {
            root: self.root.clone(),
            target: self.resolve(&spec.path)?,
            mode: if spec.deep {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            },
            watched: None,
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        arming.rearm(&mut watcher, true)?;
        let watcher = Arc::new(Mutex::new(watcher));

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        crate::debug_event!("fs-store", "subscribed", "{id} {}", arming.target.display());
        spawn_delivery(id, rx, Arc::downgrade(&watcher), arming, spec, listener)?;
        self.watchers.lock().insert(id, watcher);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        // Dropping the watcher closes its channel, which ends the delivery thread.
        match self.watchers.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownSubscription(id.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_to_store_path() {
        let root = Path::new("/srv/content");
        assert_eq!(
            to_store_path(root, Path::new("/srv/content/apps/install/a.jar")),
            Some("/apps/install/a.jar".to_string())
        );
        assert_eq!(
            to_store_path(root, Path::new("/srv/content")),
            Some("/".to_string())
        );
        assert_eq!(
            to_store_path(root, Path::new("/srv/content/apps/.a.jar.swp")),
            None
        );
        assert_eq!(to_store_path(root, Path::new("/elsewhere/a.jar")), None);
    }

    #[test]
    fn test_children_map_directory_contents() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("install/nested")).unwrap();
        std::fs::write(dir.path().join("install/b.cfg"), "x=1").unwrap();
        std::fs::write(dir.path().join("install/a.jar"), [1u8, 2]).unwrap();
        std::fs::write(dir.path().join("install/.hidden"), "ignored").unwrap();

        let store = FsStore::open(dir.path()).unwrap();
        let children = store.children("/install").unwrap();
        let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a.jar", "b.cfg", "nested"]);
        assert_eq!(children[0].path, "/install/a.jar");
        assert_eq!(children[0].content.as_deref(), Some(&[1u8, 2][..]));
        assert!(children[2].is_container());

        assert_eq!(store.item("/install").unwrap(), Some(NodeKind::Container));
        assert_eq!(store.item("/install/b.cfg").unwrap(), Some(NodeKind::Leaf));
        assert_eq!(store.item("/nope").unwrap(), None);
        assert!(matches!(
            store.children("/nope"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_watch_error_requests_a_rescan() {
        let spec = SubscriptionSpec::subtree("/install");
        let changes = to_changes(
            &Err(notify::Error::generic("queue overflow")),
            Path::new("/srv/content"),
            &spec,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "/install");
        assert!(spec.accepts(&changes[0], SessionId(1)));

        let structural = SubscriptionSpec {
            mask: EventMask::STRUCTURE,
            ..SubscriptionSpec::subtree("/apps")
        };
        let changes = to_changes(
            &Err(notify::Error::generic("queue overflow")),
            Path::new("/srv/content"),
            &structural,
        );
        assert!(structural.accepts(&changes[0], SessionId(1)));
    }

    #[test]
    fn test_arming_falls_back_to_nearest_ancestor() {
        let dir = TempDir::new().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("apps")).unwrap();
        let arming = Arming {
            root: root.clone(),
            target: root.join("apps/site/install"),
            mode: RecursiveMode::Recursive,
            watched: None,
        };
        assert_eq!(arming.nearest_existing(), Some(root.join("apps")));

        std::fs::create_dir_all(root.join("apps/site/install")).unwrap();
        assert_eq!(arming.nearest_existing(), Some(root.join("apps/site/install")));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.resolve("/../etc").is_err());
        assert!(store.resolve("relative").is_err());
    }
}
