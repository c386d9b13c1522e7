//! In-memory content tree with per-session handles.
//!
//! Writes go through a [`MemorySession`] so every event carries the session
//! that caused it. Events are dispatched synchronously on the writing thread,
//! after the tree lock has been released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{
    ChangeEvent, ChangeListener, ContentStore, EventMask, Node, NodeKind, SessionId, StoreError,
    StoreResult, SubscriptionId, SubscriptionSpec, child_path, node_name, normalize_path,
    parent_path,
};

#[derive(Debug, Clone)]
struct Entry {
    kind: NodeKind,
    properties: BTreeMap<String, String>,
    content: Option<Vec<u8>>,
}

impl Entry {
    fn container() -> Self {
        Self {
            kind: NodeKind::Container,
            properties: BTreeMap::new(),
            content: None,
        }
    }
}

struct Registered {
    session: SessionId,
    spec: SubscriptionSpec,
    listener: Arc<dyn ChangeListener>,
}

#[derive(Default)]
struct RepoState {
    /// Every node except the implicit root, keyed by path.
    nodes: BTreeMap<String, Entry>,
    subscriptions: HashMap<SubscriptionId, Registered>,
}

/// Shared tree. Obtain handles with [`MemoryRepository::login`].
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<RepoState>,
    next_session: AtomicU64,
    next_subscription: AtomicU64,
    unavailable: AtomicBool,
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryRepository")
            .field("nodes", &state.nodes.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new session on the repository.
    pub fn login(self: &Arc<Self>) -> MemorySession {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        MemorySession {
            repo: Arc::clone(self),
            id,
        }
    }

    /// Simulate an outage: reads and subscribes fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "repository offline".to_string(),
            });
        }
        Ok(())
    }

    fn dispatch(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        // Snapshot matching listeners so callbacks run without the lock held.
        let deliveries: Vec<(Arc<dyn ChangeListener>, Vec<ChangeEvent>)> = {
            let state = self.state.read();
            state
                .subscriptions
                .values()
                .filter_map(|sub| {
                    let matching: Vec<ChangeEvent> = events
                        .iter()
                        .filter(|event| sub.spec.accepts(event, sub.session))
                        .cloned()
                        .collect();
                    (!matching.is_empty()).then(|| (Arc::clone(&sub.listener), matching))
                })
                .collect()
        };

        for (listener, batch) in deliveries {
            listener.on_events(&batch);
        }
    }
}

/// A session on a [`MemoryRepository`]. Implements [`ContentStore`] for
/// reads and offers write operations tagged with this session's id.
#[derive(Debug, Clone)]
pub struct MemorySession {
    repo: Arc<MemoryRepository>,
    id: SessionId,
}

impl MemorySession {
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repo
    }

    /// Create a container and any missing ancestors.
    pub fn add_container(&self, path: &str) -> StoreResult<()> {
        let path = normalize_path(path)?;
        let events = {
            let mut state = self.repo.state.write();
            let mut events = self.create_ancestors(&mut state, &path)?;
            match state.nodes.get(&path).map(|entry| entry.kind) {
                Some(NodeKind::Container) => {}
                Some(NodeKind::Leaf) => {
                    return Err(StoreError::InvalidPath {
                        path,
                        reason: "a leaf already exists here".to_string(),
                    });
                }
                None if path != "/" => {
                    state.nodes.insert(path.clone(), Entry::container());
                    events.push(self.event(EventMask::NODE_ADDED, &path));
                }
                None => {}
            }
            events
        };
        self.repo.dispatch(events);
        Ok(())
    }

    /// Create or replace a leaf's content.
    pub fn put_leaf(&self, path: &str, content: impl Into<Vec<u8>>) -> StoreResult<()> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(StoreError::InvalidPath {
                path,
                reason: "root is a container".to_string(),
            });
        }
        let content = content.into();
        let events = {
            let mut state = self.repo.state.write();
            let mut events = self.create_ancestors(&mut state, &path)?;
            match state.nodes.get_mut(&path) {
                Some(entry) if entry.kind == NodeKind::Leaf => {
                    entry.content = Some(content);
                    events.push(self.event(EventMask::PROPERTY_CHANGED, &path));
                }
                Some(_) => {
                    return Err(StoreError::InvalidPath {
                        path,
                        reason: "a container already exists here".to_string(),
                    });
                }
                None => {
                    state.nodes.insert(
                        path.clone(),
                        Entry {
                            kind: NodeKind::Leaf,
                            properties: BTreeMap::new(),
                            content: Some(content),
                        },
                    );
                    events.push(self.event(EventMask::NODE_ADDED, &path));
                }
            }
            events
        };
        self.repo.dispatch(events);
        Ok(())
    }

    pub fn set_property(&self, path: &str, key: &str, value: &str) -> StoreResult<()> {
        let path = normalize_path(path)?;
        let event = {
            let mut state = self.repo.state.write();
            let entry = state
                .nodes
                .get_mut(&path)
                .ok_or_else(|| StoreError::NotFound(path.clone()))?;
            let kind = match entry.properties.insert(key.to_string(), value.to_string()) {
                Some(_) => EventMask::PROPERTY_CHANGED,
                None => EventMask::PROPERTY_ADDED,
            };
            self.event(kind, &path)
        };
        self.repo.dispatch(vec![event]);
        Ok(())
    }

    /// Remove a property. Returns whether it existed.
    pub fn remove_property(&self, path: &str, key: &str) -> StoreResult<bool> {
        let path = normalize_path(path)?;
        let removed = {
            let mut state = self.repo.state.write();
            let entry = state
                .nodes
                .get_mut(&path)
                .ok_or_else(|| StoreError::NotFound(path.clone()))?;
            entry.properties.remove(key).is_some()
        };
        if removed {
            self.repo
                .dispatch(vec![self.event(EventMask::PROPERTY_REMOVED, &path)]);
        }
        Ok(removed)
    }

    /// Remove a node and everything below it.
    pub fn remove(&self, path: &str) -> StoreResult<()> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(StoreError::InvalidPath {
                path,
                reason: "cannot remove the root".to_string(),
            });
        }
        let removed = {
            let mut state = self.repo.state.write();
            if state.nodes.remove(&path).is_none() {
                return Err(StoreError::NotFound(path));
            }
            let prefix = format!("{path}/");
            let descendants: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .cloned()
                .collect();
            for key in &descendants {
                state.nodes.remove(key);
            }
            descendants
        };
        // Every removed node is reported, so watchers below `path` hear about it.
        let events = std::iter::once(path.as_str())
            .chain(removed.iter().map(String::as_str))
            .map(|removed| self.event(EventMask::NODE_REMOVED, removed))
            .collect();
        self.repo.dispatch(events);
        Ok(())
    }

    fn event(&self, kind: EventMask, path: &str) -> ChangeEvent {
        ChangeEvent::new(kind, path, Some(self.id))
    }

    fn create_ancestors(&self, state: &mut RepoState, path: &str) -> StoreResult<Vec<ChangeEvent>> {
        let mut missing = Vec::new();
        let mut current = parent_path(path);
        while let Some(ancestor) = current {
            if ancestor == "/" {
                break;
            }
            match state.nodes.get(ancestor) {
                Some(entry) if entry.kind == NodeKind::Leaf => {
                    return Err(StoreError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("ancestor {ancestor} is a leaf"),
                    });
                }
                Some(_) => break,
                None => missing.push(ancestor.to_string()),
            }
            current = parent_path(ancestor);
        }

        let mut events = Vec::with_capacity(missing.len());
        for ancestor in missing.into_iter().rev() {
            state.nodes.insert(ancestor.clone(), Entry::container());
            events.push(self.event(EventMask::NODE_ADDED, &ancestor));
        }
        Ok(events)
    }
}

impl ContentStore for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn item(&self, path: &str) -> StoreResult<Option<NodeKind>> {
        self.repo.check_available()?;
        let path = normalize_path(path)?;
        if path == "/" {
            return Ok(Some(NodeKind::Container));
        }
        Ok(self.repo.state.read().nodes.get(&path).map(|e| e.kind))
    }

    fn children(&self, path: &str) -> StoreResult<Vec<Node>> {
        self.repo.check_available()?;
        let path = normalize_path(path)?;
        let state = self.repo.state.read();
        if path != "/" {
            match state.nodes.get(&path) {
                Some(entry) if entry.kind == NodeKind::Container => {}
                Some(_) => return Ok(Vec::new()),
                None => return Err(StoreError::NotFound(path)),
            }
        }

        let prefix = child_path(&path, "");
        let children = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, entry)| Node {
                path: key.clone(),
                name: node_name(key).to_string(),
                kind: entry.kind,
                properties: entry.properties.clone(),
                content: entry.content.clone(),
            })
            .collect();
        Ok(children)
    }

    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        listener: Arc<dyn ChangeListener>,
    ) -> StoreResult<SubscriptionId> {
        self.repo.check_available()?;
        let spec = SubscriptionSpec {
            path: normalize_path(&spec.path)?,
            ..spec
        };
        if spec.mask.is_empty() {
            return Err(StoreError::SubscriptionRejected {
                path: spec.path,
                reason: "empty event mask".to_string(),
            });
        }
        let id = SubscriptionId(self.repo.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        self.repo.state.write().subscriptions.insert(
            id,
            Registered {
                session: self.id,
                spec,
                listener,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        self.repo.check_available()?;
        match self.repo.state.write().subscriptions.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownSubscription(id.0)),
        }
    }
}
