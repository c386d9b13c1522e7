//! Change notification types shared by all store adapters.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Kinds of change a subscription can ask for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const NODE_ADDED = 1 << 0;
        const NODE_REMOVED = 1 << 1;
        const PROPERTY_ADDED = 1 << 2;
        const PROPERTY_CHANGED = 1 << 3;
        const PROPERTY_REMOVED = 1 << 4;

        /// Child nodes added or removed.
        const STRUCTURE = Self::NODE_ADDED.bits() | Self::NODE_REMOVED.bits();
        /// Any property add, change or removal.
        const PROPERTIES = Self::PROPERTY_ADDED.bits()
            | Self::PROPERTY_CHANGED.bits()
            | Self::PROPERTY_REMOVED.bits();
        const ALL = Self::STRUCTURE.bits() | Self::PROPERTIES.bits();
    }
}

/// Identifies the session a write (and therefore an event) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Handle returned by a successful subscribe, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One change reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Exactly one of the single-kind flags.
    pub kind: EventMask,
    /// Path of the node the change happened on.
    pub path: String,
    /// Session that made the change, when the store knows it.
    pub origin: Option<SessionId>,
}

impl ChangeEvent {
    pub fn new(kind: EventMask, path: impl Into<String>, origin: Option<SessionId>) -> Self {
        Self {
            kind,
            path: path.into(),
            origin,
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Root of the observed subtree.
    pub path: String,
    /// Include all descendants, not just the node itself.
    pub deep: bool,
    pub mask: EventMask,
    /// Suppress events caused by the subscribing session's own writes.
    pub no_local: bool,
}

impl SubscriptionSpec {
    /// Deep subscription to every structural and property change under `path`,
    /// ignoring the subscriber's own writes.
    pub fn subtree(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            deep: true,
            mask: EventMask::ALL,
            no_local: true,
        }
    }

    /// Whether an event on `event_path` falls inside this subscription.
    pub fn covers(&self, event_path: &str) -> bool {
        if event_path == self.path {
            return true;
        }
        if !self.deep {
            return false;
        }
        if self.path == "/" {
            return event_path.starts_with('/');
        }
        event_path
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Full delivery check for an event observed by `subscriber`.
    pub fn accepts(&self, event: &ChangeEvent, subscriber: SessionId) -> bool {
        if !self.mask.intersects(event.kind) {
            return false;
        }
        if self.no_local && event.origin == Some(subscriber) {
            return false;
        }
        self.covers(&event.path)
    }
}

/// Receiver of change notifications.
///
/// Stores may call this from any thread, concurrently across listeners and
/// with any other store operation. Implementations must not block.
pub trait ChangeListener: Send + Sync {
    fn on_events(&self, events: &[ChangeEvent]);
}
