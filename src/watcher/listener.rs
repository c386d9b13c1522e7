//! Change listener that only raises a dirty flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::ScanDebouncer;
use crate::store::{ChangeEvent, ChangeListener};

/// Marks its owner dirty on any notification and pokes the shared debouncer.
///
/// Event contents are never inspected: one event is reason enough to rescan
/// the whole subtree.
#[derive(Debug)]
pub struct DirtyListener {
    path: String,
    dirty: AtomicBool,
    scheduler: Arc<ScanDebouncer>,
}

impl DirtyListener {
    pub fn new(path: impl Into<String>, scheduler: Arc<ScanDebouncer>) -> Self {
        Self {
            path: path.into(),
            dirty: AtomicBool::new(false),
            scheduler,
        }
    }

    /// Set the flag and request a scan.
    pub fn mark_dirty(&self) {
        // Flag first, so the flag is visible by the time the wake-up fires.
        self.dirty.store(true, Ordering::SeqCst);
        self.scheduler.schedule_scan();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

impl ChangeListener for DirtyListener {
    fn on_events(&self, events: &[ChangeEvent]) {
        crate::debug_event!("watcher", "event", "{} event(s) under {}", events.len(), self.path);
        self.mark_dirty();
    }
}
