//! Folder watcher system for installing resources from a content tree.
//!
//! Each watched folder subscribes to changes under its subtree. Change
//! notifications only mark the folder dirty and poke a shared debouncer;
//! the actual work happens in [`WatchedFolder::scan`], which diffs the
//! subtree against the digests it reported last time.
//!
//! # Architecture
//!
//! ```text
//! ContentStore notifications
//!         |
//!   DirtyListener (per folder / root)  --->  ScanDebouncer (shared)
//!         |                                        |
//!   WatchedFolder::scan  <-----  InstallWatcher run loop
//!         |
//!   ExtractorRegistry (first match wins)
//!         |
//!   ScanResult  --->  ResourceInstaller
//! ```

mod debouncer;
mod discovery;
mod error;
mod folder;
mod installer;
mod listener;
mod service;

pub use debouncer::{DebounceStats, ScanDebouncer};
pub use discovery::{FolderDiscovery, RootSpec};
pub use error::WatchError;
pub use folder::{FolderSpec, ScanResult, WatchedFolder};
pub use installer::{JsonLinesInstaller, ResourceInstaller};
pub use listener::DirtyListener;
pub use service::{InstallWatcher, InstallWatcherBuilder, SweepSummary};
