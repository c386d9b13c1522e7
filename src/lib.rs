//! Watch folders in a hierarchical content tree and report the resources
//! they contain as they are added, changed, and removed.

pub mod config;
pub mod extract;
pub mod logging;
pub mod resource;
pub mod store;
pub mod watcher;

pub use config::Settings;
pub use extract::{ExtractorRegistry, ResourceExtractor};
pub use resource::{InstallableResource, ResourceFactory, ResourcePayload, Sha256Factory};
pub use store::{ContentStore, Node, NodeKind};
pub use watcher::{
    FolderSpec, InstallWatcher, ResourceInstaller, ScanDebouncer, ScanResult, WatchError,
    WatchedFolder,
};
