//! Install watcher: drives scans of many folders and feeds the installer.

use std::sync::Arc;

use regex::Regex;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use super::discovery::{FolderDiscovery, RootSpec};
use super::error::WatchError;
use super::folder::{FolderSpec, WatchedFolder};
use super::installer::ResourceInstaller;
use super::ScanDebouncer;
use crate::extract::ExtractorRegistry;
use crate::resource::{ResourceFactory, Sha256Factory};
use crate::store::{ContentStore, normalize_path};

/// Totals for one sweep over the dirty folders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub failed: usize,
    pub added: usize,
    pub removed: usize,
    /// Folders whose changes the installer rejected; they are re-reported
    /// on a later sweep.
    pub undelivered: usize,
}

/// Watches a set of folders in one store and hands their scan results to an
/// installer.
///
/// Notifications only mark folders dirty and poke the shared debouncer. The
/// run loop checks the debouncer on every tick and, once a burst has settled,
/// scans every dirty folder in turn.
pub struct InstallWatcher {
    store: Arc<dyn ContentStore>,
    /// Watched folders, in registration order.
    folders: Vec<WatchedFolder>,
    scheduler: Arc<ScanDebouncer>,
    extractors: Arc<ExtractorRegistry>,
    factory: Arc<dyn ResourceFactory>,
    installer: Arc<dyn ResourceInstaller>,
    discovery: Option<FolderDiscovery>,
    tick: Duration,
}

impl std::fmt::Debug for InstallWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallWatcher")
            .field("folders", &self.folders)
            .field("extractors", &self.extractors.names())
            .field("installer", &self.installer.name())
            .field("discovery", &self.discovery)
            .field("tick", &self.tick)
            .finish()
    }
}

impl InstallWatcher {
    /// Create a builder for configuring the watcher.
    pub fn builder() -> InstallWatcherBuilder {
        InstallWatcherBuilder::new()
    }

    /// Start watching another folder.
    ///
    /// The folder is marked dirty so its first scan reports everything it
    /// contains. A folder already being watched is left alone.
    pub fn add_folder(&mut self, spec: &FolderSpec) -> Result<(), WatchError> {
        let path = normalize_path(&spec.path).map_err(|source| WatchError::Subscription {
            path: spec.path.clone(),
            source,
        })?;
        if self.is_watching(&path) {
            crate::debug_event!("watcher", "already watching", "{path}");
            return Ok(());
        }
        let folder = WatchedFolder::new(
            self.store.clone(),
            spec,
            self.extractors.clone(),
            self.factory.clone(),
            self.scheduler.clone(),
        )?;
        folder.mark_dirty();
        self.folders.push(folder);
        Ok(())
    }

    /// Stop watching a folder. Returns whether it was being watched.
    ///
    /// Resources it reported are not uninstalled.
    pub fn remove_folder(&mut self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        let before = self.folders.len();
        self.folders.retain(|f| f.path() != path);
        let removed = self.folders.len() != before;
        if removed {
            crate::log_event!("watcher", "unwatched", "{path}");
        }
        removed
    }

    /// Whether a folder with this normalized path is watched.
    fn is_watching(&self, path: &str) -> bool {
        self.folders.iter().any(|f| f.path() == path)
    }

    pub fn folder_paths(&self) -> Vec<&str> {
        self.folders.iter().map(|f| f.path()).collect()
    }

    pub fn scheduler(&self) -> &Arc<ScanDebouncer> {
        &self.scheduler
    }

    /// Add any newly discovered folders when a root changed since the
    /// last discovery. Returns how many folders were added.
    pub fn refresh_folders(&mut self) -> usize {
        let Some(discovery) = &self.discovery else {
            return 0;
        };
        if !discovery.needs_scan() {
            return 0;
        }

        let specs = match discovery.discover() {
            Ok(specs) => specs,
            Err(e) => {
                tracing::error!("[discovery] failed: {e}");
                return 0;
            }
        };

        let mut added = 0;
        for spec in specs {
            if normalize_path(&spec.path).is_ok_and(|path| self.is_watching(&path)) {
                continue;
            }
            match self.add_folder(&spec) {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!("[discovery] cannot watch {}: {e}", spec.path),
            }
        }
        added
    }

    /// Scan every dirty folder and pass non-empty results to the installer.
    ///
    /// A failed scan is logged and the folder marked dirty again, so it is
    /// retried after the next debounce period.
    pub async fn scan_pending(&mut self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for folder in self.folders.iter_mut() {
            if !folder.needs_scan() {
                continue;
            }

            let result = match folder.scan() {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("[watcher] scan failed: {e}");
                    summary.failed += 1;
                    folder.mark_dirty();
                    continue;
                }
            };
            summary.scanned += 1;

            if result.is_empty() {
                continue;
            }
            summary.added += result.to_add.len();
            summary.removed += result.to_remove.len();

            if let Err(e) = self
                .installer
                .update_resources(folder.path(), result.clone())
                .await
            {
                tracing::error!("[{}] update failed: {e}", self.installer.name());
                summary.undelivered += 1;
                folder.requeue(&result);
            }
        }

        if summary.scanned > 0 || summary.failed > 0 {
            crate::debug_event!(
                "watcher",
                "sweep",
                "{} scanned, {} failed, {} undelivered, +{} -{}",
                summary.scanned,
                summary.failed,
                summary.undelivered,
                summary.added,
                summary.removed
            );
        }
        summary
    }

    /// Run until cancelled.
    ///
    /// This is the main loop that:
    /// 1. Discovers folders and scans all of them once
    /// 2. Waits for the debouncer to report a settled burst
    /// 3. Rediscovers folders if a root changed
    /// 4. Scans dirty folders and hands results to the installer
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatchError> {
        // Folders are registered dirty, so this first sweep reports everything.
        self.refresh_folders();
        self.scan_pending().await;

        crate::log_event!(
            "watcher",
            "started",
            "{} folder(s), {} extractor(s)",
            self.folders.len(),
            self.extractors.len()
        );

        loop {
            // Periodic check for a settled burst
            let timeout = sleep(self.tick);
            tokio::pin!(timeout);

            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::log_event!("watcher", "stopped");
                    return Ok(());
                }

                _ = &mut timeout => {
                    if self.scheduler.take_ready() {
                        self.refresh_folders();
                        self.scan_pending().await;
                    }
                }
            }
        }
    }
}

/// Builder for constructing an InstallWatcher.
pub struct InstallWatcherBuilder {
    store: Option<Arc<dyn ContentStore>>,
    installer: Option<Arc<dyn ResourceInstaller>>,
    extractors: ExtractorRegistry,
    factory: Arc<dyn ResourceFactory>,
    scheduler: Option<Arc<ScanDebouncer>>,
    folders: Vec<FolderSpec>,
    discovery: Option<(Vec<RootSpec>, Regex, String)>,
    debounce_ms: u64,
    max_delay_ms: u64,
    tick_ms: u64,
}

impl InstallWatcherBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            store: None,
            installer: None,
            extractors: ExtractorRegistry::new(),
            factory: Arc::new(Sha256Factory),
            scheduler: None,
            folders: Vec::new(),
            discovery: None,
            debounce_ms: 500,
            max_delay_ms: 5_000,
            tick_ms: 100,
        }
    }

    /// Set the content store.
    pub fn store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the installer receiving scan results.
    pub fn installer(mut self, installer: Arc<dyn ResourceInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Set the extractors, in priority order.
    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    /// Set the identity/digest factory.
    pub fn factory(mut self, factory: Arc<dyn ResourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Share an existing debouncer instead of creating one.
    pub fn scheduler(mut self, scheduler: Arc<ScanDebouncer>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Add a folder to watch.
    pub fn folder(mut self, spec: FolderSpec) -> Self {
        self.folders.push(spec);
        self
    }

    /// Search `roots` for folders whose name matches `pattern`.
    pub fn discovery(
        mut self,
        roots: Vec<RootSpec>,
        pattern: Regex,
        url_scheme: impl Into<String>,
    ) -> Self {
        self.discovery = Some((roots, pattern, url_scheme.into()));
        self
    }

    /// Set the debounce quiet period and ceiling in milliseconds.
    pub fn debounce_ms(mut self, debounce_ms: u64, max_delay_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set how often the run loop checks the debouncer.
    pub fn tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms;
        self
    }

    /// Build the InstallWatcher.
    ///
    /// Folders that cannot be watched are logged and skipped; the others
    /// are unaffected.
    pub fn build(self) -> Result<InstallWatcher, WatchError> {
        let store = self.store.ok_or_else(|| WatchError::InitFailed {
            reason: "Store is required".to_string(),
        })?;

        let installer = self.installer.ok_or_else(|| WatchError::InitFailed {
            reason: "Installer is required".to_string(),
        })?;

        if self.extractors.is_empty() {
            tracing::warn!("[watcher] no extractors configured - nothing will be installed");
        }

        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ScanDebouncer::new(self.debounce_ms, self.max_delay_ms)));

        let discovery = self.discovery.map(|(roots, pattern, url_scheme)| {
            FolderDiscovery::new(store.clone(), &roots, pattern, url_scheme, scheduler.clone())
        });

        let mut watcher = InstallWatcher {
            store,
            folders: Vec::new(),
            scheduler,
            extractors: Arc::new(self.extractors),
            factory: self.factory,
            installer,
            discovery,
            tick: Duration::from_millis(self.tick_ms.max(1)),
        };

        for spec in &self.folders {
            if let Err(e) = watcher.add_folder(spec) {
                tracing::error!("[watcher] {e}");
            }
        }

        // Roots start clean; force the first discovery.
        if let Some(discovery) = &watcher.discovery {
            discovery.mark_all_dirty();
        }

        Ok(watcher)
    }
}

impl Default for InstallWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
