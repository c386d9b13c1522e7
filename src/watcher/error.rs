//! Error types for the folder watcher system.

use thiserror::Error;

use crate::store::StoreError;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Rejected before any subscription is attempted.
    #[error("Cannot watch folder {path} with priority {priority}: priority must be at least 1")]
    InvalidPriority { path: String, priority: i64 },

    /// The store refused the watch registration.
    #[error("Cannot watch {path}: {source}")]
    Subscription {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Store access failed while scanning.
    #[error("Scan of {path} failed: {source}")]
    Scan {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("Extractor '{extractor}' failed for {path}: {reason}")]
    ExtractorFailed {
        extractor: String,
        path: String,
        reason: String,
    },

    #[error("Unknown extractor '{0}'")]
    UnknownExtractor(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Installer '{installer}' failed: {reason}")]
    InstallFailed { installer: String, reason: String },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },
}

impl WatchError {
    /// The store error behind a subscription or scan failure.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            WatchError::Subscription { source, .. } | WatchError::Scan { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
