//! Error types for content store access.

use thiserror::Error;

/// Errors reported by a [`ContentStore`](super::ContentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Subscription rejected for {path}: {reason}")]
    SubscriptionRejected { path: String, reason: String },

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watch error: {0}")]
    Notify(#[from] notify::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
