//! Error types and Result aliases for codemap.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using codemap's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for codemap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database/storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Filesystem synchronization error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// File watching error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Queue processing error.
    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Record not found.
    #[error("not found: {entity} with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Filesystem synchronizer errors.
///
/// Only whole-run preconditions surface here; per-path problems
/// (rejected paths, unreadable subdirectories) are logged and skipped
/// inside the walk.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Project root does not exist on disk.
    #[error("project root '{path}' does not exist")]
    RootPathMissing { path: String },

    /// Filesystem walk failed at the top level.
    #[error("failed to scan '{path}': {reason}")]
    ScanFailed { path: String, reason: String },
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },
}

/// Index processor errors.
///
/// These are recorded on the failing queue item; the batch itself
/// never aborts for an item-level failure.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Source text could not be parsed.
    #[error("parse failure: {0}")]
    Parse(String),

    /// A referenced project row is missing.
    #[error("unknown project id {0}")]
    UnknownProject(i64),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
