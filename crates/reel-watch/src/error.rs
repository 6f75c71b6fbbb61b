//! Watcher error types.

use thiserror::Error;

/// Errors produced while setting up or running a filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying notify backend failed.
    #[error(transparent)]
    Notify(#[from] notify::Error),

    /// Filesystem trouble while resolving watch roots.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
