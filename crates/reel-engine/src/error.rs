//! Engine error types.
//!
//! [`EngineError`] covers scheduling, rendering, combining, and quality
//! resolution failures. Construction and scheduling errors propagate to
//! the caller; per-segment render errors are captured on the segment and
//! surfaced as events instead (see the driver module).

use reel_core::{CoreError, SegmentId};
use thiserror::Error;

/// Errors produced by the rendering engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A graph-model error bubbled up from reel-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A dirty segment's non-dirty dependency is not cached. This is a
    /// logic error in the caller, not a runtime condition.
    #[error("unsatisfied dependency: '{0}' is neither cached nor scheduled")]
    UnsatisfiedDependency(SegmentId),

    /// The backend failed while rendering a segment.
    #[error("backend failure on '{id}': {message}")]
    Backend { id: SegmentId, message: String },

    /// A single segment render exceeded its time budget.
    #[error("render of '{0}' timed out")]
    Timeout(SegmentId),

    /// Combine refused because selected segments are not cached.
    #[error("segments not cached: {0:?}")]
    NotCached(Vec<SegmentId>),

    /// The concatenation step failed.
    #[error("combine failed: {0}")]
    CombineFailed(String),

    /// Quality resolution was asked for an unregistered preset.
    #[error("unknown quality preset: '{0}'")]
    UnknownPreset(String),

    /// A literal quality setting failed validation.
    #[error("invalid quality setting: {0}")]
    InvalidQuality(String),

    /// No backend registered under the requested tag.
    #[error("unknown render backend: '{0}'")]
    UnknownBackend(String),

    /// The run was cancelled before completing.
    #[error("render run cancelled")]
    Cancelled,

    /// The filesystem watcher could not be started.
    #[error("watch error: {0}")]
    Watch(#[from] reel_watch::WatchError),

    /// Fatal filesystem trouble (e.g. cannot create the partial dir).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
