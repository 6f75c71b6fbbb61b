//! Core error types for reel-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! all anticipated failure modes in the segment and scene-graph model.

use crate::id::SegmentId;
use crate::segment::SegmentState;
use thiserror::Error;

/// Core errors produced by the reel-core crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A segment id failed shape validation.
    #[error("invalid segment id: '{id}' ({reason})")]
    InvalidId { id: String, reason: String },

    /// A segment's dependency list failed validation.
    #[error("invalid dependencies for '{id}': {reason}")]
    InvalidDeps { id: SegmentId, reason: String },

    /// Attempting to insert a segment whose id is already present.
    #[error("duplicate segment id: '{0}'")]
    DuplicateId(SegmentId),

    /// Referenced dependencies are not present in the graph.
    #[error("missing dependencies: {0:?}")]
    MissingDeps(Vec<SegmentId>),

    /// The dependency edges would form a cycle.
    #[error("dependency cycle detected through: {0:?}")]
    CycleDetected(Vec<SegmentId>),

    /// Removal refused because other segments depend on this one.
    #[error("segment has dependents: {0:?}")]
    HasDependents(Vec<SegmentId>),

    /// A state-machine transition was attempted that the lifecycle forbids.
    #[error("illegal transition {from:?} -> {to:?} for segment '{id}'")]
    IllegalTransition {
        from: SegmentState,
        to: SegmentState,
        id: SegmentId,
    },

    /// An update callback attempted to change a segment's id or deps.
    #[error("update changed identity of segment '{0}'")]
    IdentityViolation(SegmentId),

    /// A segment id was not found in the graph.
    #[error("segment not found: '{0}'")]
    SegmentNotFound(SegmentId),
}
