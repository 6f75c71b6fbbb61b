//! The [`GraphRepository`] trait: the persistence contract for scene
//! graphs.
//!
//! Backends round-trip all structural data but never the opaque
//! construct callables; those are re-supplied by the caller on load,
//! keyed by segment id. Implementations use interior mutability so a
//! repository can be shared behind an `Arc`.

use std::collections::HashMap;

use reel_core::{Construct, SceneGraph, SegmentId};

use crate::error::StorageError;

/// The persistence port.
pub trait GraphRepository: Send + Sync {
    /// Saves (or overwrites) a graph under `id`.
    fn save(&self, id: &str, graph: &SceneGraph) -> Result<(), StorageError>;

    /// Loads a graph, re-attaching the given constructs. Segments whose
    /// construct is missing come back `Dirty` with a placeholder.
    ///
    /// Returns `Ok(None)` when no graph is stored under `id`.
    fn load(
        &self,
        id: &str,
        constructs: &HashMap<SegmentId, Construct>,
    ) -> Result<Option<SceneGraph>, StorageError>;

    /// True iff a graph is stored under `id`.
    fn exists(&self, id: &str) -> Result<bool, StorageError>;

    /// All stored graph ids, sorted.
    fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Deletes a stored graph. Returns false if nothing was stored.
    fn delete(&self, id: &str) -> Result<bool, StorageError>;
}
