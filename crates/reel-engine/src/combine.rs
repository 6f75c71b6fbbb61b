//! Combining cached partial artifacts into a final output.
//!
//! The combiner assembles the ordered list of per-segment artifacts and
//! delegates the actual stream-copy concatenation to
//! [`RenderBackend::combine`]. If any selected segment is not `Cached`
//! the whole operation is refused before any side effect.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use reel_core::{SceneGraph, SegmentId, SegmentState};

use crate::backend::RenderBackend;
use crate::error::EngineError;
use crate::event::{EventKind, EventSinkRegistry};

/// Concatenates the selected segments' artifacts into `output`.
///
/// `order` defaults to the graph's topological order over all segments.
/// Fails `NotCached` (listing every offender) if any selected segment
/// lacks a cached artifact.
pub fn combine(
    graph: &SceneGraph,
    backend: &dyn RenderBackend,
    events: &EventSinkRegistry,
    output: &Path,
    order: Option<Vec<SegmentId>>,
) -> Result<PathBuf, EngineError> {
    let ids: Vec<SegmentId> = match order {
        Some(explicit) => explicit,
        None => graph.render_order().to_vec(),
    };

    let mut inputs: Vec<PathBuf> = Vec::with_capacity(ids.len());
    let mut not_cached: Vec<SegmentId> = Vec::new();
    for id in &ids {
        let segment = graph
            .get(id)
            .ok_or_else(|| reel_core::CoreError::SegmentNotFound(id.clone()))?;
        match (segment.state(), segment.artifact_path()) {
            (SegmentState::Cached, Some(path)) => inputs.push(path.to_path_buf()),
            _ => not_cached.push(id.clone()),
        }
    }
    if !not_cached.is_empty() {
        return Err(EngineError::NotCached(not_cached));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    events.emit(EventKind::CombineStarted {
        ids: ids.clone(),
        output: output.to_path_buf(),
    });
    info!(target: "reel.combine", segments = ids.len(), output = %output.display(), "combining artifacts");

    let produced = backend.combine(&inputs, output)?;
    events.emit(EventKind::CombineCompleted {
        output: produced.clone(),
    });
    Ok(produced)
}
