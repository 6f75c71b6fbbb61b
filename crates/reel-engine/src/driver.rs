//! The renderer driver: one segment through the backend.
//!
//! The driver is stateless between calls; all segment state lives in the
//! graph cell. Per-segment backend failures are captured on the segment
//! (`Error` + `RenderFailed` event) and never propagate out; only fatal
//! environment trouble (the partial directory cannot be created) aborts
//! the surrounding run.
//!
//! Publication is write-to-temp + atomic rename: `Cached` becomes
//! observable only after the artifact is durable under its final
//! hash-embedding name.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use reel_core::{Segment, SegmentId};

use crate::backend::{RenderBackend, RenderOptions};
use crate::cell::GraphCell;
use crate::error::EngineError;
use crate::event::{EventKind, EventSinkRegistry};
use crate::layout::ArtifactLayout;
use crate::quality::QualitySetting;

/// What happened to one segment during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Rendered,
    Failed,
    /// Not attempted (errored ancestor or cancellation); still dirty.
    Skipped,
}

/// Renders one segment through the backend, updating the graph cell and
/// emitting events.
///
/// Returns `Ok(Rendered | Failed)` for per-segment outcomes; `Err` only
/// for failures that are fatal to the whole run.
pub(crate) fn render_segment(
    cell: &GraphCell,
    backend: &dyn RenderBackend,
    events: &EventSinkRegistry,
    layout: &ArtifactLayout,
    id: &SegmentId,
    quality: &QualitySetting,
    timeout: Option<Duration>,
) -> Result<SegmentOutcome, EngineError> {
    let segment = cell.update(|g| {
        let next = g.try_update(id, |s| s.mark_rendering())?;
        let snapshot = next.get(id).cloned().expect("segment just updated");
        Ok((next, snapshot))
    })?;
    let hash = segment.content_hash().clone();
    events.emit(EventKind::RenderStarted {
        id: id.clone(),
        hash: hash.clone(),
    });

    // Fatal if the partial directory cannot exist.
    fs::create_dir_all(layout.partial_dir())?;

    let final_path = layout.partial_path(id, &hash, backend.artifact_ext());
    let tmp_path = layout.tmp_path(&final_path);
    let opts = RenderOptions {
        quality: quality.clone(),
        output_file: tmp_path.clone(),
        preview: false,
        timeout,
    };

    let started = Instant::now();
    let result = backend
        .render(&segment, &opts)
        .and_then(|written| publish(id, &written, &final_path));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(path) => {
            transition(cell, id, |s| s.mark_cached(path.clone()));
            debug!(target: "reel.driver", segment = %id, elapsed_ms, "render completed");
            events.emit(EventKind::RenderCompleted {
                id: id.clone(),
                hash,
                path,
                elapsed_ms,
            });
            Ok(SegmentOutcome::Rendered)
        }
        Err(err) => {
            let message = err.to_string();
            let _ = fs::remove_file(&tmp_path);
            transition(cell, id, |s| s.mark_error(message.clone()));
            warn!(target: "reel.driver", segment = %id, error = %message, "render failed");
            events.emit(EventKind::RenderFailed {
                id: id.clone(),
                hash,
                error: message,
            });
            Ok(SegmentOutcome::Failed)
        }
    }
}

/// Renders a single segment at preview settings, bypassing cache state,
/// events, and publication.
pub(crate) fn preview_segment(
    backend: &dyn RenderBackend,
    layout: &ArtifactLayout,
    segment: &Segment,
    quality: &QualitySetting,
) -> Result<PathBuf, EngineError> {
    fs::create_dir_all(layout.preview_dir())?;
    let path = layout.preview_path(
        segment.id(),
        segment.content_hash(),
        backend.artifact_ext(),
    );
    let opts = RenderOptions {
        quality: quality.clone(),
        output_file: path,
        preview: true,
        timeout: None,
    };
    backend.preview(segment, &opts)
}

/// Verifies the rendered temp file and renames it into place.
fn publish(id: &SegmentId, written: &Path, final_path: &Path) -> Result<PathBuf, EngineError> {
    let size = fs::metadata(written)
        .map_err(|e| EngineError::Backend {
            id: id.clone(),
            message: format!("backend reported success but wrote nothing: {}", e),
        })?
        .len();
    if size == 0 {
        return Err(EngineError::Backend {
            id: id.clone(),
            message: "backend produced an empty artifact".into(),
        });
    }
    fs::rename(written, final_path).map_err(|e| EngineError::Backend {
        id: id.clone(),
        message: format!("could not publish artifact: {}", e),
    })?;
    Ok(final_path.to_path_buf())
}

/// Applies a lifecycle transition to the cell. If the segment moved under
/// us (e.g. the watcher re-dirtied it mid-render) the transition is
/// dropped and the segment keeps its newer state.
fn transition(
    cell: &GraphCell,
    id: &SegmentId,
    f: impl FnOnce(Segment) -> Result<Segment, reel_core::CoreError>,
) {
    let result = cell.update(|g| Ok(g.try_update(id, f).map(|g| (g, ()))?));
    if let Err(err) = result {
        warn!(target: "reel.driver", segment = %id, error = %err, "state moved mid-render, keeping newer state");
    }
}
