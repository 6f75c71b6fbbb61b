//! Render-run reports.

use serde::Serialize;

use reel_core::SegmentId;

/// Outcome summary of one `render_dirty` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderReport {
    /// Segments that reached `Cached` this run.
    pub rendered: Vec<SegmentId>,
    /// Segments that failed and sit in `Error`.
    pub errored: Vec<SegmentId>,
    /// Segments skipped (errored ancestor, or cancellation); still dirty.
    pub skipped: Vec<SegmentId>,
    /// Whether the run was cut short by a cancel token.
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RenderReport {
    /// True when everything planned was rendered.
    pub fn is_clean(&self) -> bool {
        self.errored.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    /// Total number of segments the run touched or deliberately skipped.
    pub fn total(&self) -> usize {
        self.rendered.len() + self.errored.len() + self.skipped.len()
    }
}
