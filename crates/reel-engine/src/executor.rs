//! Wave execution over a bounded worker pool.
//!
//! Waves run strictly in order; within a wave, `worker_count` OS threads
//! pull segment ids from a crossbeam work queue and report through a
//! completion channel. The next wave does not start until every member of
//! the current wave has settled (`Cached` or `Error`), which is what
//! guarantees the cross-wave event ordering (a dependency's
//! `RenderCompleted` strictly precedes its dependents' `RenderStarted`).
//!
//! An errored segment does not block its wave siblings; its transitive
//! dependents are skipped when their wave comes up because their
//! dependencies never reach `Cached`. Cancellation stops issuance of new
//! segments and lets in-flight renders finish.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use tracing::{debug, info};

use reel_core::{SceneGraph, Segment, SegmentId, SegmentState};

use crate::backend::RenderBackend;
use crate::cell::GraphCell;
use crate::driver::{self, SegmentOutcome};
use crate::error::EngineError;
use crate::event::EventSinkRegistry;
use crate::layout::ArtifactLayout;
use crate::quality::QualitySetting;
use crate::report::RenderReport;
use crate::scheduler::{plan_sequential_scoped, plan_waves_scoped, CancelToken};

/// Options for one execution run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub quality: QualitySetting,
    pub worker_count: usize,
    /// When false, renders one segment at a time in topological order.
    pub parallel: bool,
    pub cancel: CancelToken,
    /// Per-segment time budget, if the backend can enforce one.
    pub timeout: Option<Duration>,
    /// Restrict the run to these segments (plus nothing else). Used by
    /// single-segment renders; `None` means the whole dirty set.
    pub scope: Option<HashSet<SegmentId>>,
}

impl ExecuteOptions {
    pub fn new(quality: QualitySetting) -> Self {
        ExecuteOptions {
            quality,
            worker_count: default_worker_count(),
            parallel: true,
            cancel: CancelToken::new(),
            timeout: None,
            scope: None,
        }
    }
}

/// Number of hardware threads, the default pool size.
pub fn default_worker_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Renders every dirty segment (optionally within a scope) wave by wave.
pub fn execute(
    cell: &GraphCell,
    backend: &dyn RenderBackend,
    events: &EventSinkRegistry,
    layout: &ArtifactLayout,
    opts: &ExecuteOptions,
) -> Result<RenderReport, EngineError> {
    let started = Instant::now();
    let snapshot = cell.snapshot();
    let waves: Vec<Vec<Segment>> = if opts.parallel {
        plan_waves_scoped(&snapshot, opts.scope.as_ref())?
    } else {
        plan_sequential_scoped(&snapshot, opts.scope.as_ref())?
            .into_iter()
            .map(|s| vec![s])
            .collect()
    };
    let planned: usize = waves.iter().map(Vec::len).sum();
    info!(target: "reel.executor", planned, waves = waves.len(), workers = opts.worker_count, "starting render run");

    let mut report = RenderReport::default();
    for wave in waves {
        if opts.cancel.is_cancelled() {
            report.cancelled = true;
            report.skipped.extend(wave.into_iter().map(|s| s.id().clone()));
            continue;
        }

        // Re-check readiness against the live graph: a dirty dependency
        // that errored or was skipped in an earlier wave never reached
        // Cached, so its dependents are skipped here.
        let current = cell.snapshot();
        let (ready, blocked): (Vec<Segment>, Vec<Segment>) = wave
            .into_iter()
            .partition(|s| deps_all_cached(&current, s));
        report
            .skipped
            .extend(blocked.into_iter().map(|s| s.id().clone()));

        for (id, outcome) in run_wave(cell, backend, events, layout, &ready, opts)? {
            match outcome {
                SegmentOutcome::Rendered => report.rendered.push(id),
                SegmentOutcome::Failed => report.errored.push(id),
                SegmentOutcome::Skipped => {
                    report.cancelled = true;
                    report.skipped.push(id);
                }
            }
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        target: "reel.executor",
        rendered = report.rendered.len(),
        errored = report.errored.len(),
        skipped = report.skipped.len(),
        cancelled = report.cancelled,
        "render run finished"
    );
    Ok(report)
}

fn deps_all_cached(graph: &SceneGraph, segment: &Segment) -> bool {
    segment
        .deps()
        .iter()
        .all(|d| graph.get(d).map(Segment::state) == Some(SegmentState::Cached))
}

/// Runs one wave through the worker pool and collects per-segment
/// outcomes. Fatal driver errors abort after in-flight work settles (the
/// thread scope joins before this function returns).
fn run_wave(
    cell: &GraphCell,
    backend: &dyn RenderBackend,
    events: &EventSinkRegistry,
    layout: &ArtifactLayout,
    ready: &[Segment],
    opts: &ExecuteOptions,
) -> Result<Vec<(SegmentId, SegmentOutcome)>, EngineError> {
    if ready.is_empty() {
        return Ok(Vec::new());
    }
    let workers = opts.worker_count.clamp(1, ready.len());
    debug!(target: "reel.executor", wave_size = ready.len(), workers, "dispatching wave");

    let (work_tx, work_rx) = unbounded::<SegmentId>();
    let (done_tx, done_rx) = unbounded::<(SegmentId, Result<SegmentOutcome, EngineError>)>();
    for segment in ready {
        work_tx
            .send(segment.id().clone())
            .expect("work queue open while sender held");
    }
    drop(work_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                while let Ok(id) = work_rx.recv() {
                    let result = if opts.cancel.is_cancelled() {
                        Ok(SegmentOutcome::Skipped)
                    } else {
                        driver::render_segment(
                            cell,
                            backend,
                            events,
                            layout,
                            &id,
                            &opts.quality,
                            opts.timeout,
                        )
                    };
                    if done_tx.send((id, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut outcomes = Vec::with_capacity(ready.len());
    let mut fatal: Option<EngineError> = None;
    while let Ok((id, result)) = done_rx.recv() {
        match result {
            Ok(outcome) => outcomes.push((id, outcome)),
            Err(err) => fatal = Some(err),
        }
    }
    match fatal {
        Some(err) => Err(err),
        None => Ok(outcomes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use reel_core::{Construct, Metadata, SceneGraph};
    use tempfile::tempdir;

    fn sid(s: &str) -> SegmentId {
        SegmentId::new(s).unwrap()
    }

    fn seg(id: &str, deps: &[&str]) -> Segment {
        Segment::create(
            sid(id),
            Construct::noop(format!("{}-v1", id)),
            deps.iter().map(|d| sid(d)).collect(),
            Metadata::new(),
        )
        .unwrap()
    }

    fn chain() -> SceneGraph {
        SceneGraph::default()
            .add_all(vec![seg("a", &[]), seg("b", &["a"]), seg("c", &["b"])])
            .unwrap()
    }

    #[test]
    fn sequential_mode_renders_the_chain() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let cell = GraphCell::new(chain());
        let backend = MockBackend::new();
        let events = EventSinkRegistry::new();

        let mut opts = ExecuteOptions::new(QualitySetting::low());
        opts.parallel = false;
        opts.worker_count = 1;
        let report = execute(&cell, &backend, &events, &layout, &opts).unwrap();

        assert_eq!(report.rendered.len(), 3);
        assert!(report.is_clean());
        let graph = cell.snapshot();
        for id in ["a", "b", "c"] {
            let segment = graph.get(&sid(id)).unwrap();
            assert_eq!(segment.state(), SegmentState::Cached);
            assert!(layout.is_valid_artifact(segment), "{}", id);
        }
    }

    #[test]
    fn errored_segment_skips_only_its_dependents() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        // a; b<-a; c<-a; d<-b
        let cell = GraphCell::new(
            SceneGraph::default()
                .add_all(vec![
                    seg("a", &[]),
                    seg("b", &["a"]),
                    seg("c", &["a"]),
                    seg("d", &["b"]),
                ])
                .unwrap(),
        );
        let backend = MockBackend::new();
        backend.fail_segment("b", "scene exploded");
        let events = EventSinkRegistry::new();

        let opts = ExecuteOptions::new(QualitySetting::low());
        let report = execute(&cell, &backend, &events, &layout, &opts).unwrap();

        assert_eq!(report.rendered, vec![sid("a"), sid("c")]);
        assert_eq!(report.errored, vec![sid("b")]);
        assert_eq!(report.skipped, vec![sid("d")]);

        let graph = cell.snapshot();
        assert_eq!(graph.get(&sid("b")).unwrap().state(), SegmentState::Error);
        assert_eq!(
            graph.get(&sid("b")).unwrap().last_error(),
            Some("backend failure on 'b': scene exploded")
        );
        assert_eq!(graph.get(&sid("d")).unwrap().state(), SegmentState::Pending);
    }

    #[test]
    fn cancellation_skips_unissued_segments() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let cell = GraphCell::new(chain());
        let backend = MockBackend::new();
        let events = EventSinkRegistry::new();

        let mut opts = ExecuteOptions::new(QualitySetting::low());
        opts.cancel.cancel();
        let report = execute(&cell, &backend, &events, &layout, &opts).unwrap();

        assert!(report.cancelled);
        assert!(report.rendered.is_empty());
        assert_eq!(report.skipped.len(), 3);
    }
}
