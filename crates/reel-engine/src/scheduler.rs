//! Render planning: sequential order, dependency waves, and estimates.
//!
//! Both planners operate on an immutable graph snapshot. The *dirty set*
//! is every segment that needs a render (`Pending` / `Dirty` / `Error`).
//! Non-dirty dependencies of a dirty segment must already be `Cached`;
//! anything else is a logic error in the caller and the planner refuses
//! with `UnsatisfiedDependency`.
//!
//! A *wave* is a maximal set of dirty segments whose dirty dependencies
//! all live in earlier waves; members of one wave are pairwise
//! dependency-independent and may render concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use reel_core::{SceneGraph, Segment, SegmentId, SegmentState};

use crate::error::EngineError;

/// Cooperative cancellation handle.
///
/// Cancelling stops the executor from issuing new segments; in-flight
/// renders finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Informational timing estimate for a planned run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    /// Seconds to render everything one segment at a time.
    pub sequential: f64,
    /// Seconds to render wave by wave with the given worker count.
    pub parallel: f64,
    pub speedup: f64,
}

/// Dirty segments in topological order.
pub fn plan_sequential(graph: &SceneGraph) -> Result<Vec<Segment>, EngineError> {
    plan_sequential_scoped(graph, None)
}

pub(crate) fn plan_sequential_scoped(
    graph: &SceneGraph,
    scope: Option<&HashSet<SegmentId>>,
) -> Result<Vec<Segment>, EngineError> {
    let dirty = dirty_set(graph, scope);
    validate_ready(graph, &dirty)?;
    Ok(graph
        .render_order()
        .iter()
        .filter(|id| dirty.contains(*id))
        .filter_map(|id| graph.get(id).cloned())
        .collect())
}

/// Partitions the dirty set into dependency waves.
///
/// Wave `k` holds every dirty segment whose dirty dependencies all lie in
/// waves `< k`, with at least one in wave `k - 1` (`k = 0` iff it has no
/// dirty dependencies).
pub fn plan_waves(graph: &SceneGraph) -> Result<Vec<Vec<Segment>>, EngineError> {
    plan_waves_scoped(graph, None)
}

pub(crate) fn plan_waves_scoped(
    graph: &SceneGraph,
    scope: Option<&HashSet<SegmentId>>,
) -> Result<Vec<Vec<Segment>>, EngineError> {
    let dirty = dirty_set(graph, scope);
    validate_ready(graph, &dirty)?;

    let mut wave_of: HashMap<&SegmentId, usize> = HashMap::new();
    let mut waves: Vec<Vec<Segment>> = Vec::new();
    for id in graph.render_order() {
        if !dirty.contains(id) {
            continue;
        }
        let segment = graph.get(id).expect("topo ids are present");
        let wave = segment
            .deps()
            .iter()
            .filter_map(|dep| wave_of.get(dep))
            .map(|w| w + 1)
            .max()
            .unwrap_or(0);
        wave_of.insert(segment.id(), wave);
        if waves.len() <= wave {
            waves.resize_with(wave + 1, Vec::new);
        }
        waves[wave].push(segment.clone());
    }
    Ok(waves)
}

/// Purely informational runtime estimate over the planned waves.
pub fn estimate(
    graph: &SceneGraph,
    per_segment_seconds: f64,
    worker_count: usize,
) -> Result<Estimate, EngineError> {
    let waves = plan_waves(graph)?;
    let workers = worker_count.max(1);
    let total: usize = waves.iter().map(Vec::len).sum();

    let sequential = total as f64 * per_segment_seconds;
    let parallel: f64 = waves
        .iter()
        .map(|wave| wave.len().div_ceil(workers) as f64 * per_segment_seconds)
        .sum();
    let speedup = if parallel > 0.0 {
        sequential / parallel
    } else {
        1.0
    };
    Ok(Estimate {
        sequential,
        parallel,
        speedup,
    })
}

fn dirty_set(graph: &SceneGraph, scope: Option<&HashSet<SegmentId>>) -> HashSet<SegmentId> {
    graph
        .all_segments()
        .filter(|s| s.needs_render())
        .filter(|s| scope.is_none_or(|set| set.contains(s.id())))
        .map(|s| s.id().clone())
        .collect()
}

/// Every non-dirty dependency of a dirty segment must be `Cached`.
fn validate_ready(graph: &SceneGraph, dirty: &HashSet<SegmentId>) -> Result<(), EngineError> {
    for id in dirty {
        let segment = graph.get(id).expect("dirty ids come from the graph");
        for dep in segment.deps() {
            if dirty.contains(dep) {
                continue;
            }
            let dep_state = graph.get(dep).map(Segment::state);
            if dep_state != Some(SegmentState::Cached) {
                return Err(EngineError::UnsatisfiedDependency(dep.clone()));
            }
        }
    }
    Ok(())
}
