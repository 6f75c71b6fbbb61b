//! The session: the minimal API surface callers drive the engine with.
//!
//! A [`Session`] owns the current-graph cell, the port registries
//! (backends, quality presets, event sinks), the artifact layout, and an
//! optional filesystem watcher. Graph values stay immutable; the session
//! serializes watcher-driven updates and caller-driven edits through the
//! cell.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use reel_core::{
    Construct, GraphMetadata, GraphStats, Metadata, SceneGraph, Segment, SegmentId, SegmentState,
};
use reel_watch::{ChangeCallback, SourceChange, WatchConfig, WatcherHandle, WatcherStats};

use crate::backend::{BackendRegistry, RenderBackend};
use crate::cell::GraphCell;
use crate::combine;
use crate::driver;
use crate::error::EngineError;
use crate::event::{EventKind, EventSinkRegistry};
use crate::executor::{self, ExecuteOptions};
use crate::layout::ArtifactLayout;
use crate::quality::{QualityInput, QualityRegistry, QualitySetting};
use crate::report::RenderReport;
use crate::scheduler::CancelToken;

/// Static session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root of the partial/output artifact tree.
    pub output_root: PathBuf,
    /// Registry tag of the backend to render with.
    pub backend: String,
    /// Quality preset used when neither the call nor the graph names one.
    pub default_quality: String,
    /// Worker pool size; defaults to the hardware thread count.
    pub worker_count: Option<usize>,
}

impl SessionConfig {
    pub fn new(output_root: impl Into<PathBuf>, backend: impl Into<String>) -> Self {
        SessionConfig {
            output_root: output_root.into(),
            backend: backend.into(),
            default_quality: "medium".into(),
            worker_count: None,
        }
    }
}

/// Per-call render options. Everything unset falls back to session or
/// graph defaults.
#[derive(Clone, Default)]
pub struct RenderOpts {
    /// Preset name or literal setting.
    pub quality: Option<QualityInput>,
    pub worker_count: Option<usize>,
    /// `false` forces the sequential planner.
    pub parallel: Option<bool>,
    pub cancel_token: Option<CancelToken>,
    /// Per-segment time budget, if the backend can enforce one.
    pub timeout: Option<Duration>,
}

/// Session status snapshot.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub stats: GraphStats,
    pub backend: String,
    pub output_root: PathBuf,
    pub watching: bool,
    pub watcher: Option<WatcherStats>,
}

/// The engine's caller-facing coordinator.
pub struct Session {
    config: SessionConfig,
    cell: Arc<GraphCell>,
    backends: BackendRegistry,
    qualities: QualityRegistry,
    events: Arc<EventSinkRegistry>,
    layout: ArtifactLayout,
    initialized: AtomicBool,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl Session {
    /// Creates a session with empty registries (register a backend before
    /// rendering) and the default quality presets.
    pub fn new(config: SessionConfig) -> Self {
        let layout = ArtifactLayout::new(config.output_root.clone());
        Session {
            config,
            cell: Arc::new(GraphCell::default()),
            backends: BackendRegistry::new(),
            qualities: QualityRegistry::with_defaults(),
            events: Arc::new(EventSinkRegistry::new()),
            layout,
            initialized: AtomicBool::new(false),
            watcher: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Registries & accessors
    // -----------------------------------------------------------------------

    pub fn register_backend(&self, backend: Arc<dyn RenderBackend>) {
        self.backends.register(backend);
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn qualities(&self) -> &QualityRegistry {
        &self.qualities
    }

    pub fn events(&self) -> &EventSinkRegistry {
        &self.events
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Initializes registered backends and the artifact directories.
    /// Idempotent.
    pub fn init(&self) -> Result<(), EngineError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.layout.ensure_dirs()?;
        for name in self.backends.names() {
            self.backends.get(&name)?.init()?;
        }
        info!(target: "reel.session", output_root = %self.config.output_root.display(), "session initialized");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Graph construction & installation
    // -----------------------------------------------------------------------

    /// Builds a segment from raw parts.
    pub fn make_segment(
        &self,
        id: &str,
        deps: &[&str],
        metadata: Metadata,
        construct: Construct,
    ) -> Result<Segment, EngineError> {
        let id = SegmentId::new(id)?;
        let deps = deps
            .iter()
            .map(|d| SegmentId::new(*d))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Segment::create(id, construct, deps, metadata)?)
    }

    /// Builds a graph from segments (any order), carrying the session's
    /// default quality as graph metadata.
    pub fn make_graph(&self, segments: Vec<Segment>) -> Result<SceneGraph, EngineError> {
        let metadata = GraphMetadata {
            title: None,
            default_quality: Some(self.config.default_quality.clone()),
        };
        Ok(SceneGraph::empty(metadata).add_all(segments)?)
    }

    /// Installs a graph as the session's current one.
    pub fn use_graph(&self, graph: SceneGraph) {
        self.cell.install(graph);
    }

    /// Snapshot of the current graph value.
    pub fn graph(&self) -> SceneGraph {
        self.cell.snapshot()
    }

    // -----------------------------------------------------------------------
    // Dirty marking
    // -----------------------------------------------------------------------

    /// Marks a segment and its transitive dependents dirty, emitting one
    /// `SegmentMarkedDirty` per segment that actually changed state.
    pub fn mark_dirty(&self, id: &str) -> Result<(), EngineError> {
        let id = SegmentId::new(id)?;
        let dirtied = self.cell.update(|g| {
            let next = g.mark_dirty(&id)?;
            Ok((next.clone(), newly_dirty(g, &next)))
        })?;
        self.emit_dirty(dirtied);
        Ok(())
    }

    /// Marks every segment dirty.
    pub fn mark_all_dirty(&self) {
        let dirtied = self
            .cell
            .update(|g| {
                let next = g.mark_all_dirty();
                Ok((next.clone(), newly_dirty(g, &next)))
            })
            .expect("mark_all_dirty cannot fail");
        self.emit_dirty(dirtied);
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Renders every dirty segment, wave by wave.
    pub fn render_dirty(&self, opts: &RenderOpts) -> Result<RenderReport, EngineError> {
        self.execute_scoped(opts, None)
    }

    /// Marks everything dirty, then renders it all.
    pub fn render_all(&self, opts: &RenderOpts) -> Result<RenderReport, EngineError> {
        self.mark_all_dirty();
        self.render_dirty(opts)
    }

    /// Renders one segment plus whichever of its ancestors are dirty.
    pub fn render(&self, id: &str, opts: &RenderOpts) -> Result<RenderReport, EngineError> {
        let id = SegmentId::new(id)?;
        let scope: HashSet<SegmentId> = self.cell.read(|g| {
            g.transitive_dependencies(&id)
                .map(|deps| deps.into_iter().chain([id.clone()]).collect())
        })?;
        self.execute_scoped(opts, Some(scope))
    }

    /// Renders a single segment at low-quality defaults to the preview
    /// directory, bypassing cache state entirely.
    pub fn preview(&self, id: &str, opts: &RenderOpts) -> Result<PathBuf, EngineError> {
        self.init()?;
        let id = SegmentId::new(id)?;
        let segment = self
            .cell
            .read(|g| g.get(&id).cloned())
            .ok_or(reel_core::CoreError::SegmentNotFound(id))?;
        let quality = match &opts.quality {
            Some(input) => self.qualities.resolve(input.clone())?,
            None => QualitySetting::low(),
        };
        let backend = self.backends.get(&self.config.backend)?;
        driver::preview_segment(backend.as_ref(), &self.layout, &segment, &quality)
    }

    // -----------------------------------------------------------------------
    // Combining
    // -----------------------------------------------------------------------

    /// Concatenates cached artifacts into `output` (relative paths land
    /// under `<output_root>/output/`).
    pub fn combine(
        &self,
        output: impl AsRef<Path>,
        order: Option<Vec<SegmentId>>,
    ) -> Result<PathBuf, EngineError> {
        self.init()?;
        let output = self.resolve_output(output.as_ref());
        let backend = self.backends.get(&self.config.backend)?;
        let graph = self.cell.snapshot();
        combine::combine(&graph, backend.as_ref(), &self.events, &output, order)
    }

    /// `render_dirty` followed by `combine`, in one step.
    pub fn export(
        &self,
        output: impl AsRef<Path>,
        opts: &RenderOpts,
    ) -> Result<(RenderReport, PathBuf), EngineError> {
        let report = self.render_dirty(opts)?;
        let path = self.combine(output, None)?;
        Ok((report, path))
    }

    // -----------------------------------------------------------------------
    // Watching
    // -----------------------------------------------------------------------

    /// Starts watching source roots. Changed files map to source units;
    /// affected segments (unit owners plus transitive dependents) are
    /// marked dirty and announced through the event sink; `on_change`
    /// runs afterwards for callers that want to trigger a render cycle.
    ///
    /// Watching the same roots twice is a no-op; different roots replace
    /// the previous watcher.
    pub fn watch(
        &self,
        paths: &[PathBuf],
        on_change: Option<ChangeCallback>,
    ) -> Result<(), EngineError> {
        let mut slot = self.watcher.lock().expect("watcher slot");
        if let Some(existing) = slot.as_ref() {
            let mut requested: Vec<PathBuf> = paths
                .iter()
                .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
                .collect();
            requested.sort();
            let mut current = existing.roots().to_vec();
            current.sort();
            if existing.is_running() && requested == current {
                return Ok(());
            }
            existing.stop();
        }

        let cell = self.cell.clone();
        let resolver = Arc::new(move |unit: &str| affected_by_unit(&cell.snapshot(), unit));

        let cell = self.cell.clone();
        let events = self.events.clone();
        let callback: ChangeCallback = Arc::new(move |change: &SourceChange| {
            let dirtied = cell.update(|g| {
                let mut next = g.clone();
                for id in &change.affected {
                    if next.get(id).is_some() {
                        next = next.mark_dirty(id)?;
                    }
                }
                Ok((next.clone(), newly_dirty(g, &next)))
            });
            events.emit(EventKind::SourceChanged {
                unit: change.unit.clone(),
                affected: change.affected.clone(),
            });
            match dirtied {
                Ok(ids) => {
                    for id in ids {
                        events.emit(EventKind::SegmentMarkedDirty { id });
                    }
                }
                Err(err) => {
                    warn!(target: "reel.session", error = %err, "failed to dirty watched segments");
                }
            }
            if let Some(user) = &on_change {
                user(change);
            }
        });

        let handle = reel_watch::start(paths, WatchConfig::default(), resolver, callback)?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stops the watcher if one is running. Idempotent.
    pub fn unwatch(&self) {
        if let Some(handle) = self.watcher.lock().expect("watcher slot").take() {
            handle.stop();
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> GraphStats {
        self.cell.read(SceneGraph::stats)
    }

    pub fn status(&self) -> SessionStatus {
        let watcher = self.watcher.lock().expect("watcher slot");
        SessionStatus {
            stats: self.stats(),
            backend: self.config.backend.clone(),
            output_root: self.config.output_root.clone(),
            watching: watcher.as_ref().is_some_and(WatcherHandle::is_running),
            watcher: watcher.as_ref().map(WatcherHandle::stats),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn execute_scoped(
        &self,
        opts: &RenderOpts,
        scope: Option<HashSet<SegmentId>>,
    ) -> Result<RenderReport, EngineError> {
        self.init()?;
        let backend = self.backends.get(&self.config.backend)?;
        let quality = self.resolve_quality(opts)?;
        let exec = ExecuteOptions {
            quality,
            worker_count: opts
                .worker_count
                .or(self.config.worker_count)
                .unwrap_or_else(executor::default_worker_count),
            parallel: opts.parallel.unwrap_or(true),
            cancel: opts.cancel_token.clone().unwrap_or_default(),
            timeout: opts.timeout,
            scope,
        };
        executor::execute(
            &self.cell,
            backend.as_ref(),
            &self.events,
            &self.layout,
            &exec,
        )
    }

    /// Per-call quality, else the graph's default, else the session's.
    fn resolve_quality(&self, opts: &RenderOpts) -> Result<QualitySetting, EngineError> {
        if let Some(input) = &opts.quality {
            return self.qualities.resolve(input.clone());
        }
        let graph_default = self
            .cell
            .read(|g| g.metadata().default_quality.clone());
        let name = graph_default.unwrap_or_else(|| self.config.default_quality.clone());
        self.qualities.resolve(name)
    }

    fn resolve_output(&self, output: &Path) -> PathBuf {
        if output.is_absolute() {
            output.to_path_buf()
        } else {
            self.layout.output_dir().join(output)
        }
    }

    fn emit_dirty(&self, ids: Vec<SegmentId>) {
        for id in ids {
            self.events.emit(EventKind::SegmentMarkedDirty { id });
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Segments whose state flipped to `Dirty` between two graph values.
fn newly_dirty(before: &SceneGraph, after: &SceneGraph) -> Vec<SegmentId> {
    after
        .all_segments()
        .filter(|s| s.state() == SegmentState::Dirty)
        .filter(|s| {
            before
                .get(s.id())
                .map(|old| old.state() != SegmentState::Dirty)
                .unwrap_or(true)
        })
        .map(|s| s.id().clone())
        .collect()
}

/// Segments owned by a source unit plus all their transitive dependents.
fn affected_by_unit(graph: &SceneGraph, unit: &str) -> Vec<SegmentId> {
    let owners: Vec<SegmentId> = graph
        .all_segments()
        .filter(|s| s.source_unit() == Some(unit))
        .map(|s| s.id().clone())
        .collect();
    let mut affected: HashSet<SegmentId> = owners.iter().cloned().collect();
    for owner in &owners {
        if let Ok(dependents) = graph.transitive_dependents(owner) {
            affected.extend(dependents);
        }
    }
    let mut out: Vec<SegmentId> = affected.into_iter().collect();
    out.sort();
    out
}
