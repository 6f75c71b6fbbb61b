//! The `RenderBackend` port, its tag registry, and the mock backend.
//!
//! A backend owns the concrete scene type: `render` builds a scene,
//! invokes the segment's construct against it, and writes the artifact to
//! exactly `opts.output_file` (which already embeds the content hash; the
//! driver handles tmp-file publication and verification around this
//! call). Implementations must be thread-safe or serialize internally.

use std::any::Any;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use reel_core::Segment;

use crate::error::EngineError;
use crate::quality::QualitySetting;

/// Per-render options handed to the backend.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub quality: QualitySetting,
    /// Exact target path for this render. The backend must write here.
    pub output_file: PathBuf,
    /// Preview renders may cut corners (single frame, low effort).
    pub preview: bool,
    /// Time budget for this segment, if the backend can enforce one.
    pub timeout: Option<Duration>,
}

/// The rendering port.
pub trait RenderBackend: Send + Sync {
    /// Registry tag for this backend.
    fn name(&self) -> &str;

    /// One-time initialization; must be idempotent.
    fn init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// File extension of produced artifacts.
    fn artifact_ext(&self) -> &str {
        "mp4"
    }

    /// Builds the segment's scene and renders it to `opts.output_file`.
    fn render(&self, segment: &Segment, opts: &RenderOptions) -> Result<PathBuf, EngineError>;

    /// Quick single-segment preview; defaults to a normal render.
    fn preview(&self, segment: &Segment, opts: &RenderOptions) -> Result<PathBuf, EngineError> {
        self.render(segment, opts)
    }

    /// Concatenates `inputs` into `output` without re-encoding.
    fn combine(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf, EngineError>;
}

/// Tag-keyed backend registry, safe against concurrent readers.
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<dyn RenderBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own name tag.
    pub fn register(&self, backend: Arc<dyn RenderBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Looks up a backend by tag.
    pub fn get(&self, tag: &str) -> Result<Arc<dyn RenderBackend>, EngineError> {
        self.backends
            .get(tag)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownBackend(tag.to_string()))
    }

    /// Registered backend tags, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// The scene handle the mock backend passes to constructs.
///
/// Constructs downcast the `&mut dyn Any` they receive to this type and
/// record directives; the mock render writes them into the artifact so
/// tests can assert the construct actually ran.
#[derive(Debug, Default)]
pub struct MockScene {
    pub directives: Vec<String>,
}

impl MockScene {
    /// Records a scene directive.
    pub fn play(&mut self, directive: impl Into<String>) {
        self.directives.push(directive.into());
    }
}

/// Deterministic test backend.
///
/// Writes a placeholder artifact whose content is a function of the
/// segment id, hash, and quality tag. Failures and latency can be
/// scripted per segment id.
#[derive(Default)]
pub struct MockBackend {
    fail: DashMap<String, String>,
    delay: DashMap<String, Duration>,
    renders: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `render` to fail for the given segment id.
    pub fn fail_segment(&self, id: &str, message: impl Into<String>) {
        self.fail.insert(id.to_string(), message.into());
    }

    /// Removes a scripted failure (e.g. to test retries).
    pub fn clear_failure(&self, id: &str) {
        self.fail.remove(id);
    }

    /// Scripts a per-segment artificial latency.
    pub fn delay_segment(&self, id: &str, delay: Duration) {
        self.delay.insert(id.to_string(), delay);
    }

    /// Number of successful render calls so far.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl RenderBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn render(&self, segment: &Segment, opts: &RenderOptions) -> Result<PathBuf, EngineError> {
        let id = segment.id();
        if let Some(delay) = self.delay.get(id.as_str()).map(|d| *d.value()) {
            if opts.timeout.is_some_and(|budget| delay > budget) {
                return Err(EngineError::Timeout(id.clone()));
            }
            std::thread::sleep(delay);
        }
        if let Some(message) = self.fail.get(id.as_str()) {
            return Err(EngineError::Backend {
                id: id.clone(),
                message: message.value().clone(),
            });
        }

        let mut scene = MockScene::default();
        segment
            .construct()
            .invoke(&mut scene as &mut dyn Any)
            .map_err(|e| EngineError::Backend {
                id: id.clone(),
                message: e.to_string(),
            })?;

        if let Some(parent) = opts.output_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&opts.output_file)?;
        writeln!(
            file,
            "mock artifact id={} hash={} quality={} preview={}",
            id,
            segment.content_hash(),
            opts.quality.quality_tag,
            opts.preview
        )?;
        for directive in &scene.directives {
            writeln!(file, "directive {}", directive)?;
        }

        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(opts.output_file.clone())
    }

    fn combine(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf, EngineError> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(output)?;
        for input in inputs {
            let bytes = fs::read(input).map_err(|e| {
                EngineError::CombineFailed(format!("cannot read '{}': {}", input.display(), e))
            })?;
            out.write_all(&bytes)?;
        }
        Ok(output.to_path_buf())
    }
}
