//! Filesystem change watching with debounce and source-unit mapping.
//!
//! The watcher observes a set of source roots through a notify
//! [`RecommendedWatcher`] (inotify on Linux, kqueue on macOS). Raw file
//! events are coalesced within a short debounce window, translated into
//! *source units* by a caller-supplied mapper (default convention: the
//! file stem names the unit), resolved into affected segments, and handed
//! to the `on_change` callback one [`SourceChange`] per unit.
//!
//! The callback runs on the watcher thread; a panicking callback is
//! logged and discarded so the watcher keeps running.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::{debug, info, warn};

use reel_core::SegmentId;

use crate::error::WatchError;

/// Shortest accepted debounce window.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(50);
/// Longest accepted debounce window.
pub const MAX_DEBOUNCE: Duration = Duration::from_millis(200);
/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Maps a changed file path to zero or more source-unit identifiers.
pub type SourceUnitMapper = Arc<dyn Fn(&Path) -> Vec<String> + Send + Sync>;

/// Resolves a changed source unit to the segments it affects (direct
/// owners plus their transitive dependents).
pub type AffectedResolver = Arc<dyn Fn(&str) -> Vec<SegmentId> + Send + Sync>;

/// Invoked once per changed source unit after debouncing.
pub type ChangeCallback = Arc<dyn Fn(&SourceChange) + Send + Sync>;

/// One debounced source-unit change.
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub unit: String,
    pub affected: Vec<SegmentId>,
    pub timestamp_ms: u64,
}

/// Watcher configuration.
#[derive(Clone)]
pub struct WatchConfig {
    debounce: Duration,
    mapper: SourceUnitMapper,
}

impl WatchConfig {
    /// Clamps the debounce window into `[MIN_DEBOUNCE, MAX_DEBOUNCE]`.
    pub fn new(debounce: Duration, mapper: SourceUnitMapper) -> Self {
        WatchConfig {
            debounce: debounce.clamp(MIN_DEBOUNCE, MAX_DEBOUNCE),
            mapper,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: DEFAULT_DEBOUNCE,
            mapper: stem_mapper(),
        }
    }
}

/// The default file-to-unit convention: a non-hidden file maps to its
/// file stem (`scenes/intro.py` changes unit `intro`).
pub fn stem_mapper() -> SourceUnitMapper {
    Arc::new(|path: &Path| {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        if name.starts_with('.') {
            return Vec::new();
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    })
}

/// Diagnostic counters for a running watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Number of source-unit changes emitted so far.
    pub changes_detected: u64,
    /// Epoch millis of the most recent change, 0 if none yet.
    pub last_change_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    changes: AtomicU64,
    last_change_ms: AtomicU64,
    running: AtomicBool,
}

/// Handle to a running watcher thread.
///
/// [`stop`](WatcherHandle::stop) is idempotent; dropping the handle does
/// NOT stop the watcher (sessions keep it alive until `unwatch`).
pub struct WatcherHandle {
    roots: Vec<PathBuf>,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WatcherHandle {
    /// Signals the thread to stop and joins it. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().expect("watcher thread slot").take() {
            if handle.join().is_err() {
                warn!(target: "reel.watch", "watcher thread panicked during shutdown");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// The canonicalized roots this watcher observes.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            changes_detected: self.counters.changes.load(Ordering::SeqCst),
            last_change_ms: self.counters.last_change_ms.load(Ordering::SeqCst),
        }
    }
}

/// Starts watching the given roots.
///
/// Events are debounced per [`WatchConfig`], mapped to source units,
/// resolved to affected segments, and delivered to `on_change`.
pub fn start(
    roots: &[PathBuf],
    config: WatchConfig,
    resolver: AffectedResolver,
    on_change: ChangeCallback,
) -> Result<WatcherHandle, WatchError> {
    let roots: Vec<PathBuf> = roots
        .iter()
        .map(|r| r.canonicalize().unwrap_or_else(|_| r.clone()))
        .collect();

    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )?;
    for root in &roots {
        watcher.watch(root, RecursiveMode::Recursive)?;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let counters = Arc::new(Counters::default());
    counters.running.store(true, Ordering::SeqCst);
    info!(target: "reel.watch", roots = roots.len(), debounce_ms = config.debounce.as_millis() as u64, "watcher started");

    let thread = {
        let stop_flag = stop_flag.clone();
        let counters = counters.clone();
        std::thread::spawn(move || {
            // The notify watcher must live as long as the loop.
            let _watcher = watcher;
            run_loop(&rx, &config, &resolver, &on_change, &stop_flag, &counters);
            counters.running.store(false, Ordering::SeqCst);
            info!(target: "reel.watch", "watcher stopped");
        })
    };

    Ok(WatcherHandle {
        roots,
        stop_flag,
        counters,
        thread: Mutex::new(Some(thread)),
    })
}

fn run_loop(
    rx: &mpsc::Receiver<notify::Result<notify::Event>>,
    config: &WatchConfig,
    resolver: &AffectedResolver,
    on_change: &ChangeCallback,
    stop_flag: &AtomicBool,
    counters: &Counters,
) {
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(event)) if is_relevant(&event.kind) => {
                let mut paths = event.paths;
                coalesce(rx, config.debounce, &mut paths);
                dispatch(&paths, config, resolver, on_change, counters);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(target: "reel.watch", error = %err, "watch backend error");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Pure access notifications carry no content change.
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Collects further event paths until the debounce window closes.
fn coalesce(
    rx: &mpsc::Receiver<notify::Result<notify::Event>>,
    debounce: Duration,
    paths: &mut Vec<PathBuf>,
) {
    let deadline = Instant::now() + debounce;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(Ok(event)) if is_relevant(&event.kind) => paths.extend(event.paths),
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

fn dispatch(
    paths: &[PathBuf],
    config: &WatchConfig,
    resolver: &AffectedResolver,
    on_change: &ChangeCallback,
    counters: &Counters,
) {
    let units: BTreeSet<String> = paths.iter().flat_map(|p| (config.mapper)(p)).collect();
    for unit in units {
        let affected = resolver(&unit);
        let change = SourceChange {
            unit,
            affected,
            timestamp_ms: epoch_millis(),
        };
        counters.changes.fetch_add(1, Ordering::SeqCst);
        counters
            .last_change_ms
            .store(change.timestamp_ms, Ordering::SeqCst);
        debug!(target: "reel.watch", unit = %change.unit, affected = change.affected.len(), "source change");
        if catch_unwind(AssertUnwindSafe(|| on_change(&change))).is_err() {
            warn!(target: "reel.watch", unit = %change.unit, "on_change callback panicked");
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
