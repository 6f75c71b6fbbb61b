//! Reel incremental render CLI.
//!
//! Drives the engine over a graph stored in a file repository, rendering
//! through the deterministic mock backend (real backends are registered
//! by embedding applications; the CLI is the smoke-test surface).
//! Constructs cannot live in storage, so the CLI re-attaches placeholder
//! constructs keyed by each segment's stored tag, which keeps content
//! hashes and cache validity intact.
//!
//! Exit codes: 0 success, 1 unspecified error, 2 cycle detected,
//! 3 missing dependency, 4 combine failed, 5 cancelled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reel_core::{Construct, CoreError, Metadata, SceneGraph, SegmentId};
use reel_engine::{
    estimate, EngineError, EventKind, MockBackend, RenderOpts, Session, SessionConfig,
};
use reel_storage::{FileRepository, GraphRepository};

/// Reel incremental animation renderer.
#[derive(Parser)]
#[command(name = "reel", about = "Incremental animation render engine")]
struct Cli {
    /// Directory holding stored scene graphs.
    #[arg(long, default_value = "./reel-store")]
    store: PathBuf,

    /// Graph id within the store.
    #[arg(long, default_value = "default")]
    graph: String,

    /// Root directory for partial and combined artifacts.
    #[arg(long, default_value = "./reel-out")]
    output_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Seed the store with a small demo scene graph.
    Seed,

    /// Render dirty segments (or one segment and its dirty ancestors).
    Render {
        /// Render only this segment (plus dirty ancestors).
        #[arg(long)]
        segment: Option<String>,

        /// Quality preset: low, medium, high.
        #[arg(long)]
        quality: Option<String>,

        /// Worker pool size (default: hardware threads).
        #[arg(long)]
        workers: Option<usize>,

        /// Render one segment at a time instead of in waves.
        #[arg(long)]
        sequential: bool,

        /// Mark everything dirty first.
        #[arg(long)]
        all: bool,
    },

    /// Concatenate cached partial artifacts into one output.
    Combine {
        /// Output filename (relative paths land under output/).
        #[arg(short, long, default_value = "final.mp4")]
        output: String,
    },

    /// Render dirty segments, then combine.
    Export {
        #[arg(short, long, default_value = "final.mp4")]
        output: String,

        #[arg(long)]
        quality: Option<String>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Watch source roots and re-render on changes.
    Watch {
        /// Directories of source files to observe.
        paths: Vec<PathBuf>,
    },

    /// Print graph statistics and session state.
    Status,

    /// Estimate sequential vs parallel render time.
    Estimate {
        /// Assumed seconds per segment.
        #[arg(long, default_value_t = 2.0)]
        per_segment_seconds: f64,

        #[arg(long)]
        workers: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let repo = match FileRepository::new(&cli.store) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("Error: cannot open store '{}': {}", cli.store.display(), e);
            return 1;
        }
    };

    match cli.command {
        Commands::Seed => run_seed(&repo, &cli.graph),
        command => {
            let session = Session::new(SessionConfig::new(&cli.output_root, "mock"));
            session.register_backend(Arc::new(MockBackend::new()));

            let graph = match load_graph(&repo, &cli.graph) {
                Ok(graph) => graph,
                Err(code) => return code,
            };
            session.use_graph(graph);

            let code = match command {
                Commands::Seed => unreachable!("handled above"),
                Commands::Render {
                    segment,
                    quality,
                    workers,
                    sequential,
                    all,
                } => run_render(&session, segment, quality, workers, sequential, all),
                Commands::Combine { output } => run_combine(&session, &output),
                Commands::Export {
                    output,
                    quality,
                    workers,
                } => run_export(&session, &output, quality, workers),
                Commands::Watch { paths } => run_watch(&session, paths),
                Commands::Status => run_status(&session),
                Commands::Estimate {
                    per_segment_seconds,
                    workers,
                } => run_estimate(&session, per_segment_seconds, workers),
            };

            // Persist state changes (hashes, cache states) back to the store.
            if code == 0 {
                if let Err(e) = repo.save(&cli.graph, &session.graph()) {
                    eprintln!("Error: failed to save graph: {}", e);
                    return 1;
                }
            }
            code
        }
    }
}

/// Loads the stored graph, re-attaching placeholder constructs by tag so
/// hashes and cache states survive.
fn load_graph(repo: &FileRepository, id: &str) -> Result<SceneGraph, i32> {
    let record = match repo.load_record(id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            eprintln!("Error: no graph '{}' in store (run `reel seed` first)", id);
            return Err(1);
        }
        Err(e) => {
            eprintln!("Error: cannot read graph '{}': {}", id, e);
            return Err(1);
        }
    };

    let constructs: HashMap<SegmentId, Construct> = record
        .segments
        .iter()
        .map(|s| (s.id.clone(), Construct::noop(s.construct_tag.clone())))
        .collect();
    match reel_storage::recompose(id, record, &constructs) {
        Ok(graph) => Ok(graph),
        Err(e) => {
            eprintln!("Error: cannot load graph '{}': {}", id, e);
            Err(1)
        }
    }
}

fn run_seed(repo: &FileRepository, graph_id: &str) -> i32 {
    let segments = vec![
        ("intro", vec![], "intro"),
        ("axes", vec!["intro"], "axes"),
        ("curve", vec!["axes"], "curve"),
        ("labels", vec!["axes"], "labels"),
        ("zoom", vec!["curve", "labels"], "zoom"),
        ("outro", vec!["zoom"], "outro"),
    ];
    let built: Result<Vec<_>, CoreError> = segments
        .into_iter()
        .map(|(id, deps, unit)| {
            let deps = deps
                .into_iter()
                .map(SegmentId::new)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(reel_core::Segment::create(
                SegmentId::new(id)?,
                Construct::noop(format!("{}-v1", id)),
                deps,
                Metadata::new(),
            )?
            .with_source_unit(unit))
        })
        .collect();

    let graph = match built.and_then(|segments| SceneGraph::default().add_all(segments)) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for_core(&e);
        }
    };
    if let Err(e) = repo.save(graph_id, &graph) {
        eprintln!("Error: failed to save graph: {}", e);
        return 1;
    }
    println!("seeded graph '{}' with {} segments", graph_id, graph.count());
    0
}

fn run_render(
    session: &Session,
    segment: Option<String>,
    quality: Option<String>,
    workers: Option<usize>,
    sequential: bool,
    all: bool,
) -> i32 {
    let opts = RenderOpts {
        quality: quality.map(Into::into),
        worker_count: workers,
        parallel: Some(!sequential),
        ..RenderOpts::default()
    };
    let result = match (&segment, all) {
        (Some(id), _) => session.render(id, &opts),
        (None, true) => session.render_all(&opts),
        (None, false) => session.render_dirty(&opts),
    };
    match result {
        Ok(report) => {
            println!(
                "rendered {} / errored {} / skipped {}{} in {} ms",
                report.rendered.len(),
                report.errored.len(),
                report.skipped.len(),
                if report.cancelled { " (cancelled)" } else { "" },
                report.elapsed_ms
            );
            if report.cancelled {
                5
            } else if report.errored.is_empty() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn run_combine(session: &Session, output: &str) -> i32 {
    match session.combine(output, None) {
        Ok(path) => {
            println!("combined -> {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn run_export(
    session: &Session,
    output: &str,
    quality: Option<String>,
    workers: Option<usize>,
) -> i32 {
    let opts = RenderOpts {
        quality: quality.map(Into::into),
        worker_count: workers,
        ..RenderOpts::default()
    };
    match session.export(output, &opts) {
        Ok((report, path)) => {
            println!(
                "rendered {} segments, combined -> {}",
                report.rendered.len(),
                path.display()
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

fn run_watch(session: &Session, paths: Vec<PathBuf>) -> i32 {
    if paths.is_empty() {
        eprintln!("Error: watch requires at least one path");
        return 1;
    }

    // Announce every engine event while watching.
    session.events().register("cli-watch", |event| match &event.kind {
        EventKind::SourceChanged { unit, affected } => {
            println!("source '{}' changed, {} segment(s) affected", unit, affected.len());
        }
        EventKind::RenderCompleted { id, elapsed_ms, .. } => {
            println!("  rendered {} in {} ms", id, elapsed_ms);
        }
        EventKind::RenderFailed { id, error, .. } => {
            println!("  FAILED {}: {}", id, error);
        }
        _ => {}
    });

    if let Err(e) = session.watch(&paths, None) {
        eprintln!("Error: {}", e);
        return exit_code_for(&e);
    }
    println!("watching {} root(s); ctrl-c to stop", paths.len());

    loop {
        std::thread::sleep(Duration::from_millis(500));
        let stats = session.stats();
        if stats.dirty > 0 {
            if let Err(e) = session.render_dirty(&RenderOpts::default()) {
                eprintln!("Error: {}", e);
                session.unwatch();
                return exit_code_for(&e);
            }
        }
    }
}

fn run_status(session: &Session) -> i32 {
    let status = session.status();
    let s = status.stats;
    println!("backend:     {}", status.backend);
    println!("output root: {}", status.output_root.display());
    println!(
        "segments:    {} total ({} cached, {} dirty, {} pending, {} error, {} rendering)",
        s.total, s.cached, s.dirty, s.pending, s.error, s.rendering
    );
    println!("max depth:   {}", s.max_depth);
    println!("watching:    {}", status.watching);
    0
}

fn run_estimate(session: &Session, per_segment_seconds: f64, workers: Option<usize>) -> i32 {
    let workers = workers.unwrap_or_else(reel_engine::default_worker_count);
    match estimate(&session.graph(), per_segment_seconds, workers) {
        Ok(est) => {
            println!("sequential: {:.1}s", est.sequential);
            println!("parallel:   {:.1}s ({} workers)", est.parallel, workers);
            println!("speedup:    {:.2}x", est.speedup);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    }
}

/// Maps engine errors onto the documented exit codes.
fn exit_code_for(err: &EngineError) -> i32 {
    match err {
        EngineError::Core(core) => exit_code_for_core(core),
        EngineError::NotCached(_) | EngineError::CombineFailed(_) => 4,
        EngineError::Cancelled => 5,
        EngineError::UnsatisfiedDependency(_) => 3,
        _ => 1,
    }
}

fn exit_code_for_core(err: &CoreError) -> i32 {
    match err {
        CoreError::CycleDetected(_) => 2,
        CoreError::MissingDeps(_) => 3,
        _ => 1,
    }
}
