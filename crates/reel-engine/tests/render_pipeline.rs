//! End-to-end engine scenarios against the mock backend: linear chains,
//! selective diamond re-renders, wide parallel fan-out, error isolation,
//! cancellation, and the combine/export flow.

use std::fs;
use std::sync::{Arc, Mutex};

use reel_core::{Construct, Metadata, SegmentState};
use reel_engine::{
    estimate, Event, EventKind, MockBackend, MockScene, RenderOpts, Session, SessionConfig,
};
use tempfile::{tempdir, TempDir};

fn session_with_mock() -> (Session, Arc<MockBackend>, TempDir) {
    let dir = tempdir().unwrap();
    let session = Session::new(SessionConfig::new(dir.path(), "mock"));
    let backend = Arc::new(MockBackend::new());
    session.register_backend(backend.clone());
    session.init().unwrap();
    (session, backend, dir)
}

fn recording(session: &Session) -> Arc<Mutex<Vec<Event>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    session.events().register("test-log", move |e| {
        sink.lock().unwrap().push(e.clone());
    });
    log
}

fn playing_construct(tag: &str, directive: &'static str) -> Construct {
    Construct::new(tag, move |scene| {
        scene
            .downcast_mut::<MockScene>()
            .expect("mock scene handle")
            .play(directive);
        Ok(())
    })
}

fn started_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RenderStarted { id, .. } => Some(id.to_string()),
            _ => None,
        })
        .collect()
}

fn completed_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RenderCompleted { id, .. } => Some(id.to_string()),
            _ => None,
        })
        .collect()
}

/// Linear chain re-render: a -> b -> c with one worker renders in
/// dependency order and leaves three hash-named files under partial/.
#[test]
fn linear_chain_renders_in_order() {
    let (session, _backend, dir) = session_with_mock();
    let log = recording(&session);

    let graph = session
        .make_graph(vec![
            session
                .make_segment("a", &[], Metadata::new(), playing_construct("a-v1", "axes"))
                .unwrap(),
            session
                .make_segment("b", &["a"], Metadata::new(), playing_construct("b-v1", "plot"))
                .unwrap(),
            session
                .make_segment("c", &["b"], Metadata::new(), playing_construct("c-v1", "zoom"))
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);

    let opts = RenderOpts {
        quality: Some("low".into()),
        worker_count: Some(1),
        ..RenderOpts::default()
    };
    let report = session.render_dirty(&opts).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.rendered.len(), 3);

    let events = log.lock().unwrap();
    assert_eq!(started_ids(&events), vec!["a", "b", "c"]);
    assert_eq!(completed_ids(&events).len(), 3);
    drop(events);

    let graph = session.graph();
    for id in ["a", "b", "c"] {
        let segment = graph
            .get(&reel_core::SegmentId::new(id).unwrap())
            .unwrap();
        assert_eq!(segment.state(), SegmentState::Cached);

        let path = segment.artifact_path().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(
            name,
            format!("{}_{}.mp4", id, segment.content_hash()),
            "artifact name embeds the hash"
        );
        assert!(path.starts_with(dir.path().join("partial")));
        let body = fs::read_to_string(path).unwrap();
        assert!(body.contains(&format!("id={}", id)));
    }
}

/// Diamond with selective edit: after everything is cached, mutating b's
/// construct and rehashing dirties exactly {b, d}; the re-render runs b
/// strictly before d.
#[test]
fn diamond_selective_edit_rerenders_only_the_affected_path() {
    let (session, _backend, _dir) = session_with_mock();

    let graph = session
        .make_graph(vec![
            session
                .make_segment("a", &[], Metadata::new(), playing_construct("a-v1", "intro"))
                .unwrap(),
            session
                .make_segment("b", &["a"], Metadata::new(), playing_construct("b-v1", "left"))
                .unwrap(),
            session
                .make_segment("c", &["a"], Metadata::new(), playing_construct("c-v1", "right"))
                .unwrap(),
            session
                .make_segment(
                    "d",
                    &["b", "c"],
                    Metadata::new(),
                    playing_construct("d-v1", "merge"),
                )
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);
    session
        .render_dirty(&RenderOpts::default())
        .unwrap();
    assert_eq!(session.stats().cached, 4);

    // Edit b's construct and pick the drift up via rehash_all.
    let edited = session
        .graph()
        .update(&reel_core::SegmentId::new("b").unwrap(), |s| {
            s.with_construct(playing_construct("b-v2", "left-redone"))
        })
        .unwrap()
        .rehash_all();
    session.use_graph(edited);

    let stats = session.stats();
    assert_eq!(stats.dirty, 2);
    assert_eq!(stats.cached, 2);

    let log = recording(&session);
    let opts = RenderOpts {
        worker_count: Some(4),
        ..RenderOpts::default()
    };
    let report = session.render_dirty(&opts).unwrap();
    assert_eq!(report.rendered.len(), 2);

    // Two waves: b completes before d starts.
    let events = log.lock().unwrap();
    let sequence: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RenderStarted { id, .. } => Some(format!("start:{}", id)),
            EventKind::RenderCompleted { id, .. } => Some(format!("done:{}", id)),
            _ => None,
        })
        .collect();
    assert_eq!(sequence, vec!["start:b", "done:b", "start:d", "done:d"]);
}

/// Wide parallel fan-out: root + 8 leaves with 4 workers takes two waves
/// and completes all nine segments; the estimator prices it at ~3s.
#[test]
fn wide_fanout_completes_every_leaf() {
    let (session, backend, _dir) = session_with_mock();
    let log = recording(&session);

    let mut segments = vec![session
        .make_segment("root", &[], Metadata::new(), playing_construct("root-v1", "base"))
        .unwrap()];
    for i in 1..=8 {
        segments.push(
            session
                .make_segment(
                    &format!("x{}", i),
                    &["root"],
                    Metadata::new(),
                    playing_construct(&format!("x{}-v1", i), "leaf"),
                )
                .unwrap(),
        );
    }
    let graph = session.make_graph(segments).unwrap();

    let est = estimate(&graph, 1.0, 4).unwrap();
    assert_eq!(est.sequential, 9.0);
    assert_eq!(est.parallel, 3.0);

    session.use_graph(graph);
    let opts = RenderOpts {
        worker_count: Some(4),
        ..RenderOpts::default()
    };
    let report = session.render_dirty(&opts).unwrap();
    assert_eq!(report.rendered.len(), 9);
    assert_eq!(backend.render_count(), 9);

    let events = log.lock().unwrap();
    let completed = completed_ids(&events);
    assert_eq!(completed.len(), 9);
    // The root's wave settles before any leaf starts.
    assert_eq!(completed[0], "root");
    let started = started_ids(&events);
    assert_eq!(started[0], "root");
    assert!(started[1..].iter().all(|id| id.starts_with('x')));
}

/// Render error isolation: a failing sibling leaves the rest of its wave
/// cached, moves itself to Error, and emits exactly one RenderFailed.
#[test]
fn failing_segment_is_isolated_from_siblings() {
    let (session, backend, _dir) = session_with_mock();
    backend.fail_segment("b", "construct raised");
    let log = recording(&session);

    let graph = session
        .make_graph(vec![
            session
                .make_segment("a", &[], Metadata::new(), playing_construct("a-v1", "base"))
                .unwrap(),
            session
                .make_segment("b", &["a"], Metadata::new(), playing_construct("b-v1", "bad"))
                .unwrap(),
            session
                .make_segment("c", &["a"], Metadata::new(), playing_construct("c-v1", "good"))
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);

    let report = session.render_dirty(&RenderOpts::default()).unwrap();
    assert_eq!(report.rendered.len(), 2);
    assert_eq!(report.errored.len(), 1);
    assert!(report.skipped.is_empty());

    let graph = session.graph();
    let b = graph.get(&reel_core::SegmentId::new("b").unwrap()).unwrap();
    assert_eq!(b.state(), SegmentState::Error);
    assert!(b.last_error().unwrap().contains("construct raised"));
    for id in ["a", "c"] {
        assert_eq!(
            graph
                .get(&reel_core::SegmentId::new(id).unwrap())
                .unwrap()
                .state(),
            SegmentState::Cached
        );
    }

    let events = log.lock().unwrap();
    let failed: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::RenderFailed { id, .. } => Some(id.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["b"]);
    assert_eq!(completed_ids(&events).len(), 2);
}

/// A failed segment leaves dependents dirty; retrying after the fix
/// renders just the failed subtree.
#[test]
fn retry_after_error_renders_the_failed_subtree() {
    let (session, backend, _dir) = session_with_mock();
    backend.fail_segment("mid", "transient");

    let graph = session
        .make_graph(vec![
            session
                .make_segment("base", &[], Metadata::new(), playing_construct("base-v1", "b"))
                .unwrap(),
            session
                .make_segment("mid", &["base"], Metadata::new(), playing_construct("mid-v1", "m"))
                .unwrap(),
            session
                .make_segment("top", &["mid"], Metadata::new(), playing_construct("top-v1", "t"))
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);

    let report = session.render_dirty(&RenderOpts::default()).unwrap();
    assert_eq!(report.rendered.len(), 1);
    assert_eq!(report.errored.len(), 1);
    assert_eq!(report.skipped.len(), 1);

    // Clear the scripted failure and retry: only mid and top render.
    backend.clear_failure("mid");
    let report = session.render_dirty(&RenderOpts::default()).unwrap();
    assert_eq!(report.rendered.len(), 2);
    assert!(report.is_clean());
    assert_eq!(session.stats().cached, 3);
}

/// Export: render everything and concatenate partials into one output.
#[test]
fn export_renders_and_combines() {
    let (session, _backend, dir) = session_with_mock();
    let log = recording(&session);

    let graph = session
        .make_graph(vec![
            session
                .make_segment("one", &[], Metadata::new(), playing_construct("one-v1", "1"))
                .unwrap(),
            session
                .make_segment("two", &["one"], Metadata::new(), playing_construct("two-v1", "2"))
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);

    let (report, output) = session.export("final.mp4", &RenderOpts::default()).unwrap();
    assert!(report.is_clean());
    assert_eq!(output, dir.path().join("output/final.mp4"));

    let body = fs::read_to_string(&output).unwrap();
    assert!(body.contains("id=one"));
    assert!(body.contains("id=two"));
    let one_pos = body.find("id=one").unwrap();
    let two_pos = body.find("id=two").unwrap();
    assert!(one_pos < two_pos, "topological concatenation order");

    let events = log.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CombineStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CombineCompleted { .. })));
}

/// Preview renders to the preview directory without touching cache state.
#[test]
fn preview_bypasses_cache_state() {
    let (session, _backend, dir) = session_with_mock();

    let graph = session
        .make_graph(vec![session
            .make_segment("solo", &[], Metadata::new(), playing_construct("solo-v1", "s"))
            .unwrap()])
        .unwrap();
    session.use_graph(graph);

    let path = session.preview("solo", &RenderOpts::default()).unwrap();
    assert!(path.starts_with(dir.path().join("preview")));
    assert!(path.exists());
    let body = fs::read_to_string(&path).unwrap();
    assert!(body.contains("preview=true"));
    assert!(body.contains("quality=low_quality"));

    // Cache state untouched.
    assert_eq!(session.stats().pending, 1);
    assert_eq!(session.stats().cached, 0);
}

/// render(id) renders the segment plus its dirty ancestors and nothing
/// else.
#[test]
fn single_segment_render_pulls_in_dirty_ancestors() {
    let (session, _backend, _dir) = session_with_mock();

    let graph = session
        .make_graph(vec![
            session
                .make_segment("a", &[], Metadata::new(), playing_construct("a-v1", "a"))
                .unwrap(),
            session
                .make_segment("b", &["a"], Metadata::new(), playing_construct("b-v1", "b"))
                .unwrap(),
            session
                .make_segment("other", &[], Metadata::new(), playing_construct("o-v1", "o"))
                .unwrap(),
        ])
        .unwrap();
    session.use_graph(graph);

    let report = session.render("b", &RenderOpts::default()).unwrap();
    assert_eq!(report.rendered.len(), 2);
    let graph = session.graph();
    assert_eq!(
        graph
            .get(&reel_core::SegmentId::new("other").unwrap())
            .unwrap()
            .state(),
        SegmentState::Pending
    );
}
