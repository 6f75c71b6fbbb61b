//! Graph decompose/recompose for persistence.
//!
//! A [`GraphRecord`] round-trips all structural data of a scene graph
//! (segments, deps, hashes, states, metadata, artifact paths, source
//! units, construct tags) but NOT the opaque construct callables. On
//! load the caller re-supplies constructs keyed by segment id; a segment
//! whose construct is missing keeps its stored tag (so hashes stay
//! stable), receives a placeholder that fails if ever invoked, and is
//! marked `Dirty`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use reel_core::{
    Construct, ContentHash, GraphMetadata, Metadata, SceneGraph, Segment, SegmentId, SegmentState,
};

use crate::error::StorageError;

/// Serializable form of one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub deps: Vec<SegmentId>,
    pub construct_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub content_hash: ContentHash,
    pub state: SegmentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Serializable form of a whole graph. Segments are stored in
/// topological order so recomposition can insert them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub metadata: GraphMetadata,
    pub segments: Vec<SegmentRecord>,
}

/// Decomposes a graph into its serializable record.
pub fn decompose(graph: &SceneGraph) -> GraphRecord {
    let segments = graph
        .render_order()
        .iter()
        .filter_map(|id| graph.get(id))
        .map(|s| SegmentRecord {
            id: s.id().clone(),
            deps: s.deps().to_vec(),
            construct_tag: s.construct().tag().to_string(),
            source_unit: s.source_unit().map(String::from),
            metadata: s.metadata().clone(),
            content_hash: s.content_hash().clone(),
            state: s.state(),
            artifact_path: s.artifact_path().map(PathBuf::from),
            last_error: s.last_error().map(String::from),
        })
        .collect();
    GraphRecord {
        metadata: graph.metadata().clone(),
        segments,
    }
}

/// Reassembles a graph from a record plus caller-supplied constructs.
///
/// Stored hashes and states are trusted, with two exceptions: a segment
/// saved mid-render (`Rendering`) comes back `Dirty`, and a segment with
/// no re-supplied construct comes back `Dirty` with a placeholder.
pub fn recompose(
    id: &str,
    record: GraphRecord,
    constructs: &HashMap<SegmentId, Construct>,
) -> Result<SceneGraph, StorageError> {
    let segments: Vec<Segment> = record
        .segments
        .into_iter()
        .map(|rec| {
            let (construct, missing) = match constructs.get(&rec.id) {
                Some(c) => (c.clone(), false),
                None => {
                    warn!(target: "reel.storage", graph = id, segment = %rec.id, "construct not re-supplied, marking dirty");
                    (Construct::missing(rec.construct_tag.clone()), true)
                }
            };
            let interrupted = rec.state == SegmentState::Rendering;
            let segment = Segment::from_parts(
                rec.id,
                rec.deps,
                construct,
                rec.source_unit,
                rec.metadata,
                rec.content_hash,
                rec.state,
                rec.artifact_path,
                rec.last_error,
            );
            if missing || interrupted {
                segment.mark_dirty()
            } else {
                segment
            }
        })
        .collect();

    SceneGraph::from_parts(record.metadata, segments).map_err(|e| StorageError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Graph ids become filenames; same shape rules as segment ids.
pub(crate) fn validate_graph_id(id: &str) -> Result<(), StorageError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidGraphId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SegmentId {
        SegmentId::new(s).unwrap()
    }

    fn sample_graph() -> SceneGraph {
        let a = Segment::create(sid("a"), Construct::noop("a-v1"), vec![], Metadata::new())
            .unwrap()
            .with_source_unit("intro");
        let b = Segment::create(
            sid("b"),
            Construct::noop("b-v1"),
            vec![sid("a")],
            Metadata::from([("duration".into(), serde_json::json!(2.0))]),
        )
        .unwrap();
        SceneGraph::default().add_all(vec![a, b]).unwrap()
    }

    #[test]
    fn decompose_recompose_round_trips_structure() {
        let graph = sample_graph();
        let record = decompose(&graph);

        let constructs = HashMap::from([
            (sid("a"), Construct::noop("a-v1")),
            (sid("b"), Construct::noop("b-v1")),
        ]);
        let loaded = recompose("test", record, &constructs).unwrap();

        assert_eq!(loaded.count(), graph.count());
        for id in graph.ids() {
            let before = graph.get(id).unwrap();
            let after = loaded.get(id).unwrap();
            assert_eq!(before.content_hash(), after.content_hash());
            assert_eq!(before.state(), after.state());
            assert_eq!(before.deps(), after.deps());
            assert_eq!(before.metadata(), after.metadata());
            assert_eq!(before.source_unit(), after.source_unit());
        }
    }

    #[test]
    fn missing_construct_marks_dirty_with_placeholder() {
        let graph = sample_graph();
        let record = decompose(&graph);

        let constructs = HashMap::from([(sid("a"), Construct::noop("a-v1"))]);
        let loaded = recompose("test", record, &constructs).unwrap();

        let b = loaded.get(&sid("b")).unwrap();
        assert_eq!(b.state(), SegmentState::Dirty);
        // Tag preserved so the stored hash remains meaningful.
        assert_eq!(b.construct().tag(), "b-v1");
        let mut scene = ();
        assert!(b.construct().invoke(&mut scene).is_err());

        let a = loaded.get(&sid("a")).unwrap();
        assert_eq!(a.state(), SegmentState::Pending);
    }

    #[test]
    fn interrupted_render_comes_back_dirty() {
        let graph = sample_graph()
            .try_update(&sid("a"), |s| s.mark_rendering())
            .unwrap();
        let record = decompose(&graph);
        let constructs = HashMap::from([
            (sid("a"), Construct::noop("a-v1")),
            (sid("b"), Construct::noop("b-v1")),
        ]);
        let loaded = recompose("test", record, &constructs).unwrap();
        assert_eq!(loaded.get(&sid("a")).unwrap().state(), SegmentState::Dirty);
    }

    #[test]
    fn graph_id_shape_rules() {
        assert!(validate_graph_id("my-scene.v2").is_ok());
        for bad in ["", ".hidden", "has space", "slash/y"] {
            assert!(validate_graph_id(bad).is_err(), "'{}'", bad);
        }
    }
}
