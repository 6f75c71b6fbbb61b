//! Composable predicates over segments.
//!
//! Atoms cover the common selection axes (state, id, dependency shape,
//! metadata); `and` / `or` / `not` compose them; `where_fn` escapes to an
//! arbitrary user closure. [`SceneGraph`] exposes `find` / `count_matching`
//! / `any` / `all` / `partition` over a predicate.

use std::fmt;
use std::sync::Arc;

use crate::graph::SceneGraph;
use crate::id::SegmentId;
use crate::segment::{Segment, SegmentState};

type UserFn = Arc<dyn Fn(&Segment) -> bool + Send + Sync>;

/// A composable predicate over segments.
#[derive(Clone)]
pub enum SegmentPredicate {
    /// Segment is in the given state.
    HasState(SegmentState),
    /// Segment has exactly this id.
    HasId(SegmentId),
    /// Segment directly depends on the given id.
    DependsOn(SegmentId),
    /// Segment has no dependencies.
    Independent,
    /// Metadata contains the key.
    HasMetadata(String),
    /// Metadata key equals the value.
    MetadataEquals(String, serde_json::Value),
    /// Id matches a `*`-wildcard pattern (e.g. `intro*`, `*_final`).
    IdMatches(String),
    /// Arbitrary user function.
    Where(UserFn),
    And(Box<SegmentPredicate>, Box<SegmentPredicate>),
    Or(Box<SegmentPredicate>, Box<SegmentPredicate>),
    Not(Box<SegmentPredicate>),
}

impl SegmentPredicate {
    pub fn has_state(state: SegmentState) -> Self {
        SegmentPredicate::HasState(state)
    }

    pub fn has_id(id: SegmentId) -> Self {
        SegmentPredicate::HasId(id)
    }

    pub fn depends_on(id: SegmentId) -> Self {
        SegmentPredicate::DependsOn(id)
    }

    pub fn independent() -> Self {
        SegmentPredicate::Independent
    }

    pub fn has_metadata(key: impl Into<String>) -> Self {
        SegmentPredicate::HasMetadata(key.into())
    }

    pub fn metadata_equals(key: impl Into<String>, value: serde_json::Value) -> Self {
        SegmentPredicate::MetadataEquals(key.into(), value)
    }

    pub fn id_matches(pattern: impl Into<String>) -> Self {
        SegmentPredicate::IdMatches(pattern.into())
    }

    pub fn where_fn(f: impl Fn(&Segment) -> bool + Send + Sync + 'static) -> Self {
        SegmentPredicate::Where(Arc::new(f))
    }

    pub fn and(self, other: SegmentPredicate) -> Self {
        SegmentPredicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: SegmentPredicate) -> Self {
        SegmentPredicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        SegmentPredicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against one segment.
    pub fn matches(&self, segment: &Segment) -> bool {
        match self {
            SegmentPredicate::HasState(state) => segment.state() == *state,
            SegmentPredicate::HasId(id) => segment.id() == id,
            SegmentPredicate::DependsOn(id) => segment.deps().contains(id),
            SegmentPredicate::Independent => segment.is_independent(),
            SegmentPredicate::HasMetadata(key) => segment.metadata().contains_key(key),
            SegmentPredicate::MetadataEquals(key, value) => {
                segment.metadata().get(key) == Some(value)
            }
            SegmentPredicate::IdMatches(pattern) => wildcard_match(pattern, segment.id().as_str()),
            SegmentPredicate::Where(f) => f(segment),
            SegmentPredicate::And(a, b) => a.matches(segment) && b.matches(segment),
            SegmentPredicate::Or(a, b) => a.matches(segment) || b.matches(segment),
            SegmentPredicate::Not(inner) => !inner.matches(segment),
        }
    }
}

impl fmt::Debug for SegmentPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentPredicate::HasState(s) => write!(f, "HasState({:?})", s),
            SegmentPredicate::HasId(id) => write!(f, "HasId({})", id),
            SegmentPredicate::DependsOn(id) => write!(f, "DependsOn({})", id),
            SegmentPredicate::Independent => write!(f, "Independent"),
            SegmentPredicate::HasMetadata(k) => write!(f, "HasMetadata({})", k),
            SegmentPredicate::MetadataEquals(k, v) => write!(f, "MetadataEquals({}, {})", k, v),
            SegmentPredicate::IdMatches(p) => write!(f, "IdMatches({})", p),
            SegmentPredicate::Where(_) => write!(f, "Where(<fn>)"),
            SegmentPredicate::And(a, b) => write!(f, "And({:?}, {:?})", a, b),
            SegmentPredicate::Or(a, b) => write!(f, "Or({:?}, {:?})", a, b),
            SegmentPredicate::Not(inner) => write!(f, "Not({:?})", inner),
        }
    }
}

/// Minimal `*`-wildcard matcher. `*` matches any (possibly empty) run of
/// characters; everything else is literal.
fn wildcard_match(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == input;
    }
    let mut rest = input;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

impl SceneGraph {
    /// Segments matching the predicate, in insertion order.
    pub fn find(&self, pred: &SegmentPredicate) -> Vec<&Segment> {
        self.all_segments().filter(|s| pred.matches(s)).collect()
    }

    /// Number of segments matching the predicate.
    pub fn count_matching(&self, pred: &SegmentPredicate) -> usize {
        self.all_segments().filter(|s| pred.matches(s)).count()
    }

    /// True if any segment matches.
    pub fn any(&self, pred: &SegmentPredicate) -> bool {
        self.all_segments().any(|s| pred.matches(s))
    }

    /// True if every segment matches (vacuously true when empty).
    pub fn all(&self, pred: &SegmentPredicate) -> bool {
        self.all_segments().all(|s| pred.matches(s))
    }

    /// Splits segments into (matching, non-matching), insertion order.
    pub fn partition(&self, pred: &SegmentPredicate) -> (Vec<&Segment>, Vec<&Segment>) {
        self.all_segments().partition(|s| pred.matches(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::Construct;
    use crate::hash::Metadata;
    use serde_json::json;

    fn sid(s: &str) -> SegmentId {
        SegmentId::new(s).unwrap()
    }

    fn graph() -> SceneGraph {
        let intro = Segment::create(
            sid("intro"),
            Construct::noop("intro-v1"),
            vec![],
            Metadata::from([("duration".into(), json!(3.0))]),
        )
        .unwrap();
        let axes = Segment::create(
            sid("axes"),
            Construct::noop("axes-v1"),
            vec![sid("intro")],
            Metadata::from([("quality".into(), json!("high"))]),
        )
        .unwrap();
        let outro_final = Segment::create(
            sid("outro_final"),
            Construct::noop("outro-v1"),
            vec![sid("axes")],
            Metadata::new(),
        )
        .unwrap();
        SceneGraph::default()
            .add_all(vec![intro, axes, outro_final])
            .unwrap()
    }

    #[test]
    fn atoms_select_expected_segments() {
        let g = graph();
        assert_eq!(g.count_matching(&SegmentPredicate::independent()), 1);
        assert_eq!(
            g.find(&SegmentPredicate::depends_on(sid("intro")))[0]
                .id()
                .as_str(),
            "axes"
        );
        assert!(g.any(&SegmentPredicate::has_metadata("quality")));
        assert_eq!(
            g.count_matching(&SegmentPredicate::metadata_equals(
                "quality",
                json!("high")
            )),
            1
        );
        assert!(g.all(&SegmentPredicate::has_state(SegmentState::Pending)));
    }

    #[test]
    fn wildcard_patterns() {
        let g = graph();
        assert_eq!(g.count_matching(&SegmentPredicate::id_matches("*_final")), 1);
        assert_eq!(g.count_matching(&SegmentPredicate::id_matches("intro")), 1);
        assert_eq!(g.count_matching(&SegmentPredicate::id_matches("*")), 3);
        assert_eq!(g.count_matching(&SegmentPredicate::id_matches("b*")), 0);
        assert_eq!(g.count_matching(&SegmentPredicate::id_matches("a*es")), 1);
    }

    #[test]
    fn combinators_compose() {
        let g = graph();
        let pred = SegmentPredicate::independent()
            .or(SegmentPredicate::has_metadata("quality"))
            .and(SegmentPredicate::id_matches("*_final").not());
        let found: Vec<&str> = g.find(&pred).iter().map(|s| s.id().as_str()).collect();
        assert_eq!(found, vec!["intro", "axes"]);
    }

    #[test]
    fn where_fn_escape_hatch() {
        let g = graph();
        let pred = SegmentPredicate::where_fn(|s| s.deps().len() == 1);
        assert_eq!(g.count_matching(&pred), 2);
    }

    #[test]
    fn partition_splits_cleanly() {
        let g = graph();
        let (indep, dep) = g.partition(&SegmentPredicate::independent());
        assert_eq!(indep.len(), 1);
        assert_eq!(dep.len(), 2);
    }
}
