//! The segment: the unit of caching.
//!
//! A [`Segment`] pairs an opaque [`Construct`] with a stable id, the ids
//! it is built on top of, free-form metadata, and a content hash that
//! versions all of it. Segments are immutable values; every "mutation"
//! consumes the old value and returns a new one, and the lifecycle
//! transitions enforce the state machine below.
//!
//! ```text
//!             mark_dirty  (any -> Dirty, idempotent)
//! Pending  --mark_rendering--> Rendering
//! Dirty    --mark_rendering--> Rendering
//! Error    --mark_rendering--> Rendering     (retry)
//! Rendering--mark_cached-----> Cached
//! Rendering--mark_error------> Error
//! Cached   --mark_dirty------> Dirty         (never directly to Rendering)
//! any      --mark_pending----> Pending       (discards artifact_path)
//! ```
//!
//! The missing `Cached -> Rendering` edge is deliberate: a cached segment
//! must be explicitly invalidated before it can be re-rendered, which
//! guards against silent recomputation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::construct::Construct;
use crate::error::CoreError;
use crate::hash::{hash_segment_content, ContentHash, Metadata};
use crate::id::SegmentId;

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    /// Created, never rendered.
    Pending,
    /// A render is in flight.
    Rendering,
    /// A valid artifact exists on disk for the current content hash.
    Cached,
    /// Content (or an ancestor's content) changed since the last render.
    Dirty,
    /// The last render attempt failed.
    Error,
}

/// A cacheable unit of an animation.
#[derive(Debug, Clone)]
pub struct Segment {
    id: SegmentId,
    deps: Vec<SegmentId>,
    construct: Construct,
    source_unit: Option<String>,
    metadata: Metadata,
    content_hash: ContentHash,
    state: SegmentState,
    artifact_path: Option<PathBuf>,
    last_error: Option<String>,
}

impl Segment {
    /// Creates a segment in `Pending` state.
    ///
    /// Validates the id shape and that `deps` is a duplicate-free set not
    /// containing the segment's own id. The initial content hash is
    /// computed with placeholder dependency hashes; inserting the segment
    /// into a graph recomputes it against real ones.
    pub fn create(
        id: SegmentId,
        construct: Construct,
        deps: Vec<SegmentId>,
        metadata: Metadata,
    ) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for dep in &deps {
            if *dep == id {
                return Err(CoreError::InvalidDeps {
                    id,
                    reason: "segment depends on itself".into(),
                });
            }
            if !seen.insert(dep.clone()) {
                return Err(CoreError::InvalidDeps {
                    id,
                    reason: format!("duplicate dependency '{}'", dep),
                });
            }
        }

        let placeholder: Vec<(SegmentId, ContentHash)> = deps
            .iter()
            .map(|d| (d.clone(), ContentHash::placeholder()))
            .collect();
        let content_hash = hash_segment_content(construct.tag(), &placeholder, &metadata);

        Ok(Segment {
            id,
            deps,
            construct,
            source_unit: None,
            metadata,
            content_hash,
            state: SegmentState::Pending,
            artifact_path: None,
            last_error: None,
        })
    }

    /// Reconstructs a segment from stored parts, trusting the stored hash
    /// and state. Used by the storage layer; validation happens when the
    /// parts are assembled into a graph.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: SegmentId,
        deps: Vec<SegmentId>,
        construct: Construct,
        source_unit: Option<String>,
        metadata: Metadata,
        content_hash: ContentHash,
        state: SegmentState,
        artifact_path: Option<PathBuf>,
        last_error: Option<String>,
    ) -> Self {
        Segment {
            id,
            deps,
            construct,
            source_unit,
            metadata,
            content_hash,
            state,
            artifact_path,
            last_error,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    pub fn deps(&self) -> &[SegmentId] {
        &self.deps
    }

    pub fn construct(&self) -> &Construct {
        &self.construct
    }

    pub fn source_unit(&self) -> Option<&str> {
        self.source_unit.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Populated only in `Cached`.
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Populated only in `Error`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True for states that want a (re-)render: `Pending`, `Dirty`, `Error`.
    pub fn needs_render(&self) -> bool {
        matches!(
            self.state,
            SegmentState::Pending | SegmentState::Dirty | SegmentState::Error
        )
    }

    /// True iff the segment has no dependencies.
    pub fn is_independent(&self) -> bool {
        self.deps.is_empty()
    }

    // -----------------------------------------------------------------------
    // Value updates (identity-preserving)
    // -----------------------------------------------------------------------

    /// Returns a copy with the source unit set.
    pub fn with_source_unit(mut self, unit: impl Into<String>) -> Self {
        self.source_unit = Some(unit.into());
        self
    }

    /// Returns a copy with a replacement construct. The content hash is
    /// NOT recomputed here; run `rehash_all` on the owning graph to pick
    /// up the drift.
    pub fn with_construct(mut self, construct: Construct) -> Self {
        self.construct = construct;
        self
    }

    /// Returns a copy with replacement metadata. Hash drift is picked up
    /// by `rehash_all`, as with [`with_construct`](Self::with_construct).
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Recomputes the content hash against the given dependency hashes.
    ///
    /// `dep_hashes` must cover exactly this segment's deps.
    pub fn rehash(mut self, dep_hashes: &[(SegmentId, ContentHash)]) -> Result<Self, CoreError> {
        let expected: HashSet<&SegmentId> = self.deps.iter().collect();
        let given: HashSet<&SegmentId> = dep_hashes.iter().map(|(id, _)| id).collect();
        if expected != given {
            return Err(CoreError::InvalidDeps {
                id: self.id,
                reason: "dep hash map does not cover exactly the declared deps".into(),
            });
        }
        self.content_hash = hash_segment_content(self.construct.tag(), dep_hashes, &self.metadata);
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// `any -> Dirty`; idempotent. Discards the artifact path and error.
    pub fn mark_dirty(mut self) -> Self {
        self.state = SegmentState::Dirty;
        self.artifact_path = None;
        self.last_error = None;
        self
    }

    /// `Pending | Dirty | Error -> Rendering`. A cached segment must be
    /// marked dirty first.
    pub fn mark_rendering(mut self) -> Result<Self, CoreError> {
        match self.state {
            SegmentState::Pending | SegmentState::Dirty | SegmentState::Error => {
                self.state = SegmentState::Rendering;
                self.last_error = None;
                Ok(self)
            }
            from => Err(CoreError::IllegalTransition {
                from,
                to: SegmentState::Rendering,
                id: self.id,
            }),
        }
    }

    /// `Rendering -> Cached`, recording the artifact path.
    pub fn mark_cached(mut self, path: PathBuf) -> Result<Self, CoreError> {
        match self.state {
            SegmentState::Rendering => {
                self.state = SegmentState::Cached;
                self.artifact_path = Some(path);
                self.last_error = None;
                Ok(self)
            }
            from => Err(CoreError::IllegalTransition {
                from,
                to: SegmentState::Cached,
                id: self.id,
            }),
        }
    }

    /// `Rendering -> Error`, recording the failure.
    pub fn mark_error(mut self, error: impl Into<String>) -> Result<Self, CoreError> {
        match self.state {
            SegmentState::Rendering => {
                self.state = SegmentState::Error;
                self.artifact_path = None;
                self.last_error = Some(error.into());
                Ok(self)
            }
            from => Err(CoreError::IllegalTransition {
                from,
                to: SegmentState::Error,
                id: self.id,
            }),
        }
    }

    /// `any -> Pending`. Discards the artifact path and error.
    pub fn mark_pending(mut self) -> Self {
        self.state = SegmentState::Pending;
        self.artifact_path = None;
        self.last_error = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn create_starts_pending_with_hash() {
        let s = seg("a", &[]);
        assert_eq!(s.state(), SegmentState::Pending);
        assert!(s.needs_render());
        assert!(s.is_independent());
        assert_eq!(s.content_hash().as_str().len(), 12);
        assert!(s.artifact_path().is_none());
        assert!(s.last_error().is_none());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = Segment::create(
            sid("a"),
            Construct::noop("a-v1"),
            vec![sid("a")],
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDeps { .. }));
    }

    #[test]
    fn duplicate_dependency_is_rejected() {
        let err = Segment::create(
            sid("c"),
            Construct::noop("c-v1"),
            vec![sid("a"), sid("a")],
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDeps { .. }));
    }

    #[test]
    fn full_lifecycle_happy_path() {
        let s = seg("a", &[]);
        let s = s.mark_rendering().unwrap();
        assert_eq!(s.state(), SegmentState::Rendering);
        let s = s.mark_cached(PathBuf::from("/tmp/a_000.mp4")).unwrap();
        assert_eq!(s.state(), SegmentState::Cached);
        assert!(s.artifact_path().is_some());
        assert!(!s.needs_render());

        // Cached must go through Dirty before rendering again.
        let s = s.mark_dirty();
        assert_eq!(s.state(), SegmentState::Dirty);
        assert!(s.artifact_path().is_none());
        assert!(s.mark_rendering().is_ok());
    }

    #[test]
    fn cached_to_rendering_is_illegal() {
        let s = seg("a", &[])
            .mark_rendering()
            .unwrap()
            .mark_cached(PathBuf::from("/tmp/x.mp4"))
            .unwrap();
        let err = s.mark_rendering().unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalTransition {
                from: SegmentState::Cached,
                to: SegmentState::Rendering,
                ..
            }
        ));
    }

    #[test]
    fn error_records_reason_and_allows_retry() {
        let s = seg("a", &[]).mark_rendering().unwrap();
        let s = s.mark_error("backend exploded").unwrap();
        assert_eq!(s.state(), SegmentState::Error);
        assert_eq!(s.last_error(), Some("backend exploded"));
        assert!(s.needs_render());

        let s = s.mark_rendering().unwrap();
        assert!(s.last_error().is_none());
    }

    #[test]
    fn mark_cached_outside_rendering_is_illegal() {
        let s = seg("a", &[]);
        assert!(s.clone().mark_cached(PathBuf::from("/x")).is_err());
        assert!(s.mark_error("nope").is_err());
    }

    #[test]
    fn mark_pending_discards_artifact() {
        let s = seg("a", &[])
            .mark_rendering()
            .unwrap()
            .mark_cached(PathBuf::from("/tmp/a.mp4"))
            .unwrap()
            .mark_pending();
        assert_eq!(s.state(), SegmentState::Pending);
        assert!(s.artifact_path().is_none());
    }

    #[test]
    fn rehash_requires_exact_dep_cover() {
        let s = seg("b", &["a"]);
        // Missing "a".
        assert!(s.clone().rehash(&[]).is_err());
        // Extra id.
        assert!(s
            .clone()
            .rehash(&[
                (sid("a"), ContentHash::placeholder()),
                (sid("z"), ContentHash::placeholder()),
            ])
            .is_err());
        // Exact cover works and is stable.
        let h1 = s
            .clone()
            .rehash(&[(sid("a"), ContentHash::placeholder())])
            .unwrap();
        let h2 = s
            .rehash(&[(sid("a"), ContentHash::placeholder())])
            .unwrap();
        assert_eq!(h1.content_hash(), h2.content_hash());
    }

    #[test]
    fn construct_change_plus_rehash_changes_hash() {
        let s = seg("a", &[]);
        let before = s.content_hash().clone();
        let s = s.with_construct(Construct::noop("a-v2")).rehash(&[]).unwrap();
        assert_ne!(&before, s.content_hash());
    }
}
