//! SceneGraph: the immutable DAG of animation segments.
//!
//! A [`SceneGraph`] owns segments by value inside a petgraph
//! [`StableGraph`], with edges directed dependency -> dependent. Dependents
//! are therefore reachable through outgoing edges and never via
//! pointer-like references, which keeps the value freely clonable.
//!
//! The graph is an immutable value: every mutator takes `&self` and
//! returns a new `SceneGraph` (or an error, leaving the original
//! untouched). A mutable "current graph" cell belongs to the session
//! layer, not here.
//!
//! The topological order is cached on every structural change. Kahn's
//! algorithm with an insertion-order tie-break keeps runs reproducible.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{hash_segment_content, ContentHash};
use crate::id::SegmentId;
use crate::segment::{Segment, SegmentState};

/// Edge marker: source is a dependency of target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge;

/// Graph-level attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    /// Human-readable scene title.
    pub title: Option<String>,
    /// Default quality preset name for renders of this graph.
    pub default_quality: Option<String>,
}

/// Per-state segment counts plus the longest dependency chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total: usize,
    pub pending: usize,
    pub rendering: usize,
    pub cached: usize,
    pub dirty: usize,
    pub error: usize,
    /// Number of segments on the longest dependency chain (0 when empty).
    pub max_depth: usize,
}

/// An immutable DAG of segments.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    graph: StableGraph<Segment, DepEdge, Directed, u32>,
    index: IndexMap<SegmentId, NodeIndex<u32>>,
    topo: Vec<SegmentId>,
    metadata: GraphMetadata,
}

impl SceneGraph {
    /// Creates an empty graph.
    pub fn empty(metadata: GraphMetadata) -> Self {
        SceneGraph {
            metadata,
            ..SceneGraph::default()
        }
    }

    /// Reassembles a graph from stored parts, trusting the segments'
    /// stored hashes and states. `segments` may arrive in any order; the
    /// structure is validated (deps present, acyclic) but hashes are NOT
    /// recomputed. Used by the storage layer.
    pub fn from_parts(
        metadata: GraphMetadata,
        segments: Vec<Segment>,
    ) -> Result<Self, CoreError> {
        let mut out = SceneGraph::empty(metadata);
        out.insert_batch(segments, false)?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Mutators (value-returning)
    // -----------------------------------------------------------------------

    /// Inserts one segment whose deps must all be present already.
    ///
    /// The segment's content hash is recomputed against the current
    /// dependency hashes.
    pub fn add(&self, segment: Segment) -> Result<Self, CoreError> {
        if self.index.contains_key(segment.id()) {
            return Err(CoreError::DuplicateId(segment.id().clone()));
        }
        let missing: Vec<SegmentId> = segment
            .deps()
            .iter()
            .filter(|d| !self.index.contains_key(*d))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::MissingDeps(missing));
        }

        let mut next = self.clone();
        let id = segment.id().clone();
        next.insert_node(segment);
        // New nodes only receive edges from existing ones, so no cycle is
        // possible here; rebuild keeps the cached order fresh.
        next.rebuild_topo()?;
        next.refresh_hash(&id)?;
        Ok(next)
    }

    /// Inserts a batch of segments, accepted in any order as long as the
    /// final collection is a DAG and every dep id appears somewhere.
    ///
    /// Fails `CycleDetected` (listing the ids on the cycle) without
    /// producing a graph.
    pub fn add_all(&self, segments: Vec<Segment>) -> Result<Self, CoreError> {
        let mut next = self.clone();
        next.insert_batch(segments, true)?;
        Ok(next)
    }

    /// Removes a segment. Refused with `HasDependents` if anything still
    /// depends on it.
    pub fn remove(&self, id: &SegmentId) -> Result<Self, CoreError> {
        let idx = self.index_of(id)?;
        let mut dependents: Vec<SegmentId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id().clone())
            .collect();
        if !dependents.is_empty() {
            dependents.sort();
            return Err(CoreError::HasDependents(dependents));
        }

        let mut next = self.clone();
        next.graph.remove_node(idx);
        next.index.shift_remove(id);
        next.rebuild_topo()?;
        Ok(next)
    }

    /// Applies `f` to a segment value. Identity and deps are pinned:
    /// attempts to change either fail `IdentityViolation`.
    ///
    /// Content hashes are NOT recomputed here; call
    /// [`rehash_all`](Self::rehash_all) to propagate content drift.
    pub fn update(
        &self,
        id: &SegmentId,
        f: impl FnOnce(Segment) -> Segment,
    ) -> Result<Self, CoreError> {
        self.try_update(id, |s| Ok(f(s)))
    }

    /// Fallible variant of [`update`](Self::update), used for lifecycle
    /// transitions that can themselves fail.
    pub fn try_update(
        &self,
        id: &SegmentId,
        f: impl FnOnce(Segment) -> Result<Segment, CoreError>,
    ) -> Result<Self, CoreError> {
        let idx = self.index_of(id)?;
        let updated = f(self.graph[idx].clone())?;
        if updated.id() != id || updated.deps() != self.graph[idx].deps() {
            return Err(CoreError::IdentityViolation(id.clone()));
        }
        let mut next = self.clone();
        next.graph[idx] = updated;
        Ok(next)
    }

    /// Marks a segment and all its transitive dependents dirty.
    ///
    /// Segments already `Dirty` or still `Pending` are left as they are;
    /// both already imply a pending render.
    pub fn mark_dirty(&self, id: &SegmentId) -> Result<Self, CoreError> {
        let idx = self.index_of(id)?;
        let mut next = self.clone();
        let mut affected = vec![idx];
        affected.extend(self.reachable(idx, Direction::Outgoing));
        for n in affected {
            let state = next.graph[n].state();
            if !matches!(state, SegmentState::Dirty | SegmentState::Pending) {
                next.graph[n] = next.graph[n].clone().mark_dirty();
            }
        }
        Ok(next)
    }

    /// Marks every segment dirty (except those already `Dirty`/`Pending`).
    pub fn mark_all_dirty(&self) -> Self {
        let mut next = self.clone();
        for idx in next.graph.node_indices().collect::<Vec<_>>() {
            let state = next.graph[idx].state();
            if !matches!(state, SegmentState::Dirty | SegmentState::Pending) {
                next.graph[idx] = next.graph[idx].clone().mark_dirty();
            }
        }
        next
    }

    /// Walks segments in topological order recomputing every content hash
    /// from its dependencies' (already recomputed) hashes. Segments whose
    /// hash changed are marked dirty. This is how content drift, as
    /// opposed to explicit dirty marking, propagates.
    ///
    /// Idempotent: applying twice yields the same graph.
    pub fn rehash_all(&self) -> Self {
        let mut next = self.clone();
        for id in next.topo.clone() {
            let idx = next.index[&id];
            let seg = &next.graph[idx];
            let dep_hashes = next.dep_hashes(seg);
            let new_hash =
                hash_segment_content(seg.construct().tag(), &dep_hashes, seg.metadata());
            if new_hash != *seg.content_hash() {
                let mut replaced = seg
                    .clone()
                    .rehash(&dep_hashes)
                    .expect("dep hashes cover declared deps");
                if !matches!(
                    replaced.state(),
                    SegmentState::Dirty | SegmentState::Pending
                ) {
                    replaced = replaced.mark_dirty();
                }
                next.graph[idx] = replaced;
            }
        }
        next
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    pub fn get(&self, id: &SegmentId) -> Option<&Segment> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// All segments in insertion order.
    pub fn all_segments(&self) -> impl Iterator<Item = &Segment> {
        self.index.values().map(move |&idx| &self.graph[idx])
    }

    /// All ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &SegmentId> {
        self.index.keys()
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The cached topological linearization: dependencies first, ties
    /// broken by insertion order.
    pub fn render_order(&self) -> &[SegmentId] {
        &self.topo
    }

    /// Segments needing a render (`Pending`/`Dirty`/`Error`), in
    /// topological order.
    pub fn dirty_in_order(&self) -> Vec<SegmentId> {
        self.topo
            .iter()
            .filter(|id| self.get(id).map(Segment::needs_render).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Direct dependents of a segment, sorted.
    pub fn dependents(&self, id: &SegmentId) -> Result<Vec<SegmentId>, CoreError> {
        let idx = self.index_of(id)?;
        let mut out: Vec<SegmentId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id().clone())
            .collect();
        out.sort();
        Ok(out)
    }

    /// Direct dependencies of a segment, in declaration order.
    pub fn dependencies(&self, id: &SegmentId) -> Result<Vec<SegmentId>, CoreError> {
        let idx = self.index_of(id)?;
        Ok(self.graph[idx].deps().to_vec())
    }

    /// Every transitive dependent of a segment, sorted.
    pub fn transitive_dependents(&self, id: &SegmentId) -> Result<Vec<SegmentId>, CoreError> {
        let idx = self.index_of(id)?;
        let mut out: Vec<SegmentId> = self
            .reachable(idx, Direction::Outgoing)
            .into_iter()
            .map(|n| self.graph[n].id().clone())
            .collect();
        out.sort();
        Ok(out)
    }

    /// Every transitive dependency of a segment, sorted.
    pub fn transitive_dependencies(&self, id: &SegmentId) -> Result<Vec<SegmentId>, CoreError> {
        let idx = self.index_of(id)?;
        let mut out: Vec<SegmentId> = self
            .reachable(idx, Direction::Incoming)
            .into_iter()
            .map(|n| self.graph[n].id().clone())
            .collect();
        out.sort();
        Ok(out)
    }

    /// Render-needing segments whose dependencies are all `Cached` or
    /// `Rendering` (the latter because by the time the batch starts they
    /// will have settled). Topological order.
    pub fn next_batch(&self) -> Vec<&Segment> {
        self.topo
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|s| s.needs_render())
            .filter(|s| {
                s.deps().iter().all(|d| {
                    self.get(d).is_some_and(|dep| {
                        matches!(
                            dep.state(),
                            SegmentState::Cached | SegmentState::Rendering
                        )
                    })
                })
            })
            .collect()
    }

    /// Per-state counts and longest chain, for diagnostics.
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total: self.count(),
            ..GraphStats::default()
        };
        for seg in self.all_segments() {
            match seg.state() {
                SegmentState::Pending => stats.pending += 1,
                SegmentState::Rendering => stats.rendering += 1,
                SegmentState::Cached => stats.cached += 1,
                SegmentState::Dirty => stats.dirty += 1,
                SegmentState::Error => stats.error += 1,
            }
        }
        // Longest chain via the topo order: depth = 1 + max(dep depths).
        let mut depth: HashMap<&SegmentId, usize> = HashMap::new();
        for id in &self.topo {
            let seg = self.get(id).expect("topo ids are present");
            let d = 1 + seg
                .deps()
                .iter()
                .map(|dep| depth.get(dep).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            stats.max_depth = stats.max_depth.max(d);
            depth.insert(seg.id(), d);
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn index_of(&self, id: &SegmentId) -> Result<NodeIndex<u32>, CoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::SegmentNotFound(id.clone()))
    }

    /// Nodes reachable from `start` in `dir`, excluding `start` itself.
    fn reachable(&self, start: NodeIndex<u32>, dir: Direction) -> Vec<NodeIndex<u32>> {
        let mut seen: HashSet<NodeIndex<u32>> = HashSet::new();
        let mut queue: VecDeque<NodeIndex<u32>> = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(n) = queue.pop_front() {
            for next in self.graph.neighbors_directed(n, dir) {
                if seen.insert(next) {
                    out.push(next);
                    queue.push_back(next);
                }
            }
        }
        out
    }

    /// Current `(dep_id, dep_hash)` pairs for a segment.
    fn dep_hashes(&self, segment: &Segment) -> Vec<(SegmentId, ContentHash)> {
        segment
            .deps()
            .iter()
            .filter_map(|d| self.get(d).map(|s| (d.clone(), s.content_hash().clone())))
            .collect()
    }

    /// Adds the node and its incoming dep edges. Caller has validated
    /// that all deps are present.
    fn insert_node(&mut self, segment: Segment) {
        let deps: Vec<NodeIndex<u32>> = segment
            .deps()
            .iter()
            .map(|d| self.index[d])
            .collect();
        let id = segment.id().clone();
        let idx = self.graph.add_node(segment);
        self.index.insert(id, idx);
        for dep in deps {
            self.graph.add_edge(dep, idx, DepEdge);
        }
    }

    /// Recomputes one segment's hash from its deps' current hashes.
    fn refresh_hash(&mut self, id: &SegmentId) -> Result<(), CoreError> {
        let idx = self.index_of(id)?;
        let dep_hashes = self.dep_hashes(&self.graph[idx]);
        let refreshed = self.graph[idx].clone().rehash(&dep_hashes)?;
        self.graph[idx] = refreshed;
        Ok(())
    }

    /// Two-pass batch insertion with full validation: duplicates, missing
    /// deps, then cycle detection via the topo rebuild. With
    /// `refresh_hashes`, new segments' hashes are recomputed in
    /// topological order; without, stored hashes are trusted (the
    /// persistence path).
    fn insert_batch(&mut self, segments: Vec<Segment>, refresh_hashes: bool) -> Result<(), CoreError> {
        let mut incoming: HashSet<SegmentId> = HashSet::new();
        for seg in &segments {
            if self.index.contains_key(seg.id()) || !incoming.insert(seg.id().clone()) {
                return Err(CoreError::DuplicateId(seg.id().clone()));
            }
        }
        let mut missing: Vec<SegmentId> = Vec::new();
        for seg in &segments {
            for dep in seg.deps() {
                if !self.index.contains_key(dep) && !incoming.contains(dep) {
                    missing.push(dep.clone());
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(CoreError::MissingDeps(missing));
        }

        // Pass 1: nodes. Pass 2: edges (deps may land after dependents).
        let mut new_ids: Vec<SegmentId> = Vec::with_capacity(segments.len());
        for segment in segments {
            let id = segment.id().clone();
            let idx = self.graph.add_node(segment);
            self.index.insert(id.clone(), idx);
            new_ids.push(id);
        }
        for id in &new_ids {
            let idx = self.index[id];
            let deps: Vec<NodeIndex<u32>> = self.graph[idx]
                .deps()
                .iter()
                .map(|d| self.index[d])
                .collect();
            for dep in deps {
                self.graph.add_edge(dep, idx, DepEdge);
            }
        }

        self.rebuild_topo()?;

        if refresh_hashes {
            let new_set: HashSet<&SegmentId> = new_ids.iter().collect();
            for id in self.topo.clone() {
                if new_set.contains(&id) {
                    self.refresh_hash(&id)?;
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm. The ready set is kept ordered by node index,
    /// which reflects insertion order, so runs are reproducible. Any
    /// leftover nodes are on a cycle.
    fn rebuild_topo(&mut self) -> Result<(), CoreError> {
        let mut in_degree: HashMap<NodeIndex<u32>, usize> = HashMap::new();
        for idx in self.graph.node_indices() {
            in_degree.insert(
                idx,
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count(),
            );
        }

        let mut ready: std::collections::BTreeSet<NodeIndex<u32>> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut order: Vec<SegmentId> = Vec::with_capacity(self.graph.node_count());
        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].id().clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let d = in_degree.get_mut(&next).expect("known node");
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let mut on_cycle: Vec<SegmentId> = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&idx, _)| self.graph[idx].id().clone())
                .collect();
            on_cycle.sort();
            return Err(CoreError::CycleDetected(on_cycle));
        }

        self.topo = order;
        Ok(())
    }
}
