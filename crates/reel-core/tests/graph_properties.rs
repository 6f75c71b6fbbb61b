//! Property tests for the scene graph: topological-order validity, hash
//! purity and propagation, dirty-marking closure, and rehash idempotence,
//! all over randomly generated DAGs.

use std::collections::HashSet;

use proptest::prelude::*;

use reel_core::{Construct, Metadata, SceneGraph, Segment, SegmentId, SegmentState};

/// Builds a DAG of `masks.len()` segments where segment `i` depends on
/// segment `j` (j < i) iff bit `j` of `masks[i]` is set. Lower-triangular
/// adjacency can never contain a cycle.
fn build_graph(masks: &[u64]) -> SceneGraph {
    let segments: Vec<Segment> = masks
        .iter()
        .enumerate()
        .map(|(i, mask)| {
            let deps: Vec<SegmentId> = (0..i)
                .filter(|j| mask & (1u64 << j) != 0)
                .map(|j| SegmentId::new(format!("s{}", j)).unwrap())
                .collect();
            Segment::create(
                SegmentId::new(format!("s{}", i)).unwrap(),
                Construct::noop(format!("s{}-v1", i)),
                deps,
                Metadata::new(),
            )
            .unwrap()
        })
        .collect();
    SceneGraph::default().add_all(segments).unwrap()
}

fn masks() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(any::<u64>(), 1..12)
}

proptest! {
    /// render_order is a permutation of the ids in which every
    /// segment appears after all of its dependencies.
    #[test]
    fn render_order_is_a_valid_topological_order(masks in masks()) {
        let g = build_graph(&masks);
        let order = g.render_order();
        prop_assert_eq!(order.len(), g.count());

        let mut seen: HashSet<&SegmentId> = HashSet::new();
        for id in order {
            let seg = g.get(id).unwrap();
            for dep in seg.deps() {
                prop_assert!(seen.contains(dep), "{} ordered before its dep {}", id, dep);
            }
            seen.insert(id);
        }
    }

    /// Content hashes are a pure function of the inputs; building
    /// the same graph twice yields identical hashes.
    #[test]
    fn hashes_are_reproducible(masks in masks()) {
        let g1 = build_graph(&masks);
        let g2 = build_graph(&masks);
        for id in g1.ids() {
            prop_assert_eq!(
                g1.get(id).unwrap().content_hash(),
                g2.get(id).unwrap().content_hash()
            );
        }
    }

    /// Changing one segment's construct identity and rehashing
    /// changes its hash and the hash of every transitive dependent, and
    /// nothing else.
    #[test]
    fn hash_drift_propagates_to_exactly_the_dependents(
        masks in masks(),
        pick in any::<prop::sample::Index>(),
    ) {
        let g = build_graph(&masks);
        let target = g.render_order()[pick.index(g.count())].clone();
        let expected_changed: HashSet<SegmentId> = g
            .transitive_dependents(&target)
            .unwrap()
            .into_iter()
            .chain([target.clone()])
            .collect();

        let g2 = g
            .update(&target, |s| s.with_construct(Construct::noop("mutated-v2")))
            .unwrap()
            .rehash_all();

        for id in g.ids() {
            let before = g.get(id).unwrap().content_hash();
            let after = g2.get(id).unwrap().content_hash();
            if expected_changed.contains(id) {
                prop_assert_ne!(before, after, "{} should have drifted", id);
            } else {
                prop_assert_eq!(before, after, "{} should be untouched", id);
            }
        }
    }

    /// The dirty set after mark_dirty contains the target and all
    /// its transitive dependents.
    #[test]
    fn mark_dirty_closes_over_dependents(
        masks in masks(),
        pick in any::<prop::sample::Index>(),
    ) {
        let g = build_graph(&masks);
        let target = g.render_order()[pick.index(g.count())].clone();
        let marked = g.mark_dirty(&target).unwrap();

        let mut must_be_dirty = g.transitive_dependents(&target).unwrap();
        must_be_dirty.push(target);
        for id in must_be_dirty {
            let state = marked.get(&id).unwrap().state();
            prop_assert!(
                matches!(state, SegmentState::Dirty | SegmentState::Pending),
                "{} is {:?}",
                id,
                state
            );
        }
    }

    /// rehash_all is idempotent.
    #[test]
    fn rehash_all_is_idempotent(masks in masks()) {
        let g = build_graph(&masks);
        let once = g.rehash_all();
        let twice = once.rehash_all();
        for id in once.ids() {
            prop_assert_eq!(
                once.get(id).unwrap().content_hash(),
                twice.get(id).unwrap().content_hash()
            );
            prop_assert_eq!(once.get(id).unwrap().state(), twice.get(id).unwrap().state());
        }
    }
}
