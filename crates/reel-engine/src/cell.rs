//! The mutable "current graph" cell.
//!
//! Graph values are immutable; this cell is the single place a session's
//! current graph lives. A mutex serializes watcher-driven updates and
//! caller-driven edits, so concurrent observers always see a pre- or
//! post-state of any mutation, never a mix.

use std::sync::{Mutex, PoisonError};

use reel_core::SceneGraph;

use crate::error::EngineError;

/// Mutex-guarded holder of the current [`SceneGraph`] value.
#[derive(Debug, Default)]
pub struct GraphCell {
    inner: Mutex<SceneGraph>,
}

impl GraphCell {
    pub fn new(graph: SceneGraph) -> Self {
        GraphCell {
            inner: Mutex::new(graph),
        }
    }

    /// Replaces the current graph.
    pub fn install(&self, graph: SceneGraph) {
        *self.lock() = graph;
    }

    /// Clones the current graph value out of the cell.
    pub fn snapshot(&self) -> SceneGraph {
        self.lock().clone()
    }

    /// Runs a read-only closure against the current graph under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&SceneGraph) -> R) -> R {
        f(&self.lock())
    }

    /// Atomically replaces the graph with the result of `f`, returning
    /// `f`'s auxiliary value. On error the cell is left unchanged.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&SceneGraph) -> Result<(SceneGraph, R), EngineError>,
    ) -> Result<R, EngineError> {
        let mut guard = self.lock();
        let (next, out) = f(&guard)?;
        *guard = next;
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SceneGraph> {
        // A panicked worker cannot leave a graph value half-mutated
        // (values are replaced wholesale), so poisoning is recoverable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
