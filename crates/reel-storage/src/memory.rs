//! In-memory implementation of [`GraphRepository`].
//!
//! First-class backend for tests and ephemeral sessions. Stores
//! decomposed records, exactly like the file backend, so the
//! construct-stripping semantics are identical.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use reel_core::{Construct, SceneGraph, SegmentId};

use crate::error::StorageError;
use crate::record::{decompose, recompose, validate_graph_id, GraphRecord};
use crate::traits::GraphRepository;

/// Graph repository backed by a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    graphs: Mutex<HashMap<String, GraphRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, GraphRecord>> {
        self.graphs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphRepository for InMemoryRepository {
    fn save(&self, id: &str, graph: &SceneGraph) -> Result<(), StorageError> {
        validate_graph_id(id)?;
        self.lock().insert(id.to_string(), decompose(graph));
        Ok(())
    }

    fn load(
        &self,
        id: &str,
        constructs: &HashMap<SegmentId, Construct>,
    ) -> Result<Option<SceneGraph>, StorageError> {
        validate_graph_id(id)?;
        let record = match self.lock().get(id) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };
        recompose(id, record, constructs).map(Some)
    }

    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        validate_graph_id(id)?;
        Ok(self.lock().contains_key(id))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        validate_graph_id(id)?;
        Ok(self.lock().remove(id).is_some())
    }
}
