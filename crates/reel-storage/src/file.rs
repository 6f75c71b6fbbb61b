//! File-backed implementation of [`GraphRepository`].
//!
//! One pretty-printed JSON document per graph id under a root directory
//! (`<root>/<id>.json`). Writes go through a temp file and an atomic
//! rename so a crash mid-save never leaves a torn document.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use reel_core::{Construct, SceneGraph, SegmentId};

use crate::error::StorageError;
use crate::record::{decompose, recompose, validate_graph_id, GraphRecord};
use crate::traits::GraphRepository;

/// Graph repository storing one JSON file per graph.
#[derive(Debug)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    /// Opens (creating if needed) a repository rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileRepository { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        validate_graph_id(id)?;
        Ok(self.root.join(format!("{}.json", id)))
    }

    /// Reads the raw stored record without reattaching constructs.
    /// Useful for tooling that only inspects structure (construct tags,
    /// states, hashes).
    pub fn load_record(&self, id: &str) -> Result<Option<GraphRecord>, StorageError> {
        let path = self.path_for(id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

impl GraphRepository for FileRepository {
    fn save(&self, id: &str, graph: &SceneGraph) -> Result<(), StorageError> {
        let path = self.path_for(id)?;
        let record = decompose(graph);
        let json = serde_json::to_vec_pretty(&record)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &path)?;
        debug!(target: "reel.storage", graph = id, bytes = json.len(), "graph saved");
        Ok(())
    }

    fn load(
        &self,
        id: &str,
        constructs: &HashMap<SegmentId, Construct>,
    ) -> Result<Option<SceneGraph>, StorageError> {
        let path = self.path_for(id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: GraphRecord = serde_json::from_slice(&data)?;
        recompose(id, record, constructs).map(Some)
    }

    fn exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(id)?.exists())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
