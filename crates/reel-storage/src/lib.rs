//! Persistence for reel scene graphs.
//!
//! Provides the [`GraphRepository`] trait plus the [`InMemoryRepository`]
//! and [`FileRepository`] backends. Stored graphs round-trip all
//! structural data (segments, deps, hashes, states, metadata, artifact
//! paths) but not the opaque construct callables; callers re-supply
//! those on load, keyed by segment id.

pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::StorageError;
pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use record::{decompose, recompose, GraphRecord, SegmentRecord};
pub use traits::GraphRepository;
