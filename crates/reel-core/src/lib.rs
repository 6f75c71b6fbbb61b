pub mod construct;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod predicate;
pub mod segment;

// Re-export commonly used types
pub use construct::{Construct, ConstructError};
pub use error::CoreError;
pub use graph::{DepEdge, GraphMetadata, GraphStats, SceneGraph};
pub use hash::{hash_segment_content, ContentHash, Metadata, HASH_PREFIX_LEN};
pub use id::SegmentId;
pub use predicate::SegmentPredicate;
pub use segment::{Segment, SegmentState};
