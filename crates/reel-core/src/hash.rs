//! Deterministic content hashing for segments using blake3.
//!
//! A segment's content hash covers its construct tag, its dependencies as
//! sorted `(id, dep_hash)` pairs, and a canonical serialization of its
//! metadata. Dependency hashes compose Merkle-style: a change anywhere
//! upstream changes every downstream hash.
//!
//! The externally visible hash is the first [`HASH_PREFIX_LEN`] hex
//! characters of the 256-bit digest. That keeps artifact filenames short
//! while leaving a ~2^48 collision space, plenty for one session's cache.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::SegmentId;

/// Number of hex characters kept from the blake3 digest.
pub const HASH_PREFIX_LEN: usize = 12;

/// Free-form per-segment metadata. `BTreeMap` so canonical serialization
/// (sorted keys) falls out of the map type.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A truncated blake3 digest identifying a segment's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// The all-zero hash used before real dependency hashes are known.
    pub fn placeholder() -> Self {
        ContentHash("0".repeat(HASH_PREFIX_LEN))
    }

    /// Returns the hash as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes a segment content hash.
///
/// Input order is fixed: construct tag, then `(dep_id, dep_hash)` pairs
/// sorted by id, then canonical JSON of the metadata. NUL separators keep
/// field boundaries unambiguous.
pub fn hash_segment_content(
    construct_tag: &str,
    dep_hashes: &[(SegmentId, ContentHash)],
    metadata: &Metadata,
) -> ContentHash {
    let mut pairs: Vec<&(SegmentId, ContentHash)> = dep_hashes.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    hasher.update(construct_tag.as_bytes());
    hasher.update(&[0]);
    for (id, hash) in pairs {
        hasher.update(id.as_str().as_bytes());
        hasher.update(b"=");
        hasher.update(hash.as_str().as_bytes());
        hasher.update(&[0]);
    }
    // BTreeMap serializes with sorted keys, so this is canonical.
    let meta_json = serde_json::to_vec(metadata).expect("metadata serializes");
    hasher.update(&meta_json);

    let hex = hasher.finalize().to_hex();
    ContentHash(hex[..HASH_PREFIX_LEN].to_string())
}
