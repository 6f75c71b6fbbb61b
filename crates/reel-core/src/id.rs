//! Stable segment identifiers.
//!
//! A [`SegmentId`] is a symbolic name, unique within a graph, that doubles
//! as a filename component for cached artifacts. Id shape is therefore
//! restricted to characters that are safe on every filesystem the cache
//! directory might live on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum id length in bytes. Ids become filename components.
pub const MAX_ID_LEN: usize = 64;

/// Stable symbolic identifier for a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    /// Validates and constructs a segment id.
    ///
    /// Valid ids are nonempty, at most [`MAX_ID_LEN`] bytes, and contain
    /// only ASCII alphanumerics, `_`, `-`, and `.` (never leading `.`).
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidId {
                id,
                reason: "empty".into(),
            });
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::InvalidId {
                id,
                reason: format!("longer than {} bytes", MAX_ID_LEN),
            });
        }
        if id.starts_with('.') {
            return Err(CoreError::InvalidId {
                id,
                reason: "leading '.'".into(),
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(CoreError::InvalidId {
                id,
                reason: format!("illegal character '{}'", bad),
            });
        }
        Ok(SegmentId(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SegmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for ok in ["intro", "scene_01", "axes-3.final", "A1"] {
            assert!(SegmentId::new(ok).is_ok(), "should accept '{}'", ok);
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        for bad in ["", ".hidden", "with space", "slash/y", "tab\there"] {
            let err = SegmentId::new(bad).unwrap_err();
            assert!(matches!(err, CoreError::InvalidId { .. }), "'{}'", bad);
        }
    }

    #[test]
    fn rejects_overlong_id() {
        let long = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            SegmentId::new(long),
            Err(CoreError::InvalidId { .. })
        ));
    }

    #[test]
    fn serde_is_transparent() {
        let id = SegmentId::new("scene_01").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"scene_01\"");
        let back: SegmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
