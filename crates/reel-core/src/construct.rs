//! Opaque construct callables.
//!
//! A [`Construct`] is the capability "run me inside a backend-provided
//! scene". The callable receives the backend's scene handle as
//! `&mut dyn Any` and downcasts to the concrete scene type it was written
//! for. Because closure memory has no stable identity across processes,
//! every construct carries an explicit content **tag**: the contract is
//! *equal tag implies equal behavior*, and the tag is what feeds the
//! segment content hash.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error raised by a construct callable while building its scene.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("construct failed: {0}")]
pub struct ConstructError(pub String);

impl ConstructError {
    /// Convenience constructor from anything displayable.
    pub fn msg(msg: impl fmt::Display) -> Self {
        ConstructError(msg.to_string())
    }
}

type ConstructFn = dyn Fn(&mut dyn Any) -> Result<(), ConstructError> + Send + Sync;

/// An opaque scene-building callable plus its stable content identity.
#[derive(Clone)]
pub struct Construct {
    tag: String,
    f: Arc<ConstructFn>,
}

impl Construct {
    /// Creates a construct from a content tag and a callable.
    ///
    /// The tag is the construct's identity for hashing; callers must
    /// change it whenever the callable's behavior changes.
    pub fn new(
        tag: impl Into<String>,
        f: impl Fn(&mut dyn Any) -> Result<(), ConstructError> + Send + Sync + 'static,
    ) -> Self {
        Construct {
            tag: tag.into(),
            f: Arc::new(f),
        }
    }

    /// A no-op construct, useful for tests and structural graphs.
    pub fn noop(tag: impl Into<String>) -> Self {
        Construct::new(tag, |_| Ok(()))
    }

    /// Placeholder installed when a persisted graph is loaded without a
    /// caller-supplied callable for this segment. Keeps the stored tag so
    /// hashes stay stable, but fails if a render ever reaches it.
    pub fn missing(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let msg = format!("construct '{}' was not re-supplied after load", tag);
        Construct::new(tag, move |_| Err(ConstructError(msg.clone())))
    }

    /// The stable content identity of this construct.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Invokes the callable with a backend-provided scene handle.
    pub fn invoke(&self, scene: &mut dyn Any) -> Result<(), ConstructError> {
        (self.f)(scene)
    }
}

impl fmt::Debug for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Construct").field("tag", &self.tag).finish()
    }
}
