//! Engine events and the observer registry.
//!
//! Every interesting engine action emits an [`Event`]: a timestamped
//! [`EventKind`]. Observers register handlers (optionally with a filter
//! predicate) under a tag in the [`EventSinkRegistry`]. Handlers run on
//! the emitting thread; a panicking handler is logged and must never
//! prevent other handlers from seeing the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use reel_core::{ContentHash, SegmentId};

/// Milliseconds since the Unix epoch, for event timestamps.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EventKind {
    SourceChanged {
        unit: String,
        affected: Vec<SegmentId>,
    },
    SegmentMarkedDirty {
        id: SegmentId,
    },
    RenderStarted {
        id: SegmentId,
        hash: ContentHash,
    },
    RenderCompleted {
        id: SegmentId,
        hash: ContentHash,
        path: PathBuf,
        elapsed_ms: u64,
    },
    RenderFailed {
        id: SegmentId,
        hash: ContentHash,
        error: String,
    },
    CombineStarted {
        ids: Vec<SegmentId>,
        output: PathBuf,
    },
    CombineCompleted {
        output: PathBuf,
    },
}

/// A timestamped event. The timestamp is assigned at emission.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;
type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct Sink {
    handler: Handler,
    filter: Option<Filter>,
}

/// Tag-keyed observer registry, safe against concurrent readers.
#[derive(Default)]
pub struct EventSinkRegistry {
    sinks: DashMap<String, Sink>,
}

impl EventSinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `tag`, replacing any previous one.
    pub fn register(&self, tag: impl Into<String>, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.sinks.insert(
            tag.into(),
            Sink {
                handler: Arc::new(handler),
                filter: None,
            },
        );
    }

    /// Registers a handler that only sees events passing `filter`.
    pub fn register_filtered(
        &self,
        tag: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) {
        self.sinks.insert(
            tag.into(),
            Sink {
                handler: Arc::new(handler),
                filter: Some(Arc::new(filter)),
            },
        );
    }

    /// Removes a handler. Returns false if the tag was unknown.
    pub fn unregister(&self, tag: &str) -> bool {
        self.sinks.remove(tag).is_some()
    }

    /// Stamps and delivers an event to every registered handler.
    ///
    /// A handler that panics is logged and skipped; delivery to the
    /// remaining handlers continues.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            timestamp_ms: epoch_millis(),
            kind,
        };
        // Snapshot the sinks so handlers may register/unregister freely.
        let sinks: Vec<(String, Handler, Option<Filter>)> = self
            .sinks
            .iter()
            .map(|e| (e.key().clone(), e.value().handler.clone(), e.value().filter.clone()))
            .collect();
        for (tag, handler, filter) in sinks {
            if let Some(filter) = filter {
                if !filter(&event) {
                    continue;
                }
            }
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(target: "reel.events", tag = %tag, "event handler panicked");
            }
        }
        event
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
