//! Filesystem change watching for reel scene graphs.
//!
//! Maps raw file events to source-unit changes: debounces bursts,
//! translates paths to units, resolves affected segments through a
//! caller-supplied resolver, and invokes a change callback. The session
//! layer wires the callback to dirty-marking and re-render cycles.

pub mod error;
pub mod watcher;

pub use error::WatchError;
pub use watcher::{
    start, stem_mapper, AffectedResolver, ChangeCallback, SourceChange, SourceUnitMapper,
    WatchConfig, WatcherHandle, WatcherStats, DEFAULT_DEBOUNCE, MAX_DEBOUNCE, MIN_DEBOUNCE,
};
