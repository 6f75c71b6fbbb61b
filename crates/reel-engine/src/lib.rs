//! The reel incremental rendering engine.
//!
//! Turns a scene described as a DAG of animation segments into the
//! minimum set of re-renders after each source change: plans dependency
//! waves over the dirty set, drives them through a pluggable
//! [`RenderBackend`] with a bounded worker pool, publishes
//! hash-addressed partial artifacts, and combines them into a final
//! output on demand.
//!
//! # Modules
//!
//! - [`session`]: the caller-facing API (graphs in, reports out)
//! - [`scheduler`]: sequential/wave planning and estimates
//! - [`executor`]: wave execution over the worker pool
//! - [`driver`]: one segment through the backend
//! - [`combine`]: artifact concatenation
//! - [`backend`], [`quality`], [`event`]: the extension ports
//! - [`cell`], [`layout`], [`report`]: supporting pieces

pub mod backend;
pub mod cell;
pub mod combine;
pub mod driver;
pub mod error;
pub mod event;
pub mod executor;
pub mod layout;
pub mod quality;
pub mod report;
pub mod scheduler;
pub mod session;

// Re-export key types for ergonomic use.
pub use backend::{BackendRegistry, MockBackend, MockScene, RenderBackend, RenderOptions};
pub use cell::GraphCell;
pub use combine::combine;
pub use error::EngineError;
pub use event::{Event, EventKind, EventSinkRegistry};
pub use executor::{default_worker_count, execute, ExecuteOptions};
pub use layout::ArtifactLayout;
pub use quality::{QualityInput, QualityRegistry, QualitySetting};
pub use report::RenderReport;
pub use scheduler::{estimate, plan_sequential, plan_waves, CancelToken, Estimate};
pub use session::{RenderOpts, Session, SessionConfig, SessionStatus};
