//! Core types and schemas for session-pulse.
//!
//! This crate provides the fundamental data structures shared by the central
//! service (`sp-server`) and the sidecar agent (`sp-agent`):
//!
//! - The session record schema (state, history, events, metrics, flags)
//! - The deep-merge engine with null-sentinel deletion
//! - Wire request/response bodies for the HTTP API
//! - The transport-neutral error taxonomy
//! - Configuration types and file resolution
//!
//! All schema types round-trip through JSON without data loss, and the
//! service is the sole authoritative clock for every persisted timestamp.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod merge;
pub mod schema;
pub mod wire;

pub use error::ApiError;
pub use schema::{
    EventLevel, EventRecord, LivenessState, MetricKind, MetricSample, SessionFlags, SessionRecord,
    StateSnapshot,
};

// Re-export toml for config access from the binaries
pub use toml;
