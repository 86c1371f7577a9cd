//! Schema types for session records and their append-only streams.

pub mod event;
pub mod metric;
pub mod session;

pub use event::{EventLevel, EventRecord};
pub use metric::{MetricKind, MetricSample};
pub use session::{LivenessState, SessionFlags, SessionRecord, StateSnapshot};
