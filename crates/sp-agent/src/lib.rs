//! Per-application session-pulse sidecar.
//!
//! The agent sits between the client library and the central service. It
//! accepts local traffic on a loopback port, answers immediately, and
//! forwards reduced batches on a fixed cadence: state deltas instead of full
//! state, coalesced counters instead of individual increments, one heartbeat
//! per interval. It also watches the application itself — a vanished parent
//! process becomes a crash report, a silent heartbeat becomes a hung event —
//! and it rides out service outages by buffering and retrying with backoff.

pub mod buffers;
pub mod client;
pub mod flush;
pub mod local;
pub mod monitor;
