//! Outbound calls to the stats API.
//!
//! [`StatsSource`] performs exactly one request. [`FetchClient`] wraps a source
//! with throttling, classification and the bounded retry state machine.

pub mod classify;
pub mod nba_stats;
pub mod retry;
pub mod source;
pub mod throttle;

pub use classify::classify;
pub use nba_stats::NbaStatsClient;
pub use retry::{AttemptEvent, AttemptState, FetchClient, Fetched, RetryPolicy};
pub use source::{Endpoint, RawFailure, StatsSource};
pub use throttle::Throttle;

/// Payload for one WorkItem and endpoint, or the classified failure.
pub type FetchResult = Result<Fetched, crate::error::FetchError>;
