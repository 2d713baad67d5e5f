use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{GameId, Season};

/// Per-game endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Summary,
    Traditional,
    Advanced,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Summary => "boxscoresummaryv3",
            Endpoint::Traditional => "boxscoretraditionalv3",
            Endpoint::Advanced => "boxscoreadvancedv3",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// What went wrong on the wire, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    Timeout(String),
    Connect(String),
    Body(String),
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFailure::Status { status, body, .. } => write!(f, "http {status}: {body}"),
            RawFailure::Timeout(m) => write!(f, "timeout: {m}"),
            RawFailure::Connect(m) => write!(f, "connect: {m}"),
            RawFailure::Body(m) => write!(f, "body: {m}"),
        }
    }
}

/// One request against the stats API; no retry, no throttling.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Season-level game listing.
    async fn fetch_listing(&self, season: Season) -> Result<Value, RawFailure>;

    async fn fetch(&self, endpoint: Endpoint, game_id: &GameId) -> Result<Value, RawFailure>;

    /// Reachability check used before a run starts.
    async fn probe(&self) -> Result<(), RawFailure> {
        Ok(())
    }
}
