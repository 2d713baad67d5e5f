use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::classify::classify;
use crate::fetch::source::{Endpoint, RawFailure, StatsSource};
use crate::fetch::throttle::Throttle;
use crate::model::{GameId, Season, WorkItem};
use crate::shutdown::Shutdown;

/// Bounded retry settings for one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Give up once the next backoff would push total waiting past this.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            jitter: Duration::from_millis(500),
            max_total_wait: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed_attempt`-th failure (1-based):
    /// `base * 2^(failed_attempt - 1) + jitter`, capped at `max_delay`.
    pub fn backoff_delay(&self, failed_attempt: u32, jitter: Duration) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .saturating_add(jitter.min(self.jitter))
            .min(self.max_delay)
    }

    /// Backoff raised to at least a server `Retry-After` hint, still capped.
    pub fn delay_for(&self, failed_attempt: u32, hint: Option<Duration>, jitter: Duration) -> Duration {
        let d = self.backoff_delay(failed_attempt, jitter);
        match hint {
            Some(h) => d.max(h).min(self.max_delay),
            None => d,
        }
    }

    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub fn may_retry(&self, state: AttemptState) -> bool {
        matches!(state, AttemptState::RetryableFailed(n) if n < self.max_attempts.max(1))
    }
}

/// Per-call retry state. Attempt numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting(u32),
    Success,
    RetryableFailed(u32),
    PermanentFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    Succeeded,
    Failed { retryable: bool },
    BackoffElapsed,
}

impl AttemptState {
    pub fn on(self, event: AttemptEvent) -> AttemptState {
        match (self, event) {
            (AttemptState::Attempting(_), AttemptEvent::Succeeded) => AttemptState::Success,
            (AttemptState::Attempting(n), AttemptEvent::Failed { retryable: true }) => {
                AttemptState::RetryableFailed(n)
            }
            (AttemptState::Attempting(_), AttemptEvent::Failed { retryable: false }) => {
                AttemptState::PermanentFailed
            }
            (AttemptState::RetryableFailed(n), AttemptEvent::BackoffElapsed) => {
                AttemptState::Attempting(n.saturating_add(1))
            }
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Success | AttemptState::PermanentFailed)
    }
}

/// A successful per-game fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub game_id: GameId,
    pub endpoint: Endpoint,
    pub payload: Value,
}

/// Throttled, classified, retried access to a [`StatsSource`].
pub struct FetchClient {
    source: Arc<dyn StatsSource>,
    policy: RetryPolicy,
    throttle: Throttle,
    shutdown: Shutdown,
}

impl FetchClient {
    pub fn new(
        source: Arc<dyn StatsSource>,
        policy: RetryPolicy,
        throttle: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            policy,
            throttle: Throttle::new(throttle),
            shutdown,
        }
    }

    pub async fn fetch(&self, item: &WorkItem, endpoint: Endpoint) -> super::FetchResult {
        let game_id = &item.game_id;
        let payload = self
            .call(endpoint.path(), Some(game_id), || self.source.fetch(endpoint, game_id))
            .await?;
        Ok(Fetched {
            game_id: game_id.clone(),
            endpoint,
            payload,
        })
    }

    pub async fn fetch_listing(&self, season: Season) -> Result<Value, FetchError> {
        self.call("leaguegamefinder", None, || self.source.fetch_listing(season))
            .await
    }

    pub async fn probe(&self) -> Result<(), FetchError> {
        self.source.probe().await.map_err(|raw| classify(&raw))
    }

    async fn call<F, Fut>(
        &self,
        what: &str,
        game_id: Option<&GameId>,
        mut op: F,
    ) -> Result<Value, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, RawFailure>>,
    {
        let game = game_id.map(GameId::as_str).unwrap_or("-");
        let mut state = AttemptState::Attempting(1);
        let mut waited = Duration::ZERO;
        loop {
            let slot = self.throttle.reserve().await;
            if !self.shutdown.sleep(slot).await {
                return Err(FetchError::Cancelled);
            }

            let err = match op().await {
                Ok(v) => {
                    let done = state.on(AttemptEvent::Succeeded);
                    debug!(endpoint = what, game_id = game, state = ?done, "fetch ok");
                    return Ok(v);
                }
                Err(raw) => classify(&raw),
            };

            state = state.on(AttemptEvent::Failed {
                retryable: err.is_retryable(),
            });
            match state {
                AttemptState::RetryableFailed(n) if self.policy.may_retry(state) => {
                    let delay =
                        self.policy
                            .delay_for(n, err.retry_after(), self.policy.sample_jitter());
                    if waited.saturating_add(delay) > self.policy.max_total_wait {
                        warn!(endpoint = what, game_id = game, attempt = n, error = %err, "retry wait budget spent");
                        return Err(FetchError::Exhausted {
                            attempts: n,
                            last: Box::new(err),
                        });
                    }
                    warn!(
                        endpoint = what,
                        game_id = game,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "fetch failed; backing off"
                    );
                    if !self.shutdown.sleep(delay).await {
                        return Err(FetchError::Cancelled);
                    }
                    waited += delay;
                    state = state.on(AttemptEvent::BackoffElapsed);
                }
                AttemptState::RetryableFailed(n) => {
                    warn!(endpoint = what, game_id = game, attempts = n, error = %err, "fetch retries exhausted");
                    return Err(FetchError::Exhausted {
                        attempts: n,
                        last: Box::new(err),
                    });
                }
                _ => {
                    warn!(endpoint = what, game_id = game, error = %err, "fetch failed permanently");
                    return Err(err);
                }
            }
        }
    }
}
