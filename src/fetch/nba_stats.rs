use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::fetch::source::{Endpoint, RawFailure, StatsSource};
use crate::model::{GameId, Season};

pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// `reqwest` transport for stats.nba.com. One request per call; retries live in `FetchClient`.
#[derive(Clone)]
pub struct NbaStatsClient {
    http: Client,
    base_url: String,
}

impl NbaStatsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .default_headers(stats_headers())
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self, query))]
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, RawFailure> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().await.map_err(transport_failure)?;
        debug!(status = status.as_u16(), body_len = body.len(), "stats response");

        if !status.is_success() {
            return Err(RawFailure::Status {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| RawFailure::Body(format!("invalid json: {e}")))
    }
}

fn stats_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    h.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    h.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    h.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
    h.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));
    h.insert(
        HeaderName::from_static("x-nba-stats-origin"),
        HeaderValue::from_static("stats"),
    );
    h.insert(
        HeaderName::from_static("x-nba-stats-token"),
        HeaderValue::from_static("true"),
    );
    h
}

fn transport_failure(e: reqwest::Error) -> RawFailure {
    if e.is_timeout() {
        RawFailure::Timeout(e.to_string())
    } else if e.is_body() || e.is_decode() {
        RawFailure::Body(e.to_string())
    } else {
        RawFailure::Connect(e.to_string())
    }
}

#[async_trait]
impl StatsSource for NbaStatsClient {
    async fn fetch_listing(&self, season: Season) -> Result<Value, RawFailure> {
        let url = format!("{}/leaguegamefinder", self.base_url);
        let label = season.label();
        self.get_json(
            &url,
            &[
                ("PlayerOrTeam", "T"),
                ("LeagueID", "00"),
                ("Season", label.as_str()),
                ("SeasonType", "Regular Season"),
            ],
        )
        .await
    }

    async fn fetch(&self, endpoint: Endpoint, game_id: &GameId) -> Result<Value, RawFailure> {
        let url = format!("{}/{}", self.base_url, endpoint.path());
        let id = game_id.as_str();
        match endpoint {
            Endpoint::Summary => self.get_json(&url, &[("GameID", id)]).await,
            Endpoint::Traditional | Endpoint::Advanced => {
                self.get_json(
                    &url,
                    &[
                        ("GameID", id),
                        ("StartPeriod", "0"),
                        ("EndPeriod", "0"),
                        ("StartRange", "0"),
                        ("EndRange", "0"),
                        ("RangeType", "0"),
                    ],
                )
                .await
            }
        }
    }

    /// Any HTTP response counts as reachable; only transport failures do not.
    async fn probe(&self) -> Result<(), RawFailure> {
        self.http
            .head(&self.base_url)
            .send()
            .await
            .map(|_| ())
            .map_err(transport_failure)
    }
}
