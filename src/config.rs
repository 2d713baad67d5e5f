//! Run configuration: environment (with `.env`), then CLI overrides.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::ConfigError;
use crate::fetch::nba_stats::DEFAULT_BASE_URL;
use crate::fetch::RetryPolicy;
use crate::model::Season;
use crate::util::env::{env_opt, preflight_check};

/// Keys echoed (redacted) in the startup snapshot.
pub const SNAPSHOT_KEYS: &[&str] = &[
    "ETL_MAX_ATTEMPTS",
    "ETL_BACKOFF_BASE_MS",
    "ETL_BACKOFF_CAP_MS",
    "ETL_BACKOFF_JITTER_MS",
    "ETL_MAX_TOTAL_WAIT_SECS",
    "ETL_SLEEP_SECONDS",
    "NBA_SEASON",
    "ETL_WORKERS",
    "ETL_MAX_RETRIES",
    "ETL_RUN_TIMEOUT_SECS",
    "NBA_STATS_BASE_URL",
    "NBA_STATS_TIMEOUT_SECS",
    "DB_MAX_CONNS",
    "DATABASE_URL",
    "DB_HOST",
    "DB_PORT",
    "DB_NAME",
    "DB_USER",
    "DB_PASSWORD",
    "DB_SSLMODE",
];

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub retry: RetryPolicy,
    /// Minimum spacing between outbound requests across all workers.
    pub throttle: Duration,
    pub season: Option<Season>,
    pub workers: usize,
    /// Ledger budget: items whose open record reaches this many re-attempts are parked.
    pub max_retries: i32,
    pub run_timeout: Option<Duration>,
    pub stats_base_url: String,
    pub stats_timeout: Duration,
    pub db_max_conns: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            throttle: Duration::from_millis(600),
            season: None,
            workers: 1,
            max_retries: 3,
            run_timeout: None,
            stats_base_url: DEFAULT_BASE_URL.to_string(),
            stats_timeout: Duration::from_secs(30),
            db_max_conns: 5,
        }
    }
}

/// Flag values that replace their environment counterparts when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub workers: Option<usize>,
    pub max_retries: Option<i32>,
    pub timeout_secs: Option<u64>,
    pub sleep_seconds: Option<f64>,
}

/// Unset or blank falls back to `default`; anything unparsable is an error.
fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("cannot parse {:?}", raw.trim()),
        }),
    }
}

fn parsed_opt<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    env_opt(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                message: format!("cannot parse {:?}", raw.trim()),
            })
        })
        .transpose()
}

fn seconds(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("{secs} is not a non-negative number of seconds"),
    })
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let retry = RetryPolicy {
            max_attempts: parsed("ETL_MAX_ATTEMPTS", d.retry.max_attempts)?,
            base_delay: Duration::from_millis(parsed(
                "ETL_BACKOFF_BASE_MS",
                d.retry.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parsed(
                "ETL_BACKOFF_CAP_MS",
                d.retry.max_delay.as_millis() as u64,
            )?),
            jitter: Duration::from_millis(parsed(
                "ETL_BACKOFF_JITTER_MS",
                d.retry.jitter.as_millis() as u64,
            )?),
            max_total_wait: Duration::from_secs(parsed(
                "ETL_MAX_TOTAL_WAIT_SECS",
                d.retry.max_total_wait.as_secs(),
            )?),
        };
        let sleep: f64 = parsed("ETL_SLEEP_SECONDS", d.throttle.as_secs_f64())?;
        let cfg = Self {
            retry,
            throttle: seconds("ETL_SLEEP_SECONDS", sleep)?,
            season: parsed_opt::<String>("NBA_SEASON")?
                .map(|s| s.parse::<Season>())
                .transpose()?,
            workers: parsed("ETL_WORKERS", d.workers)?,
            max_retries: parsed("ETL_MAX_RETRIES", d.max_retries)?,
            run_timeout: parsed_opt::<u64>("ETL_RUN_TIMEOUT_SECS")?.map(Duration::from_secs),
            stats_base_url: env_opt("NBA_STATS_BASE_URL").unwrap_or(d.stats_base_url),
            stats_timeout: Duration::from_secs(parsed(
                "NBA_STATS_TIMEOUT_SECS",
                d.stats_timeout.as_secs(),
            )?),
            db_max_conns: parsed("DB_MAX_CONNS", d.db_max_conns)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply(mut self, o: &Overrides) -> Result<Self, ConfigError> {
        if let Some(v) = o.max_attempts {
            self.retry.max_attempts = v;
        }
        if let Some(v) = o.backoff_base_ms {
            self.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = o.backoff_cap_ms {
            self.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = o.workers {
            self.workers = v;
        }
        if let Some(v) = o.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = o.timeout_secs {
            self.run_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = o.sleep_seconds {
            self.throttle = seconds("--sleep", v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.retry.max_attempts == 0 {
            return invalid("ETL_MAX_ATTEMPTS", "must be at least 1");
        }
        if self.retry.max_delay < self.retry.base_delay {
            return invalid("ETL_BACKOFF_CAP_MS", "must not be below ETL_BACKOFF_BASE_MS");
        }
        if self.workers == 0 {
            return invalid("ETL_WORKERS", "must be at least 1");
        }
        if self.max_retries < 0 {
            return invalid("ETL_MAX_RETRIES", "must not be negative");
        }
        if self.db_max_conns == 0 {
            return invalid("DB_MAX_CONNS", "must be at least 1");
        }
        url::Url::parse(&self.stats_base_url).map_err(|e| ConfigError::Invalid {
            key: "NBA_STATS_BASE_URL".into(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Seasons for a run: explicit ones, else `NBA_SEASON`, else the season in
    /// progress on `today`.
    pub fn seasons(&self, explicit: &[Season], today: NaiveDate) -> Vec<Season> {
        if !explicit.is_empty() {
            let mut out = explicit.to_vec();
            out.dedup();
            return out;
        }
        vec![self.season.unwrap_or_else(|| Season::current(today))]
    }

    /// Log the effective settings and the redacted environment snapshot.
    pub fn log_snapshot(&self) -> anyhow::Result<()> {
        preflight_check("nba-ingest", &[], SNAPSHOT_KEYS)?;
        tracing::info!(
            max_attempts = self.retry.max_attempts,
            base_delay_ms = self.retry.base_delay.as_millis() as u64,
            max_delay_ms = self.retry.max_delay.as_millis() as u64,
            throttle_ms = self.throttle.as_millis() as u64,
            workers = self.workers,
            max_retries = self.max_retries,
            run_timeout_secs = self.run_timeout.map(|d| d.as_secs()),
            "effective configuration"
        );
        Ok(())
    }
}
