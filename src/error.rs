//! Failure taxonomy for the ingestion stages.
//!
//! Every failure that reaches the orchestrator is a [`StageError`], which maps
//! onto exactly one [`ErrorKind`] and carries its own retryability.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Ledger-facing classification, stored in `etl_errors.error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    TransientFetchError,
    PermanentFetchError,
    ValidationFailure,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientFetchError => "TransientFetchError",
            ErrorKind::PermanentFetchError => "PermanentFetchError",
            ErrorKind::ValidationFailure => "ValidationFailure",
            ErrorKind::PersistenceError => "PersistenceError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Fetch,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCause {
    Timeout,
    Connect,
    RateLimited,
    Server(u16),
    Body,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientCause::Timeout => f.write_str("timeout"),
            TransientCause::Connect => f.write_str("connection failure"),
            TransientCause::RateLimited => f.write_str("rate limited"),
            TransientCause::Server(s) => write!(f, "server error {s}"),
            TransientCause::Body => f.write_str("unreadable body"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentCause {
    BadRequest(u16),
    NotFound,
    Unauthorized(u16),
    Client(u16),
}

impl fmt::Display for PermanentCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentCause::BadRequest(s) => write!(f, "malformed request {s}"),
            PermanentCause::NotFound => f.write_str("not found 404"),
            PermanentCause::Unauthorized(s) => write!(f, "authentication failure {s}"),
            PermanentCause::Client(s) => write!(f, "client error {s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("transient {cause}: {message}")]
    Transient {
        cause: TransientCause,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("permanent {cause}: {message}")]
    Permanent {
        cause: PermanentCause,
        message: String,
    },
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt within the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Permanent { .. } => ErrorKind::PermanentFetchError,
            FetchError::Exhausted { last, .. } => last.kind(),
            FetchError::Transient { .. } | FetchError::Cancelled => ErrorKind::TransientFetchError,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// One offending field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldIssue {
    pub field: String,
    pub value: Option<String>,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{} ({}): {}", self.field, v, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// A payload that cannot be turned into valid rows. Never retried within a call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{subject}: {}", render_issues(.issues))]
pub struct ValidationFailure {
    pub subject: String,
    pub issues: Vec<FieldIssue>,
}

fn render_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationFailure {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issues: Vec::new(),
        }
    }

    pub fn single(subject: impl Into<String>, field: &str, message: impl Into<String>) -> Self {
        let mut v = Self::new(subject);
        v.push(field, None, message);
        v
    }

    pub fn push(&mut self, field: &str, value: Option<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            field: field.to_string(),
            value,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationFailure> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("database error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Database {
        code: Option<String>,
        message: String,
        retryable: bool,
    },
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("inconsistent batch: {0}")]
    Integrity(String),
}

impl PersistenceError {
    /// Retryable unless the failure says the data itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::Database { retryable, .. } => *retryable,
            PersistenceError::Unavailable(_) => true,
            PersistenceError::Integrity(_) => false,
        }
    }
}

/// SQLSTATE classes 22 (data exception) and 23 (integrity constraint) are data-shape violations.
pub fn sqlstate_is_data_shape(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("23")
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let retryable = !code.as_deref().is_some_and(sqlstate_is_data_shape);
                PersistenceError::Database {
                    code,
                    message: db.message().to_string(),
                    retryable,
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_) => PersistenceError::Unavailable(e.to_string()),
            _ => PersistenceError::Database {
                code: None,
                message: e.to_string(),
                retryable: false,
            },
        }
    }
}

/// A failure at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),
    #[error("load failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Fetch(e) => e.kind(),
            StageError::Validation(_) => ErrorKind::ValidationFailure,
            StageError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageError::Fetch(_) => Stage::Fetch,
            StageError::Validation(_) => Stage::Transform,
            StageError::Persistence(_) => Stage::Load,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Fetch(FetchError::Exhausted { .. }) => true,
            StageError::Fetch(e) => e.is_retryable(),
            StageError::Validation(_) => false,
            StageError::Persistence(e) => e.is_retryable(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Fetch(FetchError::Cancelled))
    }

    /// Diagnostic text stored with the ledger record.
    pub fn detail(&self) -> String {
        let mut out = format!(
            "stage={} kind={} retryable={}",
            self.stage(),
            self.kind(),
            self.is_retryable()
        );
        if let StageError::Fetch(FetchError::Exhausted { attempts, .. }) = self {
            out.push_str(&format!(" attempts={attempts}"));
        }
        if let StageError::Validation(v) = self {
            for issue in &v.issues {
                out.push_str(&format!("\n  {issue}"));
            }
        }
        let mut source = std::error::Error::source(self);
        while let Some(s) = source {
            out.push_str(&format!("\ncaused by: {s}"));
            source = s.source();
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid season: {0}")]
    InvalidSeason(String),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
