//! Durable per-(process, game) failure tracking.
//!
//! A record is Open until a later success resolves it. Re-attempts bump
//! `retry_count`, new failures overwrite the stored message, and a resolved
//! record is never reopened: the next failure starts a fresh one.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::database_ops::store::{ErrorSummary, Warehouse};
use crate::error::{PersistenceError, StageError};
use crate::model::{ErrorRecord, GameId, NewFailure};

#[derive(Clone)]
pub struct ErrorLedger {
    warehouse: Arc<dyn Warehouse>,
}

impl ErrorLedger {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    pub async fn record_failure(
        &self,
        process_name: &str,
        game_id: Option<&GameId>,
        error: &StageError,
    ) -> Result<ErrorRecord, PersistenceError> {
        let failure = NewFailure {
            process_name: process_name.to_string(),
            game_id: game_id.map(|g| g.as_str().to_string()),
            error_type: error.kind().as_str().to_string(),
            error_message: error.to_string(),
            detail: Some(error.detail()),
        };
        let record = self.warehouse.record_error(&failure).await?;
        warn!(
            process = process_name,
            game_id = record.game_id.as_deref().unwrap_or("-"),
            kind = %error.kind(),
            retry_count = record.retry_count,
            "failure recorded"
        );
        Ok(record)
    }

    /// Resolve any open record for the pair. Returns how many were resolved.
    pub async fn record_success(
        &self,
        process_name: &str,
        game_id: Option<&GameId>,
    ) -> Result<u64, PersistenceError> {
        let resolved = self
            .warehouse
            .resolve_errors(process_name, game_id.map(GameId::as_str))
            .await?;
        if resolved > 0 {
            debug!(process = process_name, resolved, "ledger record resolved");
        }
        Ok(resolved)
    }

    pub async fn open_record(
        &self,
        process_name: &str,
        game_id: Option<&GameId>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        self.warehouse
            .open_error(process_name, game_id.map(GameId::as_str))
            .await
    }

    /// Count a re-attempt against the open record, if there is one.
    pub async fn begin_retry(
        &self,
        process_name: &str,
        game_id: Option<&GameId>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        self.warehouse
            .bump_retry(process_name, game_id.map(GameId::as_str))
            .await
    }

    /// Open records still within the budget, oldest first.
    pub async fn list_retryable(
        &self,
        process_name: Option<&str>,
        max_retries: i32,
    ) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let mut open = self.warehouse.unresolved_errors(process_name).await?;
        open.retain(|r| r.retry_count < max_retries);
        Ok(open)
    }

    /// Open records at or over the budget; these need manual attention.
    pub async fn list_exhausted(
        &self,
        process_name: Option<&str>,
        max_retries: i32,
    ) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let mut open = self.warehouse.unresolved_errors(process_name).await?;
        open.retain(|r| r.retry_count >= max_retries);
        Ok(open)
    }

    pub async fn summary(&self) -> Result<ErrorSummary, PersistenceError> {
        self.warehouse.error_summary().await
    }
}
