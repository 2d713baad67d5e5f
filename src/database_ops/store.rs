use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PersistenceError;
use crate::model::{
    ErrorRecord, GameId, GameTeams, LoadBatch, LoadReport, NewFailure, Process, Season, WorkItem,
};

/// Ledger totals, overall and per process / error kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub total: u64,
    pub unresolved: u64,
    pub by_process: BTreeMap<String, Counts>,
    pub by_kind: BTreeMap<String, Counts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: u64,
    pub unresolved: u64,
}

impl ErrorSummary {
    pub fn add(&mut self, process_name: &str, kind: &str, total: u64, unresolved: u64) {
        self.total += total;
        self.unresolved += unresolved;
        for entry in [
            self.by_process.entry(process_name.to_string()).or_default(),
            self.by_kind.entry(kind.to_string()).or_default(),
        ] {
            entry.total += total;
            entry.unresolved += unresolved;
        }
    }
}

/// Persistence boundary. Each method is atomic on its own; `load` commits a
/// whole batch or nothing.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn ping(&self) -> Result<(), PersistenceError>;

    /// Insert unseen ids into the spine; returns only the newly registered items.
    async fn register_games(
        &self,
        season: Season,
        ids: &[GameId],
    ) -> Result<Vec<WorkItem>, PersistenceError>;

    /// Every registered item of the season, oldest first.
    async fn season_items(&self, season: Season) -> Result<Vec<WorkItem>, PersistenceError>;

    /// Items lacking fact rows for `process`, or with an open error for it, oldest first.
    async fn outstanding(
        &self,
        season: Season,
        process: Process,
    ) -> Result<Vec<WorkItem>, PersistenceError>;

    async fn game_teams(&self, game_id: &GameId) -> Result<Option<GameTeams>, PersistenceError>;

    async fn load(&self, batch: &LoadBatch) -> Result<LoadReport, PersistenceError>;

    async fn open_error(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError>;

    /// Create the open record for the pair, or overwrite its latest failure.
    async fn record_error(&self, failure: &NewFailure) -> Result<ErrorRecord, PersistenceError>;

    /// Increment `retry_count` of the open record, if any.
    async fn bump_retry(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError>;

    /// Resolve open records for the pair; returns how many were resolved.
    async fn resolve_errors(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<u64, PersistenceError>;

    /// Open records, oldest first.
    async fn unresolved_errors(
        &self,
        process_name: Option<&str>,
    ) -> Result<Vec<ErrorRecord>, PersistenceError>;

    async fn error_summary(&self) -> Result<ErrorSummary, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warehouse_is_object_safe() {
        fn _assert(_: &dyn Warehouse) {}
    }

    #[test]
    fn summary_accumulates_by_process_and_kind() {
        let mut s = ErrorSummary::default();
        s.add("load_games", "TransientFetchError", 3, 1);
        s.add("load_teambox", "TransientFetchError", 2, 2);
        assert_eq!(s.total, 5);
        assert_eq!(s.unresolved, 3);
        assert_eq!(s.by_kind["TransientFetchError"], Counts { total: 5, unresolved: 3 });
        assert_eq!(s.by_process["load_games"].unresolved, 1);
    }
}
