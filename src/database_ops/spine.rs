use std::sync::Arc;

use tracing::{info, instrument};

use crate::database_ops::store::Warehouse;
use crate::error::{PersistenceError, StageError};
use crate::fetch::FetchClient;
use crate::model::{GameId, Process, Season, WorkItem};
use crate::transform::parse_listing;

/// Authoritative set of known games. Only grows.
#[derive(Clone)]
pub struct SpineRegistry {
    warehouse: Arc<dyn Warehouse>,
    fetch: Arc<FetchClient>,
}

impl SpineRegistry {
    pub fn new(warehouse: Arc<dyn Warehouse>, fetch: Arc<FetchClient>) -> Self {
        Self { warehouse, fetch }
    }

    /// Pull the season listing and register ids the spine has not seen.
    /// Returns only the newly registered items; a repeat call with an unchanged
    /// listing returns nothing.
    #[instrument(skip(self), fields(season = %season))]
    pub async fn discover_new(&self, season: Season) -> Result<Vec<WorkItem>, StageError> {
        let payload = self.fetch.fetch_listing(season).await?;
        let ids = parse_listing(&payload, season)?;
        let fresh = self.register(season, &ids).await?;
        info!(listed = ids.len(), new = fresh.len(), "spine discovery");
        Ok(fresh)
    }

    pub async fn register(
        &self,
        season: Season,
        ids: &[GameId],
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        self.warehouse.register_games(season, ids).await
    }

    /// Items with no completed fact rows for `process`, or an open ledger record.
    pub async fn outstanding(
        &self,
        season: Season,
        process: Process,
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        self.warehouse.outstanding(season, process).await
    }

    pub async fn season_items(&self, season: Season) -> Result<Vec<WorkItem>, PersistenceError> {
        self.warehouse.season_items(season).await
    }
}
