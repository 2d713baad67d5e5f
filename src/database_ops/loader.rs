use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::database_ops::store::Warehouse;
use crate::error::PersistenceError;
use crate::model::{
    DimPlayer, DimTeam, GameId, LoadBatch, LoadReport, PlayerBoxBundle, TeamBoxBundle, WorkItem,
};

/// Writes one WorkItem's batch in a single transaction.
#[derive(Clone)]
pub struct Loader {
    warehouse: Arc<dyn Warehouse>,
}

impl Loader {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    pub async fn load(&self, item: &WorkItem, batch: LoadBatch) -> Result<LoadReport, PersistenceError> {
        let batch = prepare(item, batch)?;
        self.warehouse.load(&batch).await
    }
}

fn foreign_row(item: &GameId, row: &GameId, what: &str) -> PersistenceError {
    PersistenceError::Integrity(format!("{what} row for game {row} in batch for {item}"))
}

/// Collapse repeated dimension keys (later values win, nulls keep earlier ones)
/// and order by key so concurrent transactions lock in the same order.
fn dedupe_teams(teams: Vec<DimTeam>) -> Vec<DimTeam> {
    let mut by_key: BTreeMap<i64, DimTeam> = BTreeMap::new();
    for t in teams {
        let merged = match by_key.get(&t.team_id) {
            Some(prev) => t.merged_over(prev),
            None => t,
        };
        by_key.insert(merged.team_id, merged);
    }
    by_key.into_values().collect()
}

fn dedupe_players(players: Vec<DimPlayer>) -> Vec<DimPlayer> {
    let mut by_key: BTreeMap<i64, DimPlayer> = BTreeMap::new();
    for p in players {
        let merged = match by_key.get(&p.player_id) {
            Some(prev) => p.merged_over(prev),
            None => p,
        };
        by_key.insert(merged.player_id, merged);
    }
    by_key.into_values().collect()
}

/// Integrity checks and normalisation before anything touches the warehouse.
/// Violations are permanent.
pub fn prepare(item: &WorkItem, batch: LoadBatch) -> Result<LoadBatch, PersistenceError> {
    let gid = &item.game_id;
    if batch.game_id() != gid {
        return Err(foreign_row(gid, batch.game_id(), "batch"));
    }
    match batch {
        LoadBatch::Game(mut b) => {
            let teams: HashSet<i64> = b.teams.iter().map(|t| t.team_id).collect();
            for id in [b.game.home_team_id, b.game.away_team_id] {
                if !teams.contains(&id) {
                    return Err(PersistenceError::Integrity(format!(
                        "game {gid} references team {id} missing from batch"
                    )));
                }
            }
            b.teams = dedupe_teams(b.teams);
            Ok(LoadBatch::Game(b))
        }
        LoadBatch::TeamBox(b) => {
            let mut seen = HashSet::new();
            for r in &b.rows {
                if &r.game_id != gid {
                    return Err(foreign_row(gid, &r.game_id, "team box"));
                }
                if !seen.insert(r.team_id) {
                    return Err(PersistenceError::Integrity(format!(
                        "duplicate team box row ({gid}, {})",
                        r.team_id
                    )));
                }
            }
            let mut rows = b.rows;
            rows.sort_by_key(|r| r.team_id);
            Ok(LoadBatch::TeamBox(TeamBoxBundle { game_id: b.game_id, rows }))
        }
        LoadBatch::PlayerBox(b) => {
            let players = dedupe_players(b.players);
            let known: HashSet<i64> = players.iter().map(|p| p.player_id).collect();
            let mut seen = HashSet::new();
            for r in &b.rows {
                if &r.game_id != gid {
                    return Err(foreign_row(gid, &r.game_id, "player box"));
                }
                if !known.contains(&r.player_id) {
                    return Err(PersistenceError::Integrity(format!(
                        "player {} has a box row but no dimension row",
                        r.player_id
                    )));
                }
                if !seen.insert(r.player_id) {
                    return Err(PersistenceError::Integrity(format!(
                        "duplicate player box row ({gid}, {})",
                        r.player_id
                    )));
                }
            }
            let mut rows = b.rows;
            rows.sort_by_key(|r| r.player_id);
            Ok(LoadBatch::PlayerBox(PlayerBoxBundle {
                game_id: b.game_id,
                players,
                rows,
            }))
        }
    }
}
