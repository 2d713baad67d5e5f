//! In-process warehouse with the same upsert, foreign-key and ledger semantics
//! as the PostgreSQL schema. Backs `--dry-run` and the test suite.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database_ops::store::{ErrorSummary, Warehouse};
use crate::error::PersistenceError;
use crate::model::{
    DimPlayer, DimTeam, ErrorRecord, FactGame, GameId, GameTeams, LoadBatch, LoadReport,
    NewFailure, PlayerStatRow, Process, RowOutcome, Season, TeamStatRow, WorkItem,
};

#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub row: T,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    spine: BTreeMap<GameId, WorkItem>,
    teams: BTreeMap<i64, Stamped<DimTeam>>,
    players: BTreeMap<i64, Stamped<DimPlayer>>,
    games: BTreeMap<GameId, Stamped<FactGame>>,
    teambox: BTreeMap<(GameId, i64), Stamped<TeamStatRow>>,
    playerbox: BTreeMap<(GameId, i64), Stamped<PlayerStatRow>>,
    errors: Vec<ErrorRecord>,
    faults: Vec<(Fault, PersistenceError)>,
}

/// Warehouse calls that can be made to fail once with [`MemoryWarehouse::inject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Load,
    Outstanding(Process),
    GameTeams,
}

/// Snapshot of table sizes, for assertions and dry-run reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub spine: usize,
    pub dim_teams: usize,
    pub dim_players: usize,
    pub fact_games: usize,
    pub teambox: usize,
    pub playerbox: usize,
    pub etl_errors: usize,
}

#[derive(Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next matching call fail with `err` without touching any table.
    pub fn inject(&self, fault: Fault, err: PersistenceError) {
        self.lock().faults.push((fault, err));
    }

    pub fn counts(&self) -> TableCounts {
        let s = self.lock();
        TableCounts {
            spine: s.spine.len(),
            dim_teams: s.teams.len(),
            dim_players: s.players.len(),
            fact_games: s.games.len(),
            teambox: s.teambox.len(),
            playerbox: s.playerbox.len(),
            etl_errors: s.errors.len(),
        }
    }

    pub fn fact_game(&self, game_id: &GameId) -> Option<Stamped<FactGame>> {
        self.lock().games.get(game_id).cloned()
    }

    pub fn team(&self, team_id: i64) -> Option<Stamped<DimTeam>> {
        self.lock().teams.get(&team_id).cloned()
    }

    pub fn all_errors(&self) -> Vec<ErrorRecord> {
        self.lock().errors.clone()
    }
}

fn fk_violation(message: String) -> PersistenceError {
    PersistenceError::Database {
        code: Some("23503".into()),
        message,
        retryable: false,
    }
}

fn upsert<K: Ord, T: Clone + PartialEq>(
    table: &mut BTreeMap<K, Stamped<T>>,
    key: K,
    row: T,
    now: DateTime<Utc>,
) -> RowOutcome {
    match table.get_mut(&key) {
        None => {
            table.insert(
                key,
                Stamped {
                    row,
                    created_at: now,
                    last_updated_at: now,
                },
            );
            RowOutcome::Inserted
        }
        Some(existing) if existing.row == row => RowOutcome::Unchanged,
        Some(existing) => {
            existing.row = row;
            existing.last_updated_at = now;
            RowOutcome::Updated
        }
    }
}

impl State {
    fn take_fault(&mut self, fault: Fault) -> Result<(), PersistenceError> {
        match self.faults.iter().position(|(f, _)| *f == fault) {
            Some(i) => Err(self.faults.remove(i).1),
            None => Ok(()),
        }
    }

    fn items_sorted<'a>(&self, items: impl Iterator<Item = &'a WorkItem>) -> Vec<WorkItem> {
        let mut out: Vec<WorkItem> = items.cloned().collect();
        out.sort_by(|a, b| (a.first_seen, &a.game_id).cmp(&(b.first_seen, &b.game_id)));
        out
    }

    fn has_open_error(&self, process_name: &str, game_id: &GameId) -> bool {
        self.errors.iter().any(|e| {
            !e.is_resolved
                && e.process_name == process_name
                && e.game_id.as_deref() == Some(game_id.as_str())
        })
    }

    fn has_fact_rows(&self, process: Process, game_id: &GameId) -> bool {
        match process {
            Process::Games => self.games.contains_key(game_id),
            Process::TeamBox => self.teambox.keys().any(|(g, _)| g == game_id),
            Process::PlayerBox => self.playerbox.keys().any(|(g, _)| g == game_id),
        }
    }

    /// Deferred-constraint check: every reference must resolve once the batch is applied.
    fn check_references(&self, batch: &LoadBatch) -> Result<(), PersistenceError> {
        match batch {
            LoadBatch::Game(b) => {
                if !self.spine.contains_key(&b.game.game_id) {
                    return Err(fk_violation(format!("game {} not in spine", b.game.game_id)));
                }
                let batch_teams: HashSet<i64> = b.teams.iter().map(|t| t.team_id).collect();
                for id in [b.game.home_team_id, b.game.away_team_id] {
                    if !batch_teams.contains(&id) && !self.teams.contains_key(&id) {
                        return Err(fk_violation(format!("team {id} not in dim_teams")));
                    }
                }
            }
            LoadBatch::TeamBox(b) => {
                if !self.games.contains_key(&b.game_id) {
                    return Err(fk_violation(format!("game {} not in fact_games", b.game_id)));
                }
                if let Some(r) = b.rows.iter().find(|r| !self.teams.contains_key(&r.team_id)) {
                    return Err(fk_violation(format!("team {} not in dim_teams", r.team_id)));
                }
            }
            LoadBatch::PlayerBox(b) => {
                if !self.games.contains_key(&b.game_id) {
                    return Err(fk_violation(format!("game {} not in fact_games", b.game_id)));
                }
                let batch_players: HashSet<i64> = b.players.iter().map(|p| p.player_id).collect();
                for r in &b.rows {
                    if !batch_players.contains(&r.player_id) && !self.players.contains_key(&r.player_id) {
                        return Err(fk_violation(format!("player {} not in dim_players", r.player_id)));
                    }
                    if !self.teams.contains_key(&r.team_id) {
                        return Err(fk_violation(format!("team {} not in dim_teams", r.team_id)));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: &LoadBatch, now: DateTime<Utc>) -> LoadReport {
        let mut report = LoadReport::default();
        match batch {
            LoadBatch::Game(b) => {
                for t in &b.teams {
                    let merged = match self.teams.get(&t.team_id) {
                        Some(existing) => t.merged_over(&existing.row),
                        None => t.clone(),
                    };
                    report.add(upsert(&mut self.teams, t.team_id, merged, now));
                }
                report.add(upsert(&mut self.games, b.game.game_id.clone(), b.game.clone(), now));
            }
            LoadBatch::TeamBox(b) => {
                for r in &b.rows {
                    let key = (r.game_id.clone(), r.team_id);
                    report.add(upsert(&mut self.teambox, key, r.clone(), now));
                }
            }
            LoadBatch::PlayerBox(b) => {
                for p in &b.players {
                    let merged = match self.players.get(&p.player_id) {
                        Some(existing) => p.merged_over(&existing.row),
                        None => p.clone(),
                    };
                    report.add(upsert(&mut self.players, p.player_id, merged, now));
                }
                for r in &b.rows {
                    let key = (r.game_id.clone(), r.player_id);
                    report.add(upsert(&mut self.playerbox, key, r.clone(), now));
                }
            }
        }
        report
    }

    fn open_error_mut(&mut self, process_name: &str, game_id: Option<&str>) -> Option<&mut ErrorRecord> {
        self.errors
            .iter_mut()
            .find(|e| !e.is_resolved && e.process_name == process_name && e.game_id.as_deref() == game_id)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ping(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn register_games(
        &self,
        season: Season,
        ids: &[GameId],
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        let mut s = self.lock();
        let now = Utc::now();
        let mut fresh = Vec::new();
        for id in ids {
            if s.spine.contains_key(id) {
                continue;
            }
            let item = WorkItem {
                game_id: id.clone(),
                season,
                first_seen: now,
            };
            s.spine.insert(id.clone(), item.clone());
            fresh.push(item);
        }
        Ok(s.items_sorted(fresh.iter()))
    }

    async fn season_items(&self, season: Season) -> Result<Vec<WorkItem>, PersistenceError> {
        let s = self.lock();
        Ok(s.items_sorted(s.spine.values().filter(|w| w.season == season)))
    }

    async fn outstanding(
        &self,
        season: Season,
        process: Process,
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        let mut s = self.lock();
        s.take_fault(Fault::Outstanding(process))?;
        let name = process.name();
        let pending = s
            .spine
            .values()
            .filter(|w| w.season == season)
            .filter(|w| !s.has_fact_rows(process, &w.game_id) || s.has_open_error(name, &w.game_id));
        Ok(s.items_sorted(pending))
    }

    async fn game_teams(&self, game_id: &GameId) -> Result<Option<GameTeams>, PersistenceError> {
        let mut s = self.lock();
        s.take_fault(Fault::GameTeams)?;
        Ok(s.games.get(game_id).map(|g| GameTeams {
            home_team_id: g.row.home_team_id,
            away_team_id: g.row.away_team_id,
        }))
    }

    async fn load(&self, batch: &LoadBatch) -> Result<LoadReport, PersistenceError> {
        let mut s = self.lock();
        s.take_fault(Fault::Load)?;
        s.check_references(batch)?;
        Ok(s.apply(batch, Utc::now()))
    }

    async fn open_error(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        Ok(self.lock().open_error_mut(process_name, game_id).map(|e| e.clone()))
    }

    async fn record_error(&self, failure: &NewFailure) -> Result<ErrorRecord, PersistenceError> {
        let mut s = self.lock();
        if let Some(open) = s.open_error_mut(&failure.process_name, failure.game_id.as_deref()) {
            open.error_type = failure.error_type.clone();
            open.error_message = failure.error_message.clone();
            open.detail = failure.detail.clone();
            return Ok(open.clone());
        }
        let record = ErrorRecord {
            id: s.errors.len() as i64 + 1,
            process_name: failure.process_name.clone(),
            game_id: failure.game_id.clone(),
            error_type: failure.error_type.clone(),
            error_message: failure.error_message.clone(),
            detail: failure.detail.clone(),
            retry_count: 0,
            is_resolved: false,
            created_at: Utc::now(),
            last_retry_at: None,
            resolved_at: None,
        };
        s.errors.push(record.clone());
        Ok(record)
    }

    async fn bump_retry(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        let mut s = self.lock();
        Ok(s.open_error_mut(process_name, game_id).map(|e| {
            e.retry_count += 1;
            e.last_retry_at = Some(Utc::now());
            e.clone()
        }))
    }

    async fn resolve_errors(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<u64, PersistenceError> {
        let mut s = self.lock();
        let now = Utc::now();
        let mut resolved = 0;
        for e in s.errors.iter_mut().filter(|e| {
            !e.is_resolved && e.process_name == process_name && e.game_id.as_deref() == game_id
        }) {
            e.is_resolved = true;
            e.resolved_at = Some(now);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn unresolved_errors(
        &self,
        process_name: Option<&str>,
    ) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let s = self.lock();
        let mut open: Vec<ErrorRecord> = s
            .errors
            .iter()
            .filter(|e| !e.is_resolved && process_name.map_or(true, |p| e.process_name == p))
            .cloned()
            .collect();
        open.sort_by_key(|e| (e.created_at, e.id));
        Ok(open)
    }

    async fn error_summary(&self) -> Result<ErrorSummary, PersistenceError> {
        let s = self.lock();
        let mut summary = ErrorSummary::default();
        for e in &s.errors {
            summary.add(&e.process_name, &e.error_type, 1, u64::from(!e.is_resolved));
        }
        Ok(summary)
    }
}
