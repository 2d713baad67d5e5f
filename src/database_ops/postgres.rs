use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{Executor, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, instrument};

use crate::database_ops::store::{ErrorSummary, Warehouse};
use crate::error::PersistenceError;
use crate::model::{
    BoxCounts, DimPlayer, DimTeam, ErrorRecord, FactGame, GameId, GameTeams, LoadBatch, LoadReport,
    NewFailure, PlayerStatRow, Process, Season, TeamStatRow, WorkItem,
};
use crate::util::db::Db;

const ERROR_COLUMNS: &str = "id, process_name, game_id, error_type, error_message, stack_trace, \
     retry_count, is_resolved, created_at, last_retry_at, resolved_at";

const TEAM_COLUMNS: [&str; 4] = ["abbreviation", "team_name", "city", "full_name"];
const PLAYER_COLUMNS: [&str; 4] = ["full_name", "first_name", "last_name", "position"];
const GAME_COLUMNS: [&str; 9] = [
    "season",
    "game_date",
    "game_datetime_utc",
    "home_team_id",
    "away_team_id",
    "game_status",
    "arena_name",
    "arena_city",
    "arena_state",
];
const COUNT_COLUMNS: [&str; 16] = [
    "minutes", "pts", "fgm", "fga", "fg3m", "fg3a", "ftm", "fta", "oreb", "dreb", "reb", "ast",
    "stl", "blk", "tov", "pf",
];
const TEAMBOX_EXTRA: [&str; 5] = ["off_rating", "def_rating", "net_rating", "pace", "ts_pct"];
const PLAYERBOX_EXTRA: [&str; 2] = ["starter_flag", "plus_minus"];
const FACT_HEAD: [&str; 3] = ["season", "is_home", "opponent_team_id"];

/// How conflicting rows are reconciled.
#[derive(Clone, Copy)]
enum Merge {
    /// Incoming values replace stored ones.
    Overwrite,
    /// Incoming NULLs keep stored values.
    Coalesce,
}

/// `ON CONFLICT ... DO UPDATE` tail that only touches rows whose values differ,
/// so `RETURNING` omits unchanged rows and `(xmax = 0)` tells inserts from updates.
fn upsert_tail(conflict: &str, cols: &[&str], merge: Merge) -> String {
    let value = |c: &str| match merge {
        Merge::Overwrite => format!("EXCLUDED.{c}"),
        Merge::Coalesce => format!("COALESCE(EXCLUDED.{c}, t.{c})"),
    };
    let set = cols
        .iter()
        .map(|c| format!("{c} = {}", value(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let current = cols.iter().map(|c| format!("t.{c}")).collect::<Vec<_>>().join(", ");
    let incoming = cols.iter().map(|c| value(c)).collect::<Vec<_>>().join(", ");
    format!(
        " ON CONFLICT ({conflict}) DO UPDATE SET {set}, last_updated_at = now() \
         WHERE ({current}) IS DISTINCT FROM ({incoming}) RETURNING (xmax = 0) AS inserted"
    )
}

fn insert_head(table: &str, keys: &[&str], cols: &[&str]) -> String {
    let all = keys.iter().chain(cols).copied().collect::<Vec<_>>().join(", ");
    format!("INSERT INTO {table} AS t ({all}) ")
}

fn box_columns(extra: &[&'static str]) -> Vec<&'static str> {
    let mut cols = FACT_HEAD.to_vec();
    cols.extend(COUNT_COLUMNS);
    cols.extend_from_slice(extra);
    cols
}

/// Runs a built upsert and folds the returned rows into `report`.
async fn run_upsert(
    tx: &mut Transaction<'_, Postgres>,
    mut qb: QueryBuilder<'_, Postgres>,
    sent: usize,
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    let rows = qb.build().persistent(false).fetch_all(&mut **tx).await?;
    let mut inserted = 0u64;
    for r in &rows {
        if r.try_get::<bool, _>("inserted")? {
            inserted += 1;
        }
    }
    report.inserted += inserted;
    report.updated += rows.len() as u64 - inserted;
    report.unchanged += sent.saturating_sub(rows.len()) as u64;
    Ok(())
}

async fn upsert_teams(
    tx: &mut Transaction<'_, Postgres>,
    teams: &[DimTeam],
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    if teams.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::new(insert_head("nba.dim_teams", &["team_id"], &TEAM_COLUMNS));
    qb.push_values(teams, |mut b, t| {
        b.push_bind(t.team_id)
            .push_bind(t.abbreviation.as_deref())
            .push_bind(t.team_name.as_deref())
            .push_bind(t.city.as_deref())
            .push_bind(t.full_name.as_deref());
    });
    qb.push(upsert_tail("team_id", &TEAM_COLUMNS, Merge::Coalesce));
    run_upsert(tx, qb, teams.len(), report).await
}

async fn upsert_players(
    tx: &mut Transaction<'_, Postgres>,
    players: &[DimPlayer],
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    if players.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::new(insert_head("nba.dim_players", &["player_id"], &PLAYER_COLUMNS));
    qb.push_values(players, |mut b, p| {
        b.push_bind(p.player_id)
            .push_bind(p.full_name.as_deref())
            .push_bind(p.first_name.as_deref())
            .push_bind(p.last_name.as_deref())
            .push_bind(p.position.as_deref());
    });
    qb.push(upsert_tail("player_id", &PLAYER_COLUMNS, Merge::Coalesce));
    run_upsert(tx, qb, players.len(), report).await
}

async fn upsert_game(
    tx: &mut Transaction<'_, Postgres>,
    game: &FactGame,
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    let mut qb = QueryBuilder::new(insert_head("nba.fact_games", &["game_id"], &GAME_COLUMNS));
    qb.push_values(std::iter::once(game), |mut b, g| {
        b.push_bind(g.game_id.as_str())
            .push_bind(g.season.label())
            .push_bind(g.game_date)
            .push_bind(g.game_datetime_utc)
            .push_bind(g.home_team_id)
            .push_bind(g.away_team_id)
            .push_bind(g.game_status.as_deref())
            .push_bind(g.arena_name.as_deref())
            .push_bind(g.arena_city.as_deref())
            .push_bind(g.arena_state.as_deref());
    });
    qb.push(upsert_tail("game_id", &GAME_COLUMNS, Merge::Overwrite));
    run_upsert(tx, qb, 1, report).await
}

/// Binds in `COUNT_COLUMNS` order.
fn bind_counts(b: &mut Separated<'_, '_, Postgres, &'static str>, c: &BoxCounts) {
    b.push_bind(c.minutes.clone())
        .push_bind(c.pts)
        .push_bind(c.fgm)
        .push_bind(c.fga)
        .push_bind(c.fg3m)
        .push_bind(c.fg3a)
        .push_bind(c.ftm)
        .push_bind(c.fta)
        .push_bind(c.oreb)
        .push_bind(c.dreb)
        .push_bind(c.reb)
        .push_bind(c.ast)
        .push_bind(c.stl)
        .push_bind(c.blk)
        .push_bind(c.tov)
        .push_bind(c.pf);
}

async fn upsert_teambox(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[TeamStatRow],
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    if rows.is_empty() {
        return Ok(());
    }
    let cols = box_columns(&TEAMBOX_EXTRA);
    let mut qb = QueryBuilder::new(insert_head("nba.teambox_pergame", &["game_id", "team_id"], &cols));
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.game_id.as_str())
            .push_bind(r.team_id)
            .push_bind(r.season.label())
            .push_bind(r.is_home)
            .push_bind(r.opponent_team_id);
        bind_counts(&mut b, &r.counts);
        b.push_bind(r.off_rating)
            .push_bind(r.def_rating)
            .push_bind(r.net_rating)
            .push_bind(r.pace)
            .push_bind(r.ts_pct);
    });
    qb.push(upsert_tail("game_id, team_id", &cols, Merge::Overwrite));
    run_upsert(tx, qb, rows.len(), report).await
}

async fn upsert_playerbox(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[PlayerStatRow],
    report: &mut LoadReport,
) -> Result<(), PersistenceError> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut cols: Vec<&str> = vec!["team_id"];
    cols.extend(box_columns(&PLAYERBOX_EXTRA));
    let mut qb =
        QueryBuilder::new(insert_head("nba.playerbox_pergame", &["game_id", "player_id"], &cols));
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.game_id.as_str())
            .push_bind(r.player_id)
            .push_bind(r.team_id)
            .push_bind(r.season.label())
            .push_bind(r.is_home)
            .push_bind(r.opponent_team_id);
        bind_counts(&mut b, &r.counts);
        b.push_bind(r.starter).push_bind(r.plus_minus);
    });
    qb.push(upsert_tail("game_id, player_id", &cols, Merge::Overwrite));
    run_upsert(tx, qb, rows.len(), report).await
}

fn work_item(row: &PgRow) -> Result<WorkItem, PersistenceError> {
    let raw_id: String = row.try_get("game_id")?;
    let raw_season: String = row.try_get("season")?;
    let game_id = GameId::parse(&raw_id)
        .ok_or_else(|| PersistenceError::Integrity(format!("spine holds malformed game id {raw_id:?}")))?;
    let season = raw_season
        .parse::<Season>()
        .map_err(|e| PersistenceError::Integrity(format!("spine row {raw_id}: {e}")))?;
    Ok(WorkItem {
        game_id,
        season,
        first_seen: row.try_get("first_seen")?,
    })
}

fn error_record(row: &PgRow) -> Result<ErrorRecord, PersistenceError> {
    Ok(ErrorRecord {
        id: row.try_get("id")?,
        process_name: row.try_get("process_name")?,
        game_id: row.try_get("game_id")?,
        error_type: row.try_get("error_type")?,
        error_message: row.try_get("error_message")?,
        detail: row.try_get("stack_trace")?,
        retry_count: row.try_get("retry_count")?,
        is_resolved: row.try_get("is_resolved")?,
        created_at: row.try_get("created_at")?,
        last_retry_at: row.try_get("last_retry_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn fact_table(process: Process) -> &'static str {
    match process {
        Process::Games => "nba.fact_games",
        Process::TeamBox => "nba.teambox_pergame",
        Process::PlayerBox => "nba.playerbox_pergame",
    }
}

/// Warehouse backed by the `nba` schema.
#[derive(Clone)]
pub struct PgWarehouse {
    db: Db,
}

impl PgWarehouse {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1")
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(season = %season, listed = ids.len()))]
    async fn register_games(
        &self,
        season: Season,
        ids: &[GameId],
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = ids.iter().map(|g| g.as_str().to_string()).collect();
        let rows = sqlx::query(
            "INSERT INTO nba.spine (game_id, season) \
             SELECT g, $2 FROM UNNEST($1::varchar[]) AS g \
             ON CONFLICT (game_id) DO NOTHING \
             RETURNING game_id, season, first_seen",
        )
        .persistent(false)
        .bind(raw)
        .bind(season.label())
        .fetch_all(&self.db.pool)
        .await?;
        let mut items = rows.iter().map(work_item).collect::<Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| (a.first_seen, &a.game_id).cmp(&(b.first_seen, &b.game_id)));
        debug!(registered = items.len(), "spine insert");
        Ok(items)
    }

    async fn season_items(&self, season: Season) -> Result<Vec<WorkItem>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT game_id, season, first_seen FROM nba.spine \
             WHERE season = $1 ORDER BY first_seen, game_id",
        )
        .persistent(false)
        .bind(season.label())
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(work_item).collect()
    }

    async fn outstanding(
        &self,
        season: Season,
        process: Process,
    ) -> Result<Vec<WorkItem>, PersistenceError> {
        let sql = format!(
            "SELECT s.game_id, s.season, s.first_seen FROM nba.spine s \
             WHERE s.season = $1 AND ( \
                 NOT EXISTS (SELECT 1 FROM {table} x WHERE x.game_id = s.game_id) \
                 OR EXISTS (SELECT 1 FROM nba.etl_errors e \
                            WHERE e.process_name = $2 AND e.game_id = s.game_id AND NOT e.is_resolved)) \
             ORDER BY s.first_seen, s.game_id",
            table = fact_table(process),
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(season.label())
            .bind(process.name())
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter().map(work_item).collect()
    }

    async fn game_teams(&self, game_id: &GameId) -> Result<Option<GameTeams>, PersistenceError> {
        let row = sqlx::query(
            "SELECT home_team_id, away_team_id FROM nba.fact_games WHERE game_id = $1",
        )
        .persistent(false)
        .bind(game_id.as_str())
        .fetch_optional(&self.db.pool)
        .await?;
        row.map(|r| {
            Ok(GameTeams {
                home_team_id: r.try_get("home_team_id")?,
                away_team_id: r.try_get("away_team_id")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, batch), fields(game_id = %batch.game_id(), process = %batch.process()))]
    async fn load(&self, batch: &LoadBatch) -> Result<LoadReport, PersistenceError> {
        let mut tx = self.db.pool.begin().await?;
        (&mut *tx).execute("SET CONSTRAINTS ALL DEFERRED").await?;
        let mut report = LoadReport::default();
        match batch {
            LoadBatch::Game(b) => {
                upsert_teams(&mut tx, &b.teams, &mut report).await?;
                upsert_game(&mut tx, &b.game, &mut report).await?;
            }
            LoadBatch::TeamBox(b) => upsert_teambox(&mut tx, &b.rows, &mut report).await?,
            LoadBatch::PlayerBox(b) => {
                upsert_players(&mut tx, &b.players, &mut report).await?;
                upsert_playerbox(&mut tx, &b.rows, &mut report).await?;
            }
        }
        // Deferred foreign keys are checked here.
        tx.commit().await?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "batch committed"
        );
        Ok(report)
    }

    async fn open_error(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {ERROR_COLUMNS} FROM nba.etl_errors \
             WHERE process_name = $1 AND game_id IS NOT DISTINCT FROM $2 AND NOT is_resolved"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(process_name)
            .bind(game_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(error_record).transpose()
    }

    async fn record_error(&self, failure: &NewFailure) -> Result<ErrorRecord, PersistenceError> {
        let sql = format!(
            "INSERT INTO nba.etl_errors (process_name, game_id, error_type, error_message, stack_trace) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (process_name, (COALESCE(game_id, ''))) WHERE NOT is_resolved \
             DO UPDATE SET error_type = EXCLUDED.error_type, \
                           error_message = EXCLUDED.error_message, \
                           stack_trace = EXCLUDED.stack_trace \
             RETURNING {ERROR_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(&failure.process_name)
            .bind(failure.game_id.as_deref())
            .bind(&failure.error_type)
            .bind(&failure.error_message)
            .bind(failure.detail.as_deref())
            .fetch_one(&self.db.pool)
            .await?;
        error_record(&row)
    }

    async fn bump_retry(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<Option<ErrorRecord>, PersistenceError> {
        let sql = format!(
            "UPDATE nba.etl_errors SET retry_count = retry_count + 1, last_retry_at = now() \
             WHERE process_name = $1 AND game_id IS NOT DISTINCT FROM $2 AND NOT is_resolved \
             RETURNING {ERROR_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(process_name)
            .bind(game_id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(error_record).transpose()
    }

    async fn resolve_errors(
        &self,
        process_name: &str,
        game_id: Option<&str>,
    ) -> Result<u64, PersistenceError> {
        let res = sqlx::query(
            "UPDATE nba.etl_errors SET is_resolved = TRUE, resolved_at = now() \
             WHERE process_name = $1 AND game_id IS NOT DISTINCT FROM $2 AND NOT is_resolved",
        )
        .persistent(false)
        .bind(process_name)
        .bind(game_id)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn unresolved_errors(
        &self,
        process_name: Option<&str>,
    ) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {ERROR_COLUMNS} FROM nba.etl_errors \
             WHERE NOT is_resolved AND ($1::text IS NULL OR process_name = $1) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(process_name)
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter().map(error_record).collect()
    }

    async fn error_summary(&self) -> Result<ErrorSummary, PersistenceError> {
        let rows = sqlx::query(
            "SELECT process_name, error_type, COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE NOT is_resolved) AS unresolved \
             FROM nba.etl_errors GROUP BY process_name, error_type",
        )
        .persistent(false)
        .fetch_all(&self.db.pool)
        .await?;
        let mut summary = ErrorSummary::default();
        for r in &rows {
            let process: String = r.try_get("process_name")?;
            let kind: String = r.try_get("error_type")?;
            let total: i64 = r.try_get("total")?;
            let unresolved: i64 = r.try_get("unresolved")?;
            summary.add(&process, &kind, total.max(0) as u64, unresolved.max(0) as u64);
        }
        Ok(summary)
    }
}
