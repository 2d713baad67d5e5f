//! One ingestion run: discover, then fetch -> transform -> load every
//! outstanding item per process, ledgering each failure and continuing.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::database_ops::{ErrorLedger, Loader, SpineRegistry, Warehouse};
use crate::error::{FetchError, PersistenceError, StageError};
use crate::fetch::{Endpoint, FetchClient};
use crate::model::{GameId, GameTeams, LoadBatch, LoadReport, Process, Season, WorkItem};
use crate::shutdown::Shutdown;
use crate::transform::{transform_playerbox, transform_summary, transform_teambox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Outstanding items only.
    Incremental,
    /// Outstanding items, or every registered item when `reload` is set.
    Backfill { reload: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub seasons: Vec<Season>,
    pub mode: RunMode,
    /// Cap on items per season and process.
    pub limit: Option<usize>,
}

/// Startup failures. Once preflight passes, nothing ends the run early except cancellation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("warehouse unreachable: {0}")]
    Warehouse(PersistenceError),
    #[error("stats API unreachable: {0}")]
    StatsApi(FetchError),
    #[error("no seasons to process")]
    NoSeasons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Degraded,
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::Degraded => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub succeeded: u64,
    /// Failed but still within the ledger budget.
    pub failed: u64,
    /// Failed and brought their open record to the budget.
    pub exhausted: u64,
    /// Skipped because their open record was already over budget.
    pub parked: u64,
    pub cancelled: u64,
    /// Box-score items whose game row is not loaded yet; left outstanding, not ledgered.
    pub waiting: u64,
    pub rows_written: u64,
}

impl ProcessSummary {
    fn merge(&mut self, other: &ProcessSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.exhausted += other.exhausted;
        self.parked += other.parked;
        self.cancelled += other.cancelled;
        self.waiting += other.waiting;
        self.rows_written += other.rows_written;
    }

    fn count(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded(report) => {
                self.succeeded += 1;
                self.rows_written += report.written();
            }
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Exhausted => self.exhausted += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
            ItemOutcome::Waiting => self.waiting += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub discovered: u64,
    pub discovery_failures: u64,
    /// Discovery failures whose open record reached the budget.
    pub discovery_exhausted: u64,
    /// Processes skipped for a season because their work could not be selected.
    pub scope_failures: u64,
    pub processes: BTreeMap<&'static str, ProcessSummary>,
    pub total: ProcessSummary,
    pub cancelled: bool,
}

impl RunSummary {
    fn add(&mut self, process: Process, part: &ProcessSummary) {
        self.processes.entry(process.name()).or_default().merge(part);
        self.total.merge(part);
    }

    /// Work that needs a person: exhausted this run, parked from earlier runs,
    /// or never selected because the warehouse failed mid-run.
    pub fn needs_attention(&self) -> u64 {
        self.total.exhausted + self.total.parked + self.discovery_exhausted + self.scope_failures
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.needs_attention() > 0 {
            ExitStatus::Degraded
        } else {
            ExitStatus::Success
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.total;
        write!(
            f,
            "run={} discovered={} discovery_failures={} scope_failures={} succeeded={} failed={} exhausted={} parked={} cancelled={} waiting={} rows_written={}",
            self.run_id,
            self.discovered,
            self.discovery_failures,
            self.scope_failures,
            t.succeeded,
            t.failed,
            t.exhausted,
            t.parked,
            t.cancelled,
            t.waiting,
            t.rows_written
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ItemOutcome {
    Succeeded(LoadReport),
    Failed,
    Exhausted,
    Cancelled,
    Waiting,
}

pub struct Orchestrator {
    warehouse: Arc<dyn Warehouse>,
    fetch: Arc<FetchClient>,
    spine: SpineRegistry,
    loader: Loader,
    ledger: ErrorLedger,
    shutdown: Shutdown,
    workers: usize,
    max_retries: i32,
}

impl Orchestrator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        fetch: Arc<FetchClient>,
        shutdown: Shutdown,
        workers: usize,
        max_retries: i32,
    ) -> Self {
        Self {
            spine: SpineRegistry::new(warehouse.clone(), fetch.clone()),
            loader: Loader::new(warehouse.clone()),
            ledger: ErrorLedger::new(warehouse.clone()),
            warehouse,
            fetch,
            shutdown,
            workers: workers.max(1),
            max_retries,
        }
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    /// Fatal checks before any work starts.
    pub async fn preflight(&self, plan: &RunPlan) -> Result<(), RunError> {
        if plan.seasons.is_empty() {
            return Err(RunError::NoSeasons);
        }
        self.warehouse.ping().await.map_err(RunError::Warehouse)?;
        self.fetch.probe().await.map_err(RunError::StatsApi)?;
        Ok(())
    }

    #[instrument(skip(self, plan), fields(mode = ?plan.mode, seasons = plan.seasons.len()))]
    pub async fn run(&self, plan: &RunPlan) -> Result<RunSummary, RunError> {
        self.preflight(plan).await?;
        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            ..RunSummary::default()
        };
        info!(run_id = %summary.run_id, "run started");

        for &season in &plan.seasons {
            if self.shutdown.is_triggered() {
                break;
            }
            self.discover(season, &mut summary).await;

            for process in Process::ALL {
                if self.shutdown.is_triggered() {
                    break;
                }
                let Some(part) = self.run_process(season, process, plan).await else {
                    summary.scope_failures += 1;
                    continue;
                };
                info!(
                    season = %season,
                    process = %process,
                    succeeded = part.succeeded,
                    failed = part.failed,
                    exhausted = part.exhausted,
                    parked = part.parked,
                    cancelled = part.cancelled,
                    waiting = part.waiting,
                    "process finished"
                );
                summary.add(process, &part);
            }
        }

        summary.cancelled = self.shutdown.is_triggered();
        if summary.cancelled {
            warn!(%summary, "run cancelled");
        } else {
            info!(%summary, "run finished");
        }
        Ok(summary)
    }

    async fn discover(&self, season: Season, summary: &mut RunSummary) {
        let name = Process::discovery_name(season);
        self.count_retry(&name, None).await;
        match self.spine.discover_new(season).await {
            Ok(fresh) => {
                summary.discovered += fresh.len() as u64;
                if let Err(e) = self.ledger.record_success(&name, None).await {
                    error!(process = %name, error = %e, "could not resolve discovery record");
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                summary.discovery_failures += 1;
                warn!(season = %season, kind = %e.kind(), error = %e,
                    "discovery failed; continuing with registered spine");
                match self.ledger.record_failure(&name, None, &e).await {
                    Ok(rec) if rec.retry_count >= self.max_retries => {
                        summary.discovery_exhausted += 1;
                        warn!(season = %season, retry_count = rec.retry_count, "discovery needs manual attention");
                    }
                    Ok(_) => {}
                    Err(le) => error!(process = %name, error = %le, "could not ledger discovery failure"),
                }
            }
        }
    }

    /// Count a re-attempt against the pair's open record, if any.
    async fn count_retry(&self, process_name: &str, game_id: Option<&GameId>) {
        if let Err(e) = self.ledger.begin_retry(process_name, game_id).await {
            error!(process = process_name, game_id = ?game_id.map(GameId::as_str), error = %e, "could not count retry");
        }
    }

    /// Work for one process: outstanding (or all) items minus parked ones, capped.
    async fn scope(
        &self,
        season: Season,
        process: Process,
        plan: &RunPlan,
    ) -> Result<(Vec<WorkItem>, u64), PersistenceError> {
        let items = match plan.mode {
            RunMode::Backfill { reload: true } => self.spine.season_items(season).await?,
            _ => self.spine.outstanding(season, process).await?,
        };
        let parked: HashSet<String> = self
            .ledger
            .list_exhausted(Some(process.name()), self.max_retries)
            .await?
            .into_iter()
            .filter_map(|r| r.game_id)
            .collect();
        let before = items.len();
        let mut runnable: Vec<WorkItem> = items
            .into_iter()
            .filter(|w| !parked.contains(w.game_id.as_str()))
            .collect();
        let parked_here = (before - runnable.len()) as u64;
        if let Some(limit) = plan.limit {
            runnable.truncate(limit);
        }
        Ok((runnable, parked_here))
    }

    async fn run_process(
        &self,
        season: Season,
        process: Process,
        plan: &RunPlan,
    ) -> Option<ProcessSummary> {
        let (items, parked) = match self.scope(season, process, plan).await {
            Ok(scope) => scope,
            Err(e) => {
                error!(season = %season, process = %process, error = %e, "cannot select work; skipping process");
                return None;
            }
        };
        let mut part = ProcessSummary {
            parked,
            ..ProcessSummary::default()
        };
        if parked > 0 {
            warn!(season = %season, process = %process, parked, "items parked for manual attention");
        }
        info!(season = %season, process = %process, items = items.len(), workers = self.workers, "processing");

        let outcomes: Vec<ItemOutcome> = stream::iter(items)
            .map(|item| self.run_item(process, item))
            .buffer_unordered(self.workers)
            .collect()
            .await;
        for o in &outcomes {
            part.count(o);
        }
        Some(part)
    }

    async fn run_item(&self, process: Process, item: WorkItem) -> ItemOutcome {
        if self.shutdown.is_triggered() {
            return ItemOutcome::Cancelled;
        }
        let name = process.name();
        let gid = Some(&item.game_id);

        // Box scores hang off the game row; without it there is nothing to attach them to.
        let teams = match process {
            Process::Games => Ok(None),
            Process::TeamBox | Process::PlayerBox => match self.warehouse.game_teams(&item.game_id).await {
                Ok(Some(teams)) => Ok(Some(teams)),
                Ok(None) => {
                    debug!(process = name, game_id = %item.game_id, "game row not loaded yet; deferring");
                    return ItemOutcome::Waiting;
                }
                Err(e) => Err(StageError::from(e)),
            },
        };

        self.count_retry(name, gid).await;
        let result = match teams {
            Ok(teams) => self.process_item(process, &item, teams).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => {
                info!(
                    process = name,
                    game_id = %item.game_id,
                    inserted = report.inserted,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    "item loaded"
                );
                if let Err(e) = self.ledger.record_success(name, gid).await {
                    error!(process = name, game_id = %item.game_id, error = %e, "could not resolve ledger record");
                }
                ItemOutcome::Succeeded(report)
            }
            Err(e) if e.is_cancelled() => ItemOutcome::Cancelled,
            Err(e) => self.fail(process, &item, e).await,
        }
    }

    async fn fail(&self, process: Process, item: &WorkItem, e: StageError) -> ItemOutcome {
        let name = process.name();
        warn!(
            process = name,
            game_id = %item.game_id,
            stage = %e.stage(),
            kind = %e.kind(),
            error = %e,
            "item failed"
        );
        match self.ledger.record_failure(name, Some(&item.game_id), &e).await {
            Ok(rec) if rec.retry_count >= self.max_retries => ItemOutcome::Exhausted,
            Ok(_) => ItemOutcome::Failed,
            Err(le) => {
                error!(process = name, game_id = %item.game_id, error = %le, "could not ledger failure");
                ItemOutcome::Failed
            }
        }
    }

    async fn process_item(
        &self,
        process: Process,
        item: &WorkItem,
        teams: Option<GameTeams>,
    ) -> Result<LoadReport, StageError> {
        let require_teams = || {
            teams.ok_or_else(|| PersistenceError::Integrity(format!("no fact_games row for {}", item.game_id)))
        };
        let batch = match process {
            Process::Games => {
                let summary = self.fetch.fetch(item, Endpoint::Summary).await?;
                LoadBatch::Game(transform_summary(&summary.payload, item)?)
            }
            Process::TeamBox => {
                let teams = require_teams()?;
                let trad = self.fetch.fetch(item, Endpoint::Traditional).await?;
                let adv = self.fetch.fetch(item, Endpoint::Advanced).await?;
                LoadBatch::TeamBox(transform_teambox(&trad.payload, &adv.payload, item, teams)?)
            }
            Process::PlayerBox => {
                let teams = require_teams()?;
                let trad = self.fetch.fetch(item, Endpoint::Traditional).await?;
                LoadBatch::PlayerBox(transform_playerbox(&trad.payload, item, teams)?)
            }
        };
        Ok(self.loader.load(item, batch).await?)
    }
}
