use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use nba_ingest::database_ops::{ErrorLedger, MemoryWarehouse, PgWarehouse, Warehouse};
use nba_ingest::fetch::{FetchClient, NbaStatsClient};
use nba_ingest::model::{Process, Season};
use nba_ingest::shutdown::Shutdown;
use nba_ingest::util::{db::Db, env as env_util};
use nba_ingest::{ExitStatus, IngestConfig, Orchestrator, Overrides, RunMode, RunPlan};
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nba-ingest", version, about = "Incremental NBA box-score ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover new games for the current (or given) season and load outstanding work
    Incremental {
        /// Season label, e.g. 2024-25. Defaults to NBA_SEASON, then the season in progress.
        #[arg(long)]
        season: Option<Season>,
        /// Write to an in-memory warehouse instead of PostgreSQL
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Load one or more historical seasons
    Backfill {
        #[arg(required = true)]
        seasons: Vec<Season>,
        /// Seconds between outbound requests (overrides ETL_SLEEP_SECONDS)
        #[arg(long)]
        sleep: Option<f64>,
        /// Process at most N items per season and process
        #[arg(long)]
        limit: Option<usize>,
        /// Re-load every registered game, not only outstanding ones
        #[arg(long, action = ArgAction::SetTrue)]
        reload: bool,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Print the error ledger summary and records needing manual attention
    Errors {
        /// Restrict to one process (load_games, load_teambox, load_playerbox, discover_spine:SEASON)
        #[arg(long)]
        process: Option<String>,
    },
    /// Apply pending SQL migrations
    Migrate,
}

#[derive(Debug, Default, Args)]
struct CommonArgs {
    /// Attempts per outbound call
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
    #[arg(long, global = true)]
    backoff_base_ms: Option<u64>,
    #[arg(long, global = true)]
    backoff_cap_ms: Option<u64>,
    /// Concurrent items per process
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Ledger re-attempt budget before an item is parked
    #[arg(long, global = true)]
    max_retries: Option<i32>,
    /// Cancel the run after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

impl CommonArgs {
    fn overrides(&self, sleep_seconds: Option<f64>) -> Overrides {
        Overrides {
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms,
            workers: self.workers,
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
            sleep_seconds,
        }
    }
}

async fn connect(config: &IngestConfig) -> Result<Db> {
    let url = env_util::db_url().context("no database URL configured")?;
    Db::connect(&url, config.db_max_conns)
        .await
        .context("failed to connect to the warehouse")
}

async fn execute(config: &IngestConfig, plan: RunPlan, dry_run: bool) -> Result<ExitStatus> {
    let shutdown = Shutdown::new();
    shutdown.spawn_watchers(config.run_timeout);

    let warehouse: Arc<dyn Warehouse> = if dry_run {
        warn!("dry run: writes go to an in-memory warehouse");
        Arc::new(MemoryWarehouse::new())
    } else {
        Arc::new(PgWarehouse::new(connect(config).await?))
    };
    let source = NbaStatsClient::new(&config.stats_base_url, config.stats_timeout)
        .context("failed to build stats API client")?;
    let fetch = Arc::new(FetchClient::new(
        Arc::new(source),
        config.retry.clone(),
        config.throttle,
        shutdown.clone(),
    ));
    let orchestrator = Orchestrator::new(
        warehouse,
        fetch,
        shutdown,
        config.workers,
        config.max_retries,
    );

    let summary = orchestrator.run(&plan).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    let status = summary.exit_status();
    if status == ExitStatus::Degraded {
        warn!(
            attention = summary.needs_attention(),
            "some items need manual attention; see `nba-ingest errors`"
        );
    }
    Ok(status)
}

async fn show_errors(config: &IngestConfig, process: Option<String>) -> Result<ExitStatus> {
    if let Some(p) = process.as_deref() {
        if Process::from_name(p).is_none() && !Process::is_discovery_name(p) {
            bail!("unknown process {p:?}");
        }
    }
    let warehouse = Arc::new(PgWarehouse::new(connect(config).await?));
    let ledger = ErrorLedger::new(warehouse);
    let summary = ledger.summary().await?;
    let retryable = ledger
        .list_retryable(process.as_deref(), config.max_retries)
        .await?;
    let exhausted = ledger
        .list_exhausted(process.as_deref(), config.max_retries)
        .await?;
    let report = json!({
        "summary": summary,
        "max_retries": config.max_retries,
        "retryable": retryable.len(),
        "manual_attention": exhausted,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitStatus::Success)
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    let sleep = match &cli.command {
        Command::Backfill { sleep, .. } => *sleep,
        _ => None,
    };
    let config = IngestConfig::from_env()
        .and_then(|c| c.apply(&cli.common.overrides(sleep)))
        .context("invalid configuration")?;
    config.log_snapshot()?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Incremental { season, dry_run } => {
            let plan = RunPlan {
                seasons: config.seasons(season.as_slice(), today),
                mode: RunMode::Incremental,
                limit: None,
            };
            execute(&config, plan, dry_run).await
        }
        Command::Backfill {
            seasons,
            limit,
            reload,
            dry_run,
            ..
        } => {
            let plan = RunPlan {
                seasons: config.seasons(&seasons, today),
                mode: RunMode::Backfill { reload },
                limit,
            };
            execute(&config, plan, dry_run).await
        }
        Command::Errors { process } => show_errors(&config, process).await,
        Command::Migrate => {
            let db = Db::connect_no_migrate(&env_util::db_url()?, config.db_max_conns).await?;
            let applied = db.run_migrations(Path::new("./migrations")).await?;
            info!(applied = ?applied, "migrations complete");
            Ok(ExitStatus::Success)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = nba_ingest::tracing::bootstrap_cli("nba-ingest") {
        eprintln!("{e:#}");
        return ExitCode::from(ExitStatus::Fatal.code());
    }
    let cli = Cli::parse();
    match run(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            error!(error = ?e, "fatal");
            ExitCode::from(ExitStatus::Fatal.code())
        }
    }
}
