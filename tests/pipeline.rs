mod common;

use std::time::Duration;

use common::*;
use nba_ingest::database_ops::memory::Fault;
use nba_ingest::database_ops::{SpineRegistry, Warehouse};
use nba_ingest::error::PersistenceError;
use nba_ingest::fetch::{Endpoint, FetchClient, RawFailure};
use nba_ingest::model::Process;
use nba_ingest::{ExitStatus, RunMode, RunPlan};
use std::sync::Arc;

const G1: &str = "0022400001";

#[tokio::test]
async fn transient_failure_then_success_across_runs() {
    let source = ScriptedSource::with_games(&[G1]);
    // Both in-call attempts fail on the first run.
    source.fail(Endpoint::Summary, G1, vec![status(503), status(503)]);
    let h = harness(source, 2, 3);

    let first = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(first.discovered, 1);
    assert_eq!(first.processes["load_games"].failed, 1);
    assert_eq!(first.exit_status(), ExitStatus::Success);
    assert_eq!(h.warehouse.counts().fact_games, 0);

    let second = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(second.discovered, 0);
    assert_eq!(second.processes["load_games"].succeeded, 1);
    assert_eq!(second.processes["load_teambox"].succeeded, 1);
    assert_eq!(second.processes["load_playerbox"].succeeded, 1);

    let counts = h.warehouse.counts();
    assert_eq!(counts.spine, 1);
    assert_eq!(counts.fact_games, 1);
    assert_eq!(counts.teambox, 2);
    assert_eq!(counts.playerbox, 4);

    let errors = h.warehouse.all_errors();
    assert_eq!(errors.len(), 1);
    let rec = &errors[0];
    assert_eq!(rec.process_name, "load_games");
    assert_eq!(rec.game_id.as_deref(), Some(G1));
    assert_eq!(rec.error_type, "TransientFetchError");
    assert_eq!(rec.retry_count, 1);
    assert!(rec.is_resolved);
    assert!(rec.resolved_at.is_some());
}

#[tokio::test]
async fn rate_limit_then_success_leaves_no_open_record() {
    let source = ScriptedSource::with_games(&[G1]);
    source.fail(
        Endpoint::Summary,
        G1,
        vec![RawFailure::Status {
            status: 429,
            retry_after: Some(Duration::from_millis(5)),
            body: "slow down".into(),
        }],
    );
    let h = harness(source.clone(), 3, 3);

    let summary = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(summary.processes["load_games"].succeeded, 1);
    assert_eq!(source.calls(Endpoint::Summary, G1), 2);
    assert!(h.warehouse.all_errors().is_empty());
    assert_eq!(summary.exit_status(), ExitStatus::Success);
}

#[tokio::test]
async fn reloading_identical_data_writes_nothing() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 3);
    let first = h.orchestrator.run(&incremental()).await.unwrap();
    assert!(first.total.rows_written > 0);
    let before = h.warehouse.counts();
    let stamp = h.warehouse.fact_game(&gid(G1)).unwrap().last_updated_at;

    let reload = RunPlan {
        seasons: vec![season()],
        mode: RunMode::Backfill { reload: true },
        limit: None,
    };
    let second = h.orchestrator.run(&reload).await.unwrap();
    assert_eq!(second.total.succeeded, 3);
    assert_eq!(second.total.rows_written, 0);
    assert_eq!(h.warehouse.counts(), before);
    assert_eq!(h.warehouse.fact_game(&gid(G1)).unwrap().last_updated_at, stamp);
}

#[tokio::test]
async fn incremental_run_skips_completed_work() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 3);
    h.orchestrator.run(&incremental()).await.unwrap();
    let again = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(again.total.succeeded, 0);
    assert_eq!(h.source.calls(Endpoint::Summary, G1), 1);
}

#[tokio::test]
async fn missing_primary_key_is_rejected_without_retry() {
    let source = ScriptedSource::with_games(&[G1]);
    let mut payload = summary(G1);
    payload["boxScoreSummary"].as_object_mut().unwrap().remove("gameId");
    source.serve(Endpoint::Summary, G1, payload);
    let h = harness(source.clone(), 3, 3);

    let run = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(run.processes["load_games"].failed, 1);
    assert_eq!(source.calls(Endpoint::Summary, G1), 1);
    // Box scores wait for the game row instead of failing alongside it.
    assert_eq!(run.processes["load_teambox"].waiting, 1);
    assert_eq!(run.processes["load_playerbox"].waiting, 1);

    let errors = h.warehouse.all_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "ValidationFailure");
    assert_eq!(errors[0].retry_count, 0);
    assert!(errors[0].detail.as_deref().unwrap_or("").contains("stage=transform"));
    assert_eq!(h.warehouse.counts().fact_games, 0);
}

#[tokio::test]
async fn persistent_failure_exhausts_then_parks() {
    let source = ScriptedSource::with_games(&[G1]);
    source.fail_always(Endpoint::Summary, G1, status(503));
    let h = harness(source.clone(), 1, 2);

    let r1 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r1.total.failed, 1);
    let r2 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r2.total.failed, 1);
    let r3 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r3.total.exhausted, 1);
    assert_eq!(r3.exit_status(), ExitStatus::Degraded);

    let open = h.warehouse.unresolved_errors(Some("load_games")).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].retry_count, 2);
    assert!(!open[0].is_resolved);

    let calls = source.calls(Endpoint::Summary, G1);
    let r4 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r4.total.parked, 1);
    assert_eq!(r4.exit_status(), ExitStatus::Degraded);
    assert_eq!(source.calls(Endpoint::Summary, G1), calls, "parked items are not fetched");

    let exhausted = h
        .orchestrator
        .ledger()
        .list_exhausted(Some("load_games"), 2)
        .await
        .unwrap();
    assert_eq!(exhausted.len(), 1);
}

#[tokio::test]
async fn one_bad_item_does_not_stop_the_others() {
    let source = ScriptedSource::with_games(&[G1, "0022400002"]);
    source.fail_always(Endpoint::Summary, G1, status(404));
    let h = harness(source, 2, 3);

    let run = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(run.processes["load_games"].succeeded, 1);
    assert_eq!(run.processes["load_games"].failed, 1);
    assert_eq!(run.processes["load_teambox"].succeeded, 1);
    let open = h.warehouse.unresolved_errors(None).await.unwrap();
    assert_eq!(open[0].error_type, "PermanentFetchError");
}

#[tokio::test]
async fn discovery_is_idempotent() {
    let source = ScriptedSource::with_games(&[G1, "0022400002"]);
    let h = harness(source.clone(), 2, 3);
    let fetch = Arc::new(FetchClient::new(
        source,
        fast_policy(2),
        Duration::ZERO,
        h.shutdown.clone(),
    ));
    let spine = SpineRegistry::new(h.warehouse.clone(), fetch);

    let first = spine.discover_new(season()).await.unwrap();
    assert_eq!(first.len(), 2);
    let second = spine.discover_new(season()).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(h.warehouse.counts().spine, 2);
    assert_eq!(spine.outstanding(season(), Process::Games).await.unwrap().len(), 2);
}

#[tokio::test]
async fn discovery_failure_is_ledgered_and_later_resolved() {
    let source = ScriptedSource::with_games(&[G1]);
    source.fail_listing(status(403));
    let h = harness(source, 2, 3);

    let first = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(first.discovery_failures, 1);
    assert_eq!(first.total.succeeded, 0);
    let open = h
        .warehouse
        .unresolved_errors(Some("discover_spine:2024-25"))
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert!(open[0].game_id.is_none());

    let second = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(second.discovered, 1);
    assert!(h.warehouse.unresolved_errors(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_run_starts_nothing_and_ledgers_nothing() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 3);
    h.shutdown.trigger();
    let run = h.orchestrator.run(&incremental()).await.unwrap();
    assert!(run.cancelled);
    assert_eq!(run.total.succeeded, 0);
    assert!(h.warehouse.all_errors().is_empty());
}

#[tokio::test]
async fn limit_caps_items_per_process() {
    let h = harness(ScriptedSource::with_games(&[G1, "0022400002", "0022400003"]), 2, 3);
    let plan = RunPlan {
        seasons: vec![season()],
        mode: RunMode::Backfill { reload: false },
        limit: Some(2),
    };
    let run = h.orchestrator.run(&plan).await.unwrap();
    assert_eq!(run.processes["load_games"].succeeded, 2);
    assert_eq!(h.warehouse.counts().spine, 3);
    assert_eq!(h.warehouse.counts().fact_games, 2);
}

#[tokio::test]
async fn deadlocked_load_is_ledgered_and_recovers() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 3);
    h.warehouse.inject(Fault::Load, PersistenceError::Database {
        code: Some("40P01".into()),
        message: "deadlock detected".into(),
        retryable: true,
    });

    let first = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(first.processes["load_games"].failed, 1);
    let open = h.warehouse.unresolved_errors(Some("load_games")).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].error_type, "PersistenceError");
    assert!(open[0].detail.as_deref().unwrap_or("").contains("stage=load"));

    let second = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(second.processes["load_games"].succeeded, 1);
    assert!(h.warehouse.unresolved_errors(None).await.unwrap().is_empty());
    assert_eq!(h.warehouse.counts().fact_games, 1);
}

#[tokio::test]
async fn discovery_success_for_one_season_leaves_another_open() {
    let source = ScriptedSource::with_games(&[G1]);
    source.fail_listing(status(403));
    let h = harness(source, 2, 3);
    let plan = RunPlan {
        seasons: vec!["2023-24".parse().unwrap(), season()],
        mode: RunMode::Incremental,
        limit: None,
    };

    let run = h.orchestrator.run(&plan).await.unwrap();
    assert_eq!(run.discovery_failures, 1);
    assert_eq!(run.discovered, 1);

    let open = h.warehouse.unresolved_errors(None).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].process_name, "discover_spine:2023-24");
    let resolved: Vec<_> = h.warehouse.all_errors().into_iter().filter(|e| e.is_resolved).collect();
    assert!(resolved.is_empty());
}

#[tokio::test]
async fn repeated_discovery_failures_reach_the_budget() {
    let source = ScriptedSource::with_games(&[G1]);
    for _ in 0..3 {
        source.fail_listing(status(403));
    }
    let h = harness(source, 2, 2);

    let r1 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r1.exit_status(), ExitStatus::Success);
    h.orchestrator.run(&incremental()).await.unwrap();
    let r3 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r3.discovery_exhausted, 1);
    assert_eq!(r3.exit_status(), ExitStatus::Degraded);

    let exhausted = h
        .orchestrator
        .ledger()
        .list_exhausted(Some("discover_spine:2024-25"), 2)
        .await
        .unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].retry_count, 2);

    let r4 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r4.discovered, 1);
    assert!(h.warehouse.unresolved_errors(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_game_lookup_counts_against_the_budget() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 1);
    let unavailable = || PersistenceError::Unavailable("pool timed out".into());

    h.warehouse.inject(Fault::GameTeams, unavailable());
    let r1 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r1.processes["load_games"].succeeded, 1);
    assert_eq!(r1.processes["load_teambox"].failed, 1);

    h.warehouse.inject(Fault::GameTeams, unavailable());
    let r2 = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(r2.processes["load_teambox"].exhausted, 1);
    let open = h.warehouse.unresolved_errors(Some("load_teambox")).await.unwrap();
    assert_eq!(open[0].retry_count, 1);
}

#[tokio::test]
async fn scope_failure_skips_one_process_and_keeps_going() {
    let h = harness(ScriptedSource::with_games(&[G1]), 2, 3);
    h.warehouse.inject(
        Fault::Outstanding(Process::TeamBox),
        PersistenceError::Unavailable("pool timed out".into()),
    );

    let run = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(run.scope_failures, 1);
    assert_eq!(run.processes["load_games"].succeeded, 1);
    assert_eq!(run.processes["load_playerbox"].succeeded, 1);
    assert!(!run.processes.contains_key("load_teambox"));
    assert_eq!(run.exit_status(), ExitStatus::Degraded);
    assert_eq!(h.warehouse.counts().fact_games, 1);

    let next = h.orchestrator.run(&incremental()).await.unwrap();
    assert_eq!(next.processes["load_teambox"].succeeded, 1);
    assert_eq!(next.exit_status(), ExitStatus::Success);
}
