#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nba_ingest::database_ops::MemoryWarehouse;
use nba_ingest::fetch::{Endpoint, FetchClient, RawFailure, RetryPolicy, StatsSource};
use nba_ingest::model::{GameId, Season};
use nba_ingest::shutdown::Shutdown;
use nba_ingest::{Orchestrator, RunMode, RunPlan};
use serde_json::{json, Value};

pub const HOME: i64 = 1610612738;
pub const AWAY: i64 = 1610612752;

pub fn gid(s: &str) -> GameId {
    GameId::parse(s).unwrap()
}

pub fn season() -> Season {
    "2024-25".parse().unwrap()
}

pub fn status(code: u16) -> RawFailure {
    RawFailure::Status {
        status: code,
        retry_after: None,
        body: String::new(),
    }
}

type Key = (Endpoint, GameId);

/// Stats API double: canned payloads per game, with scripted failures in front.
#[derive(Default)]
pub struct ScriptedSource {
    games: Mutex<Vec<GameId>>,
    listing_failures: Mutex<VecDeque<RawFailure>>,
    failures: Mutex<HashMap<Key, VecDeque<RawFailure>>>,
    always: Mutex<HashMap<Key, RawFailure>>,
    overrides: Mutex<HashMap<Key, Value>>,
    calls: Mutex<HashMap<Key, u32>>,
}

impl ScriptedSource {
    pub fn with_games(ids: &[&str]) -> Arc<Self> {
        let s = Self::default();
        *s.games.lock().unwrap() = ids.iter().map(|i| gid(i)).collect();
        Arc::new(s)
    }

    pub fn fail_listing(&self, failure: RawFailure) {
        self.listing_failures.lock().unwrap().push_back(failure);
    }

    /// Queue failures returned before the canned payload.
    pub fn fail(&self, endpoint: Endpoint, game: &str, failures: Vec<RawFailure>) {
        self.failures
            .lock()
            .unwrap()
            .entry((endpoint, gid(game)))
            .or_default()
            .extend(failures);
    }

    pub fn fail_always(&self, endpoint: Endpoint, game: &str, failure: RawFailure) {
        self.always.lock().unwrap().insert((endpoint, gid(game)), failure);
    }

    pub fn serve(&self, endpoint: Endpoint, game: &str, payload: Value) {
        self.overrides.lock().unwrap().insert((endpoint, gid(game)), payload);
    }

    pub fn calls(&self, endpoint: Endpoint, game: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&(endpoint, gid(game)))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl StatsSource for ScriptedSource {
    async fn fetch_listing(&self, _season: Season) -> Result<Value, RawFailure> {
        if let Some(f) = self.listing_failures.lock().unwrap().pop_front() {
            return Err(f);
        }
        let ids: Vec<String> = self.games.lock().unwrap().iter().map(|g| g.to_string()).collect();
        Ok(listing(&ids))
    }

    async fn fetch(&self, endpoint: Endpoint, game_id: &GameId) -> Result<Value, RawFailure> {
        let key = (endpoint, game_id.clone());
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        if let Some(f) = self.always.lock().unwrap().get(&key) {
            return Err(f.clone());
        }
        if let Some(f) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(f);
        }
        if let Some(v) = self.overrides.lock().unwrap().get(&key) {
            return Ok(v.clone());
        }
        let id = game_id.as_str();
        Ok(match endpoint {
            Endpoint::Summary => summary(id),
            Endpoint::Traditional => traditional(id),
            Endpoint::Advanced => advanced(id),
        })
    }
}

pub fn listing(ids: &[String]) -> Value {
    let rows: Vec<Value> = ids
        .iter()
        .flat_map(|id| {
            [
                json!(["22024", HOME, id, "2024-10-22", "W"]),
                json!(["22024", AWAY, id, "2024-10-22", "L"]),
            ]
        })
        .collect();
    json!({"resultSets": [{
        "name": "LeagueGameFinderResults",
        "headers": ["SEASON_ID", "TEAM_ID", "GAME_ID", "GAME_DATE", "WL"],
        "rowSet": rows
    }]})
}

pub fn summary(id: &str) -> Value {
    json!({"boxScoreSummary": {
        "gameId": id,
        "gameCode": "20241022/NYKBOS",
        "gameStatusText": "Final",
        "gameTimeUTC": "2024-10-22T23:30:00Z",
        "gameEt": "2024-10-22T19:30:00Z",
        "homeTeamId": HOME,
        "awayTeamId": AWAY,
        "arena": {"arenaName": "TD Garden", "arenaCity": "Boston", "arenaState": "MA"},
        "homeTeam": {"teamId": HOME, "teamCity": "Boston", "teamName": "Celtics", "teamTricode": "BOS"},
        "awayTeam": {"teamId": AWAY, "teamCity": "New York", "teamName": "Knicks", "teamTricode": "NYK"}
    }})
}

fn team_stats(pts: i64) -> Value {
    json!({"minutes": "240:00", "points": pts, "fieldGoalsMade": 40, "fieldGoalsAttempted": 90,
        "threePointersMade": 12, "threePointersAttempted": 35, "freeThrowsMade": 15,
        "freeThrowsAttempted": 20, "reboundsOffensive": 10, "reboundsDefensive": 34,
        "reboundsTotal": 44, "assists": 25, "steals": 7, "blocks": 5, "turnovers": 12,
        "foulsPersonal": 18})
}

fn player(id: i64, first: &str, last: &str, position: &str) -> Value {
    json!({"personId": id, "firstName": first, "familyName": last, "position": position,
        "statistics": {"minutes": "PT30M00.00S", "points": 20, "fieldGoalsMade": 8,
            "fieldGoalsAttempted": 15, "threePointersMade": 2, "threePointersAttempted": 5,
            "freeThrowsMade": 2, "freeThrowsAttempted": 2, "reboundsTotal": 6, "assists": 4,
            "plusMinusPoints": 5.0}})
}

pub fn traditional(id: &str) -> Value {
    json!({"boxScoreTraditional": {
        "gameId": id,
        "homeTeam": {"teamId": HOME, "statistics": team_stats(107), "players": [
            player(1628369, "Jayson", "Tatum", "F"),
            player(1627759, "Jaylen", "Brown", "G")
        ]},
        "awayTeam": {"teamId": AWAY, "statistics": team_stats(104), "players": [
            player(1628973, "Jalen", "Brunson", "G"),
            player(1626157, "Karl-Anthony", "Towns", "C")
        ]}
    }})
}

pub fn advanced(id: &str) -> Value {
    json!({"boxScoreAdvanced": {
        "gameId": id,
        "homeTeam": {"teamId": HOME, "statistics": {"offensiveRating": 115.2, "defensiveRating": 112.0,
            "netRating": 3.2, "pace": 98.5, "trueShootingPercentage": 0.571}},
        "awayTeam": {"teamId": AWAY, "statistics": {"offensiveRating": 112.0, "defensiveRating": 115.2,
            "netRating": -3.2, "pace": 98.5, "trueShootingPercentage": 0.556}}
    }})
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(20),
        jitter: Duration::ZERO,
        max_total_wait: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub warehouse: Arc<MemoryWarehouse>,
    pub source: Arc<ScriptedSource>,
    pub shutdown: Shutdown,
    pub orchestrator: Orchestrator,
}

pub fn harness(source: Arc<ScriptedSource>, max_attempts: u32, max_retries: i32) -> Harness {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let shutdown = Shutdown::new();
    let fetch = Arc::new(FetchClient::new(
        source.clone(),
        fast_policy(max_attempts),
        Duration::ZERO,
        shutdown.clone(),
    ));
    let orchestrator = Orchestrator::new(warehouse.clone(), fetch, shutdown.clone(), 2, max_retries);
    Harness {
        warehouse,
        source,
        shutdown,
        orchestrator,
    }
}

pub fn incremental() -> RunPlan {
    RunPlan {
        seasons: vec![season()],
        mode: RunMode::Incremental,
        limit: None,
    }
}
