//! Domain types shared by every stage: identifiers, seasons, work items,
//! warehouse rows and ledger records.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A stats-API game identifier: exactly ten ASCII digits (`0022400001`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    pub const LEN: usize = 10;

    pub fn parse(raw: &str) -> Option<Self> {
        let t = raw.trim();
        (t.len() == Self::LEN && t.bytes().all(|b| b.is_ascii_digit())).then(|| Self(t.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GameId {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        GameId::parse(&value).ok_or_else(|| format!("invalid game id {value:?}"))
    }
}

impl From<GameId> for String {
    fn from(value: GameId) -> Self {
        value.0
    }
}

/// Season label `YYYY-YY`, e.g. `2024-25`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Season {
    start_year: i32,
}

impl Season {
    /// First season of the league's recorded history.
    pub const FIRST_YEAR: i32 = 1946;

    pub fn from_start_year(start_year: i32) -> Result<Self, ConfigError> {
        if !(Self::FIRST_YEAR..=9998).contains(&start_year) {
            return Err(ConfigError::InvalidSeason(format!(
                "{start_year} is outside {}..",
                Self::FIRST_YEAR
            )));
        }
        Ok(Self { start_year })
    }

    /// Season in progress on `today`: October starts a new season.
    pub fn current(today: NaiveDate) -> Self {
        let start_year = if today.month() >= 10 {
            today.year()
        } else {
            today.year() - 1
        };
        Self { start_year }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start_year, (self.start_year + 1) % 100)
    }
}

impl FromStr for Season {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let invalid = || ConfigError::InvalidSeason(format!("{t:?} is not YYYY-YY"));
        let (y1, y2) = t.split_once('-').ok_or_else(invalid)?;
        if y1.len() != 4 || y2.len() != 2 {
            return Err(invalid());
        }
        let start: i32 = y1.parse().map_err(|_| invalid())?;
        let end: i32 = y2.parse().map_err(|_| invalid())?;
        if end != (start + 1) % 100 {
            return Err(ConfigError::InvalidSeason(format!(
                "{t:?}: second year must follow {start}"
            )));
        }
        Season::from_start_year(start)
    }
}

/// One game registered in the spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub game_id: GameId,
    pub season: Season,
    pub first_seen: DateTime<Utc>,
}

/// The per-game load passes. Each owns one set of fact rows and its own ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Process {
    Games,
    TeamBox,
    PlayerBox,
}

impl Process {
    /// Run order; box scores need the game row first.
    pub const ALL: [Process; 3] = [Process::Games, Process::TeamBox, Process::PlayerBox];

    /// Prefix of the ledger `process_name` for spine discovery failures.
    pub const DISCOVERY: &'static str = "discover_spine";

    /// Ledger `process_name` for one season's discovery, e.g. `discover_spine:2024-25`.
    pub fn discovery_name(season: Season) -> String {
        format!("{}:{}", Self::DISCOVERY, season.label())
    }

    pub fn is_discovery_name(name: &str) -> bool {
        name.strip_prefix(Self::DISCOVERY)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|label| label.parse::<Season>().is_ok())
    }

    pub fn name(self) -> &'static str {
        match self {
            Process::Games => "load_games",
            Process::TeamBox => "load_teambox",
            Process::PlayerBox => "load_playerbox",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Process::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimTeam {
    pub team_id: i64,
    pub abbreviation: Option<String>,
    pub team_name: Option<String>,
    pub city: Option<String>,
    pub full_name: Option<String>,
}

impl DimTeam {
    /// Null attributes keep whatever value is already known.
    pub fn merged_over(&self, existing: &DimTeam) -> DimTeam {
        DimTeam {
            team_id: self.team_id,
            abbreviation: self.abbreviation.clone().or_else(|| existing.abbreviation.clone()),
            team_name: self.team_name.clone().or_else(|| existing.team_name.clone()),
            city: self.city.clone().or_else(|| existing.city.clone()),
            full_name: self.full_name.clone().or_else(|| existing.full_name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimPlayer {
    pub player_id: i64,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
}

impl DimPlayer {
    pub fn merged_over(&self, existing: &DimPlayer) -> DimPlayer {
        DimPlayer {
            player_id: self.player_id,
            full_name: self.full_name.clone().or_else(|| existing.full_name.clone()),
            first_name: self.first_name.clone().or_else(|| existing.first_name.clone()),
            last_name: self.last_name.clone().or_else(|| existing.last_name.clone()),
            position: self.position.clone().or_else(|| existing.position.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactGame {
    pub game_id: GameId,
    pub season: Season,
    pub game_date: NaiveDate,
    pub game_datetime_utc: Option<DateTime<Utc>>,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub game_status: Option<String>,
    pub arena_name: Option<String>,
    pub arena_city: Option<String>,
    pub arena_state: Option<String>,
}

/// Home/away pairing of a loaded game, used by the box-score passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameTeams {
    pub home_team_id: i64,
    pub away_team_id: i64,
}

impl GameTeams {
    pub fn side_of(&self, team_id: i64) -> Option<(bool, i64)> {
        if team_id == self.home_team_id {
            Some((true, self.away_team_id))
        } else if team_id == self.away_team_id {
            Some((false, self.home_team_id))
        } else {
            None
        }
    }
}

/// Counting stats shared by team and player box rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoxCounts {
    pub minutes: Option<String>,
    pub pts: Option<i32>,
    pub fgm: Option<i32>,
    pub fga: Option<i32>,
    pub fg3m: Option<i32>,
    pub fg3a: Option<i32>,
    pub ftm: Option<i32>,
    pub fta: Option<i32>,
    pub oreb: Option<i32>,
    pub dreb: Option<i32>,
    pub reb: Option<i32>,
    pub ast: Option<i32>,
    pub stl: Option<i32>,
    pub blk: Option<i32>,
    pub tov: Option<i32>,
    pub pf: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamStatRow {
    pub game_id: GameId,
    pub team_id: i64,
    pub season: Season,
    pub is_home: bool,
    pub opponent_team_id: Option<i64>,
    pub counts: BoxCounts,
    pub off_rating: Option<f64>,
    pub def_rating: Option<f64>,
    pub net_rating: Option<f64>,
    pub pace: Option<f64>,
    pub ts_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatRow {
    pub game_id: GameId,
    pub player_id: i64,
    pub team_id: i64,
    pub season: Season,
    pub is_home: bool,
    pub opponent_team_id: Option<i64>,
    pub starter: Option<bool>,
    pub counts: BoxCounts,
    pub plus_minus: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameBundle {
    pub game: FactGame,
    pub teams: Vec<DimTeam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamBoxBundle {
    pub game_id: GameId,
    pub rows: Vec<TeamStatRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBoxBundle {
    pub game_id: GameId,
    pub players: Vec<DimPlayer>,
    pub rows: Vec<PlayerStatRow>,
}

/// Everything one WorkItem writes for one process, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadBatch {
    Game(GameBundle),
    TeamBox(TeamBoxBundle),
    PlayerBox(PlayerBoxBundle),
}

impl LoadBatch {
    pub fn game_id(&self) -> &GameId {
        match self {
            LoadBatch::Game(b) => &b.game.game_id,
            LoadBatch::TeamBox(b) => &b.game_id,
            LoadBatch::PlayerBox(b) => &b.game_id,
        }
    }

    pub fn process(&self) -> Process {
        match self {
            LoadBatch::Game(_) => Process::Games,
            LoadBatch::TeamBox(_) => Process::TeamBox,
            LoadBatch::PlayerBox(_) => Process::PlayerBox,
        }
    }
}

/// Row counts from one load transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl LoadReport {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn add(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// One row of `nba.etl_errors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: i64,
    pub process_name: String,
    pub game_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub detail: Option<String>,
    pub retry_count: i32,
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A failure about to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFailure {
    pub process_name: String,
    pub game_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub detail: Option<String>,
}
