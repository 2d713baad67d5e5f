//! Raw payload -> typed, validated rows.

pub mod games;
pub mod listing;
pub mod parse;
pub mod playerbox;
pub mod teambox;
pub mod validate;

pub use games::transform_summary;
pub use listing::parse_listing;
pub use playerbox::transform_playerbox;
pub use teambox::transform_teambox;

use serde_json::Value;

use crate::error::ValidationFailure;
use crate::model::{BoxCounts, WorkItem};
use parse::{field, parse_i32, parse_string};

/// Body of a V3 box score, wherever the payload nests it.
pub(crate) fn payload_root<'a>(payload: &'a Value, base: &str) -> &'a Value {
    let candidates = [
        base.to_string(),
        format!("{base}V3"),
        format!("{base}v3"),
    ];
    candidates
        .iter()
        .filter_map(|k| payload.get(k.as_str()))
        .find(|v| v.is_object())
        .unwrap_or(payload)
}

/// `(is_home, team object)` for both sides present in the payload.
pub(crate) fn team_objects(root: &Value) -> Vec<(bool, &Value)> {
    [(true, "homeTeam"), (false, "awayTeam")]
        .into_iter()
        .filter_map(|(is_home, key)| root.get(key).filter(|v| v.is_object()).map(|v| (is_home, v)))
        .collect()
}

/// Per-side statistics block; V3 nests it under `statistics`.
pub(crate) fn stats_block(obj: &Value) -> &Value {
    obj.get("statistics").filter(|v| v.is_object()).unwrap_or(obj)
}

/// The payload's own game id must be present and match the WorkItem.
pub(crate) fn check_game_id(root: &Value, item: &WorkItem, out: &mut ValidationFailure) {
    match parse_string(field(root, &["gameId", "GAME_ID", "game_id"])) {
        None => out.push("gameId", None, "required"),
        Some(id) if id != item.game_id.as_str() => {
            out.push("gameId", Some(id), format!("does not match {}", item.game_id))
        }
        Some(_) => {}
    }
}

pub(crate) fn parse_counts(stats: &Value) -> BoxCounts {
    let int = |keys: &[&str]| parse_i32(field(stats, keys));
    BoxCounts {
        minutes: parse_string(field(stats, &["minutes", "MIN"])),
        pts: int(&["points", "PTS"]),
        fgm: int(&["fieldGoalsMade", "FGM"]),
        fga: int(&["fieldGoalsAttempted", "FGA"]),
        fg3m: int(&["threePointersMade", "FG3M"]),
        fg3a: int(&["threePointersAttempted", "FG3A"]),
        ftm: int(&["freeThrowsMade", "FTM"]),
        fta: int(&["freeThrowsAttempted", "FTA"]),
        oreb: int(&["reboundsOffensive", "OREB"]),
        dreb: int(&["reboundsDefensive", "DREB"]),
        reb: int(&["reboundsTotal", "REB"]),
        ast: int(&["assists", "AST"]),
        stl: int(&["steals", "STL"]),
        blk: int(&["blocks", "BLK"]),
        tov: int(&["turnovers", "TO", "TOV"]),
        pf: int(&["foulsPersonal", "PF"]),
    }
}
