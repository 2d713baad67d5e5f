use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::error::ValidationFailure;
use crate::model::{GameId, Season};

const RESULT_SET: &str = "LeagueGameFinderResults";

/// Completed game ids from a season listing, de-duplicated in listing order.
///
/// The listing has one row per team per game; rows without a win/loss result
/// (games not yet played) are skipped, as are malformed identifiers.
pub fn parse_listing(payload: &Value, season: Season) -> Result<Vec<GameId>, ValidationFailure> {
    let subject = format!("listing {season}");
    let set = result_set(payload)
        .ok_or_else(|| ValidationFailure::single(&subject, "resultSets", "no result set"))?;

    let headers: Vec<&str> = set
        .get("headers")
        .and_then(Value::as_array)
        .map(|h| h.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let game_col = col("GAME_ID")
        .ok_or_else(|| ValidationFailure::single(&subject, "headers", "GAME_ID column missing"))?;
    let wl_col = col("WL");

    let rows = set
        .get("rowSet")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationFailure::single(&subject, "rowSet", "missing"))?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut malformed = 0usize;
    for row in rows {
        let Some(cells) = row.as_array() else {
            malformed += 1;
            continue;
        };
        if let Some(i) = wl_col {
            let played = cells
                .get(i)
                .and_then(Value::as_str)
                .is_some_and(|wl| !wl.trim().is_empty());
            if !played {
                continue;
            }
        }
        let raw = match cells.get(game_col) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(u) => format!("{u:010}"),
                None => {
                    malformed += 1;
                    continue;
                }
            },
            _ => {
                malformed += 1;
                continue;
            }
        };
        match GameId::parse(&raw) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => malformed += 1,
        }
    }
    if malformed > 0 {
        warn!(season = %season, malformed, "skipped listing rows without a valid game id");
    }
    Ok(ids)
}

fn result_set(payload: &Value) -> Option<&Value> {
    if let Some(sets) = payload.get("resultSets").and_then(Value::as_array) {
        return sets
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some(RESULT_SET))
            .or_else(|| sets.first());
    }
    payload.get("resultSet").filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn season() -> Season {
        "2024-25".parse().unwrap()
    }

    #[test]
    fn dedupes_and_skips_unplayed_games() {
        let payload = json!({
            "resultSets": [{
                "name": "LeagueGameFinderResults",
                "headers": ["SEASON_ID", "TEAM_ID", "GAME_ID", "GAME_DATE", "WL"],
                "rowSet": [
                    ["22024", 1610612750, "0022400001", "2024-10-22", "W"],
                    ["22024", 1610612747, "0022400001", "2024-10-22", "L"],
                    ["22024", 1610612750, "0022400002", "2024-10-24", "L"],
                    ["22024", 1610612750, "0022400900", "2025-04-13", null],
                    ["22024", 1610612750, "bogus", "2025-04-13", "W"]
                ]
            }]
        });
        let ids = parse_listing(&payload, season()).unwrap();
        let ids: Vec<&str> = ids.iter().map(GameId::as_str).collect();
        assert_eq!(ids, vec!["0022400001", "0022400002"]);
    }

    #[test]
    fn numeric_ids_are_zero_padded() {
        let payload = json!({
            "resultSets": [{"name": "LeagueGameFinderResults", "headers": ["GAME_ID"], "rowSet": [[22400001]]}]
        });
        let ids = parse_listing(&payload, season()).unwrap();
        assert_eq!(ids[0].as_str(), "0022400001");
    }

    #[test]
    fn missing_game_id_column_is_rejected() {
        let payload = json!({"resultSets": [{"headers": ["TEAM_ID"], "rowSet": []}]});
        let err = parse_listing(&payload, season()).unwrap_err();
        assert_eq!(err.issues[0].field, "headers");
    }
}
