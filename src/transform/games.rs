use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::ValidationFailure;
use crate::model::{DimTeam, FactGame, GameBundle, WorkItem};
use crate::transform::parse::{field, parse_i64, parse_string};
use crate::transform::{check_game_id, payload_root, team_objects, validate};

/// Box score summary -> `fact_games` row plus both teams' dimension rows.
pub fn transform_summary(payload: &Value, item: &WorkItem) -> Result<GameBundle, ValidationFailure> {
    let root = payload_root(payload, "boxScoreSummary");
    let mut issues = ValidationFailure::new(format!("summary {}", item.game_id));
    check_game_id(root, item, &mut issues);

    let side_id = |id_key: &str, obj_key: &str| {
        parse_i64(field(root, &[id_key]))
            .or_else(|| root.get(obj_key).and_then(|t| parse_i64(t.get("teamId"))))
    };
    let home = side_id("homeTeamId", "homeTeam");
    let away = side_id("awayTeamId", "awayTeam");
    if home.is_none() {
        issues.push("homeTeamId", None, "required");
    }
    if away.is_none() {
        issues.push("awayTeamId", None, "required");
    }

    let game_datetime_utc = parse_string(field(root, &["gameTimeUTC", "gameDateTimeUTC"]))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let game_date = ["gameEt", "gameDateEst", "gameDate"]
        .iter()
        .find_map(|k| parse_string(root.get(*k)).and_then(|s| date_prefix(&s)))
        .or_else(|| game_datetime_utc.map(|dt| dt.date_naive()))
        .or_else(|| parse_string(root.get("gameCode")).and_then(|s| compact_date_prefix(&s)));
    if game_date.is_none() {
        issues.push("game_date", None, "required");
    }

    let (Some(home_team_id), Some(away_team_id), Some(game_date)) = (home, away, game_date) else {
        return Err(issues);
    };

    let arena = root.get("arena").unwrap_or(&Value::Null);
    let game = FactGame {
        game_id: item.game_id.clone(),
        season: item.season,
        game_date,
        game_datetime_utc,
        home_team_id,
        away_team_id,
        game_status: parse_string(field(root, &["gameStatusText", "gameStatus"])),
        arena_name: parse_string(arena.get("arenaName")),
        arena_city: parse_string(arena.get("arenaCity")),
        arena_state: parse_string(arena.get("arenaState")),
    };
    validate::check_game(&game, &mut issues);

    let mut teams = Vec::with_capacity(2);
    for (is_home, obj) in team_objects(root) {
        let expected = if is_home { home_team_id } else { away_team_id };
        let team_id = parse_i64(obj.get("teamId")).unwrap_or(expected);
        if team_id != expected {
            issues.push(
                "teamId",
                Some(team_id.to_string()),
                format!("team object disagrees with game ({expected})"),
            );
            continue;
        }
        teams.push(dim_team(team_id, obj));
    }
    // Teams absent from the payload still need their dimension keys.
    for id in [home_team_id, away_team_id] {
        if !teams.iter().any(|t| t.team_id == id) {
            teams.push(DimTeam {
                team_id: id,
                abbreviation: None,
                team_name: None,
                city: None,
                full_name: None,
            });
        }
    }

    issues.into_result()?;
    Ok(GameBundle { game, teams })
}

fn dim_team(team_id: i64, obj: &Value) -> DimTeam {
    let team_name = parse_string(obj.get("teamName"));
    let city = parse_string(obj.get("teamCity"));
    let full_name = match (&city, &team_name) {
        (Some(c), Some(n)) => Some(format!("{c} {n}")),
        (None, Some(n)) => Some(n.clone()),
        _ => None,
    };
    DimTeam {
        team_id,
        abbreviation: parse_string(field(obj, &["teamTricode", "teamAbbreviation"])),
        team_name,
        city,
        full_name,
    }
}

fn date_prefix(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

// gameCode looks like "20241022/NYKBOS".
fn compact_date_prefix(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..8)?, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameId;
    use serde_json::json;

    fn item() -> WorkItem {
        WorkItem {
            game_id: GameId::parse("0022400001").unwrap(),
            season: "2024-25".parse().unwrap(),
            first_seen: Utc::now(),
        }
    }

    fn summary() -> Value {
        json!({
            "meta": {"version": 1},
            "boxScoreSummary": {
                "gameId": "0022400001",
                "gameCode": "20241022/NYKBOS",
                "gameStatusText": "Final",
                "gameTimeUTC": "2024-10-22T23:30:00Z",
                "gameEt": "2024-10-22T19:30:00Z",
                "homeTeamId": 1610612738,
                "awayTeamId": 1610612752,
                "arena": {"arenaName": "TD Garden", "arenaCity": "Boston", "arenaState": "MA"},
                "homeTeam": {"teamId": 1610612738, "teamCity": "Boston", "teamName": "Celtics", "teamTricode": "BOS"},
                "awayTeam": {"teamId": 1610612752, "teamCity": "New York", "teamName": "Knicks", "teamTricode": "NYK"}
            }
        })
    }

    #[test]
    fn shapes_game_and_teams() {
        let bundle = transform_summary(&summary(), &item()).unwrap();
        assert_eq!(bundle.game.home_team_id, 1610612738);
        assert_eq!(bundle.game.game_date, NaiveDate::from_ymd_opt(2024, 10, 22).unwrap());
        assert_eq!(bundle.game.arena_name.as_deref(), Some("TD Garden"));
        assert_eq!(bundle.game.game_status.as_deref(), Some("Final"));
        assert_eq!(bundle.teams.len(), 2);
        assert_eq!(bundle.teams[0].full_name.as_deref(), Some("Boston Celtics"));
        assert_eq!(bundle.teams[1].abbreviation.as_deref(), Some("NYK"));
    }

    #[test]
    fn missing_home_team_is_rejected() {
        let mut p = summary();
        let root = p["boxScoreSummary"].as_object_mut().unwrap();
        root.remove("homeTeamId");
        root.remove("homeTeam");
        let err = transform_summary(&p, &item()).unwrap_err();
        assert!(err.issues.iter().any(|i| i.field == "homeTeamId"));
    }

    #[test]
    fn missing_game_id_is_rejected() {
        let mut p = summary();
        p["boxScoreSummary"].as_object_mut().unwrap().remove("gameId");
        let err = transform_summary(&p, &item()).unwrap_err();
        assert_eq!(err.issues[0].field, "gameId");
    }

    #[test]
    fn date_falls_back_to_game_code() {
        let mut p = summary();
        let root = p["boxScoreSummary"].as_object_mut().unwrap();
        root.remove("gameEt");
        root.remove("gameTimeUTC");
        let bundle = transform_summary(&p, &item()).unwrap();
        assert_eq!(bundle.game.game_date, NaiveDate::from_ymd_opt(2024, 10, 22).unwrap());
        assert!(bundle.game.game_datetime_utc.is_none());
    }

    #[test]
    fn same_home_and_away_is_rejected() {
        let mut p = summary();
        p["boxScoreSummary"]["awayTeamId"] = json!(1610612738);
        p["boxScoreSummary"]["awayTeam"]["teamId"] = json!(1610612738);
        assert!(transform_summary(&p, &item()).is_err());
    }
}
