use std::collections::HashSet;

use serde_json::Value;

use crate::error::ValidationFailure;
use crate::model::{DimPlayer, GameTeams, PlayerBoxBundle, PlayerStatRow, WorkItem};
use crate::transform::parse::{field, minutes_played, parse_bool, parse_i32, parse_i64, parse_string};
use crate::transform::{check_game_id, parse_counts, payload_root, stats_block, team_objects, validate};

/// Traditional box score -> `dim_players` seeds and `playerbox_pergame` rows.
///
/// Players without a team are dropped unless they logged minutes, in which
/// case the payload is rejected.
pub fn transform_playerbox(
    traditional: &Value,
    item: &WorkItem,
    teams: GameTeams,
) -> Result<PlayerBoxBundle, ValidationFailure> {
    let root = payload_root(traditional, "boxScoreTraditional");
    let mut issues = ValidationFailure::new(format!("playerbox {}", item.game_id));
    check_game_id(root, item, &mut issues);

    let mut players = Vec::new();
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for (_, team) in team_objects(root) {
        let team_default = parse_i64(team.get("teamId"));
        let Some(list) = team.get("players").and_then(Value::as_array) else {
            continue;
        };
        for p in list {
            let Some(player_id) = parse_i64(field(p, &["personId", "playerId", "PLAYER_ID"])) else {
                issues.push("personId", None, "required");
                continue;
            };
            let scope = format!("player[{player_id}]");
            let stats = stats_block(p);
            let counts = parse_counts(stats);
            let played = minutes_played(counts.minutes.as_deref());

            let Some(team_id) = parse_i64(field(p, &["teamId", "TEAM_ID"])).or(team_default) else {
                if played {
                    issues.push(&format!("{scope}.teamId"), None, "required for a player with minutes");
                }
                continue;
            };
            let Some((is_home, opponent)) = teams.side_of(team_id) else {
                issues.push(
                    &format!("{scope}.teamId"),
                    Some(team_id.to_string()),
                    "team did not play in this game",
                );
                continue;
            };
            if !seen.insert(player_id) {
                issues.push(&scope, None, "duplicate player row");
                continue;
            }

            validate::check_counts(&scope, &counts, &mut issues);

            let first_name = parse_string(field(p, &["firstName"]));
            let last_name = parse_string(field(p, &["familyName", "lastName"]));
            let full_name = match (&first_name, &last_name) {
                (None, None) => parse_string(field(p, &["name", "PLAYER_NAME"])),
                (f, l) => Some(
                    [f.as_deref(), l.as_deref()]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
            };
            let position = parse_string(p.get("position"));
            // V3 only fills `position` for the starting five.
            let starter = parse_bool(p.get("starter"))
                .or_else(|| p.get("position").map(|_| position.is_some()));

            players.push(DimPlayer {
                player_id,
                full_name,
                first_name,
                last_name,
                position: position.clone(),
            });
            rows.push(PlayerStatRow {
                game_id: item.game_id.clone(),
                player_id,
                team_id,
                season: item.season,
                is_home,
                opponent_team_id: Some(opponent),
                starter,
                plus_minus: parse_i32(field(stats, &["plusMinusPoints", "PLUS_MINUS"])),
                counts,
            });
        }
    }
    if rows.is_empty() && issues.is_empty() {
        issues.push("players", None, "no player statistics in payload");
    }

    issues.into_result()?;
    Ok(PlayerBoxBundle {
        game_id: item.game_id.clone(),
        players,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameId;
    use chrono::Utc;
    use serde_json::json;

    const HOME: i64 = 1610612738;
    const AWAY: i64 = 1610612752;

    fn item() -> WorkItem {
        WorkItem {
            game_id: GameId::parse("0022400001").unwrap(),
            season: "2024-25".parse().unwrap(),
            first_seen: Utc::now(),
        }
    }

    fn teams() -> GameTeams {
        GameTeams {
            home_team_id: HOME,
            away_team_id: AWAY,
        }
    }

    fn player(id: i64, first: &str, last: &str, position: &str, minutes: &str, pts: i64) -> Value {
        json!({
            "personId": id, "firstName": first, "familyName": last, "position": position,
            "statistics": {"minutes": minutes, "points": pts, "fieldGoalsMade": 4,
                "fieldGoalsAttempted": 9, "threePointersMade": 1, "threePointersAttempted": 3,
                "freeThrowsMade": 2, "freeThrowsAttempted": 2, "reboundsTotal": 5,
                "assists": 3, "plusMinusPoints": 7.0}
        })
    }

    fn payload() -> Value {
        json!({"boxScoreTraditional": {
            "gameId": "0022400001",
            "homeTeam": {"teamId": HOME, "players": [
                player(1628369, "Jayson", "Tatum", "F", "PT35M12.00S", 11),
                player(1630202, "Payton", "Pritchard", "", "PT20M00.00S", 11)
            ]},
            "awayTeam": {"teamId": AWAY, "players": [
                player(1626157, "Karl-Anthony", "Towns", "C", "PT30M41.00S", 11)
            ]}
        }})
    }

    #[test]
    fn shapes_players_and_rows() {
        let bundle = transform_playerbox(&payload(), &item(), teams()).unwrap();
        assert_eq!(bundle.rows.len(), 3);
        assert_eq!(bundle.players[0].full_name.as_deref(), Some("Jayson Tatum"));
        assert_eq!(bundle.rows[0].starter, Some(true));
        assert_eq!(bundle.rows[1].starter, Some(false));
        assert!(!bundle.rows[2].is_home);
        assert_eq!(bundle.rows[2].opponent_team_id, Some(HOME));
        assert_eq!(bundle.rows[0].plus_minus, Some(7));
    }

    #[test]
    fn missing_person_id_is_rejected() {
        let mut p = payload();
        p["boxScoreTraditional"]["homeTeam"]["players"][0]
            .as_object_mut()
            .unwrap()
            .remove("personId");
        let err = transform_playerbox(&p, &item(), teams()).unwrap_err();
        assert_eq!(err.issues[0].field, "personId");
    }

    #[test]
    fn teamless_player_with_minutes_is_rejected_without_minutes_skipped() {
        let dnp = json!({"personId": 1, "statistics": {"minutes": ""}});
        let played = json!({"personId": 2, "statistics": {"minutes": "PT05M00.00S"}});
        let mut p = json!({"boxScoreTraditional": {"gameId": "0022400001",
            "homeTeam": {"players": [dnp.clone()]},
            "awayTeam": {"teamId": AWAY, "players": [player(3, "A", "B", "", "PT1M00.00S", 0)]}}});
        let bundle = transform_playerbox(&p, &item(), teams()).unwrap();
        assert_eq!(bundle.rows.len(), 1);

        p["boxScoreTraditional"]["homeTeam"]["players"] = json!([dnp, played]);
        let err = transform_playerbox(&p, &item(), teams()).unwrap_err();
        assert_eq!(err.issues[0].field, "player[2].teamId");
    }

    #[test]
    fn empty_payload_is_rejected() {
        let p = json!({"boxScoreTraditional": {"gameId": "0022400001"}});
        assert!(transform_playerbox(&p, &item(), teams()).is_err());
    }
}
