use serde_json::Value;

use crate::error::ValidationFailure;
use crate::model::{GameTeams, TeamBoxBundle, TeamStatRow, WorkItem};
use crate::transform::parse::{field, parse_f64, parse_i64};
use crate::transform::{check_game_id, parse_counts, payload_root, stats_block, team_objects, validate};

/// Traditional + advanced box scores -> one `teambox_pergame` row per side.
pub fn transform_teambox(
    traditional: &Value,
    advanced: &Value,
    item: &WorkItem,
    teams: GameTeams,
) -> Result<TeamBoxBundle, ValidationFailure> {
    let trad = payload_root(traditional, "boxScoreTraditional");
    let adv = payload_root(advanced, "boxScoreAdvanced");
    let mut issues = ValidationFailure::new(format!("teambox {}", item.game_id));
    check_game_id(trad, item, &mut issues);
    check_game_id(adv, item, &mut issues);

    let adv_sides = team_objects(adv);
    let mut rows = Vec::with_capacity(2);
    for (is_home, obj) in team_objects(trad) {
        let Some(team_id) = parse_i64(obj.get("teamId")) else {
            issues.push("teamId", None, format!("required ({} side)", side(is_home)));
            continue;
        };
        match teams.side_of(team_id) {
            Some((home, _)) if home == is_home => {}
            _ => {
                issues.push(
                    "teamId",
                    Some(team_id.to_string()),
                    format!("not the {} team of this game", side(is_home)),
                );
                continue;
            }
        }

        let counts = parse_counts(stats_block(obj));
        let scope = format!("team[{team_id}]");
        validate::check_counts(&scope, &counts, &mut issues);
        validate::check_rebounds(&scope, &counts, &mut issues);

        let adv_stats = adv_sides
            .iter()
            .find(|(_, t)| parse_i64(t.get("teamId")) == Some(team_id))
            .or_else(|| adv_sides.iter().find(|(h, _)| *h == is_home))
            .map(|(_, t)| stats_block(t))
            .unwrap_or(&Value::Null);
        let float = |keys: &[&str]| parse_f64(field(adv_stats, keys));
        let ts_pct = float(&["trueShootingPercentage", "TS_PCT"]);
        validate::check_fraction(&scope, "ts_pct", ts_pct, &mut issues);

        rows.push(TeamStatRow {
            game_id: item.game_id.clone(),
            team_id,
            season: item.season,
            is_home,
            opponent_team_id: Some(if is_home {
                teams.away_team_id
            } else {
                teams.home_team_id
            }),
            counts,
            off_rating: float(&["offensiveRating", "OFF_RATING"]),
            def_rating: float(&["defensiveRating", "DEF_RATING"]),
            net_rating: float(&["netRating", "NET_RATING"]),
            pace: float(&["pace", "PACE"]),
            ts_pct,
        });
    }
    if rows.is_empty() && issues.is_empty() {
        issues.push("homeTeam", None, "no team statistics in payload");
    }

    issues.into_result()?;
    Ok(TeamBoxBundle {
        game_id: item.game_id.clone(),
        rows,
    })
}

fn side(is_home: bool) -> &'static str {
    if is_home {
        "home"
    } else {
        "away"
    }
}
