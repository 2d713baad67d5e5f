//! Cross-field checks on shaped rows. Each check appends to a
//! [`ValidationFailure`] so one rejection reports every offending field.

use crate::error::ValidationFailure;
use crate::model::{BoxCounts, FactGame};

/// Allowed gap between total rebounds and offensive + defensive (team rebounds).
pub const REBOUND_TOLERANCE: i32 = 5;

pub fn check_game(game: &FactGame, out: &mut ValidationFailure) {
    if game.home_team_id == game.away_team_id {
        out.push(
            "home_team_id",
            Some(game.home_team_id.to_string()),
            "home and away team must differ",
        );
    }
    for (field, id) in [("home_team_id", game.home_team_id), ("away_team_id", game.away_team_id)] {
        if id <= 0 {
            out.push(field, Some(id.to_string()), "team id must be positive");
        }
    }
}

pub fn check_counts(scope: &str, c: &BoxCounts, out: &mut ValidationFailure) {
    let named = [
        ("pts", c.pts),
        ("fgm", c.fgm),
        ("fga", c.fga),
        ("fg3m", c.fg3m),
        ("fg3a", c.fg3a),
        ("ftm", c.ftm),
        ("fta", c.fta),
        ("oreb", c.oreb),
        ("dreb", c.dreb),
        ("reb", c.reb),
        ("ast", c.ast),
        ("stl", c.stl),
        ("blk", c.blk),
        ("tov", c.tov),
        ("pf", c.pf),
    ];
    for (name, value) in named {
        if let Some(n) = value.filter(|n| *n < 0) {
            out.push(&format!("{scope}.{name}"), Some(n.to_string()), "cannot be negative");
        }
    }

    let pairs = [
        ("fgm", c.fgm, "fga", c.fga),
        ("fg3m", c.fg3m, "fg3a", c.fg3a),
        ("ftm", c.ftm, "fta", c.fta),
        ("fg3m", c.fg3m, "fgm", c.fgm),
        ("fg3a", c.fg3a, "fga", c.fga),
    ];
    for (small_name, small, big_name, big) in pairs {
        if let (Some(s), Some(b)) = (small, big) {
            if s > b {
                out.push(
                    &format!("{scope}.{small_name}"),
                    Some(format!("{small_name}={s}, {big_name}={b}")),
                    format!("{small_name} cannot exceed {big_name}"),
                );
            }
        }
    }
}

pub fn check_rebounds(scope: &str, c: &BoxCounts, out: &mut ValidationFailure) {
    if let (Some(reb), Some(oreb), Some(dreb)) = (c.reb, c.oreb, c.dreb) {
        if reb > 0 && (reb - (oreb + dreb)).abs() > REBOUND_TOLERANCE {
            out.push(
                &format!("{scope}.reb"),
                Some(format!("total={reb}, oreb={oreb}, dreb={dreb}")),
                "total rebounds differ from oreb + dreb",
            );
        }
    }
}

pub fn check_fraction(scope: &str, name: &str, value: Option<f64>, out: &mut ValidationFailure) {
    if let Some(f) = value {
        if !(0.0..=1.0).contains(&f) {
            out.push(
                &format!("{scope}.{name}"),
                Some(f.to_string()),
                "percentage must lie in [0, 1]",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn counts() -> BoxCounts {
        BoxCounts {
            pts: Some(112),
            fgm: Some(41),
            fga: Some(88),
            fg3m: Some(12),
            fg3a: Some(35),
            ftm: Some(18),
            fta: Some(22),
            oreb: Some(10),
            dreb: Some(34),
            reb: Some(44),
            ..BoxCounts::default()
        }
    }

    #[test]
    fn consistent_counts_pass() {
        let mut v = ValidationFailure::new("t");
        check_counts("team", &counts(), &mut v);
        check_rebounds("team", &counts(), &mut v);
        assert!(v.is_empty(), "{v}");
    }

    #[test]
    fn made_over_attempted_and_negative_values_fail() {
        let mut c = counts();
        c.ftm = Some(30);
        c.fg3m = Some(50);
        c.stl = Some(-1);
        let mut v = ValidationFailure::new("t");
        check_counts("team", &c, &mut v);
        let fields: Vec<_> = v.issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"team.ftm"));
        assert!(fields.contains(&"team.fg3m"));
        assert!(fields.contains(&"team.stl"));
    }

    #[test]
    fn rebound_tolerance() {
        let mut c = counts();
        c.reb = Some(49);
        let mut v = ValidationFailure::new("t");
        check_rebounds("team", &c, &mut v);
        assert!(v.is_empty());
        c.reb = Some(50);
        check_rebounds("team", &c, &mut v);
        assert_eq!(v.issues.len(), 1);
    }

    #[test]
    fn fractions_outside_unit_interval_fail() {
        let mut v = ValidationFailure::new("t");
        check_fraction("team", "ts_pct", Some(0.61), &mut v);
        check_fraction("team", "ts_pct", None, &mut v);
        assert!(v.is_empty());
        check_fraction("team", "ts_pct", Some(61.0), &mut v);
        assert_eq!(v.issues[0].field, "team.ts_pct");
    }

    #[test]
    fn game_teams_must_differ() {
        let game = FactGame {
            game_id: crate::model::GameId::parse("0022400001").unwrap(),
            season: "2024-25".parse().unwrap(),
            game_date: NaiveDate::from_ymd_opt(2024, 10, 22).unwrap(),
            game_datetime_utc: None,
            home_team_id: 1610612750,
            away_team_id: 1610612750,
            game_status: None,
            arena_name: None,
            arena_city: None,
            arena_state: None,
        };
        let mut v = ValidationFailure::new("g");
        check_game(&game, &mut v);
        assert_eq!(v.issues.len(), 1);
    }
}
