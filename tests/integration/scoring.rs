use chrono::Duration;

use propline::analysis::drift::DriftAnalyzer;
use propline::config::{AppConfig, DriftConfig};
use propline::confidence::ScoreRequest;
use propline::engine::Core;
use propline::ledger::{ObservationStore, TimeWindow};
use propline::streak::registry::MemoryHistory;
use propline::types::{Direction, MarketKey, ReasonTag, RiskLevel, Side};
use std::sync::Arc;

use crate::{history, observation, t0};

fn core() -> Core {
    Core::new(AppConfig::default(), Arc::new(MemoryHistory::new()))
}

fn request(subject: &str, market: &str, side: Side) -> ScoreRequest {
    ScoreRequest {
        key: MarketKey::new(subject, market),
        side,
        as_of: Some(t0() + Duration::hours(1)),
    }
}

#[test]
fn clv_is_closing_minus_opening_probability() {
    let store = ObservationStore::default();
    store
        .record(observation("ohtani", "batter_hits", Side::Over, 0.5, 1.0 / 0.40, 0))
        .unwrap();
    store
        .record(observation("ohtani", "batter_hits", Side::Over, 0.5, 1.0 / 0.46, 30))
        .unwrap();
    let window = store.query(&MarketKey::new("ohtani", "batter_hits"), TimeWindow::all());

    let report = DriftAnalyzer::new(DriftConfig::default()).analyze(&window, Side::Over);
    assert!((report.clv - 0.06).abs() < 1e-9);
    assert_eq!(report.direction, Direction::Rising);
    assert_eq!(report.samples, 2);
}

#[test]
fn rising_positive_clv_raises_score() {
    let core = core();
    for (minutes, p) in [(0, 0.40), (30, 0.46)] {
        core.ingest_observation(observation("ohtani", "batter_hits", Side::Over, 0.5, 1.0 / p, minutes))
            .unwrap();
    }
    let score = core.score(&request("ohtani", "batter_hits", Side::Over));
    assert!((score.clv - 0.06).abs() < 1e-9);
    assert!(score.tags.contains(&ReasonTag::Rising));
    assert!(score.tags.contains(&ReasonTag::ClvPositive));
    assert!(score.score > 0.5);
}

/// Two subjects with identical compound quotes. Only the first has weak
/// components, so only the first is flagged.
#[test]
fn composite_trap_flags_only_weak_decomposition() {
    let core = core();
    for subject in ["weak", "strong"] {
        for minutes in [0, 30] {
            core.ingest_observation(observation(subject, "player_points_rebounds", Side::Over, 29.5, 2.2, minutes))
                .unwrap();
            core.ingest_observation(observation(subject, "player_points", Side::Over, 21.5, 1.9, minutes))
                .unwrap();
            core.ingest_observation(observation(subject, "player_rebounds", Side::Over, 7.5, 1.9, minutes))
                .unwrap();
        }
    }
    history(&core, "weak", "player_points", 2, 4);
    history(&core, "weak", "player_rebounds", 1, 5);
    history(&core, "strong", "player_points", 9, 1);
    history(&core, "strong", "player_rebounds", 8, 2);

    let trapped = core.score(&request("weak", "player_points_rebounds", Side::Over));
    let clean = core.score(&request("strong", "player_points_rebounds", Side::Over));

    assert!(trapped.tags.contains(&ReasonTag::TrapComposite));
    assert!(trapped.has_trap());
    assert_eq!(trapped.risk, RiskLevel::High);
    assert_eq!(trapped.substitute.as_deref(), Some("player_points"));

    assert!(!clean.has_trap());
    assert!(clean.substitute.is_none());
    assert!((clean.score - trapped.score - 0.15).abs() < 1e-9);
}

#[test]
fn scores_stay_in_unit_interval() {
    let core = core();
    // Lopsided two-way pair: over shaded well past the even split
    core.ingest_observation(observation("cold", "batter_hits", Side::Over, 0.5, 1.0 / 0.62, 0))
        .unwrap();
    core.ingest_observation(observation("cold", "batter_hits", Side::Under, 0.5, 1.0 / 0.48, 0))
        .unwrap();
    history(&core, "cold", "batter_hits", 0, 40);
    history(&core, "hot", "batter_hits", 40, 0);
    for (minutes, p) in [(0, 0.40), (30, 0.46)] {
        core.ingest_observation(observation("hot", "batter_hits", Side::Over, 0.5, 1.0 / p, minutes))
            .unwrap();
    }

    let low = core.score(&request("cold", "batter_hits", Side::Over));
    let high = core.score(&request("hot", "batter_hits", Side::Over));
    assert!(low.tags.contains(&ReasonTag::TrapJuice));
    assert!((0.0..=1.0).contains(&low.score));
    assert!((0.0..=1.0).contains(&high.score));
    assert!(high.score > 0.9);
}

#[tokio::test]
async fn batch_scores_keep_request_order() {
    let core = core();
    let subjects = ["a", "b", "c", "d", "e", "f"];
    let requests = subjects
        .iter()
        .map(|s| request(s, "batter_hits", Side::Under))
        .collect();
    let scores = core.score_many(requests).await;
    let got: Vec<&str> = scores.iter().map(|s| s.key.subject_id.as_str()).collect();
    assert_eq!(got, subjects);
}

/// 2.5 hits+runs+RBIs against three 0.5 components hitting 50%. The twin's
/// RBI line is 1.5, so its counts (1 + 1 + 2) no longer make 3.
#[test]
fn composite_trap_penalises_more_than_undecomposable_twin() {
    let core = core();
    let components = [
        ("batter_hits", 0.5, 0.5),
        ("batter_runs_scored", 0.5, 0.5),
        ("batter_rbis", 0.5, 1.5),
    ];
    for minutes in [0, 30] {
        for subject in ["judge", "twin"] {
            core.ingest_observation(observation(subject, "batter_hits_runs_rbis", Side::Over, 2.5, 2.1, minutes))
                .unwrap();
        }
        for (market, judge_line, twin_line) in components {
            core.ingest_observation(observation("judge", market, Side::Over, judge_line, 1.8, minutes))
                .unwrap();
            core.ingest_observation(observation("twin", market, Side::Over, twin_line, 1.8, minutes))
                .unwrap();
        }
    }
    for (market, _, _) in components {
        history(&core, "judge", market, 3, 3);
        history(&core, "twin", market, 3, 3);
    }

    let component = core
        .confidence()
        .score_standalone(&request("judge", "batter_hits", Side::Over));
    assert!((component.score - 0.55).abs() < 1e-9);

    let trapped = core.score(&request("judge", "batter_hits_runs_rbis", Side::Over));
    let twin = core.score(&request("twin", "batter_hits_runs_rbis", Side::Over));
    assert!(trapped.tags.contains(&ReasonTag::TrapComposite));
    assert!(!twin.tags.contains(&ReasonTag::TrapComposite));
    assert!(trapped.score < twin.score);
}
