use propline::streak::{LaneStatus, LegOutcome, LegResult};
use propline::types::PropLineError;

use crate::{core_with_picks, lane};

#[tokio::test]
async fn three_wins_then_loss_busts_and_records_pre_reset_totals() {
    let (core, history) = core_with_picks(12);
    let registry = core.lanes();
    let mut snap = registry.create(lane(11)).await.unwrap();
    assert_eq!(snap.status, LaneStatus::Pending);
    assert_eq!(snap.version, 1);

    for leg in 0..3 {
        snap = registry
            .resolve_leg("safe-1", snap.version, leg, LegOutcome::Win)
            .await
            .unwrap();
        assert_eq!(snap.status, LaneStatus::InProgress);
        assert_eq!(snap.current_leg, leg + 1);
    }
    // 1.5 × 1.575 × 1.65
    let expected = 1.5 * 1.575 * 1.65;
    assert!((snap.total_multiplier - expected).abs() < 1e-9);
    assert_eq!(snap.status_line.chars().filter(|c| *c == '✅').count(), 3);

    let busted = registry
        .resolve_leg("safe-1", snap.version, 3, LegOutcome::Loss)
        .await
        .unwrap();
    assert_eq!(busted.status, LaneStatus::Busted);
    assert_eq!(busted.current_leg, 0);
    assert!((busted.total_multiplier - 1.0).abs() < 1e-12);
    assert!(busted.next_pick.is_none());

    let records = history.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, LaneStatus::Busted);
    assert_eq!(record.legs_won, 3);
    assert!((record.total_multiplier - expected).abs() < 1e-9);
    assert_eq!(record.legs.len(), 4);
    assert_eq!(record.legs[3].result, LegResult::Loss);
    assert!(record.payout.is_none());

    // Terminal lanes accept nothing further
    let err = registry
        .resolve_leg("safe-1", busted.version, 0, LegOutcome::Win)
        .await
        .unwrap_err();
    assert!(matches!(err, PropLineError::LaneClosed(_)));

    let fresh = registry.reinitialize("safe-1").await.unwrap();
    assert_eq!(fresh.status, LaneStatus::Pending);
    assert_eq!(fresh.version, busted.version + 1);
    assert_ne!(fresh.instance_id, busted.instance_id);
    assert_eq!(fresh.stats.legs_won, 3);
    assert_eq!(fresh.stats.busts, 1);
}

/// Race two identical resolutions of leg 0 against one version.
async fn race(max_legs: u32, outcome: LegOutcome) -> (usize, usize, LaneStatus) {
    let (core, _) = core_with_picks(4);
    let registry = core.lanes();
    let snap = registry.create(lane(max_legs)).await.unwrap();

    let (a, b) = tokio::join!(
        registry.resolve_leg("safe-1", snap.version, 0, outcome),
        registry.resolve_leg("safe-1", snap.version, 0, outcome),
    );
    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(PropLineError::Conflict { .. })))
        .count();
    let status = registry.snapshot("safe-1").await.unwrap().status;
    (ok, conflicts, status)
}

#[tokio::test]
async fn concurrent_resolves_on_one_version_admit_exactly_one() {
    assert_eq!(race(5, LegOutcome::Win).await, (1, 1, LaneStatus::InProgress));
}

#[tokio::test]
async fn concurrent_losses_bust_once_and_conflict_once() {
    assert_eq!(race(5, LegOutcome::Loss).await, (1, 1, LaneStatus::Busted));
}

#[tokio::test]
async fn concurrent_final_leg_wins_complete_once_and_conflict_once() {
    assert_eq!(race(1, LegOutcome::Win).await, (1, 1, LaneStatus::Completed));
}

#[tokio::test]
async fn final_win_completes_with_payout() {
    let (core, history) = core_with_picks(3);
    let registry = core.lanes();
    let mut snap = registry.create(lane(2)).await.unwrap();
    for leg in 0..2 {
        snap = registry
            .resolve_leg("safe-1", snap.version, leg, LegOutcome::Win)
            .await
            .unwrap();
    }
    assert_eq!(snap.status, LaneStatus::Completed);
    // $1 × 1.5 × 1.575 = 2.3625 → 2.36
    let record = &history.records()[0];
    assert_eq!(record.status, LaneStatus::Completed);
    let payout = record.payout.unwrap();
    assert!(payout >= rust_decimal_macros::dec!(2.36) && payout <= rust_decimal_macros::dec!(2.37));
}

#[tokio::test]
async fn unknown_lane_is_not_found() {
    let (core, _) = core_with_picks(1);
    let err = core.lanes().snapshot("nope").await.unwrap_err();
    assert!(matches!(err, PropLineError::LaneNotFound(id) if id == "nope"));
}
