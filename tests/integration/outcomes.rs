use chrono::NaiveDate;

use propline::ledger::outcomes::OutcomeStatus;
use propline::streak::LaneStatus;
use propline::types::{MarketKey, Outcome, OutcomeResult};

use crate::{core_with_picks, lane};

fn outcome(subject: &str, value: f64) -> Outcome {
    Outcome {
        subject_id: subject.into(),
        market: "batter_total_bases".into(),
        date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
        realized_value: value,
        result: if value > 1.5 { OutcomeResult::Win } else { OutcomeResult::Loss },
    }
}

#[tokio::test]
async fn duplicate_outcome_changes_nothing() {
    let (core, history) = core_with_picks(4);
    core.ensure_lanes(&[lane(5)]).await;
    let first = core.lanes().snapshot("safe-1").await.unwrap();
    let subject = first.next_pick.as_ref().unwrap().pick.subject_id.clone();

    let report = core.apply_outcome(outcome(&subject, 3.0)).await;
    assert_eq!(report.status, OutcomeStatus::Inserted);
    assert_eq!(report.resolved.len(), 1);
    let after_first = core.lanes().snapshot("safe-1").await.unwrap();
    assert_eq!(after_first.current_leg, 1);

    let again = core.apply_outcome(outcome(&subject, 3.0)).await;
    assert_eq!(again.status, OutcomeStatus::Duplicate);
    assert!(again.resolved.is_empty());
    assert_eq!(core.lanes().snapshot("safe-1").await.unwrap(), after_first);

    // A conflicting replay keeps the first value too
    let conflicting = core.apply_outcome(outcome(&subject, 0.0)).await;
    assert_eq!(conflicting.status, OutcomeStatus::Duplicate);
    let key = MarketKey::new(&subject, "batter_total_bases");
    assert_eq!(core.outcomes().hit_record(&key).wins, 1);
    assert_eq!(core.outcomes().hit_record(&key).losses, 0);
    assert!(history.records().is_empty());
}

#[tokio::test]
async fn push_leaves_leg_pending() {
    let (core, _) = core_with_picks(4);
    core.ensure_lanes(&[lane(5)]).await;
    let mut push = outcome("p00", 1.5);
    push.result = OutcomeResult::Push;
    let subject = core.lanes().snapshot("safe-1").await.unwrap().next_pick.unwrap().pick.subject_id;
    push.subject_id = subject;

    let report = core.apply_outcome(push).await;
    assert_eq!(report.status, OutcomeStatus::Inserted);
    assert!(report.resolved.is_empty());
    let snap = core.lanes().snapshot("safe-1").await.unwrap();
    assert_eq!(snap.status, LaneStatus::Pending);
    assert_eq!(snap.current_leg, 0);
}
