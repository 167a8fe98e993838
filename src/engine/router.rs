//! Outcome routing.
//!
//! Matches a realised outcome to every lane whose pending leg plays the
//! same subject/market, grades the leg and reports the result. A lane
//! that moved underneath us is re-read and retried once.

use tracing::{debug, info, warn};

use crate::streak::registry::{AwaitingLeg, LaneRegistry};
use crate::streak::{LaneSnapshot, LegOutcome, PickRef};
use crate::types::{Outcome, OutcomeResult, PropLineError};

/// Whether `outcome` settles `pick`.
pub fn settles(pick: &PickRef, outcome: &Outcome) -> bool {
    pick.subject_id == outcome.subject_id
        && pick.market == outcome.market
        && outcome.date >= pick.quoted_at.date_naive()
}

/// Leg result for a pick, or `None` on a push.
pub fn leg_outcome(pick: &PickRef, outcome: &Outcome) -> Option<LegOutcome> {
    match pick.grade(outcome.realized_value) {
        OutcomeResult::Win => Some(LegOutcome::Win),
        OutcomeResult::Loss => Some(LegOutcome::Loss),
        OutcomeResult::Push => None,
    }
}

/// Resolve every pending leg settled by `outcome`.
pub async fn route(registry: &LaneRegistry, outcome: &Outcome) -> Vec<LaneSnapshot> {
    let mut resolved = Vec::new();
    for awaiting in registry.awaiting().await {
        if !settles(&awaiting.pick, outcome) {
            continue;
        }
        let Some(result) = leg_outcome(&awaiting.pick, outcome) else {
            info!(
                lane = %awaiting.lane_id,
                pick = %awaiting.pick,
                value = outcome.realized_value,
                "Push: leg stays pending"
            );
            continue;
        };
        if let Some(snapshot) = resolve_with_retry(registry, &awaiting, result).await {
            resolved.push(snapshot);
        }
    }
    resolved
}

async fn resolve_with_retry(
    registry: &LaneRegistry,
    awaiting: &AwaitingLeg,
    result: LegOutcome,
) -> Option<LaneSnapshot> {
    let first = registry
        .resolve_leg(&awaiting.lane_id, awaiting.version, awaiting.leg_index, result)
        .await;
    let err = match first {
        Ok(snapshot) => return Some(snapshot),
        Err(e) if e.is_conflict() => e,
        Err(e) => {
            log_unresolved(awaiting, &e);
            return None;
        }
    };

    debug!(lane = %awaiting.lane_id, error = %err, "Conflict resolving leg, re-reading lane");
    let current = match registry.snapshot(&awaiting.lane_id).await {
        Ok(s) => s,
        Err(e) => {
            log_unresolved(awaiting, &e);
            return None;
        }
    };
    let same_leg = current.current_leg == awaiting.leg_index
        && current.next_pick.as_ref().map(|p| &p.pick) == Some(&awaiting.pick);
    if !same_leg {
        debug!(lane = %awaiting.lane_id, "Leg already settled elsewhere");
        return None;
    }

    match registry
        .resolve_leg(&awaiting.lane_id, current.version, awaiting.leg_index, result)
        .await
    {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log_unresolved(awaiting, &e);
            None
        }
    }
}

fn log_unresolved(awaiting: &AwaitingLeg, err: &PropLineError) {
    warn!(
        lane = %awaiting.lane_id,
        leg = awaiting.leg_index,
        error = %err,
        "Leg left pending"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
