//! Intervention scheduler
//!
//! Decides whether a candidate intervention is shown and at which tier.
//! Gates run in a fixed order and short-circuit:
//!
//! 1. an intervention is already open for the user
//! 2. no candidate tier (no rule fired)
//! 3. confidence floor
//! 4. escalation after repeated triggering passes
//! 5. pattern permission clamp (F never gets soft)
//! 6. dismissal suppression for the intervention type
//! 7. hard-tier cooldown, which downgrades to medium
//! 8. fatigue, which downgrades one level
//!
//! `decide` never mutates state; the engine applies the outcome.

use crate::config::{FatigueConfig, SchedulerConfig};
use crate::detection::types::{PatternLabel, Tier};
use crate::intervention::state::UserInterventionState;
use crate::intervention::types::{DecisionReason, MrType, SchedulingDecision, TierAdjustment};
use chrono::{DateTime, Utc};
use tracing::debug;

/// A candidate intervention for one analysis pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulingInput {
    pub mr_type: MrType,
    pub confidence: f64,
    pub candidate_tier: Option<Tier>,
    pub pattern: PatternLabel,
}

/// Tiers a pattern may be shown, lowest first
pub fn permitted_tiers(pattern: PatternLabel) -> &'static [Tier] {
    match pattern {
        PatternLabel::F => &[Tier::Medium, Tier::Hard],
        _ => &Tier::ALL,
    }
}

/// Lowest tier a pattern may be shown
pub fn lowest_permitted(pattern: PatternLabel) -> Tier {
    permitted_tiers(pattern)
        .first()
        .copied()
        .unwrap_or(Tier::Soft)
}

/// Pure tier gating over explicit per-user state
#[derive(Debug, Clone, Default)]
pub struct InterventionScheduler {
    scheduler: SchedulerConfig,
    fatigue: FatigueConfig,
}

impl InterventionScheduler {
    pub fn new(scheduler: SchedulerConfig, fatigue: FatigueConfig) -> Self {
        Self { scheduler, fatigue }
    }

    /// Gate a candidate against the user's state at `now`
    pub fn decide(
        &self,
        input: &SchedulingInput,
        state: &UserInterventionState,
        now: DateTime<Utc>,
    ) -> SchedulingDecision {
        let hidden =
            |reason| SchedulingDecision::hidden(input.pattern, input.confidence, reason);

        if state.has_active_session() {
            debug!(mr_type = %input.mr_type, "intervention already open, not displaying");
            return hidden(DecisionReason::StateConflict);
        }

        let Some(mut tier) = input.candidate_tier else {
            return hidden(DecisionReason::NoCandidate);
        };

        if input.confidence < self.scheduler.confidence_floor {
            debug!(
                confidence = input.confidence,
                floor = self.scheduler.confidence_floor,
                "insufficient evidence"
            );
            return hidden(DecisionReason::InsufficientEvidence);
        }

        let mut adjustments = Vec::new();

        if self.scheduler.escalate_after > 0
            && state.consecutive_triggers >= self.scheduler.escalate_after
            && tier != Tier::Hard
        {
            tier = tier.escalate();
            adjustments.push(TierAdjustment::Escalated);
        }

        let floor = lowest_permitted(input.pattern);
        if tier < floor {
            tier = floor;
            adjustments.push(TierAdjustment::PatternClamp);
        }

        if state.suppression.is_suppressed(input.mr_type, now) {
            debug!(mr_type = %input.mr_type, "intervention type suppressed after dismissal");
            return hidden(DecisionReason::Suppressed);
        }

        if tier == Tier::Hard
            && state
                .suppression
                .in_hard_cooldown(now, self.scheduler.hard_cooldown_secs)
        {
            tier = Tier::Medium;
            adjustments.push(TierAdjustment::Cooldown);
        }

        let fatigue = state.fatigue.score(now, &self.fatigue);
        if fatigue > self.fatigue.threshold {
            match tier.downgrade() {
                Some(lower) if lower >= floor => {
                    tier = lower;
                    adjustments.push(TierAdjustment::Fatigue);
                }
                Some(_) => {
                    debug!(fatigue, pattern = %input.pattern, "fatigued but holding pattern floor");
                }
                None => {
                    debug!(fatigue, "fatigue suppressed soft intervention");
                    let mut decision = hidden(DecisionReason::Fatigued);
                    adjustments.push(TierAdjustment::Fatigue);
                    decision.adjustments = adjustments;
                    return decision;
                }
            }
        }

        SchedulingDecision {
            should_display: true,
            tier: Some(tier),
            mr_type: Some(input.mr_type),
            pattern: input.pattern,
            confidence: input.confidence,
            reason: DecisionReason::Displayed,
            adjustments,
            message: None,
            intervention_id: None,
        }
    }
}
