//! Deterministic rule layer
//!
//! A fixed battery of named predicates over the signal vector. Each rule also
//! carries a per-pattern likelihood vector that the Bayesian layer sums over
//! the rules that fired. Rules are independent, so evaluation order never
//! changes the result.

use crate::config::{RuleThresholds, TierCutPoints};
use crate::detection::signals::{reply_accepted, times_to_action};
use crate::detection::types::{InteractionTurn, PatternLabel, RuleId, SignalVector, Tier};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything a rule predicate may look at
pub struct RuleContext<'a> {
    pub signals: &'a SignalVector,
    pub turns: &'a [InteractionTurn],
    pub thresholds: &'a RuleThresholds,
    /// Follow-up phrases count as verification and modification
    pub cue_detection: bool,
}

/// A named rule: predicate plus likelihood weights ordered A..F
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: RuleId,
    pub predicate: fn(&RuleContext<'_>) -> bool,
    pub likelihood: [f64; PatternLabel::COUNT],
}

impl Rule {
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

/// Output of evaluating the battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub triggered_rules: Vec<RuleId>,
    pub triggered_count: usize,
    /// `None` when no rule fired
    pub candidate_tier: Option<Tier>,
}

/// Registry of the rule battery
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(vec![
            Rule {
                id: RuleId::QuickAcceptance,
                predicate: quick_acceptance,
                likelihood: [0.05, 0.08, 0.17, 0.05, 0.10, 0.55],
            },
            Rule {
                id: RuleId::ZeroVerification,
                predicate: zero_verification,
                likelihood: [0.04, 0.12, 0.18, 0.02, 0.09, 0.55],
            },
            Rule {
                id: RuleId::ZeroModification,
                predicate: zero_modification,
                likelihood: [0.08, 0.02, 0.20, 0.10, 0.15, 0.45],
            },
            Rule {
                id: RuleId::BurstUsage,
                predicate: burst_usage,
                likelihood: [0.15, 0.15, 0.15, 0.20, 0.03, 0.32],
            },
            Rule {
                id: RuleId::CompletePassivity,
                predicate: complete_passivity,
                likelihood: [0.02, 0.02, 0.08, 0.02, 0.06, 0.80],
            },
        ])
    }
}

impl RuleRegistry {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Likelihood vector for a rule, or a flat vector for an unknown id
    pub fn likelihood(&self, id: RuleId) -> [f64; PatternLabel::COUNT] {
        self.get(id)
            .map(|r| r.likelihood)
            .unwrap_or([1.0 / PatternLabel::COUNT as f64; PatternLabel::COUNT])
    }

    /// Evaluate every rule against the signals and raw turns.
    ///
    /// `cue_detection` must match the setting the signals were extracted with.
    pub fn evaluate(
        &self,
        signals: &SignalVector,
        turns: &[InteractionTurn],
        thresholds: &RuleThresholds,
        cut_points: &TierCutPoints,
        cue_detection: bool,
    ) -> RuleEvaluation {
        let ctx = RuleContext {
            signals,
            turns,
            thresholds,
            cue_detection,
        };

        let mut triggered_rules: Vec<RuleId> = self
            .rules
            .iter()
            .filter(|rule| rule.evaluate(&ctx))
            .map(|rule| rule.id)
            .collect();
        triggered_rules.sort();
        triggered_rules.dedup();

        let triggered_count = triggered_rules.len();
        let candidate_tier = tier_for_count(triggered_count, cut_points);

        debug!(
            triggered = ?triggered_rules,
            candidate_tier = ?candidate_tier,
            "rule battery evaluated"
        );

        RuleEvaluation {
            triggered_rules,
            triggered_count,
            candidate_tier,
        }
    }
}

/// Map a triggered-rule count to a candidate tier.
///
/// With the default cut points: 0 → none, 1 → soft, 2-3 → medium, 4+ → hard.
pub fn tier_for_count(count: usize, cut_points: &TierCutPoints) -> Option<Tier> {
    if count >= cut_points.hard_min {
        Some(Tier::Hard)
    } else if count >= cut_points.medium_min {
        Some(Tier::Medium)
    } else if count >= cut_points.soft_min {
        Some(Tier::Soft)
    } else {
        None
    }
}

/// Most accepted replies were acted on almost immediately
fn quick_acceptance(ctx: &RuleContext<'_>) -> bool {
    let accepted_gaps = accepted_reply_gaps(ctx.turns, ctx.cue_detection);
    if accepted_gaps.is_empty() {
        return false;
    }
    let quick = accepted_gaps
        .iter()
        .filter(|&&gap| gap < ctx.thresholds.quick_accept_secs)
        .count();
    quick as f64 / accepted_gaps.len() as f64 >= ctx.thresholds.quick_accept_ratio
}

/// Gaps after replies counted as accepted by the signal extractor
fn accepted_reply_gaps(turns: &[InteractionTurn], cue_detection: bool) -> Vec<f64> {
    (0..turns.len().saturating_sub(1))
        .filter(|&i| reply_accepted(turns, i, cue_detection))
        .flat_map(|i| times_to_action(&turns[i..i + 2]))
        .collect()
}

fn zero_verification(ctx: &RuleContext<'_>) -> bool {
    ctx.signals.total_interactions >= ctx.thresholds.zero_verification_min_turns
        && ctx.signals.verification_rate == 0.0
}

fn zero_modification(ctx: &RuleContext<'_>) -> bool {
    ctx.signals.ai_turns >= ctx.thresholds.zero_modification_min_ai_turns
        && ctx.signals.modification_rate == 0.0
}

fn burst_usage(ctx: &RuleContext<'_>) -> bool {
    ctx.signals.burst_score > ctx.thresholds.burst_score_threshold
}

fn complete_passivity(ctx: &RuleContext<'_>) -> bool {
    let s = ctx.signals;
    s.ai_turns >= ctx.thresholds.passivity_min_ai_turns
        && s.verification_rate == 0.0
        && s.modification_rate == 0.0
        && s.rejection_rate == 0.0
}
