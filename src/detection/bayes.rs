//! Bayesian belief layer
//!
//! Combines the user's historical prior with the current pass's rule evidence:
//!
//! ```text
//! posterior(p) ∝ prior(p) × (Σ_{r ∈ triggered} likelihood_r(p) + w · vote(p))
//! ```
//!
//! Every rule vector leans towards F, so the prompt-dimension vote (see
//! [`crate::detection::dimensions`]) is the evidence that can point at A-E.
//! It is weighted by `dimension_weight` and only counts alongside rule
//! evidence.
//!
//! Confidence blends how far the top posterior rises above uniform with how
//! many independent rules corroborate it:
//!
//! ```text
//! lift       = (p_top - 1/6) / (1 - 1/6)
//! corroborate = min(triggered_count / count_saturation, 1)
//! confidence = top_weight * lift + count_weight * corroborate   (clamped to 0-1)
//! ```

use crate::config::BayesConfig;
use crate::detection::rules::{RuleEvaluation, RuleRegistry};
use crate::detection::types::{
    PatternDetection, PatternLabel, PatternProbabilities, SignalVector,
};
use chrono::{DateTime, Utc};

const UNIFORM_P: f64 = 1.0 / PatternLabel::COUNT as f64;

/// Discrete Bayesian classifier over the six patterns
pub struct BayesianLayer;

impl BayesianLayer {
    /// Produce a detection from a prior and the current rule evidence.
    ///
    /// With no triggered rules the posterior is the prior, unchanged, and
    /// confidence is zero.
    pub fn classify(
        prior: &PatternProbabilities,
        evidence: &RuleEvaluation,
        signals: &SignalVector,
        registry: &RuleRegistry,
        config: &BayesConfig,
        now: DateTime<Utc>,
    ) -> PatternDetection {
        if evidence.triggered_rules.is_empty() {
            let (pattern, _) = prior.top();
            return PatternDetection {
                pattern,
                confidence: 0.0,
                probabilities: *prior,
                triggered_rules: Vec::new(),
                recommended_tier: None,
                mixed_with: None,
                detected_at: now,
            };
        }

        let likelihood = summed_likelihood(evidence, signals, registry, config);
        let posterior = update(prior, &likelihood);
        let ranked = posterior.ranked();
        let (pattern, top_p) = ranked[0];
        let (runner_up, second_p) = ranked[1];

        let confidence = compute_confidence(top_p, evidence.triggered_count, config);
        let mixed_with = is_mixed(top_p, second_p, config).then_some(runner_up);

        PatternDetection {
            pattern,
            confidence,
            probabilities: posterior,
            triggered_rules: evidence.triggered_rules.clone(),
            recommended_tier: evidence.candidate_tier,
            mixed_with,
            detected_at: now,
        }
    }
}

/// Sum of the likelihood vectors of every triggered rule plus the weighted
/// dimension vote
fn summed_likelihood(
    evidence: &RuleEvaluation,
    signals: &SignalVector,
    registry: &RuleRegistry,
    config: &BayesConfig,
) -> [f64; PatternLabel::COUNT] {
    let mut total = [0.0; PatternLabel::COUNT];
    for id in &evidence.triggered_rules {
        for (slot, weight) in total.iter_mut().zip(registry.likelihood(*id)) {
            *slot += weight;
        }
    }
    if let Some(vote) = signals.dimensions.engaged_vote() {
        for (slot, weight) in total.iter_mut().zip(vote.likelihood()) {
            *slot += config.dimension_weight * weight;
        }
    }
    total
}

/// Elementwise prior × likelihood, renormalised.
///
/// Falls back to the prior if the product carries no mass (a prior that is
/// zero wherever the evidence points).
fn update(
    prior: &PatternProbabilities,
    likelihood: &[f64; PatternLabel::COUNT],
) -> PatternProbabilities {
    let mut product = [0.0; PatternLabel::COUNT];
    for (i, slot) in product.iter_mut().enumerate() {
        *slot = prior.as_array()[i] * likelihood[i];
    }
    PatternProbabilities::from_weights(product).unwrap_or(*prior)
}

fn compute_confidence(top_p: f64, triggered_count: usize, config: &BayesConfig) -> f64 {
    let lift = ((top_p - UNIFORM_P) / (1.0 - UNIFORM_P)).clamp(0.0, 1.0);
    let corroboration =
        (triggered_count as f64 / config.count_saturation.max(1) as f64).clamp(0.0, 1.0);
    let total_weight = config.top_weight + config.count_weight;
    if total_weight <= 0.0 {
        return 0.0;
    }
    ((config.top_weight * lift + config.count_weight * corroboration) / total_weight)
        .clamp(0.0, 1.0)
}

fn is_mixed(top_p: f64, second_p: f64, config: &BayesConfig) -> bool {
    top_p - second_p < config.mixed_margin
        && top_p > config.mixed_floor
        && second_p > config.mixed_floor
}
