//! Detection pipeline
//!
//! One analysis pass: turns → signals → rule evidence → posterior.
//! The prior is supplied by the caller so the pass itself is pure.

use crate::config::EngineConfig;
use crate::detection::bayes::BayesianLayer;
use crate::detection::rules::{RuleEvaluation, RuleRegistry};
use crate::detection::signals::{windowed, SignalExtractor};
use crate::detection::types::{InteractionTurn, PatternDetection, PatternProbabilities, SignalVector};
use chrono::{DateTime, Utc};

/// Everything computed during one pass
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPass {
    pub signals: SignalVector,
    pub evaluation: RuleEvaluation,
    pub detection: PatternDetection,
}

/// Runs signal extraction, the rule battery and the Bayesian update
pub struct PatternDetector {
    registry: RuleRegistry,
    config: EngineConfig,
}

impl PatternDetector {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, RuleRegistry::default())
    }

    pub fn with_registry(config: EngineConfig, registry: RuleRegistry) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Analyse the turns seen so far against a prior
    pub fn analyze(
        &self,
        turns: &[InteractionTurn],
        prior: &PatternProbabilities,
        now: DateTime<Utc>,
    ) -> AnalysisPass {
        let signals = SignalExtractor::extract(turns, &self.config.signals);
        let window = windowed(turns, self.config.signals.window_turns);
        let evaluation = self.registry.evaluate(
            &signals,
            window,
            &self.config.rules,
            &self.config.tiers,
            self.config.signals.cue_detection,
        );
        let detection = BayesianLayer::classify(
            prior,
            &evaluation,
            &signals,
            &self.registry,
            &self.config.bayes,
            now,
        );

        AnalysisPass {
            signals,
            evaluation,
            detection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{PatternLabel, RuleId, Tier};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_single_unverified_turn() {
        let detector = PatternDetector::new(EngineConfig::default());
        let turns = vec![InteractionTurn::ai("Here is the answer.", t0())];

        let pass = detector.analyze(&turns, &PatternProbabilities::uniform(), t0());

        assert_eq!(pass.signals.total_interactions, 1);
        assert_eq!(pass.evaluation.triggered_rules, vec![RuleId::ZeroVerification]);
        assert_eq!(pass.evaluation.candidate_tier, Some(Tier::Soft));
        assert_eq!(pass.detection.pattern, PatternLabel::F);
        assert!(pass.detection.confidence >= 0.2);
    }

    #[test]
    fn test_engaged_user_triggers_nothing() {
        let detector = PatternDetector::new(EngineConfig::default());
        let mut turns = Vec::new();
        for i in 0..4 {
            let base = t0() + Duration::minutes(i * 10);
            turns.push(InteractionTurn::user(
                "Explain the trade-offs between these two approaches in detail",
                base,
            ));
            let reply = InteractionTurn::ai("Trade-offs...", base + Duration::seconds(20));
            turns.push(if i % 2 == 0 { reply.verified() } else { reply.modified() });
        }

        let pass = detector.analyze(&turns, &PatternProbabilities::uniform(), t0());

        assert!(pass.evaluation.triggered_rules.is_empty());
        assert_eq!(pass.detection.confidence, 0.0);
        assert_eq!(pass.detection.probabilities, PatternProbabilities::uniform());
    }

    /// Three quick exchanges where every reply is checked and reworked
    fn bursty_engaged_session(prompts: [&str; 3]) -> Vec<InteractionTurn> {
        let mut turns = Vec::new();
        for (i, prompt) in prompts.into_iter().enumerate() {
            let base = t0() + Duration::seconds(i as i64 * 20);
            turns.push(InteractionTurn::user(prompt, base));
            turns.push(
                InteractionTurn::ai("Here is a revised answer", base + Duration::seconds(5))
                    .verified()
                    .modified(),
            );
        }
        turns
    }

    #[test]
    fn test_critical_evaluator_detected_as_d() {
        let detector = PatternDetector::new(EngineConfig::default());
        let turns = bursty_engaged_session([
            "In terms of accuracy, the second answer is weaker because it ignores edge cases.",
            "This could cause data loss if the migration runs twice, so be careful with retries.",
            "Recent library versions are probably beyond your knowledge cutoff, so I will check the changelog myself.",
        ]);

        let pass = detector.analyze(&turns, &PatternProbabilities::uniform(), t0());

        assert_eq!(pass.evaluation.triggered_rules, vec![RuleId::BurstUsage]);
        assert_eq!(pass.signals.dimensions.classify().pattern, PatternLabel::D);
        assert_eq!(pass.detection.pattern, PatternLabel::D);
        assert!((pass.detection.top_probability() - 0.525).abs() < 1e-9);
        assert!(pass.detection.confidence > 0.3);
    }

    #[test]
    fn test_same_timing_with_terse_prompts_stays_f() {
        let detector = PatternDetector::new(EngineConfig::default());
        let turns = bursty_engaged_session(["Do it", "Next one", "Fix it"]);

        let pass = detector.analyze(&turns, &PatternProbabilities::uniform(), t0());

        assert_eq!(pass.evaluation.triggered_rules, vec![RuleId::BurstUsage]);
        assert!(pass.signals.dimensions.engaged_vote().is_none());
        assert_eq!(pass.detection.pattern, PatternLabel::F);
    }

    #[test]
    fn test_pass_is_repeatable() {
        let detector = PatternDetector::new(EngineConfig::default());
        let turns = vec![
            InteractionTurn::user("hi", t0()),
            InteractionTurn::ai("hello", t0() + Duration::seconds(2)),
        ];
        let prior = PatternProbabilities::uniform();

        assert_eq!(
            detector.analyze(&turns, &prior, t0()),
            detector.analyze(&turns, &prior, t0())
        );
    }
}
