//! Detection data types
//!
//! Types for interaction turns, the signals extracted from them, and the
//! pattern detections produced by the classifier.

use crate::detection::dimensions::DimensionScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Ai,
}

/// One turn of a conversation with the user's reaction to it.
///
/// The verify/modify/reject flags are only meaningful on AI turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionTurn {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub was_verified: bool,
    #[serde(default)]
    pub was_modified: bool,
    #[serde(default)]
    pub was_rejected: bool,
}

impl InteractionTurn {
    /// A user prompt
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
            was_verified: false,
            was_modified: false,
            was_rejected: false,
        }
    }

    /// An AI reply the user has not acted on
    pub fn ai(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Ai,
            ..Self::user(content, timestamp)
        }
    }

    pub fn verified(mut self) -> Self {
        self.was_verified = true;
        self
    }

    pub fn modified(mut self) -> Self {
        self.was_modified = true;
        self
    }

    pub fn rejected(mut self) -> Self {
        self.was_rejected = true;
        self
    }

    pub fn is_ai(&self) -> bool {
        self.role == Role::Ai
    }
}

/// Behavioral usage pattern labels.
///
/// F is passive over-reliance, the pattern the scheduler guards hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternLabel {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl PatternLabel {
    pub const ALL: [PatternLabel; 6] = [
        PatternLabel::A,
        PatternLabel::B,
        PatternLabel::C,
        PatternLabel::D,
        PatternLabel::E,
        PatternLabel::F,
    ];

    pub const COUNT: usize = 6;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<PatternLabel> {
        PatternLabel::ALL.get(i).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternLabel::A => "A",
            PatternLabel::B => "B",
            PatternLabel::C => "C",
            PatternLabel::D => "D",
            PatternLabel::E => "E",
            PatternLabel::F => "F",
        }
    }

    /// Human-readable archetype name
    pub fn description(self) -> &'static str {
        match self {
            PatternLabel::A => "Strategic Decomposition",
            PatternLabel::B => "Iterative Refinement",
            PatternLabel::C => "Moderate Balanced Use",
            PatternLabel::D => "Critical Evaluation",
            PatternLabel::E => "Pedagogical Reflection",
            PatternLabel::F => "Passive Over-Reliance",
        }
    }
}

impl fmt::Display for PatternLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A probability distribution over the six pattern labels.
///
/// Serialized as `{"A": p, ..., "F": p}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<PatternLabel, f64>",
    try_from = "BTreeMap<PatternLabel, f64>"
)]
pub struct PatternProbabilities([f64; PatternLabel::COUNT]);

impl PatternProbabilities {
    /// Tolerance used when checking that a distribution sums to one
    pub const SUM_TOLERANCE: f64 = 1e-6;

    /// The uniform distribution, 1/6 per label
    pub fn uniform() -> Self {
        Self([1.0 / PatternLabel::COUNT as f64; PatternLabel::COUNT])
    }

    /// Normalise non-negative weights into a distribution.
    ///
    /// Returns `None` when the weights are negative, non-finite, or sum to zero.
    pub fn from_weights(weights: [f64; PatternLabel::COUNT]) -> Option<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut probs = weights;
        for p in probs.iter_mut() {
            *p /= total;
        }
        Some(Self(probs))
    }

    pub fn get(&self, label: PatternLabel) -> f64 {
        self.0[label.index()]
    }

    pub fn as_array(&self) -> &[f64; PatternLabel::COUNT] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (PatternLabel, f64)> + '_ {
        PatternLabel::ALL.iter().map(move |&l| (l, self.0[l.index()]))
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Labels ordered by descending probability; ties keep A..F order
    pub fn ranked(&self) -> Vec<(PatternLabel, f64)> {
        let mut ranked: Vec<(PatternLabel, f64)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Most probable label
    pub fn top(&self) -> (PatternLabel, f64) {
        self.ranked()[0]
    }
}

impl Default for PatternProbabilities {
    fn default() -> Self {
        Self::uniform()
    }
}

impl From<PatternProbabilities> for BTreeMap<PatternLabel, f64> {
    fn from(probs: PatternProbabilities) -> Self {
        probs.iter().collect()
    }
}

impl TryFrom<BTreeMap<PatternLabel, f64>> for PatternProbabilities {
    type Error = String;

    fn try_from(map: BTreeMap<PatternLabel, f64>) -> Result<Self, Self::Error> {
        let mut weights = [0.0; PatternLabel::COUNT];
        for label in PatternLabel::ALL {
            weights[label.index()] = *map
                .get(&label)
                .ok_or_else(|| format!("missing probability for pattern {label}"))?;
        }
        if weights.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err("pattern probabilities must be finite and non-negative".to_string());
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > PatternProbabilities::SUM_TOLERANCE {
            return Err(format!("pattern probabilities must sum to 1 (got {total})"));
        }
        // Stored as given so persisted rows reload unchanged
        Ok(PatternProbabilities(weights))
    }
}

/// Behavioral signals reduced from a turn list.
///
/// Recomputed on every analysis pass and never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalVector {
    /// Turns analysed (both roles)
    pub total_interactions: u32,
    pub user_turns: u32,
    pub ai_turns: u32,
    /// Share of AI replies used as-is (neither modified nor rejected)
    pub acceptance_rate: f64,
    pub verification_rate: f64,
    pub modification_rate: f64,
    pub rejection_rate: f64,
    /// Share of consecutive turns that landed inside the burst window (0-1)
    pub burst_score: f64,
    /// Mean seconds from an AI reply to the next user turn
    pub avg_time_to_action: Option<f64>,
    /// Mean user prompt length in characters
    pub avg_prompt_length: f64,
    /// User prompts carrying a verification phrase
    pub verification_cues: u32,
    /// User prompts carrying a modification phrase
    pub modification_cues: u32,
    /// Metacognitive profile of the user's prompts
    #[serde(default)]
    pub dimensions: DimensionScores,
}

/// Named rules in the deterministic layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    QuickAcceptance,
    ZeroVerification,
    ZeroModification,
    BurstUsage,
    CompletePassivity,
}

impl RuleId {
    pub const ALL: [RuleId; 5] = [
        RuleId::QuickAcceptance,
        RuleId::ZeroVerification,
        RuleId::ZeroModification,
        RuleId::BurstUsage,
        RuleId::CompletePassivity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::QuickAcceptance => "quick-acceptance",
            RuleId::ZeroVerification => "zero-verification",
            RuleId::ZeroModification => "zero-modification",
            RuleId::BurstUsage => "burst-usage",
            RuleId::CompletePassivity => "complete-passivity",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intervention severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Dismissible hint
    Soft,
    /// Actionable warning
    Medium,
    /// Blocking barrier requiring an explicit choice
    Hard,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Soft, Tier::Medium, Tier::Hard];

    /// One level up, saturating at hard
    pub fn escalate(self) -> Tier {
        match self {
            Tier::Soft => Tier::Medium,
            Tier::Medium | Tier::Hard => Tier::Hard,
        }
    }

    /// One level down; `None` means suppressed
    pub fn downgrade(self) -> Option<Tier> {
        match self {
            Tier::Hard => Some(Tier::Medium),
            Tier::Medium => Some(Tier::Soft),
            Tier::Soft => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Soft => "soft",
            Tier::Medium => "medium",
            Tier::Hard => "hard",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDetection {
    /// Most probable pattern
    pub pattern: PatternLabel,
    /// Confidence in the detection (0-1); zero when no rule fired
    pub confidence: f64,
    /// Posterior distribution
    pub probabilities: PatternProbabilities,
    pub triggered_rules: Vec<RuleId>,
    /// Tier suggested by the rule count; `None` when no rule fired
    pub recommended_tier: Option<Tier>,
    /// Runner-up when the top two patterns are too close to separate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixed_with: Option<PatternLabel>,
    pub detected_at: DateTime<Utc>,
}

impl PatternDetection {
    pub fn is_mixed(&self) -> bool {
        self.mixed_with.is_some()
    }

    pub fn triggered_count(&self) -> usize {
        self.triggered_rules.len()
    }

    /// Probability of the reported top pattern
    pub fn top_probability(&self) -> f64 {
        self.probabilities.get(self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uniform_is_exactly_one_sixth() {
        let uniform = PatternProbabilities::uniform();
        for (_, p) in uniform.iter() {
            assert_eq!(p, 1.0 / 6.0);
        }
        assert!((uniform.sum() - 1.0).abs() < PatternProbabilities::SUM_TOLERANCE);
    }

    #[test]
    fn test_from_weights_normalises() {
        let probs = PatternProbabilities::from_weights([2.0, 1.0, 1.0, 0.0, 0.0, 4.0]).unwrap();
        assert!((probs.get(PatternLabel::F) - 0.5).abs() < 1e-12);
        assert!((probs.get(PatternLabel::A) - 0.25).abs() < 1e-12);
        assert_eq!(probs.top(), (PatternLabel::F, 0.5));

        assert!(PatternProbabilities::from_weights([0.0; 6]).is_none());
        assert!(PatternProbabilities::from_weights([1.0, -1.0, 0.0, 0.0, 0.0, 1.0]).is_none());
        assert!(PatternProbabilities::from_weights([f64::NAN, 1.0, 0.0, 0.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_probabilities_serialize_as_label_map() {
        let probs = PatternProbabilities::from_weights([1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let json = serde_json::to_value(probs).unwrap();
        assert_eq!(json["A"], 0.5);
        assert_eq!(json["F"], 0.5);
        assert_eq!(json["C"], 0.0);

        let parsed: PatternProbabilities = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, probs);
    }

    #[test]
    fn test_probabilities_missing_label_rejected() {
        let json = r#"{"A": 0.5, "B": 0.5}"#;
        assert!(serde_json::from_str::<PatternProbabilities>(json).is_err());
    }

    #[test]
    fn test_probabilities_reload_exactly() {
        let stored = PatternProbabilities::uniform();
        let json = serde_json::to_string(&stored).unwrap();
        let reloaded: PatternProbabilities = serde_json::from_str(&json).unwrap();
        for (label, p) in reloaded.iter() {
            assert_eq!(p.to_bits(), stored.get(label).to_bits());
        }
    }

    #[test]
    fn test_probabilities_invalid_distribution_rejected() {
        for json in [
            r#"{"A": 2.0, "B": 1.0, "C": 1.0, "D": 0.0, "E": 0.0, "F": 4.0}"#,
            r#"{"A": 1.5, "B": -0.5, "C": 0.0, "D": 0.0, "E": 0.0, "F": 0.0}"#,
            r#"{"A": 0.0, "B": 0.0, "C": 0.0, "D": 0.0, "E": 0.0, "F": 0.0}"#,
        ] {
            assert!(serde_json::from_str::<PatternProbabilities>(json).is_err(), "{json}");
        }
    }

    #[test]
    fn test_ranked_ties_keep_label_order() {
        let ranked = PatternProbabilities::uniform().ranked();
        assert_eq!(ranked[0].0, PatternLabel::A);
        assert_eq!(ranked[5].0, PatternLabel::F);
    }

    #[test]
    fn test_turn_deserialization_camel_case() {
        let json = r#"{
            "role": "assistant",
            "content": "Here is the answer",
            "timestamp": "2024-01-15T14:00:05Z",
            "wasVerified": true
        }"#;

        let turn: InteractionTurn = serde_json::from_str(json).unwrap();
        assert_eq!(turn.role, Role::Ai);
        assert!(turn.was_verified);
        assert!(!turn.was_modified);
        assert_eq!(
            turn.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 5).unwrap()
        );
    }

    #[test]
    fn test_rule_id_serialization() {
        let json = serde_json::to_string(&RuleId::ZeroVerification).unwrap();
        assert_eq!(json, "\"zero-verification\"");
        assert_eq!(RuleId::CompletePassivity.to_string(), "complete-passivity");
    }

    #[test]
    fn test_tier_ladder() {
        assert_eq!(Tier::Soft.escalate(), Tier::Medium);
        assert_eq!(Tier::Hard.escalate(), Tier::Hard);
        assert_eq!(Tier::Hard.downgrade(), Some(Tier::Medium));
        assert_eq!(Tier::Medium.downgrade(), Some(Tier::Soft));
        assert_eq!(Tier::Soft.downgrade(), None);
        assert!(Tier::Soft < Tier::Medium && Tier::Medium < Tier::Hard);
    }
}
