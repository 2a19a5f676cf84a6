//! Engine configuration
//!
//! Every threshold, cut point and decay constant used by detection and
//! scheduling lives here so it can be tuned from a TOML file without code
//! changes. All sections fall back to their defaults when omitted.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay after the last submitted turn before an analysis pass runs
    pub debounce_ms: u64,
    /// Signal extraction settings
    pub signals: SignalConfig,
    /// Rule thresholds
    pub rules: RuleThresholds,
    /// Rule-count to tier cut points
    pub tiers: TierCutPoints,
    /// Posterior confidence and mixed-pattern settings
    pub bayes: BayesConfig,
    /// Historical prior settings
    pub history: HistoryConfig,
    /// Scheduler gates
    pub scheduler: SchedulerConfig,
    /// Fatigue scoring
    pub fatigue: FatigueConfig,
    /// Intervention session lifecycle
    pub session: SessionConfig,
    /// Persistence health tracking
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            signals: SignalConfig::default(),
            rules: RuleThresholds::default(),
            tiers: TierCutPoints::default(),
            bayes: BayesConfig::default(),
            history: HistoryConfig::default(),
            scheduler: SchedulerConfig::default(),
            fatigue: FatigueConfig::default(),
            session: SessionConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reject configurations whose cut points or weights cannot work
    pub fn validate(&self) -> Result<(), EngineError> {
        let t = &self.tiers;
        if !(t.soft_min >= 1 && t.soft_min <= t.medium_min && t.medium_min <= t.hard_min) {
            return Err(EngineError::Config(format!(
                "tier cut points must satisfy 1 <= soft_min <= medium_min <= hard_min (got {}, {}, {})",
                t.soft_min, t.medium_min, t.hard_min
            )));
        }
        if self.history.half_life_days <= 0.0 {
            return Err(EngineError::Config(
                "history.half_life_days must be positive".to_string(),
            ));
        }
        if self.history.smoothing <= 0.0 {
            return Err(EngineError::Config(
                "history.smoothing must be positive".to_string(),
            ));
        }
        if self.fatigue.half_life_secs <= 0.0 || self.fatigue.display_saturation <= 0.0 {
            return Err(EngineError::Config(
                "fatigue half-life and display saturation must be positive".to_string(),
            ));
        }
        if self.bayes.count_saturation == 0 {
            return Err(EngineError::Config(
                "bayes.count_saturation must be at least 1".to_string(),
            ));
        }
        if !self.bayes.dimension_weight.is_finite() || self.bayes.dimension_weight < 0.0 {
            return Err(EngineError::Config(
                "bayes.dimension_weight must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Signal extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Rolling window used for the burst score
    pub burst_window_secs: f64,
    /// Only the most recent N turns are analysed when set
    pub window_turns: Option<usize>,
    /// Treat verification/modification phrases in user prompts as evidence
    pub cue_detection: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            burst_window_secs: 60.0,
            window_turns: None,
            cue_detection: true,
        }
    }
}

/// Thresholds for the rule battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// A reply accepted faster than this counts as a quick acceptance
    pub quick_accept_secs: f64,
    /// Share of accepted replies that must be quick for the rule to fire
    pub quick_accept_ratio: f64,
    /// Minimum turns before zero verification is meaningful
    pub zero_verification_min_turns: u32,
    /// Minimum AI replies before zero modification is meaningful
    pub zero_modification_min_ai_turns: u32,
    /// Burst score above which usage counts as bursty
    pub burst_score_threshold: f64,
    /// Minimum AI replies before complete passivity is meaningful
    pub passivity_min_ai_turns: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            quick_accept_secs: 5.0,
            quick_accept_ratio: 0.5,
            zero_verification_min_turns: 1,
            zero_modification_min_ai_turns: 3,
            burst_score_threshold: 0.7,
            passivity_min_ai_turns: 3,
        }
    }
}

/// Triggered-rule counts at which each tier begins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCutPoints {
    pub soft_min: usize,
    pub medium_min: usize,
    pub hard_min: usize,
}

impl Default for TierCutPoints {
    fn default() -> Self {
        Self {
            soft_min: 1,
            medium_min: 2,
            hard_min: 4,
        }
    }
}

/// Confidence blending and mixed-pattern detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesConfig {
    /// Weight of the top-probability lift over uniform
    pub top_weight: f64,
    /// Weight of the corroborating rule count
    pub count_weight: f64,
    /// Rule count at which the count term saturates
    pub count_saturation: usize,
    /// Top-two gap below which a result is mixed
    pub mixed_margin: f64,
    /// Both of the top two must exceed this to be mixed
    pub mixed_floor: f64,
    /// Scale of the prompt-dimension vote against one rule's likelihood
    pub dimension_weight: f64,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            top_weight: 0.6,
            count_weight: 0.4,
            count_saturation: 5,
            mixed_margin: 0.1,
            mixed_floor: 0.2,
            dimension_weight: 1.0,
        }
    }
}

/// Historical prior settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Detections older than this are ignored
    pub window_days: i64,
    /// Exponential decay half-life for detection weight
    pub half_life_days: f64,
    /// Pseudo-count added to every pattern before normalising
    pub smoothing: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            half_life_days: 14.0,
            smoothing: 0.25,
        }
    }
}

/// Scheduler gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Below this confidence nothing is displayed
    pub confidence_floor: f64,
    /// Minimum spacing between two hard barriers for one user
    pub hard_cooldown_secs: i64,
    /// How long a dismissed intervention type stays suppressed
    pub dismiss_suppression_secs: i64,
    /// Consecutive triggering passes before the candidate tier is raised
    pub escalate_after: u32,
    /// Average prompt length under which input enhancement is suggested
    pub short_prompt_chars: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.2,
            hard_cooldown_secs: 300,
            dismiss_suppression_secs: 600,
            escalate_after: 3,
            short_prompt_chars: 30.0,
        }
    }
}

/// Fatigue scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueConfig {
    /// Events older than this are forgotten
    pub window_secs: i64,
    /// Half-life of a display or dismissal's contribution
    pub half_life_secs: f64,
    /// Decayed display count at which display pressure saturates
    pub display_saturation: f64,
    pub display_weight: f64,
    pub dismissal_weight: f64,
    /// Fatigue above this downgrades the tier by one level
    pub threshold: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            window_secs: 1800,
            half_life_secs: 600.0,
            display_saturation: 8.0,
            display_weight: 0.5,
            dismissal_weight: 0.5,
            threshold: 0.6,
        }
    }
}

/// Intervention session lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: i64,
    /// Sessions closed sooner than this with little progress are browsing
    pub browsing_secs: f64,
    pub browsing_progress: u8,
    pub effective_progress: u8,
    pub partial_progress: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            browsing_secs: 5.0,
            browsing_progress: 20,
            effective_progress: 80,
            partial_progress: 30,
        }
    }
}

/// Persistence health settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Consecutive failed writes before degraded mode is reported
    pub degraded_after: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { degraded_after: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tiers.soft_min, 1);
        assert_eq!(config.tiers.medium_min, 2);
        assert_eq!(config.tiers.hard_min, 4);
        assert_eq!(config.debounce_ms, 1000);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let text = r#"
            debounce_ms = 250

            [rules]
            quick_accept_secs = 3.0

            [scheduler]
            hard_cooldown_secs = 120
        "#;

        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.rules.quick_accept_secs, 3.0);
        assert_eq!(config.rules.passivity_min_ai_turns, 3);
        assert_eq!(config.scheduler.hard_cooldown_secs, 120);
        assert_eq!(config.scheduler.confidence_floor, 0.2);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_invalid_cut_points_rejected() {
        let text = r#"
            [tiers]
            soft_min = 3
            medium_min = 2
            hard_min = 4
        "#;

        let result = EngineConfig::from_toml_str(text);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_negative_dimension_weight_rejected() {
        let text = r#"
            [bayes]
            dimension_weight = -0.5
        "#;

        let result = EngineConfig::from_toml_str(text);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let mut config = EngineConfig::default();
        config.history.half_life_days = 7.0;
        config.signals.window_turns = Some(40);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mca.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = EngineConfig::from_toml_str("rules = [");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
