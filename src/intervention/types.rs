//! Intervention data types
//!
//! Decisions emitted by the scheduler, the user actions that drive an open
//! intervention, and the outcomes recorded when it resolves.

use crate::detection::types::{PatternLabel, RuleId, Tier};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of intervention shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MrType {
    /// Blocking over-reliance barrier (MR18)
    OverRelianceWarning,
    /// Ask the user to check the last reply
    VerificationPrompt,
    /// Encourage editing instead of accepting verbatim
    IterationPrompt,
    /// Slow down before accepting
    ReflectionPause,
    /// Space out rapid-fire requests
    PacingNudge,
    /// Suggest richer prompts
    InputEnhancement,
}

impl MrType {
    pub const ALL: [MrType; 6] = [
        MrType::OverRelianceWarning,
        MrType::VerificationPrompt,
        MrType::IterationPrompt,
        MrType::ReflectionPause,
        MrType::PacingNudge,
        MrType::InputEnhancement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MrType::OverRelianceWarning => "over_reliance_warning",
            MrType::VerificationPrompt => "verification_prompt",
            MrType::IterationPrompt => "iteration_prompt",
            MrType::ReflectionPause => "reflection_pause",
            MrType::PacingNudge => "pacing_nudge",
            MrType::InputEnhancement => "input_enhancement",
        }
    }
}

impl fmt::Display for MrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the user did with an open intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    View,
    LearnMore,
    SelectOption,
    Apply,
    Confirm,
    Dismiss,
    Skip,
    /// Proceed past a barrier without following it
    Override,
    Close,
    /// The user left the conversation view
    Navigate,
}

impl UserAction {
    /// Whether the action ends the session
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UserAction::Confirm
                | UserAction::Dismiss
                | UserAction::Skip
                | UserAction::Override
                | UserAction::Close
                | UserAction::Navigate
        )
    }

    /// How a terminal action resolves the session
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            UserAction::Confirm => Some(Resolution::Accepted),
            UserAction::Dismiss => Some(Resolution::Dismissed),
            UserAction::Skip => Some(Resolution::Skipped),
            UserAction::Override => Some(Resolution::Overridden),
            UserAction::Close => Some(Resolution::Closed),
            UserAction::Navigate => Some(Resolution::Navigated),
            _ => None,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Accepted,
    Dismissed,
    Skipped,
    Overridden,
    Closed,
    Navigated,
    TimedOut,
}

/// Classified effect of a resolved session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionOutcome {
    Effective,
    Partial,
    Abandoned,
    /// Closed almost immediately with no engagement
    Browsing,
}

/// Lifecycle state of an intervention session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opened,
    Interacting,
    Applied,
    Completed,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }
}

/// Why the scheduler did or did not display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Displayed,
    /// Another intervention is still open for this user
    StateConflict,
    /// No rule fired
    NoCandidate,
    /// Confidence under the floor
    InsufficientEvidence,
    /// The intervention type was recently dismissed
    Suppressed,
    /// Fatigue pushed the tier below soft
    Fatigued,
}

/// Tier changes applied while gating a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierAdjustment {
    /// Raised after repeated triggering passes
    Escalated,
    /// Raised to the pattern's lowest permitted tier
    PatternClamp,
    /// Hard lowered to medium inside the cooldown window
    Cooldown,
    /// Lowered one level for fatigue
    Fatigue,
}

/// Data the UI needs to render an intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInputs {
    pub title_key: String,
    pub body_key: String,
    pub remediation_keys: Vec<String>,
    pub risk_keys: Vec<String>,
    pub triggered_rules: Vec<RuleId>,
}

/// Scheduler output for one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingDecision {
    pub should_display: bool,
    /// Emitted tier; `None` when nothing is displayed
    pub tier: Option<Tier>,
    pub mr_type: Option<MrType>,
    pub pattern: PatternLabel,
    pub confidence: f64,
    pub reason: DecisionReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<TierAdjustment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageInputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention_id: Option<Uuid>,
}

impl SchedulingDecision {
    /// A decision that displays nothing
    pub fn hidden(pattern: PatternLabel, confidence: f64, reason: DecisionReason) -> Self {
        Self {
            should_display: false,
            tier: None,
            mr_type: None,
            pattern,
            confidence,
            reason,
            adjustments: Vec::new(),
            message: None,
            intervention_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_actions_have_resolutions() {
        for action in [
            UserAction::View,
            UserAction::LearnMore,
            UserAction::SelectOption,
            UserAction::Apply,
            UserAction::Confirm,
            UserAction::Dismiss,
            UserAction::Skip,
            UserAction::Override,
            UserAction::Close,
            UserAction::Navigate,
        ] {
            assert_eq!(action.is_terminal(), action.resolution().is_some());
        }
    }

    #[test]
    fn test_action_wire_names() {
        let action: UserAction = serde_json::from_str("\"learn_more\"").unwrap();
        assert_eq!(action, UserAction::LearnMore);
        assert_eq!(
            serde_json::to_string(&MrType::OverRelianceWarning).unwrap(),
            "\"over_reliance_warning\""
        );
    }

    #[test]
    fn test_hidden_decision_serializes_compactly() {
        let decision =
            SchedulingDecision::hidden(PatternLabel::C, 0.1, DecisionReason::InsufficientEvidence);
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["shouldDisplay"], false);
        assert_eq!(json["reason"], "insufficient_evidence");
        assert!(json["tier"].is_null());
        assert!(json.get("message").is_none());
        assert!(json.get("adjustments").is_none());
    }
}
