//! Intervention catalog
//!
//! Picks the intervention type for a detection and supplies the per-type
//! progress map and message keys. The UI owns the actual copy; everything
//! here is a translation key.

use crate::detection::types::{PatternDetection, PatternLabel, RuleId, SignalVector, Tier};
use crate::intervention::types::{MessageInputs, MrType, UserAction};

/// Choose the intervention type for a detection.
///
/// Deterministic: the first matching branch wins.
pub fn select_mr_type(
    detection: &PatternDetection,
    signals: &SignalVector,
    short_prompt_chars: f64,
) -> MrType {
    let fired = |id: RuleId| detection.triggered_rules.contains(&id);

    if fired(RuleId::CompletePassivity)
        || (detection.pattern == PatternLabel::F && detection.recommended_tier == Some(Tier::Hard))
    {
        return MrType::OverRelianceWarning;
    }
    if fired(RuleId::ZeroVerification) {
        return MrType::VerificationPrompt;
    }
    if fired(RuleId::QuickAcceptance) {
        return MrType::ReflectionPause;
    }
    if fired(RuleId::ZeroModification) {
        return MrType::IterationPrompt;
    }
    if signals.user_turns > 0 && signals.avg_prompt_length < short_prompt_chars {
        return MrType::InputEnhancement;
    }
    if fired(RuleId::BurstUsage) {
        return MrType::PacingNudge;
    }
    MrType::ReflectionPause
}

/// Completion progress an action is worth for an intervention type.
///
/// `None` for actions that carry no progress of their own (dismiss, skip,
/// override, close, navigate).
pub fn progress_for(mr_type: MrType, action: UserAction) -> Option<u8> {
    let progress = match action {
        UserAction::View => 30,
        UserAction::LearnMore => match mr_type {
            MrType::ReflectionPause | MrType::OverRelianceWarning => 40,
            _ => 30,
        },
        UserAction::SelectOption => 60,
        UserAction::Apply => match mr_type {
            MrType::OverRelianceWarning | MrType::VerificationPrompt => 90,
            _ => 80,
        },
        UserAction::Confirm => 100,
        UserAction::Dismiss
        | UserAction::Skip
        | UserAction::Override
        | UserAction::Close
        | UserAction::Navigate => return None,
    };
    Some(progress)
}

/// Translation keys and evidence the UI renders for a displayed intervention
pub fn message_inputs(mr_type: MrType, tier: Tier, detection: &PatternDetection) -> MessageInputs {
    let base = format!("mr.{}", mr_type.as_str());

    let remediation_keys = remediation_steps(mr_type)
        .iter()
        .map(|step| format!("{base}.remediation.{step}"))
        .collect();

    let mut risk_keys: Vec<String> = detection
        .triggered_rules
        .iter()
        .map(|rule| format!("risk.{}", rule.as_str()))
        .collect();
    if detection.pattern == PatternLabel::F {
        risk_keys.push("risk.pattern-f".to_string());
    }

    MessageInputs {
        title_key: format!("{base}.title"),
        body_key: format!("{base}.body.{}", tier.as_str()),
        remediation_keys,
        risk_keys,
        triggered_rules: detection.triggered_rules.clone(),
    }
}

fn remediation_steps(mr_type: MrType) -> &'static [&'static str] {
    match mr_type {
        MrType::OverRelianceWarning => &["review_reply", "verify_sources", "write_own_draft"],
        MrType::VerificationPrompt => &["check_facts", "run_code", "ask_for_sources"],
        MrType::IterationPrompt => &["edit_reply", "ask_for_alternatives"],
        MrType::ReflectionPause => &["reread_reply", "note_disagreements"],
        MrType::PacingNudge => &["batch_questions", "take_a_break"],
        MrType::InputEnhancement => &["add_context", "state_constraints", "give_examples"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::PatternProbabilities;
    use chrono::{TimeZone, Utc};

    fn detection(pattern: PatternLabel, rules: &[RuleId], tier: Option<Tier>) -> PatternDetection {
        PatternDetection {
            pattern,
            confidence: 0.5,
            probabilities: PatternProbabilities::uniform(),
            triggered_rules: rules.to_vec(),
            recommended_tier: tier,
            mixed_with: None,
            detected_at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
        }
    }

    fn signals(avg_prompt_length: f64) -> SignalVector {
        SignalVector {
            user_turns: 3,
            avg_prompt_length,
            ..Default::default()
        }
    }

    #[test]
    fn test_passivity_selects_barrier() {
        let d = detection(
            PatternLabel::F,
            &[RuleId::ZeroVerification, RuleId::CompletePassivity],
            Some(Tier::Medium),
        );
        assert_eq!(select_mr_type(&d, &signals(80.0), 30.0), MrType::OverRelianceWarning);
    }

    #[test]
    fn test_pattern_f_hard_selects_barrier() {
        let d = detection(PatternLabel::F, &[RuleId::BurstUsage], Some(Tier::Hard));
        assert_eq!(select_mr_type(&d, &signals(80.0), 30.0), MrType::OverRelianceWarning);
    }

    #[test]
    fn test_rule_priority() {
        let d = detection(PatternLabel::C, &[RuleId::ZeroVerification], Some(Tier::Soft));
        assert_eq!(select_mr_type(&d, &signals(80.0), 30.0), MrType::VerificationPrompt);

        let d = detection(
            PatternLabel::C,
            &[RuleId::QuickAcceptance, RuleId::ZeroModification],
            Some(Tier::Medium),
        );
        assert_eq!(select_mr_type(&d, &signals(80.0), 30.0), MrType::ReflectionPause);
    }

    #[test]
    fn test_short_prompts_select_input_enhancement() {
        let d = detection(PatternLabel::A, &[RuleId::BurstUsage], Some(Tier::Soft));
        assert_eq!(select_mr_type(&d, &signals(12.0), 30.0), MrType::InputEnhancement);
        assert_eq!(select_mr_type(&d, &signals(120.0), 30.0), MrType::PacingNudge);
    }

    #[test]
    fn test_progress_map() {
        assert_eq!(progress_for(MrType::PacingNudge, UserAction::View), Some(30));
        assert_eq!(progress_for(MrType::VerificationPrompt, UserAction::Apply), Some(90));
        assert_eq!(progress_for(MrType::IterationPrompt, UserAction::Apply), Some(80));
        assert_eq!(progress_for(MrType::IterationPrompt, UserAction::Confirm), Some(100));
        assert_eq!(progress_for(MrType::IterationPrompt, UserAction::Dismiss), None);
    }

    #[test]
    fn test_message_inputs_keys() {
        let d = detection(PatternLabel::F, &[RuleId::ZeroVerification], Some(Tier::Soft));
        let msg = message_inputs(MrType::VerificationPrompt, Tier::Medium, &d);

        assert_eq!(msg.title_key, "mr.verification_prompt.title");
        assert_eq!(msg.body_key, "mr.verification_prompt.body.medium");
        assert_eq!(msg.remediation_keys.len(), 3);
        assert_eq!(
            msg.risk_keys,
            vec!["risk.zero-verification".to_string(), "risk.pattern-f".to_string()]
        );
        assert_eq!(msg.triggered_rules, vec![RuleId::ZeroVerification]);
    }
}
