//! Signal extraction
//!
//! Reduces an ordered list of interaction turns into the scalar behavioral
//! signals the rule layer evaluates.

use crate::config::SignalConfig;
use crate::detection::dimensions::DimensionScores;
use crate::detection::types::{InteractionTurn, Role, SignalVector};

/// Phrases in a user prompt that show the user checking the previous reply
const VERIFICATION_CUES: &[&str] = &[
    "is this correct",
    "can you check",
    "verify",
    "are you sure",
    "double check",
    "double-check",
    "confirm",
    "is that right",
    "make sure",
];

/// Phrases in a user prompt that show the user reworking the previous reply
const MODIFICATION_CUES: &[&str] = &[
    "change",
    "modify",
    "adjust",
    "revise",
    "instead",
    "try again",
    "another way",
    "that's not",
    "not quite",
];

/// Signal extractor for interaction turns
pub struct SignalExtractor;

impl SignalExtractor {
    /// Extract signals from a chronologically ordered turn list.
    ///
    /// Empty input yields all-zero rates and `total_interactions == 0`.
    pub fn extract(turns: &[InteractionTurn], config: &SignalConfig) -> SignalVector {
        let turns = windowed(turns, config.window_turns);

        let user_turns = turns.iter().filter(|t| t.role == Role::User).count() as u32;
        let ai_turns = turns.iter().filter(|t| t.is_ai()).count() as u32;

        let mut accepted = 0u32;
        let mut verified = 0u32;
        let mut modified = 0u32;
        let mut rejected = 0u32;

        for (i, turn) in turns.iter().enumerate() {
            if !turn.is_ai() {
                continue;
            }
            let cue_verified = config.cue_detection
                && next_user_prompt(turns, i)
                    .is_some_and(|t| contains_cue(&t.content, VERIFICATION_CUES));

            if turn.was_verified || cue_verified {
                verified += 1;
            }
            if reply_modified(turns, i, config.cue_detection) {
                modified += 1;
            }
            if turn.was_rejected {
                rejected += 1;
            }
            if reply_accepted(turns, i, config.cue_detection) {
                accepted += 1;
            }
        }

        let denominator = ai_turns.max(1) as f64;
        let verification_cues = count_prompts_with(turns, VERIFICATION_CUES);
        let modification_cues = count_prompts_with(turns, MODIFICATION_CUES);

        SignalVector {
            total_interactions: turns.len() as u32,
            user_turns,
            ai_turns,
            acceptance_rate: accepted as f64 / denominator,
            verification_rate: verified as f64 / denominator,
            modification_rate: modified as f64 / denominator,
            rejection_rate: rejected as f64 / denominator,
            burst_score: compute_burst_score(turns, config.burst_window_secs),
            avg_time_to_action: mean(&times_to_action(turns)),
            avg_prompt_length: compute_avg_prompt_length(turns),
            verification_cues,
            modification_cues,
            dimensions: DimensionScores::score(
                turns
                    .iter()
                    .filter(|t| t.role == Role::User)
                    .map(|t| t.content.as_str()),
            ),
        }
    }
}

/// Whether the AI reply at `ai_index` was reworked, by flag or by a
/// modification phrase in the prompt that follows it
fn reply_modified(turns: &[InteractionTurn], ai_index: usize, cue_detection: bool) -> bool {
    let Some(turn) = turns.get(ai_index) else {
        return false;
    };
    turn.was_modified
        || (cue_detection
            && next_user_prompt(turns, ai_index)
                .is_some_and(|t| contains_cue(&t.content, MODIFICATION_CUES)))
}

/// Whether the AI reply at `ai_index` was used as-is
pub(crate) fn reply_accepted(turns: &[InteractionTurn], ai_index: usize, cue_detection: bool) -> bool {
    turns.get(ai_index).is_some_and(|turn| {
        turn.is_ai() && !turn.was_rejected && !reply_modified(turns, ai_index, cue_detection)
    })
}

/// Restrict to the most recent `window` turns when a window is configured
pub(crate) fn windowed(turns: &[InteractionTurn], window: Option<usize>) -> &[InteractionTurn] {
    match window {
        Some(n) if n < turns.len() => &turns[turns.len() - n..],
        _ => turns,
    }
}

/// Seconds from each AI reply to the user turn that follows it
pub(crate) fn times_to_action(turns: &[InteractionTurn]) -> Vec<f64> {
    turns
        .windows(2)
        .filter(|pair| pair[0].is_ai() && pair[1].role == Role::User)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .filter(|&secs| secs >= 0.0)
        .collect()
}

fn next_user_prompt(turns: &[InteractionTurn], ai_index: usize) -> Option<&InteractionTurn> {
    turns
        .get(ai_index + 1)
        .filter(|t| t.role == Role::User)
}

fn contains_cue(content: &str, cues: &[&str]) -> bool {
    let lower = content.to_lowercase();
    cues.iter().any(|cue| lower.contains(cue))
}

fn count_prompts_with(turns: &[InteractionTurn], cues: &[&str]) -> u32 {
    turns
        .iter()
        .filter(|t| t.role == Role::User && contains_cue(&t.content, cues))
        .count() as u32
}

/// Burst score: share of inter-turn gaps that fall inside the burst window.
///
/// 1.0 means every turn followed the previous one within the window
/// (task-completion usage); 0.0 means every turn was spaced out. Fewer than
/// two turns have no gaps and score 0.
fn compute_burst_score(turns: &[InteractionTurn], burst_window_secs: f64) -> f64 {
    if turns.len() < 2 {
        return 0.0;
    }
    let gaps = turns.len() - 1;
    let bursty = turns
        .windows(2)
        .filter(|pair| {
            let gap = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0;
            (0.0..=burst_window_secs).contains(&gap)
        })
        .count();
    (bursty as f64 / gaps as f64).clamp(0.0, 1.0)
}

fn compute_avg_prompt_length(turns: &[InteractionTurn]) -> f64 {
    let lengths: Vec<f64> = turns
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.chars().count() as f64)
        .collect();
    mean(&lengths).unwrap_or(0.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
