//! Metacognitive dimension scoring
//!
//! Scores the user's own prompts on twelve dimensions, each 0-3:
//!
//! | Group      | Dimensions                                                   |
//! |------------|--------------------------------------------------------------|
//! | Planning   | P1 task understanding, P2 goal setting, P3 strategy, P4 role |
//! | Monitoring | M1 process tracking, M2 quality checking, M3 trust           |
//! | Evaluation | E1 quality evaluation, E2 risk, E3 capability judgment       |
//! | Regulation | R1 strategy adjustment, R2 tool switching                    |
//!
//! The profile votes for the pattern it most resembles. Rules only ever see
//! over-reliance, so the vote is how an engaged user's A-E pattern reaches
//! the Bayesian layer.

use crate::detection::types::PatternLabel;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect()
}

macro_rules! phrase_table {
    ($name:ident, $source:ident, [$($pattern:expr),+ $(,)?]) => {
        const $source: &[&str] = &[$($pattern),+];
        static $name: LazyLock<Vec<Regex>> = LazyLock::new(|| compile($source));
    };
}

// ── Planning ───────────────────────────────────────────────────────────────
const UNDERSTANDING_KEYWORDS: &[&str] = &[
    "requirement", "need", "goal", "want to", "should", "constraint", "audience",
];
phrase_table!(RE_DETAIL, DETAIL, [r"first.*then", r"step \d", r"1\).*2\)"]);

const GOAL_KEYWORDS: &[&str] = &["goal", "want", "achieve", "need to", "should be"];
phrase_table!(
    RE_MEASURABLE,
    MEASURABLE,
    [r"\d+%", r"\d+ words", r"<\d+", r">\d+", r"\d+ms", r"accuracy", r"deadline"]
);

const PLAN_KEYWORDS: &[&str] = &[
    "plan", "step", "first", "then", "next", "finally", "strategy", "approach",
];
phrase_table!(RE_STEPS, STEPS, [r"step \d", r"\d\)", r"if.*then"]);
phrase_table!(RE_ALTERNATIVES, ALTERNATIVES, [r"alternatively", r"another way"]);

const ROLE_KEYWORDS: &[&str] = &["you are", "act as", "pretend", "your role", "as a"];
const ROLE_BOUNDARY_KEYWORDS: &[&str] = &[
    "you handle", "i will", "don't", "only", "your job", "my job",
];
phrase_table!(RE_ROLE, ROLE, [r"you are a.*expert", r"act as a"]);

// ── Monitoring ─────────────────────────────────────────────────────────────
const PROGRESS_KEYWORDS: &[&str] = &["progress", "done", "next", "currently", "stage", "continue"];
phrase_table!(RE_TRACKING, TRACKING, [r"\d+/\d+", r"step \d", r"review", r"so far"]);

const CHECK_KEYWORDS: &[&str] = &[
    "wrong", "error", "mistake", "fix", "change", "check", "verify", "incorrect",
];
phrase_table!(RE_QUALITY, QUALITY, [r"this is wrong", r"should be", r"please fix"]);

const TRUST_KEYWORDS: &[&str] = &[
    "trust", "believe", "unsure", "doubt", "verify", "confirm", "reliable",
];
phrase_table!(RE_TRUST, TRUST, [r"i'll verify", r"double check"]);
phrase_table!(RE_SKEPTIC, SKEPTIC, [r"are you sure", r"is this correct"]);

// ── Evaluation ─────────────────────────────────────────────────────────────
const EVAL_KEYWORDS: &[&str] = &["good", "bad", "okay", "satisfied", "quality", "rate", "score"];
phrase_table!(RE_REASONED, REASONED, [r"because", r"but.*could be better", r"pros.*cons"]);
phrase_table!(
    RE_MULTI_ASPECT,
    MULTI_ASPECT,
    [r"\d+/\d+", r"accuracy.*completeness", r"in terms of"]
);

const RISK_KEYWORDS: &[&str] = &[
    "risk", "problem", "danger", "consequence", "safe", "what if", "if wrong",
];
phrase_table!(RE_RISK, RISK, [r"if.*might", r"could.*cause", r"be careful"]);

const CAPABILITY_KEYWORDS: &[&str] = &[
    "can you", "you are good at", "limitation", "i'll do", "you might not know",
];
phrase_table!(
    RE_CAPABILITY_BOUNDARY,
    CAPABILITY_BOUNDARY,
    [r"beyond your", r"knowledge cutoff", r"this part.*myself"]
);

// ── Regulation ─────────────────────────────────────────────────────────────
const ADJUST_KEYWORDS: &[&str] = &["try again", "different", "adjust", "change", "another way"];
phrase_table!(RE_ACTIVE_ADJUST, ACTIVE_ADJUST, [r"last time", r"this time", r"different approach"]);

const TOOL_KEYWORDS: &[&str] = &[
    "google", "bing", "search", "look up", "other tool", "test", "run", "verify externally",
];
phrase_table!(
    RE_TOOLS,
    TOOLS,
    [r"i.*google", r"run.*test", r"claude|chatgpt|gpt", r"i'll.*search"]
);

/// Lowercased user prompts with hit counters
struct Prompts {
    lower: Vec<String>,
}

impl Prompts {
    fn new<'a>(prompts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            lower: prompts
                .into_iter()
                .filter(|p| !p.trim().is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.lower.len()
    }

    fn avg_chars(&self) -> f64 {
        if self.lower.is_empty() {
            return 0.0;
        }
        let total: usize = self.lower.iter().map(|p| p.chars().count()).sum();
        total as f64 / self.lower.len() as f64
    }

    /// (prompt, keyword) pairs where the prompt contains the keyword
    fn keywords(&self, keywords: &[&str]) -> usize {
        self.lower
            .iter()
            .map(|p| keywords.iter().filter(|k| p.contains(**k)).count())
            .sum()
    }

    /// (prompt, phrase) pairs where the phrase matches
    fn phrases(&self, phrases: &[Regex]) -> usize {
        self.lower
            .iter()
            .map(|p| phrases.iter().filter(|re| re.is_match(p)).count())
            .sum()
    }
}

/// Pick the first level whose condition holds, from 3 down to 1; else 0
fn level(three: bool, two: bool, one: bool) -> u8 {
    if three {
        3
    } else if two {
        2
    } else if one {
        1
    } else {
        0
    }
}

/// Twelve 0-3 scores over the user's prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionScores {
    pub task_understanding: u8,
    pub goal_setting: u8,
    pub strategy_planning: u8,
    pub role_definition: u8,
    pub process_tracking: u8,
    pub quality_checking: u8,
    pub trust_calibration: u8,
    pub quality_evaluation: u8,
    pub risk_assessment: u8,
    pub capability_judgment: u8,
    pub strategy_adjustment: u8,
    pub tool_switching: u8,
}

/// The pattern a dimension profile points to, with its strength (0-1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionVote {
    pub pattern: PatternLabel,
    pub strength: f64,
}

impl DimensionVote {
    /// `strength` on the voted pattern, the rest spread evenly
    pub fn likelihood(&self) -> [f64; PatternLabel::COUNT] {
        let strength = self.strength.clamp(0.0, 1.0);
        let rest = (1.0 - strength) / (PatternLabel::COUNT - 1) as f64;
        let mut likelihood = [rest; PatternLabel::COUNT];
        likelihood[self.pattern.index()] = strength;
        likelihood
    }
}

impl DimensionScores {
    /// Score a user's prompts, oldest first
    pub fn score<'a>(prompts: impl IntoIterator<Item = &'a str>) -> Self {
        let p = Prompts::new(prompts);
        if p.lower.is_empty() {
            return Self::default();
        }

        let avg = p.avg_chars();
        let understanding = p.keywords(UNDERSTANDING_KEYWORDS);
        let detail = p.phrases(&RE_DETAIL);

        let goals = p.keywords(GOAL_KEYWORDS);
        let measurable = p.phrases(&RE_MEASURABLE);

        let plans = p.keywords(PLAN_KEYWORDS);
        let steps = p.phrases(&RE_STEPS);
        let alternatives = p.phrases(&RE_ALTERNATIVES);

        let roles = p.keywords(ROLE_KEYWORDS);
        let role_bounds = p.keywords(ROLE_BOUNDARY_KEYWORDS);
        let role_phrases = p.phrases(&RE_ROLE);

        let progress = p.keywords(PROGRESS_KEYWORDS);
        let tracking = p.phrases(&RE_TRACKING);

        let checks = p.keywords(CHECK_KEYWORDS);
        let quality = p.phrases(&RE_QUALITY);

        let trust = p.keywords(TRUST_KEYWORDS);
        let trust_phrases = p.phrases(&RE_TRUST);
        let skeptic = p.phrases(&RE_SKEPTIC);
        let trust_total = trust + trust_phrases + skeptic;

        let evals = p.keywords(EVAL_KEYWORDS);
        let reasoned = p.phrases(&RE_REASONED);
        let multi_aspect = p.phrases(&RE_MULTI_ASPECT);

        let risks = p.keywords(RISK_KEYWORDS);
        let risk_phrases = p.phrases(&RE_RISK);

        let capability = p.keywords(CAPABILITY_KEYWORDS);
        let cap_bounds = p.phrases(&RE_CAPABILITY_BOUNDARY);

        let adjusts = p.keywords(ADJUST_KEYWORDS);
        let active = p.phrases(&RE_ACTIVE_ADJUST);

        let tools = p.keywords(TOOL_KEYWORDS);
        let tool_phrases = p.phrases(&RE_TOOLS);

        let n = p.len();
        Self {
            task_understanding: level(
                avg > 150.0 && (understanding > 5 || detail > 2),
                avg > 80.0 && (understanding > 2 || detail > 0),
                avg > 30.0,
            ),
            goal_setting: level(
                measurable > 1 && goals > 2,
                measurable > 0 || goals > 3,
                goals > 0,
            ),
            strategy_planning: level(steps > 2 && alternatives > 0, steps > 1 || plans > 3, plans > 0),
            role_definition: level(
                role_phrases > 0 && role_bounds > 0,
                role_phrases > 0 || roles > 2,
                roles > 0 || role_bounds > 0,
            ),
            process_tracking: level(
                tracking > 2 || (n > 20 && progress > 3),
                n > 10 && progress > 1,
                n > 3,
            ),
            quality_checking: level(quality > 2 || checks > 5, quality > 0 || checks > 2, checks > 0),
            trust_calibration: level(trust_phrases > 1 && skeptic > 0, trust_total > 3, trust_total > 0),
            quality_evaluation: level(
                multi_aspect > 0 || (reasoned > 1 && evals > 2),
                reasoned > 0,
                evals > 0,
            ),
            risk_assessment: level(
                risk_phrases > 2 || (risks > 3 && risk_phrases > 0),
                risk_phrases > 0 || risks > 1,
                risks > 0,
            ),
            capability_judgment: level(
                cap_bounds > 1 || (capability > 2 && cap_bounds > 0),
                cap_bounds > 0 || capability > 1,
                capability > 0,
            ),
            strategy_adjustment: level(
                active > 1 || (adjusts > 2 && active > 0),
                active > 0 || adjusts > 1,
                adjusts > 0,
            ),
            tool_switching: level(
                tool_phrases > 2 || (tools > 3 && tool_phrases > 0),
                tool_phrases > 0 || tools > 1,
                tools > 0,
            ),
        }
    }

    pub fn planning_avg(&self) -> f64 {
        f64::from(
            self.task_understanding + self.goal_setting + self.strategy_planning + self.role_definition,
        ) / 4.0
    }

    pub fn monitoring_avg(&self) -> f64 {
        f64::from(self.process_tracking + self.quality_checking + self.trust_calibration) / 3.0
    }

    pub fn evaluation_avg(&self) -> f64 {
        f64::from(self.quality_evaluation + self.risk_assessment + self.capability_judgment) / 3.0
    }

    pub fn regulation_avg(&self) -> f64 {
        f64::from(self.strategy_adjustment + self.tool_switching) / 2.0
    }

    pub fn total(&self) -> u32 {
        [
            self.task_understanding,
            self.goal_setting,
            self.strategy_planning,
            self.role_definition,
            self.process_tracking,
            self.quality_checking,
            self.trust_calibration,
            self.quality_evaluation,
            self.risk_assessment,
            self.capability_judgment,
            self.strategy_adjustment,
            self.tool_switching,
        ]
        .iter()
        .map(|&s| u32::from(s))
        .sum()
    }

    /// Pattern the profile most resembles, first match wins
    pub fn classify(&self) -> DimensionVote {
        let (p, m, e, r) = (
            self.planning_avg(),
            self.monitoring_avg(),
            self.evaluation_avg(),
            self.regulation_avg(),
        );
        let (pattern, strength) = if self.total() <= 15 && self.quality_evaluation <= 1 {
            (PatternLabel::F, 0.9)
        } else if p >= 2.5 && e >= 2.0 {
            (PatternLabel::A, 0.85)
        } else if e >= 2.5 {
            (PatternLabel::D, 0.85)
        } else if r >= 2.5 && p >= 2.0 && e >= 2.0 {
            (PatternLabel::E, 0.8)
        } else if m >= 2.0 {
            (PatternLabel::B, 0.8)
        } else {
            (PatternLabel::C, 0.7)
        };
        DimensionVote { pattern, strength }
    }

    /// Vote for an engaged pattern (A-E). An F profile yields `None`: the
    /// rules already carry the over-reliance evidence.
    pub fn engaged_vote(&self) -> Option<DimensionVote> {
        Some(self.classify()).filter(|vote| vote.pattern != PatternLabel::F)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVALUATOR: [&str; 3] = [
        "In terms of accuracy, the second answer is weaker because it ignores edge cases.",
        "This could cause data loss if the migration runs twice, so be careful with retries.",
        "Recent library versions are probably beyond your knowledge cutoff, so I will check the changelog myself.",
    ];

    #[test]
    fn test_phrase_tables_compile() {
        let tables: [(&[&str], &LazyLock<Vec<Regex>>); 15] = [
            (DETAIL, &RE_DETAIL),
            (MEASURABLE, &RE_MEASURABLE),
            (STEPS, &RE_STEPS),
            (ALTERNATIVES, &RE_ALTERNATIVES),
            (ROLE, &RE_ROLE),
            (TRACKING, &RE_TRACKING),
            (QUALITY, &RE_QUALITY),
            (TRUST, &RE_TRUST),
            (SKEPTIC, &RE_SKEPTIC),
            (REASONED, &RE_REASONED),
            (MULTI_ASPECT, &RE_MULTI_ASPECT),
            (RISK, &RE_RISK),
            (CAPABILITY_BOUNDARY, &RE_CAPABILITY_BOUNDARY),
            (ACTIVE_ADJUST, &RE_ACTIVE_ADJUST),
            (TOOLS, &RE_TOOLS),
        ];
        for (source, compiled) in tables {
            assert_eq!(compiled.len(), source.len(), "{source:?}");
        }
    }

    #[test]
    fn test_no_prompts_scores_zero() {
        let scores = DimensionScores::score(Vec::<&str>::new());
        assert_eq!(scores, DimensionScores::default());
        assert_eq!(scores.classify().pattern, PatternLabel::F);
        assert!(scores.engaged_vote().is_none());
    }

    #[test]
    fn test_terse_prompts_vote_over_reliance() {
        let scores = DimensionScores::score(["Do it", "Next", "Write a function that parses dates"]);
        assert!(scores.total() <= 15);
        assert_eq!(scores.classify().pattern, PatternLabel::F);
        assert!(scores.engaged_vote().is_none());
    }

    #[test]
    fn test_critical_evaluator_scores() {
        let scores = DimensionScores::score(EVALUATOR);

        assert_eq!(scores.quality_evaluation, 3);
        assert_eq!(scores.risk_assessment, 2);
        assert_eq!(scores.capability_judgment, 3);
        assert_eq!(scores.task_understanding, 1);
        assert_eq!(scores.goal_setting, 2);
        assert!(scores.planning_avg() < 2.5);

        let vote = scores.engaged_vote().unwrap();
        assert_eq!(vote.pattern, PatternLabel::D);
        assert_eq!(vote.strength, 0.85);
    }

    #[test]
    fn test_classify_order() {
        let base = DimensionScores {
            quality_evaluation: 2,
            ..DimensionScores::default()
        };
        let strategic = DimensionScores {
            task_understanding: 3,
            goal_setting: 3,
            strategy_planning: 2,
            role_definition: 2,
            risk_assessment: 2,
            capability_judgment: 2,
            ..base
        };
        assert_eq!(strategic.classify().pattern, PatternLabel::A);

        let reflective = DimensionScores {
            task_understanding: 2,
            goal_setting: 2,
            strategy_planning: 2,
            role_definition: 2,
            risk_assessment: 2,
            capability_judgment: 2,
            strategy_adjustment: 3,
            tool_switching: 2,
            ..base
        };
        assert_eq!(reflective.classify().pattern, PatternLabel::E);

        let iterative = DimensionScores {
            process_tracking: 2,
            quality_checking: 2,
            trust_calibration: 2,
            ..base
        };
        assert_eq!(iterative.classify().pattern, PatternLabel::B);

        assert_eq!(base.classify().pattern, PatternLabel::C);
    }

    #[test]
    fn test_vote_likelihood_sums_to_one() {
        let vote = DimensionVote {
            pattern: PatternLabel::D,
            strength: 0.85,
        };
        let likelihood = vote.likelihood();
        assert_eq!(likelihood[PatternLabel::D.index()], 0.85);
        assert!((likelihood[PatternLabel::A.index()] - 0.03).abs() < 1e-12);
        assert!((likelihood.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
