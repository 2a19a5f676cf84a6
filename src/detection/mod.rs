//! Usage-pattern detection
//!
//! Two layers over the conversation turns: a deterministic rule battery over
//! extracted signals, then a Bayesian update of the user's historical prior.

pub mod bayes;
pub mod dimensions;
pub mod history;
pub mod pipeline;
pub mod rules;
pub mod signals;
pub mod types;

pub use bayes::BayesianLayer;
pub use dimensions::{DimensionScores, DimensionVote};
pub use history::PatternHistoryService;
pub use pipeline::{AnalysisPass, PatternDetector};
pub use rules::{RuleEvaluation, RuleRegistry};
pub use signals::SignalExtractor;
pub use types::{
    InteractionTurn, PatternDetection, PatternLabel, PatternProbabilities, Role, RuleId,
    SignalVector, Tier,
};
