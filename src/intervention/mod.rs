//! Tiered intervention scheduling
//!
//! Turns a pattern detection into a display decision, and tracks the
//! lifecycle of each displayed intervention.

pub mod catalog;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod types;

pub use scheduler::{InterventionScheduler, SchedulingInput};
pub use session::{InterventionSession, SessionTransition};
pub use state::{FatigueState, SuppressionState, UserInterventionState};
pub use types::{
    DecisionReason, InterventionOutcome, MessageInputs, MrType, Resolution, SchedulingDecision,
    SessionState, TierAdjustment, UserAction,
};
