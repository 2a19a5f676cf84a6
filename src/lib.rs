//! MCA Engine - AI-usage pattern detection and tiered interventions
//!
//! The engine watches a user's conversation with an AI assistant and decides
//! when to show a metacognitive nudge: rule evidence over extracted signals
//! → Bayesian update of the user's historical prior → scheduler gating
//! (cooldowns, suppression, fatigue) → tracked intervention session.
//!
//! ## Modules
//!
//! - **Detection**: signals, rules, Bayesian layer and pattern history
//! - **Intervention**: type selection, scheduling and the session state machine
//! - **Engine**: multi-user orchestration with debounce and idle timers
//! - **API**: `POST /orchestrate` and `POST /interventions/action` handlers

pub mod api;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod intervention;
pub mod store;
pub mod timer;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use detection::{InteractionTurn, PatternDetection, PatternLabel, PatternProbabilities, Tier};
pub use engine::{
    ActionResponse, EngineEvent, EngineStatus, InterventionEngine, OrchestrateRequest,
    OrchestrateResponse,
};
pub use error::{EngineError, StoreError};
pub use intervention::{MrType, SchedulingDecision, UserAction};
pub use store::{EngineStore, MemoryStore};

/// Engine version reported by the CLI and FFI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in diagnostics
pub const PRODUCER_NAME: &str = "mca-engine";
