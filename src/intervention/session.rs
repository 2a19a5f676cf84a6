//! Intervention session state machine
//!
//! ```text
//! (idle) ──open──► opened ──interact──► interacting ──apply──► applied ──confirm──► completed
//!                    │                       │                    │
//!                    └──────── close / dismiss / skip / override / navigate / idle timeout ──► abandoned
//! ```
//!
//! Progress only ever increases. A session that reaches 100 completes; any
//! other terminal event abandons it and the outcome is classified from
//! elapsed time and progress.

use crate::config::SessionConfig;
use crate::detection::types::{PatternLabel, Tier};
use crate::error::EngineError;
use crate::intervention::catalog::progress_for;
use crate::intervention::types::{
    InterventionOutcome, MrType, Resolution, SessionState, UserAction,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One displayed intervention and the user's engagement with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionSession {
    pub id: Uuid,
    pub user_id: String,
    /// Conversation the intervention was raised in
    pub session_id: String,
    pub mr_type: MrType,
    pub tier: Tier,
    pub pattern: PatternLabel,
    pub state: SessionState,
    pub opened_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
    /// 0-100, monotonic
    pub completion_progress: u8,
    pub outcome: Option<InterventionOutcome>,
    pub resolution: Option<Resolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A state change produced by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub progress: u8,
    /// Set when the transition resolved the session
    pub outcome: Option<InterventionOutcome>,
    pub resolution: Option<Resolution>,
}

impl SessionTransition {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

impl InterventionSession {
    /// Open a session for a displayed intervention
    pub fn open(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        mr_type: MrType,
        tier: Tier,
        pattern: PatternLabel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            mr_type,
            tier,
            pattern,
            state: SessionState::Opened,
            opened_at: now,
            last_interaction_at: now,
            completion_progress: 0,
            outcome: None,
            resolution: None,
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// When the idle timeout fires if nothing else happens
    pub fn idle_deadline(&self, config: &SessionConfig) -> DateTime<Utc> {
        self.last_interaction_at + Duration::seconds(config.idle_timeout_secs)
    }

    /// Apply a user action
    pub fn record(
        &mut self,
        action: UserAction,
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) -> Result<SessionTransition, EngineError> {
        self.ensure_active()?;
        let from = self.state;

        if let Some(progress) = progress_for(self.mr_type, action) {
            self.completion_progress = self.completion_progress.max(progress);
        }
        self.last_interaction_at = now;

        if self.completion_progress >= 100 {
            return Ok(self.resolve(from, SessionState::Completed, Resolution::Accepted, now, config));
        }

        if let Some(resolution) = action.resolution() {
            return Ok(self.resolve(from, SessionState::Abandoned, resolution, now, config));
        }

        self.state = match action {
            UserAction::Apply => SessionState::Applied,
            _ if self.state == SessionState::Applied => SessionState::Applied,
            _ => SessionState::Interacting,
        };

        Ok(SessionTransition {
            from,
            to: self.state,
            progress: self.completion_progress,
            outcome: None,
            resolution: None,
        })
    }

    /// Abandon the session if it has been idle for the timeout.
    ///
    /// Returns `Ok(None)` when the deadline has not been reached yet.
    pub fn expire(
        &mut self,
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) -> Result<Option<SessionTransition>, EngineError> {
        self.ensure_active()?;
        if now < self.idle_deadline(config) {
            return Ok(None);
        }
        let from = self.state;
        Ok(Some(self.resolve(
            from,
            SessionState::Abandoned,
            Resolution::TimedOut,
            now,
            config,
        )))
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::SessionTerminal(self.id.to_string()))
        }
    }

    fn resolve(
        &mut self,
        from: SessionState,
        to: SessionState,
        resolution: Resolution,
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) -> SessionTransition {
        let outcome = if to == SessionState::Completed {
            InterventionOutcome::Effective
        } else {
            let elapsed = (now - self.opened_at).num_milliseconds() as f64 / 1000.0;
            classify_outcome(elapsed, self.completion_progress, config)
        };

        self.state = to;
        self.outcome = Some(outcome);
        self.resolution = Some(resolution);
        self.resolved_at = Some(now);

        SessionTransition {
            from,
            to,
            progress: self.completion_progress,
            outcome: Some(outcome),
            resolution: Some(resolution),
        }
    }
}

/// Classify an abandoned session.
///
/// Checked in order: browsing (quick and untouched), effective, partial,
/// abandoned.
pub fn classify_outcome(
    elapsed_secs: f64,
    progress: u8,
    config: &SessionConfig,
) -> InterventionOutcome {
    if elapsed_secs < config.browsing_secs && progress < config.browsing_progress {
        InterventionOutcome::Browsing
    } else if progress >= config.effective_progress {
        InterventionOutcome::Effective
    } else if progress >= config.partial_progress {
        InterventionOutcome::Partial
    } else {
        InterventionOutcome::Abandoned
    }
}
