//! Intervention engine
//!
//! Ties detection, scheduling and session tracking together for many users.
//!
//! Per analysis pass:
//! 1. Validate the request
//! 2. Load the user's prior from history (other conversations only)
//! 3. Signals → rules → posterior
//! 4. Pick an intervention type and gate it through the scheduler
//! 5. On display, open a session and arm its idle timer
//! 6. Append the detection to history (failures never block the decision)
//!
//! Time is always passed in; [`InterventionEngine::tick`] fires debounced
//! analyses and idle timeouts that are due.

use crate::config::EngineConfig;
use crate::detection::history::PatternHistoryService;
use crate::detection::pipeline::PatternDetector;
use crate::detection::types::{
    InteractionTurn, PatternLabel, PatternProbabilities, RuleId, SignalVector, Tier,
};
use crate::error::EngineError;
use crate::intervention::catalog::{message_inputs, select_mr_type};
use crate::intervention::scheduler::{InterventionScheduler, SchedulingInput};
use crate::intervention::session::{InterventionSession, SessionTransition};
use crate::intervention::state::UserInterventionState;
use crate::intervention::types::{
    InterventionOutcome, MrType, Resolution, SchedulingDecision, SessionState, UserAction,
};
use crate::store::{AuditRecord, EngineStore, MemoryStore, OutcomeRecord, PersistenceHealth};
use crate::timer::{Debouncer, TimerQueue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Body of `POST /orchestrate`.
///
/// Every field is optional at the type level so that a missing field is a
/// validation error with a fixed message rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_turns: Option<Vec<InteractionTurn>>,
}

impl OrchestrateRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        turns: Vec<InteractionTurn>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            user_id: Some(user_id.into()),
            conversation_turns: Some(turns),
        }
    }

    /// Check required fields and turn ordering
    pub fn validate(&self) -> Result<(&str, &str, &[InteractionTurn]), EngineError> {
        let present = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .is_some()
        };
        let (Some(session_id), Some(user_id), Some(turns)) = (
            self.session_id.as_deref(),
            self.user_id.as_deref(),
            self.conversation_turns.as_deref(),
        ) else {
            return Err(EngineError::missing_required_fields());
        };
        if !present(&self.session_id) || !present(&self.user_id) {
            return Err(EngineError::missing_required_fields());
        }

        if let Some(i) = turns
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(EngineError::Validation(format!(
                "conversationTurns must be in chronological order (turn {} precedes turn {})",
                i + 1,
                i
            )));
        }

        Ok((session_id, user_id, turns))
    }
}

/// An intervention still open for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveIntervention {
    pub id: Uuid,
    pub mr_type: MrType,
    pub tier: Tier,
    pub state: SessionState,
    pub completion_progress: u8,
    pub opened_at: DateTime<Utc>,
    pub idle_deadline: DateTime<Utc>,
}

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateResponse {
    pub pattern: PatternLabel,
    /// Posterior probability of `pattern`
    pub probability: f64,
    pub confidence: f64,
    pub active_interventions: Vec<ActiveIntervention>,
    pub turn_count: usize,
    pub decision: SchedulingDecision,
    pub probabilities: PatternProbabilities,
    pub triggered_rules: Vec<RuleId>,
    /// Tier implied by the rule count, before scheduler gating
    pub recommended_tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_with: Option<PatternLabel>,
    pub signals: SignalVector,
}

/// Result of a user action on an open intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub intervention_id: Uuid,
    pub state: SessionState,
    pub completion_progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InterventionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

/// Something that happened during [`InterventionEngine::tick`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Analysis {
        user_id: String,
        session_id: String,
        response: Box<OrchestrateResponse>,
    },
    SessionExpired {
        user_id: String,
        intervention_id: Uuid,
        outcome: InterventionOutcome,
    },
}

/// Operator-facing summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub users: usize,
    pub active_sessions: usize,
    pub pending_timers: usize,
    pub persistence_degraded: bool,
    pub consecutive_persistence_failures: u32,
    /// Failed writes since the engine started, recovered or not
    pub total_persistence_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct IdleTimer {
    user_id: String,
    intervention_id: Uuid,
}

/// (user, conversation)
type ConversationKey = (String, String);

/// Multi-user detection and intervention engine
pub struct InterventionEngine<S: EngineStore = MemoryStore> {
    config: EngineConfig,
    detector: PatternDetector,
    scheduler: InterventionScheduler,
    history: PatternHistoryService<S>,
    store: Arc<S>,
    health: PersistenceHealth,
    users: HashMap<String, UserInterventionState>,
    idle_timers: TimerQueue<IdleTimer>,
    analyses: Debouncer<ConversationKey, OrchestrateRequest>,
}

impl InterventionEngine<MemoryStore> {
    /// Engine backed by an in-memory store
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }
}

impl Default for InterventionEngine<MemoryStore> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<S: EngineStore> InterventionEngine<S> {
    pub fn with_store(config: EngineConfig, store: Arc<S>) -> Self {
        Self {
            detector: PatternDetector::new(config.clone()),
            scheduler: InterventionScheduler::new(
                config.scheduler.clone(),
                config.fatigue.clone(),
            ),
            history: PatternHistoryService::new(Arc::clone(&store), config.history.clone()),
            health: PersistenceHealth::new(config.persistence.degraded_after),
            store,
            users: HashMap::new(),
            idle_timers: TimerQueue::new(),
            analyses: Debouncer::new(Duration::milliseconds(config.debounce_ms as i64)),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn user_state(&self, user_id: &str) -> Option<&UserInterventionState> {
        self.users.get(user_id)
    }

    /// Current prior for a user across all conversations
    pub fn load_prior(&self, user_id: &str, now: DateTime<Utc>) -> PatternProbabilities {
        self.history.load_prior(user_id, now)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            users: self.users.len(),
            active_sessions: self
                .users
                .values()
                .filter(|s| s.has_active_session())
                .count(),
            pending_timers: self.idle_timers.len() + self.analyses.len(),
            persistence_degraded: self.health.is_degraded(),
            consecutive_persistence_failures: self.health.consecutive_failures(),
            total_persistence_failures: self.health.total_failures(),
        }
    }

    /// Earliest time at which [`tick`](Self::tick) has work to do
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match (self.idle_timers.next_deadline(), self.analyses.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run one analysis pass immediately
    pub fn orchestrate(
        &mut self,
        request: &OrchestrateRequest,
        now: DateTime<Utc>,
    ) -> Result<OrchestrateResponse, EngineError> {
        let (session_id, user_id, turns) = request.validate()?;

        let prior = self
            .history
            .load_prior_excluding(user_id, Some(session_id), now);
        let pass = self.detector.analyze(turns, &prior, now);
        let detection = &pass.detection;

        let mr_type = select_mr_type(
            detection,
            &pass.signals,
            self.config.scheduler.short_prompt_chars,
        );

        let state = self.users.entry(user_id.to_string()).or_default();
        state.suppression.clear_expired(now);
        state.fatigue.prune(now, &self.config.fatigue);
        state.observe_pass(detection.triggered_count());

        let input = SchedulingInput {
            mr_type,
            confidence: detection.confidence,
            candidate_tier: detection.recommended_tier,
            pattern: detection.pattern,
        };
        let mut decision = self.scheduler.decide(&input, state, now);

        if let (true, Some(tier)) = (decision.should_display, decision.tier) {
            let session =
                InterventionSession::open(user_id, session_id, mr_type, tier, detection.pattern, now);
            decision.message = Some(message_inputs(mr_type, tier, detection));
            decision.intervention_id = Some(session.id);

            state.fatigue.record_display(now);
            if tier == Tier::Hard {
                state.suppression.record_hard(now);
            }
            self.idle_timers.schedule(
                IdleTimer {
                    user_id: user_id.to_string(),
                    intervention_id: session.id,
                },
                session.idle_deadline(&self.config.session),
            );
            info!(
                user_id,
                intervention_id = %session.id,
                mr_type = %mr_type,
                tier = %tier,
                pattern = %detection.pattern,
                confidence = detection.confidence,
                "displaying intervention"
            );
            state.active_session = Some(session);
        } else {
            debug!(user_id, reason = ?decision.reason, "no intervention displayed");
        }

        let active_interventions = state
            .active_session
            .iter()
            .filter(|s| s.is_active())
            .map(|s| active_view(s, &self.config))
            .collect();

        let history = &self.history;
        self.health.write("detection", || {
            history.record_detection(user_id, session_id, detection)
        });

        Ok(OrchestrateResponse {
            pattern: detection.pattern,
            probability: detection.top_probability(),
            confidence: detection.confidence,
            active_interventions,
            turn_count: turns.len(),
            decision,
            probabilities: detection.probabilities,
            triggered_rules: detection.triggered_rules.clone(),
            recommended_tier: detection.recommended_tier,
            mixed_with: detection.mixed_with,
            signals: pass.signals.clone(),
        })
    }

    /// Queue an analysis pass `debounce_ms` after the latest submission.
    ///
    /// A later submission for the same conversation replaces the queued one
    /// and restarts the delay.
    pub fn submit_turns(
        &mut self,
        request: OrchestrateRequest,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, EngineError> {
        let (session_id, user_id, _) = request.validate()?;
        let key = (user_id.to_string(), session_id.to_string());
        Ok(self.analyses.submit(key, request, now))
    }

    /// Apply a user action to the user's open intervention
    pub fn record_action(
        &mut self,
        user_id: &str,
        intervention_id: Uuid,
        action: UserAction,
        now: DateTime<Utc>,
    ) -> Result<ActionResponse, EngineError> {
        let session = self
            .users
            .get_mut(user_id)
            .and_then(|s| s.active_session.as_mut())
            .filter(|s| s.id == intervention_id)
            .ok_or_else(|| EngineError::UnknownSession(intervention_id.to_string()))?;

        let transition = session.record(action, now, &self.config.session)?;
        let idle_key = IdleTimer {
            user_id: user_id.to_string(),
            intervention_id,
        };

        if transition.is_terminal() {
            self.idle_timers.cancel(&idle_key);
            self.finish_session(user_id, &transition, now);
        } else {
            let deadline = session.idle_deadline(&self.config.session);
            self.idle_timers.schedule(idle_key, deadline);
            debug!(user_id, %intervention_id, ?action, progress = transition.progress, "intervention interaction");
        }

        Ok(ActionResponse {
            intervention_id,
            state: transition.to,
            completion_progress: transition.progress,
            outcome: transition.outcome,
            resolution: transition.resolution,
        })
    }

    /// Fire every timer due at `now`.
    ///
    /// Idle timeouts run before debounced analyses so that an expired
    /// session no longer blocks the pass that follows it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        for timer in self.idle_timers.due(now) {
            if let Some(event) = self.expire_session(&timer.user_id, timer.intervention_id, now) {
                events.push(event);
            }
        }

        for ((user_id, session_id), request) in self.analyses.due(now) {
            match self.orchestrate(&request, now) {
                Ok(response) => events.push(EngineEvent::Analysis {
                    user_id,
                    session_id,
                    response: Box::new(response),
                }),
                Err(e) => {
                    warn!(user_id = %user_id, session_id = %session_id, error = %e, "debounced analysis failed")
                }
            }
        }

        events
    }

    fn expire_session(
        &mut self,
        user_id: &str,
        intervention_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<EngineEvent> {
        let session = self
            .users
            .get_mut(user_id)?
            .active_session
            .as_mut()
            .filter(|s| s.id == intervention_id)?;

        match session.expire(now, &self.config.session) {
            Ok(Some(transition)) => {
                let outcome = transition.outcome?;
                self.finish_session(user_id, &transition, now);
                Some(EngineEvent::SessionExpired {
                    user_id: user_id.to_string(),
                    intervention_id,
                    outcome,
                })
            }
            Ok(None) => {
                let deadline = session.idle_deadline(&self.config.session);
                self.idle_timers.schedule(
                    IdleTimer {
                        user_id: user_id.to_string(),
                        intervention_id,
                    },
                    deadline,
                );
                None
            }
            Err(e) => {
                debug!(user_id, %intervention_id, error = %e, "idle timer for resolved session ignored");
                None
            }
        }
    }

    /// Fold a resolved session into fatigue and suppression, then persist it
    fn finish_session(&mut self, user_id: &str, transition: &SessionTransition, now: DateTime<Utc>) {
        let Some(state) = self.users.get_mut(user_id) else {
            return;
        };
        let Some(session) = state.active_session.take() else {
            return;
        };
        let (Some(outcome), Some(resolution)) = (transition.outcome, transition.resolution) else {
            return;
        };

        match resolution {
            Resolution::Dismissed => {
                state.fatigue.record_dismissal(now);
                state.suppression.suppress(
                    session.mr_type,
                    now + Duration::seconds(self.config.scheduler.dismiss_suppression_secs),
                );
            }
            Resolution::Accepted => {}
            // Skipped, overridden, closed, navigated away or idled out
            _ if matches!(
                outcome,
                InterventionOutcome::Abandoned | InterventionOutcome::Browsing
            ) =>
            {
                state.fatigue.record_dismissal(now);
            }
            _ => {}
        }

        info!(
            user_id,
            intervention_id = %session.id,
            mr_type = %session.mr_type,
            ?outcome,
            ?resolution,
            progress = session.completion_progress,
            "intervention resolved"
        );

        let outcome_row = OutcomeRecord {
            user_id: user_id.to_string(),
            session_id: session.session_id.clone(),
            intervention_id: session.id,
            mr_type: session.mr_type,
            tier: session.tier,
            outcome,
            resolution,
            progress: session.completion_progress,
            opened_at: session.opened_at,
            resolved_at: now,
        };
        let store = &self.store;
        self.health
            .write("outcome", || store.append_outcome(&outcome_row));

        if resolution == Resolution::Overridden && session.tier == Tier::Hard {
            warn!(
                user_id,
                intervention_id = %session.id,
                pattern = %session.pattern,
                "hard barrier overridden"
            );
            let audit_row = AuditRecord {
                user_id: user_id.to_string(),
                session_id: session.session_id.clone(),
                intervention_id: session.id,
                mr_type: session.mr_type,
                pattern: session.pattern,
                progress: session.completion_progress,
                recorded_at: now,
            };
            self.health.write("audit", || store.append_audit(&audit_row));
        }
    }
}

fn active_view(session: &InterventionSession, config: &EngineConfig) -> ActiveIntervention {
    ActiveIntervention {
        id: session.id,
        mr_type: session.mr_type,
        tier: session.tier,
        state: session.state,
        completion_progress: session.completion_progress,
        opened_at: session.opened_at,
        idle_deadline: session.idle_deadline(&config.session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, REQUIRED_FIELDS_MESSAGE};
    use crate::intervention::types::{DecisionReason, TierAdjustment};
    use crate::detection::types::PatternDetection;
    use crate::store::DetectionRecord;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    /// Rapid exchanges with no verification, edits or rejections: fires all five rules
    fn passive_turns(n: i64) -> Vec<InteractionTurn> {
        let start = t0() - Duration::minutes(10);
        let mut turns = Vec::new();
        for i in 0..n {
            let base = start + Duration::seconds(i * 6);
            turns.push(InteractionTurn::user("Do it", base));
            turns.push(InteractionTurn::ai("Done", base + Duration::seconds(3)));
        }
        turns.push(InteractionTurn::user("Next", start + Duration::seconds(n * 6)));
        turns
    }

    fn displayed_id(response: &OrchestrateResponse) -> Uuid {
        response.decision.intervention_id.unwrap()
    }

    #[test]
    fn test_new_user_single_turn() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new(
            "conv-1",
            "new-user",
            vec![InteractionTurn::ai("Here is the function you asked for.", t0())],
        );

        let response = engine.orchestrate(&request, at(1)).unwrap();

        assert!(response.triggered_rules.contains(&RuleId::ZeroVerification));
        assert_eq!(response.triggered_rules.len(), 1);
        assert_eq!(response.recommended_tier, Some(Tier::Soft));
        assert!(response.confidence >= 0.2);
        assert!(response.decision.should_display);
        assert_eq!(response.turn_count, 1);
        assert_eq!(response.active_interventions.len(), 1);
        assert_eq!(response.decision.mr_type, Some(MrType::VerificationPrompt));
        assert!(response.decision.message.is_some());
    }

    #[test]
    fn test_returning_user_prior() {
        let engine = InterventionEngine::default();
        let past = [
            PatternLabel::A,
            PatternLabel::A,
            PatternLabel::D,
            PatternLabel::A,
            PatternLabel::A,
            PatternLabel::D,
            PatternLabel::A,
        ];
        for (day, pattern) in past.into_iter().enumerate() {
            let detection = PatternDetection {
                pattern,
                confidence: 0.6,
                probabilities: PatternProbabilities::uniform(),
                triggered_rules: vec![RuleId::BurstUsage],
                recommended_tier: Some(Tier::Soft),
                mixed_with: None,
                detected_at: t0() - Duration::days(day as i64 + 1),
            };
            engine
                .store()
                .append_detection(&DetectionRecord {
                    user_id: "returning".to_string(),
                    session_id: format!("conv-{day}"),
                    detection,
                })
                .unwrap();
        }

        let ranked = engine.load_prior("returning", t0()).ranked();
        assert_eq!(ranked[0].0, PatternLabel::A);
        assert_eq!(ranked[1].0, PatternLabel::D);
        assert!(ranked[0].1 > 0.5);
    }

    #[test]
    fn test_missing_user_id_rejected() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest {
            session_id: Some("conv-1".to_string()),
            user_id: None,
            conversation_turns: Some(vec![InteractionTurn::ai("x", t0())]),
        };

        match engine.orchestrate(&request, t0()) {
            Err(EngineError::Validation(msg)) => assert_eq!(msg, REQUIRED_FIELDS_MESSAGE),
            other => panic!("expected validation error, got {other:?}"),
        }

        let blank = OrchestrateRequest::new("conv-1", "  ", vec![]);
        assert!(matches!(
            engine.orchestrate(&blank, t0()),
            Err(EngineError::Validation(_))
        ));
        assert!(engine.store().snapshot().unwrap().detections.is_empty());
    }

    #[test]
    fn test_out_of_order_turns_rejected() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new(
            "conv-1",
            "u",
            vec![
                InteractionTurn::user("b", at(10)),
                InteractionTurn::ai("a", at(5)),
            ],
        );
        assert!(matches!(
            engine.orchestrate(&request, at(20)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_five_hard_candidates_within_cooldown() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "passive-user", passive_turns(5));

        let mut tiers = Vec::new();
        for i in 0..5 {
            let now = at(i * 25);
            let response = engine.orchestrate(&request, now).unwrap();
            assert_eq!(response.recommended_tier, Some(Tier::Hard));
            assert!(response.decision.should_display);
            tiers.push(response.decision.tier.unwrap());

            engine
                .record_action("passive-user", displayed_id(&response), UserAction::Skip, now + Duration::seconds(10))
                .unwrap();
        }

        assert_eq!(
            tiers,
            vec![Tier::Hard, Tier::Medium, Tier::Medium, Tier::Medium, Tier::Medium]
        );
    }

    #[test]
    fn test_repeated_skips_build_fatigue() {
        let mut config = EngineConfig::default();
        config.scheduler.hard_cooldown_secs = 0;
        let mut engine = InterventionEngine::new(config);
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));

        let mut decisions = Vec::new();
        for i in 0..3 {
            let now = at(i * 60);
            let response = engine.orchestrate(&request, now).unwrap();
            assert!(response.decision.should_display);
            engine
                .record_action("u", displayed_id(&response), UserAction::Skip, now + Duration::seconds(2))
                .unwrap();
            decisions.push(response.decision);
        }

        assert_eq!(decisions[0].tier, Some(Tier::Hard));
        assert_eq!(decisions[1].tier, Some(Tier::Hard));
        assert!(decisions[1].adjustments.is_empty());
        assert_eq!(decisions[2].tier, Some(Tier::Medium));
        assert_eq!(decisions[2].adjustments, vec![TierAdjustment::Fatigue]);
    }

    #[test]
    fn test_hard_allowed_again_after_cooldown() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));

        let first = engine.orchestrate(&request, t0()).unwrap();
        engine
            .record_action("u", displayed_id(&first), UserAction::Skip, at(10))
            .unwrap();

        let later = engine.orchestrate(&request, at(300)).unwrap();
        assert_eq!(later.decision.tier, Some(Tier::Hard));
    }

    #[test]
    fn test_open_intervention_blocks_new_one() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));

        let first = engine.orchestrate(&request, t0()).unwrap();
        let second = engine.orchestrate(&request, at(5)).unwrap();

        assert!(!second.decision.should_display);
        assert_eq!(second.decision.reason, DecisionReason::StateConflict);
        assert_eq!(second.active_interventions.len(), 1);
        assert_eq!(second.active_interventions[0].id, displayed_id(&first));
    }

    #[test]
    fn test_every_pass_is_persisted() {
        let mut engine = InterventionEngine::default();
        let engaged = vec![
            InteractionTurn::user("Walk me through the proof step by step", t0()),
            InteractionTurn::ai("Step one...", at(120)).verified().modified(),
        ];
        engine
            .orchestrate(&OrchestrateRequest::new("conv-1", "u", engaged), at(150))
            .unwrap();
        engine
            .orchestrate(&OrchestrateRequest::new("conv-1", "u", passive_turns(5)), at(180))
            .unwrap();

        let rows = engine.store().detections_for("u").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].detection.confidence, 0.0);
    }

    #[test]
    fn test_idle_timeout_abandons_once() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));
        let id = displayed_id(&engine.orchestrate(&request, t0()).unwrap());

        assert!(engine.tick(at(29)).is_empty());

        let events = engine.tick(at(30));
        assert_eq!(
            events,
            vec![EngineEvent::SessionExpired {
                user_id: "u".to_string(),
                intervention_id: id,
                outcome: InterventionOutcome::Abandoned,
            }]
        );
        assert!(engine.tick(at(120)).is_empty());
        assert_eq!(engine.store().outcomes().unwrap().len(), 1);
        assert!(!engine.user_state("u").unwrap().has_active_session());
        assert!(matches!(
            engine.record_action("u", id, UserAction::View, at(121)),
            Err(EngineError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_interaction_resets_idle_timer() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));
        let id = displayed_id(&engine.orchestrate(&request, t0()).unwrap());

        let update = engine.record_action("u", id, UserAction::View, at(20)).unwrap();
        assert_eq!(update.state, SessionState::Interacting);
        assert_eq!(update.completion_progress, 30);

        assert!(engine.tick(at(30)).is_empty());
        match engine.tick(at(50)).as_slice() {
            [EngineEvent::SessionExpired { outcome, .. }] => {
                assert_eq!(*outcome, InterventionOutcome::Partial)
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_explicit_resolution_cancels_idle_timer() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));
        let id = displayed_id(&engine.orchestrate(&request, t0()).unwrap());

        engine.record_action("u", id, UserAction::Apply, at(10)).unwrap();
        let done = engine.record_action("u", id, UserAction::Confirm, at(12)).unwrap();
        assert_eq!(done.state, SessionState::Completed);
        assert_eq!(done.outcome, Some(InterventionOutcome::Effective));

        assert!(engine.tick(at(600)).is_empty());
        assert_eq!(engine.status().pending_timers, 0);
    }

    #[test]
    fn test_dismissal_suppresses_type() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new(
            "conv-1",
            "u",
            vec![InteractionTurn::ai("Here is the function you asked for.", t0())],
        );
        let first = engine.orchestrate(&request, at(1)).unwrap();
        engine
            .record_action("u", displayed_id(&first), UserAction::Dismiss, at(20))
            .unwrap();

        let again = engine.orchestrate(&request, at(40)).unwrap();
        assert!(!again.decision.should_display);
        assert_eq!(again.decision.reason, DecisionReason::Suppressed);

        let after_expiry = engine.orchestrate(&request, at(20 + 600)).unwrap();
        assert!(after_expiry.decision.should_display);
    }

    #[test]
    fn test_hard_override_is_audited() {
        let mut engine = InterventionEngine::default();
        let request = OrchestrateRequest::new("conv-1", "u", passive_turns(5));
        let response = engine.orchestrate(&request, t0()).unwrap();
        assert_eq!(response.decision.tier, Some(Tier::Hard));

        let update = engine
            .record_action("u", displayed_id(&response), UserAction::Override, at(8))
            .unwrap();
        assert_eq!(update.resolution, Some(Resolution::Overridden));

        let audits = engine.store().audits().unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].pattern, PatternLabel::F);
        assert_eq!(engine.store().outcomes().unwrap().len(), 1);
    }

    #[test]
    fn test_debounce_coalesces_submissions() {
        let mut engine = InterventionEngine::default();
        let turns = passive_turns(5);

        for ms in [0, 400, 900] {
            let request = OrchestrateRequest::new("conv-1", "u", turns.clone());
            engine
                .submit_turns(request, t0() + Duration::milliseconds(ms))
                .unwrap();
        }

        assert!(engine.tick(t0() + Duration::milliseconds(1500)).is_empty());
        let events = engine.tick(t0() + Duration::milliseconds(1900));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EngineEvent::Analysis { session_id, .. } if session_id == "conv-1"));
        assert_eq!(engine.store().detections_for("u").unwrap().len(), 1);
    }

    #[test]
    fn test_submit_validates_immediately() {
        let mut engine = InterventionEngine::default();
        let result = engine.submit_turns(OrchestrateRequest::default(), t0());
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(engine.next_deadline(), None);
    }

    struct FailingStore;

    impl EngineStore for FailingStore {
        fn append_detection(&self, _: &DetectionRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        fn append_outcome(&self, _: &OutcomeRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        fn append_audit(&self, _: &AuditRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        fn detections_for(&self, _: &str) -> Result<Vec<DetectionRecord>, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn test_persistence_failure_never_blocks_display() {
        let mut engine = InterventionEngine::with_store(EngineConfig::default(), Arc::new(FailingStore));
        let request = OrchestrateRequest::new(
            "conv-1",
            "u",
            vec![InteractionTurn::ai("Here is the function you asked for.", t0())],
        );

        let first = engine.orchestrate(&request, at(1)).unwrap();
        assert!(first.decision.should_display);
        assert!(!engine.status().persistence_degraded);

        for i in 0..4 {
            engine.orchestrate(&request, at(2 + i)).unwrap();
        }
        let status = engine.status();
        assert!(status.persistence_degraded);
        assert_eq!(status.consecutive_persistence_failures, 5);
        assert_eq!(status.total_persistence_failures, 5);
    }
}
