//! Per-user intervention state
//!
//! Fatigue, suppression and the open session for one user, held as plain
//! values. The scheduler only reads this state; the engine applies the
//! decision and session events to it.

use crate::config::FatigueConfig;
use crate::intervention::session::InterventionSession;
use crate::intervention::types::MrType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FatigueEventKind {
    Display,
    Dismissal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FatigueEvent {
    kind: FatigueEventKind,
    at: DateTime<Utc>,
}

/// Recent displays and dismissals with exponential decay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FatigueState {
    events: VecDeque<FatigueEvent>,
}

impl FatigueState {
    pub fn record_display(&mut self, at: DateTime<Utc>) {
        self.push(FatigueEventKind::Display, at);
    }

    pub fn record_dismissal(&mut self, at: DateTime<Utc>) {
        self.push(FatigueEventKind::Dismissal, at);
    }

    fn push(&mut self, kind: FatigueEventKind, at: DateTime<Utc>) {
        self.events.push_back(FatigueEvent { kind, at });
    }

    /// Forget events older than the window
    pub fn prune(&mut self, now: DateTime<Utc>, config: &FatigueConfig) {
        let cutoff = now - Duration::seconds(config.window_secs);
        while self.events.front().is_some_and(|e| e.at < cutoff) {
            self.events.pop_front();
        }
    }

    /// Fatigue score in 0-1.
    ///
    /// ```text
    /// displays  = Σ 0.5^(age / half_life) over displays in the window
    /// dismissed = Σ 0.5^(age / half_life) over dismissals in the window
    /// score     = w_d × min(displays / saturation, 1) + w_x × min(dismissed / displays, 1)
    /// ```
    pub fn score(&self, now: DateTime<Utc>, config: &FatigueConfig) -> f64 {
        let window = config.window_secs as f64;
        let mut displays = 0.0;
        let mut dismissals = 0.0;

        for event in &self.events {
            let age = (now - event.at).num_milliseconds() as f64 / 1000.0;
            if !(0.0..=window).contains(&age) {
                continue;
            }
            let weight = 0.5_f64.powf(age / config.half_life_secs);
            match event.kind {
                FatigueEventKind::Display => displays += weight,
                FatigueEventKind::Dismissal => dismissals += weight,
            }
        }

        let pressure = (displays / config.display_saturation).min(1.0);
        let dismissal_ratio = if displays > 0.0 {
            (dismissals / displays).min(1.0)
        } else {
            0.0
        };

        (config.display_weight * pressure + config.dismissal_weight * dismissal_ratio)
            .clamp(0.0, 1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Dismissal suppression per intervention type, plus the hard-barrier cooldown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuppressionState {
    dismissed_until: BTreeMap<MrType, DateTime<Utc>>,
    last_hard_at: Option<DateTime<Utc>>,
}

impl SuppressionState {
    /// Suppress a type until `until`, keeping the later expiry if one exists
    pub fn suppress(&mut self, mr_type: MrType, until: DateTime<Utc>) {
        let entry = self.dismissed_until.entry(mr_type).or_insert(until);
        if until > *entry {
            *entry = until;
        }
    }

    pub fn is_suppressed(&self, mr_type: MrType, now: DateTime<Utc>) -> bool {
        self.dismissed_until
            .get(&mr_type)
            .is_some_and(|until| now < *until)
    }

    /// Drop expired entries
    pub fn clear_expired(&mut self, now: DateTime<Utc>) {
        self.dismissed_until.retain(|_, until| now < *until);
    }

    pub fn record_hard(&mut self, at: DateTime<Utc>) {
        self.last_hard_at = Some(at);
    }

    pub fn last_hard_at(&self) -> Option<DateTime<Utc>> {
        self.last_hard_at
    }

    /// Whether a hard barrier fired less than `cooldown_secs` ago
    pub fn in_hard_cooldown(&self, now: DateTime<Utc>, cooldown_secs: i64) -> bool {
        self.last_hard_at
            .is_some_and(|at| now - at < Duration::seconds(cooldown_secs))
    }
}

/// Everything the scheduler needs to know about one user
#[derive(Debug, Clone, Default)]
pub struct UserInterventionState {
    pub fatigue: FatigueState,
    pub suppression: SuppressionState,
    /// Consecutive analysis passes with at least one triggered rule
    pub consecutive_triggers: u32,
    pub active_session: Option<InterventionSession>,
}

impl UserInterventionState {
    /// Count a pass toward escalation, resetting on a pass with no evidence
    pub fn observe_pass(&mut self, triggered_count: usize) {
        if triggered_count > 0 {
            self.consecutive_triggers = self.consecutive_triggers.saturating_add(1);
        } else {
            self.consecutive_triggers = 0;
        }
    }

    pub fn has_active_session(&self) -> bool {
        self.active_session.as_ref().is_some_and(|s| s.is_active())
    }
}
