//! Append-only persistence
//!
//! Detection history, intervention outcomes and hard-barrier audit entries
//! are appended through [`EngineStore`]. Rows are never updated in place.
//! [`MemoryStore`] keeps everything in memory and can be saved to and
//! restored from JSON.

use crate::detection::types::{PatternDetection, PatternLabel, Tier};
use crate::error::StoreError;
use crate::intervention::types::{InterventionOutcome, MrType, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// One analysis pass, as stored for future priors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub user_id: String,
    pub session_id: String,
    pub detection: PatternDetection,
}

impl DetectionRecord {
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.detection.detected_at
    }
}

/// A resolved intervention session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub user_id: String,
    pub session_id: String,
    pub intervention_id: Uuid,
    pub mr_type: MrType,
    pub tier: Tier,
    pub outcome: InterventionOutcome,
    pub resolution: Resolution,
    pub progress: u8,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

/// A user proceeding past a hard barrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub user_id: String,
    pub session_id: String,
    pub intervention_id: Uuid,
    pub mr_type: MrType,
    pub pattern: PatternLabel,
    pub progress: u8,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only storage backend
pub trait EngineStore: Send + Sync {
    fn append_detection(&self, record: &DetectionRecord) -> Result<(), StoreError>;

    fn append_outcome(&self, record: &OutcomeRecord) -> Result<(), StoreError>;

    fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Every stored detection for a user, oldest first
    fn detections_for(&self, user_id: &str) -> Result<Vec<DetectionRecord>, StoreError>;
}

/// Serializable contents of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeRecord>,
    #[serde(default)]
    pub audits: Vec<AuditRecord>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            rows: RwLock::new(snapshot),
        }
    }

    /// Save all rows to JSON
    pub fn to_json(&self) -> Result<String, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(serde_json::to_string(&*rows)?)
    }

    /// Load rows from JSON
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Replace all rows with those in `json`
    pub fn load_json(&self, json: &str) -> Result<(), StoreError> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        *rows = snapshot;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.rows.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    pub fn outcomes(&self) -> Result<Vec<OutcomeRecord>, StoreError> {
        Ok(self.rows.read().map_err(|_| StoreError::Poisoned)?.outcomes.clone())
    }

    pub fn audits(&self) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self.rows.read().map_err(|_| StoreError::Poisoned)?.audits.clone())
    }
}

impl EngineStore for MemoryStore {
    fn append_detection(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        rows.detections.push(record.clone());
        Ok(())
    }

    fn append_outcome(&self, record: &OutcomeRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        rows.outcomes.push(record.clone());
        Ok(())
    }

    fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        rows.audits.push(record.clone());
        Ok(())
    }

    fn detections_for(&self, user_id: &str) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(rows
            .detections
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Tracks write failures so persistence never blocks a decision.
///
/// Each write is retried once. Failures are swallowed; after
/// `degraded_after` consecutive failed writes the store is reported
/// degraded and a warning is logged once.
#[derive(Debug, Clone)]
pub struct PersistenceHealth {
    degraded_after: u32,
    consecutive_failures: u32,
    total_failures: u64,
    warned: bool,
}

impl PersistenceHealth {
    pub fn new(degraded_after: u32) -> Self {
        Self {
            degraded_after: degraded_after.max(1),
            consecutive_failures: 0,
            total_failures: 0,
            warned: false,
        }
    }

    /// Run a write with one retry; returns whether it eventually succeeded
    pub fn write<F>(&mut self, what: &str, mut op: F) -> bool
    where
        F: FnMut() -> Result<(), StoreError>,
    {
        let first = match op() {
            Ok(()) => {
                self.record_success();
                return true;
            }
            Err(e) => e,
        };
        warn!(what, error = %first, "persistence write failed, retrying once");

        match op() {
            Ok(()) => {
                self.record_success();
                true
            }
            Err(e) => {
                self.record_failure(what, &e);
                false
            }
        }
    }

    fn record_success(&mut self) {
        if self.warned {
            tracing::info!("persistence recovered");
        }
        self.consecutive_failures = 0;
        self.warned = false;
    }

    fn record_failure(&mut self, what: &str, error: &StoreError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        if self.is_degraded() && !self.warned {
            warn!(
                what,
                error = %error,
                consecutive_failures = self.consecutive_failures,
                "persistence degraded: history writes are being dropped"
            );
            self.warned = true;
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.degraded_after
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{PatternProbabilities, RuleId};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn detection_record(user: &str, pattern: PatternLabel) -> DetectionRecord {
        DetectionRecord {
            user_id: user.to_string(),
            session_id: "conv-1".to_string(),
            detection: PatternDetection {
                pattern,
                confidence: 0.5,
                probabilities: PatternProbabilities::uniform(),
                triggered_rules: vec![RuleId::ZeroVerification],
                recommended_tier: Some(Tier::Soft),
                mixed_with: None,
                detected_at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn test_detections_filtered_by_user() {
        let store = MemoryStore::new();
        store.append_detection(&detection_record("alice", PatternLabel::A)).unwrap();
        store.append_detection(&detection_record("bob", PatternLabel::F)).unwrap();
        store.append_detection(&detection_record("alice", PatternLabel::D)).unwrap();

        let alice = store.detections_for("alice").unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].detection.pattern, PatternLabel::A);
        assert_eq!(alice[1].detection.pattern, PatternLabel::D);
        assert!(store.detections_for("carol").unwrap().is_empty());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let store = MemoryStore::new();
        store.append_detection(&detection_record("alice", PatternLabel::A)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, store.to_json().unwrap()).unwrap();

        let restored = MemoryStore::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored.snapshot().unwrap(), store.snapshot().unwrap());
    }

    #[test]
    fn test_load_json_rejects_garbage() {
        let store = MemoryStore::new();
        assert!(matches!(store.load_json("{not json"), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_retry_once_then_succeed() {
        let mut health = PersistenceHealth::new(5);
        let attempts = Cell::new(0);

        let ok = health.write("detection", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(StoreError::Unavailable("flaky".to_string()))
            } else {
                Ok(())
            }
        });

        assert!(ok);
        assert_eq!(attempts.get(), 2);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_degraded_after_repeated_failures() {
        let mut health = PersistenceHealth::new(5);
        let attempts = Cell::new(0);
        let failing = || {
            attempts.set(attempts.get() + 1);
            Err(StoreError::Unavailable("down".to_string()))
        };

        for _ in 0..4 {
            assert!(!health.write("detection", failing));
        }
        assert!(!health.is_degraded());
        assert!(!health.write("detection", failing));
        assert!(health.is_degraded());
        assert_eq!(attempts.get(), 10);

        assert!(health.write("detection", || Ok(())));
        assert!(!health.is_degraded());
        assert_eq!(health.total_failures(), 5);
    }
}
