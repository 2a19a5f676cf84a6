//! Pattern history and historical priors
//!
//! Every detection is appended to the store. The prior for the next pass is
//! built from the user's detections inside the trailing window, each
//! contributing to its top pattern with exponentially decaying weight:
//!
//! ```text
//! w(row)   = confidence × 0.5^(age_days / half_life_days)
//! prior(p) = (Σ w(rows with pattern p) + smoothing) / (Σ w + 6 × smoothing)
//! ```
//!
//! A user with no qualifying rows gets exactly the uniform prior.

use crate::config::HistoryConfig;
use crate::detection::types::{PatternDetection, PatternLabel, PatternProbabilities};
use crate::error::StoreError;
use crate::store::{DetectionRecord, EngineStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Loads priors from, and appends detections to, an [`EngineStore`]
pub struct PatternHistoryService<S: EngineStore> {
    store: Arc<S>,
    config: HistoryConfig,
}

impl<S: EngineStore> PatternHistoryService<S> {
    pub fn new(store: Arc<S>, config: HistoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Prior for a user at `now`.
    ///
    /// A store read failure falls back to the uniform prior.
    pub fn load_prior(&self, user_id: &str, now: DateTime<Utc>) -> PatternProbabilities {
        self.load_prior_excluding(user_id, None, now)
    }

    /// Prior built only from other conversations, so a conversation's own
    /// earlier passes do not feed back into its posterior
    pub fn load_prior_excluding(
        &self,
        user_id: &str,
        current_session: Option<&str>,
        now: DateTime<Utc>,
    ) -> PatternProbabilities {
        match self.store.detections_for(user_id) {
            Ok(mut records) => {
                if let Some(session_id) = current_session {
                    records.retain(|r| r.session_id != session_id);
                }
                prior_from_records(&records, now, &self.config)
            }
            Err(e) => {
                warn!(user_id, error = %e, "history unavailable, using uniform prior");
                PatternProbabilities::uniform()
            }
        }
    }

    /// Append a detection row
    pub fn record_detection(
        &self,
        user_id: &str,
        session_id: &str,
        detection: &PatternDetection,
    ) -> Result<(), StoreError> {
        self.store.append_detection(&DetectionRecord {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            detection: detection.clone(),
        })
    }
}

/// Decayed, smoothed prior from stored detections
pub fn prior_from_records(
    records: &[DetectionRecord],
    now: DateTime<Utc>,
    config: &HistoryConfig,
) -> PatternProbabilities {
    let window_start = now - Duration::days(config.window_days);
    let mut weights = [0.0; PatternLabel::COUNT];
    let mut qualifying = 0usize;

    for record in records {
        let at = record.recorded_at();
        // Rows from the future (clock skew) or outside the window are skipped
        if at < window_start || at > now {
            continue;
        }
        let age_days = (now - at).num_seconds() as f64 / SECONDS_PER_DAY;
        let weight = record.detection.confidence.clamp(0.0, 1.0)
            * 0.5_f64.powf(age_days / config.half_life_days);
        weights[record.detection.pattern.index()] += weight;
        qualifying += 1;
    }

    if qualifying == 0 {
        return PatternProbabilities::uniform();
    }

    for w in weights.iter_mut() {
        *w += config.smoothing;
    }
    PatternProbabilities::from_weights(weights).unwrap_or_default()
}
