use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{pattern::PatternProfile, record::PredictionRequest, training::ModelArtifact};

/// Which kind of predictor backs the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictorMode {
    /// A validated model artifact serves predictions.
    ModelBacked,
    /// Only the pattern profile is available.
    PatternBacked,
}

/// What a state predicts with. The profile is always present.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Model first, profile on failure.
    Model {
        /// Active artifact.
        artifact: Arc<ModelArtifact>,
        /// Fallback profile.
        profile: Arc<PatternProfile>,
    },
    /// Profile only.
    Pattern {
        /// Active profile.
        profile: Arc<PatternProfile>,
    },
}

/// Where a prediction came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionSource {
    /// The model artifact.
    Model,
    /// The profile, because no model is active.
    Pattern,
    /// The profile, because model inference failed for this call.
    PatternFallback {
        /// Why the model was skipped.
        reason: String,
    },
}

/// A served point prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted demand, MW. Finite and non-negative.
    pub demand_mw: f64,
    /// Serving path.
    pub source: PredictionSource,
    /// Version of the state that served the call.
    pub state_version: u64,
}

impl Prediction {
    /// Whether the call fell back from a failing model.
    #[must_use]
    pub const fn degraded(&self) -> bool {
        matches!(self.source, PredictionSource::PatternFallback { .. })
    }
}

/// Immutable predictor snapshot owned by the registry.
#[derive(Debug, Clone)]
pub struct PredictorState {
    version: u64,
    backing: Backing,
    activated_at: DateTime<Utc>,
}

impl PredictorState {
    /// Pattern-backed starting state.
    #[must_use]
    pub fn initial(profile: PatternProfile) -> Self {
        Self {
            version: 0,
            backing: Backing::Pattern {
                profile: Arc::new(profile),
            },
            activated_at: Utc::now(),
        }
    }

    /// Successor state serving `artifact`, keeping the current profile.
    #[must_use]
    pub fn with_model(&self, artifact: Arc<ModelArtifact>) -> Self {
        self.successor(Backing::Model {
            artifact,
            profile: Arc::clone(self.profile()),
        })
    }

    /// Successor state with a fresh profile, keeping any active model.
    #[must_use]
    pub fn with_profile(&self, profile: PatternProfile) -> Self {
        let profile = Arc::new(profile);
        let backing = match &self.backing {
            Backing::Model { artifact, .. } => Backing::Model {
                artifact: Arc::clone(artifact),
                profile,
            },
            Backing::Pattern { .. } => Backing::Pattern { profile },
        };
        self.successor(backing)
    }

    fn successor(&self, backing: Backing) -> Self {
        Self {
            version: self.version + 1,
            backing,
            activated_at: Utc::now(),
        }
    }

    /// Monotonic state version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> PredictorMode {
        match self.backing {
            Backing::Model { .. } => PredictorMode::ModelBacked,
            Backing::Pattern { .. } => PredictorMode::PatternBacked,
        }
    }

    /// Backing predictors.
    #[must_use]
    pub const fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Active pattern profile.
    #[must_use]
    pub const fn profile(&self) -> &Arc<PatternProfile> {
        match &self.backing {
            Backing::Model { profile, .. } | Backing::Pattern { profile } => profile,
        }
    }

    /// Active model artifact, if any.
    #[must_use]
    pub const fn artifact(&self) -> Option<&Arc<ModelArtifact>> {
        match &self.backing {
            Backing::Model { artifact, .. } => Some(artifact),
            Backing::Pattern { .. } => None,
        }
    }

    /// When this state was installed.
    #[must_use]
    pub const fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    /// Predicts demand. Never fails; model errors degrade to the profile for this call.
    #[must_use]
    pub fn predict(&self, request: &PredictionRequest) -> Prediction {
        let (value, source) = match &self.backing {
            Backing::Pattern { profile } => (profile.predict(request), PredictionSource::Pattern),
            Backing::Model { artifact, profile } => match artifact.predict(request) {
                Ok(value) => (value, PredictionSource::Model),
                Err(err) => (
                    profile.predict(request),
                    PredictionSource::PatternFallback {
                        reason: err.to_string(),
                    },
                ),
            },
        };
        Prediction {
            demand_mw: if value.is_finite() { value.max(0.0) } else { 0.0 },
            source,
            state_version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pattern::PatternConfig,
        record::{Dataset, DemandRecord},
        training::Trainer,
    };

    fn dataset() -> Dataset {
        Dataset::new(
            (0..96_u32)
                .map(|i| {
                    let hour = (i % 24) as u8;
                    DemandRecord::new(800.0 + 25.0 * f64::from(hour), hour, ((i / 24) % 7) as u8)
                        .with_temperature(20.0 + f64::from(i % 5))
                })
                .collect(),
        )
    }

    #[test]
    fn initial_state_is_pattern_backed() {
        let state = PredictorState::initial(PatternProfile::fallback(&PatternConfig::default()));
        assert_eq!(state.mode(), PredictorMode::PatternBacked);
        assert_eq!(state.version(), 0);
        let prediction = state.predict(&PredictionRequest::new(25.0, 0, 0, 1).unwrap());
        assert_eq!(prediction.source, PredictionSource::Pattern);
        assert_eq!(prediction.demand_mw, 3500.0);
    }

    #[test]
    fn model_state_serves_model_and_keeps_it_across_profile_refresh() {
        let data = dataset();
        let profile = PatternProfile::learn(&data, &PatternConfig::default());
        let artifact = Arc::new(Trainer::default().train(&data, 1).unwrap());
        let state = PredictorState::initial(profile.clone()).with_model(artifact);
        assert_eq!(state.mode(), PredictorMode::ModelBacked);
        let refreshed = state.with_profile(profile);
        assert_eq!(refreshed.mode(), PredictorMode::ModelBacked);
        assert_eq!(refreshed.version(), 2);
        let prediction = refreshed.predict(&PredictionRequest::new(22.0, 10, 1, 1).unwrap());
        assert_eq!(prediction.source, PredictionSource::Model);
        assert!((prediction.demand_mw - 1050.0).abs() < 1e-3);
    }

    #[test]
    fn broken_model_degrades_per_call() {
        let data = dataset();
        let artifact = Trainer::default().train(&data, 1).unwrap();
        let mut raw = serde_json::to_value(&artifact).unwrap();
        raw["weights"] = serde_json::json!([1.0, 2.0]);
        let broken: ModelArtifact = serde_json::from_value(raw).unwrap();
        let state = PredictorState::initial(PatternProfile::learn(&data, &PatternConfig::default()))
            .with_model(Arc::new(broken));
        let prediction = state.predict(&PredictionRequest::new(22.0, 10, 1, 1).unwrap());
        assert!(prediction.degraded());
        assert!(prediction.demand_mw.is_finite() && prediction.demand_mw >= 0.0);
        assert_eq!(state.mode(), PredictorMode::ModelBacked);
    }
}
