use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::ForecastResult,
    pattern::PatternProfile,
    predictor::{Prediction, PredictionSource, PredictorState},
    record::PredictionRequest,
    telemetry::ForecastTelemetry,
    training::ModelArtifact,
};

/// Sole owner of the live predictor state.
///
/// Swaps replace the whole `Arc<PredictorState>` under a brief write lock;
/// every prediction runs against one snapshot taken before inference.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<Arc<PredictorState>>,
    telemetry: ForecastTelemetry,
}

impl Registry {
    /// Creates a pattern-backed registry.
    #[must_use]
    pub fn new(profile: PatternProfile, telemetry: ForecastTelemetry) -> Self {
        Self {
            state: RwLock::new(Arc::new(PredictorState::initial(profile))),
            telemetry,
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<PredictorState> {
        Arc::clone(&self.state.read())
    }

    /// Installs a model artifact after validating it against the feature schema.
    ///
    /// On `ModelLoad` the state is left unchanged.
    pub fn activate_model(&self, artifact: Arc<ModelArtifact>) -> ForecastResult<Arc<PredictorState>> {
        if let Err(err) = artifact.validate() {
            let _ = self.telemetry.log(
                LogLevel::Warn,
                "gridcast.registry.rejected",
                json!({ "artifact": artifact.id().to_string(), "version": artifact.version(), "error": err.to_string() }),
            );
            return Err(err);
        }
        let state = self.swap(|current| current.with_model(Arc::clone(&artifact)));
        self.announce(&state, "model");
        Ok(state)
    }

    /// Installs a freshly learned profile, keeping any active model.
    pub fn refresh_profile(&self, profile: PatternProfile) -> Arc<PredictorState> {
        let state = self.swap(|current| current.with_profile(profile));
        self.announce(&state, "profile");
        state
    }

    /// Never-failing point prediction against one state snapshot.
    #[must_use]
    pub fn predict(&self, request: &PredictionRequest) -> Prediction {
        let prediction = self.current().predict(request);
        if let PredictionSource::PatternFallback { reason } = &prediction.source {
            let _ = self.telemetry.log(
                LogLevel::Warn,
                "gridcast.predict.degraded",
                json!({ "state_version": prediction.state_version, "reason": reason }),
            );
        }
        prediction
    }

    fn swap(&self, next: impl FnOnce(&PredictorState) -> PredictorState) -> Arc<PredictorState> {
        let mut guard = self.state.write();
        let state = Arc::new(next(&guard));
        *guard = Arc::clone(&state);
        state
    }

    fn announce(&self, state: &PredictorState, change: &str) {
        let payload = json!({
            "version": state.version(),
            "mode": state.mode(),
            "change": change,
            "artifact_version": state.artifact().map(|artifact| artifact.version()),
        });
        let _ = self
            .telemetry
            .log(LogLevel::Info, "gridcast.registry.swapped", payload.clone());
        let _ = self.telemetry.event("gridcast.registry.swapped", payload);
    }
}
