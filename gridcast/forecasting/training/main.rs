//! Regression training: seeded split, least squares fit and hold-out scoring.

/// Hold-out metrics.
pub mod evaluation;
/// Normal-equation least squares.
pub mod ols;

use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayView1};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    error::{ForecastError, ForecastResult},
    features::{
        feature_schema, to_matrix, vectorize_record, vectorize_request, FeatureDefaults,
        FeatureVector, Standardizer, FEATURE_COUNT, FEATURE_ORDER,
    },
    pattern::{PatternConfig, PatternProfile},
    record::{Dataset, PredictionRequest},
    telemetry::ForecastTelemetry,
};

use evaluation::{evaluate, EvaluationMetrics};

/// Trainer knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fewer rows than this fails with `InsufficientData`.
    pub min_rows: usize,
    /// Shuffle seed.
    pub seed: u64,
    /// Share of rows held out for evaluation.
    pub holdout_ratio: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: 10,
            seed: 42,
            holdout_ratio: 0.2,
        }
    }
}

// relative slack so exact fits are not lost to rounding
const MAE_SLACK_MW: f64 = 1e-9;

/// Immutable output of one successful training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    id: Uuid,
    version: u64,
    weights: Vec<f64>,
    intercept: f64,
    standardizer: Standardizer,
    feature_order: Vec<String>,
    defaults: FeatureDefaults,
    metrics: EvaluationMetrics,
    #[serde(default)]
    baseline: Option<EvaluationMetrics>,
    trained_at: DateTime<Utc>,
    row_count: usize,
    train_rows: usize,
    holdout_rows: usize,
    seed: u64,
}

impl ModelArtifact {
    /// Artifact identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Monotonic artifact version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Weights on standardized features, in `feature_order`.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Constant term.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Training-time standardization.
    #[must_use]
    pub const fn standardizer(&self) -> &Standardizer {
        &self.standardizer
    }

    /// Feature names the weights refer to.
    #[must_use]
    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    /// Fill values for omitted inputs.
    #[must_use]
    pub const fn defaults(&self) -> &FeatureDefaults {
        &self.defaults
    }

    /// Hold-out metrics.
    #[must_use]
    pub const fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    /// Hold-out metrics of a pattern profile learned on the same training rows.
    #[must_use]
    pub const fn baseline(&self) -> Option<&EvaluationMetrics> {
        self.baseline.as_ref()
    }

    /// Whether hold-out MAE is no worse than the pattern baseline's.
    /// Artifacts without a baseline are accepted.
    #[must_use]
    pub fn outperforms_pattern(&self) -> bool {
        !self.baseline.is_some_and(|baseline| {
            self.metrics.mae > baseline.mae + MAE_SLACK_MW * (1.0 + baseline.mae)
        })
    }

    /// Training time.
    #[must_use]
    pub const fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Dataset size at training time.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Rows used for fitting.
    #[must_use]
    pub const fn train_rows(&self) -> usize {
        self.train_rows
    }

    /// Rows used for evaluation.
    #[must_use]
    pub const fn holdout_rows(&self) -> usize {
        self.holdout_rows
    }

    /// Shuffle seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Checks the artifact against the current feature schema and its own shapes.
    pub fn validate(&self) -> ForecastResult<()> {
        if self.feature_order.len() != FEATURE_COUNT
            || self
                .feature_order
                .iter()
                .zip(FEATURE_ORDER)
                .any(|(stored, expected)| stored != expected)
        {
            return Err(ForecastError::ModelLoad(format!(
                "feature order {:?} does not match schema {:?}",
                self.feature_order, FEATURE_ORDER
            )));
        }
        if self.weights.len() != FEATURE_COUNT || self.standardizer.dim() != FEATURE_COUNT {
            return Err(ForecastError::ModelLoad(format!(
                "artifact has {} weights and {} scaling columns, expected {FEATURE_COUNT}",
                self.weights.len(),
                self.standardizer.dim()
            )));
        }
        let finite = self.intercept.is_finite()
            && self.weights.iter().all(|w| w.is_finite())
            && self.standardizer.mean().iter().all(|m| m.is_finite())
            && self
                .standardizer
                .std()
                .iter()
                .all(|s| s.is_finite() && *s > 0.0);
        if !finite {
            return Err(ForecastError::ModelLoad(
                "artifact contains non-finite parameters".into(),
            ));
        }
        Ok(())
    }

    /// Raw linear output for a feature vector (may be negative).
    pub fn score(&self, vector: &[f64]) -> ForecastResult<f64> {
        let scaled = self.standardizer.transform_row(vector)?;
        if scaled.len() != self.weights.len() {
            return Err(ForecastError::ModelLoad(format!(
                "expected {} features, got {}",
                self.weights.len(),
                scaled.len()
            )));
        }
        Ok(ArrayView1::from(&scaled[..]).dot(&ArrayView1::from(&self.weights[..])) + self.intercept)
    }

    /// Model inference for a request.
    ///
    /// Fails on schema mismatch and on non-finite or negative output; the
    /// predictor turns any failure into a pattern fallback.
    pub fn predict(&self, request: &PredictionRequest) -> ForecastResult<f64> {
        self.validate()?;
        let value = self.score(&vectorize_request(request, &self.defaults))?;
        if !value.is_finite() {
            return Err(ForecastError::ModelLoad(format!(
                "model produced non-finite output {value}"
            )));
        }
        if value < 0.0 {
            return Err(ForecastError::ModelLoad(format!(
                "model produced negative demand {value:.3}"
            )));
        }
        Ok(value)
    }
}

/// Fits linear models against dataset snapshots.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
    pattern: PatternConfig,
}

impl Trainer {
    /// Creates a trainer.
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            pattern: PatternConfig::default(),
        }
    }

    /// Profile settings for the hold-out baseline.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: PatternConfig) -> Self {
        self.pattern = pattern;
        self
    }

    /// Trainer configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Trains version `version` of the model on `dataset`.
    pub fn train(&self, dataset: &Dataset, version: u64) -> ForecastResult<ModelArtifact> {
        self.train_with_telemetry(dataset, version, None)
    }

    /// Trains with optional telemetry instrumentation.
    pub fn train_with_telemetry(
        &self,
        dataset: &Dataset,
        version: u64,
        telemetry: Option<&ForecastTelemetry>,
    ) -> ForecastResult<ModelArtifact> {
        let rows = dataset.len();
        if rows < self.config.min_rows.max(2) {
            log(
                telemetry,
                LogLevel::Info,
                "gridcast.training.insufficient",
                json!({ "rows": rows, "needed": self.config.min_rows }),
            );
            return Err(ForecastError::InsufficientData {
                needed: self.config.min_rows.max(2),
                got: rows,
            });
        }

        let (train_idx, holdout_idx) = self.split(rows);
        let records = dataset.records();
        let defaults = FeatureDefaults::from_records(train_idx.iter().map(|&i| &records[i]));
        let vectors = |indices: &[usize]| -> Vec<FeatureVector> {
            indices
                .iter()
                .map(|&i| vectorize_record(&records[i], &defaults))
                .collect()
        };
        let targets = |indices: &[usize]| -> Array1<f64> {
            indices.iter().map(|&i| records[i].demand_mw).collect()
        };

        let train_x = to_matrix(&vectors(&train_idx));
        let standardizer = Standardizer::fit(&train_x);
        let scaled = standardizer.transform(&train_x)?;
        log(
            telemetry,
            LogLevel::Debug,
            "gridcast.training.fit",
            json!({ "train_rows": train_idx.len(), "holdout_rows": holdout_idx.len(), "seed": self.config.seed }),
        );
        let fit = ols::fit(scaled.view(), targets(&train_idx).view())?;

        let holdout_x = standardizer.transform(&to_matrix(&vectors(&holdout_idx)))?;
        let predicted: Vec<f64> = holdout_x.rows().into_iter().map(|row| fit.predict_row(row)).collect();
        let actual = targets(&holdout_idx);
        let actual = actual.as_slice().unwrap_or(&[]);
        let metrics = evaluate(actual, &predicted);

        let profile = PatternProfile::learn(
            &Dataset::new(train_idx.iter().map(|&i| records[i].clone()).collect()),
            &self.pattern,
        );
        let pattern_predicted: Vec<f64> = holdout_idx
            .iter()
            .map(|&i| {
                let record = &records[i];
                profile.estimate(
                    record.temperature.unwrap_or(f64::NAN),
                    record.hour,
                    record.day_of_week,
                )
            })
            .collect();
        let baseline = evaluate(actual, &pattern_predicted);

        let artifact = ModelArtifact {
            id: Uuid::new_v4(),
            version,
            weights: fit.weights,
            intercept: fit.intercept,
            standardizer,
            feature_order: feature_schema(),
            defaults,
            metrics,
            baseline: Some(baseline),
            trained_at: Utc::now(),
            row_count: rows,
            train_rows: train_idx.len(),
            holdout_rows: holdout_idx.len(),
            seed: self.config.seed,
        };
        log(
            telemetry,
            LogLevel::Info,
            "gridcast.training.completed",
            json!({
                "version": version,
                "rows": rows,
                "mae": metrics.mae,
                "rmse": metrics.rmse,
                "r2": metrics.r2,
                "pattern_mae": baseline.mae,
            }),
        );
        Ok(artifact)
    }

    // seeded shuffle, then holdout_ratio of the rows (at least one, never all) go to evaluation
    fn split(&self, rows: usize) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..rows).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        indices.shuffle(&mut rng);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let holdout = ((rows as f64) * self.config.holdout_ratio).round() as usize;
        let holdout = holdout.clamp(1, rows - 1);
        let evaluation = indices.split_off(rows - holdout);
        (indices, evaluation)
    }
}

fn log(
    telemetry: Option<&ForecastTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DemandRecord;

    fn linear_dataset(rows: u32) -> Dataset {
        Dataset::new(
            (0..rows)
                .map(|i| {
                    let hour = (i % 24) as u8;
                    let temperature = 15.0 + f64::from(i % 17);
                    let demand = 2000.0 + 40.0 * f64::from(hour) + 10.0 * (temperature - 20.0);
                    DemandRecord::new(demand, hour, ((i / 24) % 7) as u8)
                        .with_temperature(temperature)
                        .with_month(1 + ((i / 168) % 12) as u8)
                })
                .collect(),
        )
    }

    #[test]
    fn rejects_small_datasets() {
        let err = Trainer::default().train(&linear_dataset(9), 1).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { needed: 10, got: 9 }));
    }

    #[test]
    fn fits_linear_demand_exactly() {
        let artifact = Trainer::default().train(&linear_dataset(200), 3).unwrap();
        assert_eq!(artifact.version(), 3);
        assert_eq!(artifact.train_rows(), 160);
        assert_eq!(artifact.holdout_rows(), 40);
        assert!(artifact.metrics().mae < 1e-3);
        assert!(artifact.metrics().r2 > 0.999_99);
        assert!(artifact.baseline().unwrap().mae > artifact.metrics().mae);
        assert!(artifact.outperforms_pattern());
        artifact.validate().unwrap();
        let request = PredictionRequest::new(25.0, 12, 2, 1).unwrap();
        let predicted = artifact.predict(&request).unwrap();
        assert!((predicted - (2000.0 + 480.0 + 50.0)).abs() < 1e-3);
    }

    #[test]
    fn split_is_seeded() {
        let trainer = Trainer::default();
        assert_eq!(trainer.split(50), trainer.split(50));
        let other = Trainer::new(TrainingConfig {
            seed: 7,
            ..TrainingConfig::default()
        });
        assert_ne!(trainer.split(50), other.split(50));
        let (train, holdout) = trainer.split(2);
        assert_eq!((train.len(), holdout.len()), (1, 1));
    }

    #[test]
    fn identical_inputs_give_identical_weights() {
        let data = linear_dataset(120);
        let a = Trainer::default().train(&data, 1).unwrap();
        let b = Trainer::default().train(&data, 1).unwrap();
        assert_eq!(a.weights(), b.weights());
        assert_eq!(a.metrics(), b.metrics());
    }

    #[test]
    fn schema_mismatch_is_a_model_load_error() {
        let artifact = Trainer::default().train(&linear_dataset(50), 1).unwrap();
        let mut raw = serde_json::to_value(&artifact).unwrap();
        raw["feature_order"] = serde_json::json!(["hour", "temperature", "day_of_week", "month", "humidity", "is_holiday"]);
        let broken: ModelArtifact = serde_json::from_value(raw).unwrap();
        let request = PredictionRequest::new(20.0, 3, 1, 1).unwrap();
        assert_eq!(broken.predict(&request).unwrap_err().kind(), "ModelLoadError");
    }

    #[test]
    fn negative_output_is_rejected() {
        let artifact = Trainer::default().train(&linear_dataset(50), 1).unwrap();
        let mut raw = serde_json::to_value(&artifact).unwrap();
        raw["intercept"] = serde_json::json!(-1.0e9);
        let broken: ModelArtifact = serde_json::from_value(raw).unwrap();
        let request = PredictionRequest::new(20.0, 3, 1, 1).unwrap();
        assert!(broken.predict(&request).is_err());
    }

    #[test]
    fn evening_peak_loses_to_pattern_baseline() {
        let data = Dataset::new(
            (0..200_u32)
                .map(|i| {
                    let hour = (i % 24) as u8;
                    let offset = f64::from(hour) - 19.0;
                    let demand = 1000.0 + 800.0 * (-offset * offset / 8.0).exp();
                    DemandRecord::new(demand, hour, ((i / 24) % 7) as u8).with_temperature(20.0)
                })
                .collect(),
        );
        let artifact = Trainer::default().train(&data, 1).unwrap();
        let baseline = artifact.baseline().unwrap();
        assert_eq!(baseline.samples, artifact.metrics().samples);
        assert!(baseline.mae < artifact.metrics().mae);
        assert!(!artifact.outperforms_pattern());
    }

    #[test]
    fn artifacts_without_baseline_are_accepted() {
        let artifact = Trainer::default().train(&linear_dataset(50), 1).unwrap();
        let mut raw = serde_json::to_value(&artifact).unwrap();
        raw.as_object_mut().unwrap().remove("baseline");
        let legacy: ModelArtifact = serde_json::from_value(raw).unwrap();
        assert!(legacy.baseline().is_none());
        assert!(legacy.outperforms_pattern());
    }
}
