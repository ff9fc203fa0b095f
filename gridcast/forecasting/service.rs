use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    artifact_store::ArtifactStore,
    config::{GridcastConfig, WriterPolicy},
    dataset_store::{DatasetStore, RestoreOutcome},
    error::{ForecastError, ForecastResult},
    generator::{self, Analytics, DailyForecast, ForecastContext, WeeklyForecast},
    pattern::{PatternConfig, PatternProfile},
    predictor::{PredictionSource, PredictorMode},
    record::{Dataset, DatasetStats, MergeSummary, PredictionRequest},
    registry::Registry,
    telemetry::ForecastTelemetry,
    training::{evaluation::EvaluationMetrics, Trainer},
    validator::{self, TabularUpload},
};

/// What happened to the model after a dataset change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// A new artifact was trained and activated.
    Trained {
        /// Artifact version.
        version: u64,
        /// Artifact id.
        artifact_id: Uuid,
        /// Hold-out metrics.
        metrics: EvaluationMetrics,
        /// Rows used for fitting.
        train_rows: usize,
        /// Rows used for evaluation.
        holdout_rows: usize,
    },
    /// Not enough rows; the previous predictor state stays active.
    Skipped {
        /// Minimum rows.
        needed: usize,
        /// Rows available.
        got: usize,
    },
    /// The model scored worse than the pattern profile on the hold-out rows
    /// and was not activated; the previous predictor state stays active.
    Rejected {
        /// Version the artifact would have had.
        version: u64,
        /// Model hold-out MAE, MW.
        model_mae: f64,
        /// Pattern profile hold-out MAE on the same rows, MW.
        pattern_mae: f64,
    },
    /// Training or activation failed; the previous predictor state stays active.
    Failed {
        /// Error kind.
        kind: String,
        /// Error message.
        error: String,
    },
}

impl TrainingOutcome {
    fn note(&self) -> String {
        match self {
            Self::Trained { version, metrics, .. } => {
                format!("model v{version} trained (MAE {:.2} MW)", metrics.mae)
            }
            Self::Skipped { needed, got } => {
                format!("model not trained: need at least {needed} rows, have {got}")
            }
            Self::Rejected {
                model_mae,
                pattern_mae,
                ..
            } => format!(
                "model not activated: hold-out MAE {model_mae:.2} MW exceeds pattern MAE {pattern_mae:.2} MW"
            ),
            Self::Failed { error, .. } => format!("model not updated: {error}"),
        }
    }
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    /// Human-readable summary.
    pub message: String,
    /// Rows accepted by the validator.
    pub records_processed: usize,
    /// Dataset size after the merge.
    pub total_records: usize,
    /// Rows dropped by the validator.
    pub rejected_rows: usize,
    /// Reasons for the dropped rows.
    pub rejections: Vec<String>,
    /// Accepted rows whose calendar fields came from row order.
    pub heuristic_rows: usize,
    /// Deduplication counts.
    pub merge: MergeSummary,
    /// Model outcome.
    pub training: TrainingOutcome,
    /// Predictor state version after the upload.
    pub state_version: u64,
}

/// Result of a point forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointForecast {
    /// Predicted demand, MW.
    pub forecasted_demand: f64,
    /// When the forecast was served.
    pub timestamp: DateTime<Utc>,
    /// Serving path.
    pub source: PredictionSource,
    /// Predictor state version used.
    pub state_version: u64,
}

/// Result of a dataset reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetReport {
    /// Human-readable summary.
    pub message: String,
    /// The restore performed, absent when no backup was retained.
    pub restored: Option<RestoreOutcome>,
    /// Dataset size after the reset.
    pub total_records: usize,
    /// Predictor state version after the reset.
    pub state_version: u64,
}

/// Summary of the active artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact id.
    pub id: Uuid,
    /// Artifact version.
    pub version: u64,
    /// Hold-out metrics.
    pub metrics: EvaluationMetrics,
    /// Training time.
    pub trained_at: DateTime<Utc>,
    /// Dataset size at training time.
    pub row_count: usize,
}

/// Summary of the active profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    /// Mean demand, MW.
    pub base_demand: f64,
    /// Mean temperature, °C.
    pub mean_temperature: f64,
    /// Fraction of base demand per °C.
    pub temperature_coefficient: f64,
    /// Rows learned from.
    pub sample_count: usize,
}

/// Operational status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Predictor mode.
    pub mode: PredictorMode,
    /// Predictor state version.
    pub state_version: u64,
    /// When the state was installed.
    pub activated_at: DateTime<Utc>,
    /// Active artifact.
    pub artifact: Option<ArtifactSummary>,
    /// Active profile.
    pub profile: ProfileSummary,
    /// Dataset size.
    pub dataset_records: usize,
    /// Retained backups.
    pub backups: usize,
    /// Backup retention limit.
    pub backup_retention: usize,
    /// Backup files ignored at open because they could not be decoded.
    pub skipped_backups: usize,
    /// Concurrent writer handling.
    pub writer_policy: WriterPolicy,
}

/// Owns the dataset, registry and trainer and exposes the forecasting operations.
///
/// Reads (`point_forecast`, `forecast_24h`, `weekly`, `analytics`, `stats`,
/// `status`) never wait on a writer's validation or training. Writes
/// (`upload`, `reset`, `retrain`) pass through one gate governed by the
/// configured [`WriterPolicy`].
#[derive(Debug)]
pub struct ForecastService {
    store: DatasetStore,
    artifacts: ArtifactStore,
    registry: Registry,
    trainer: Trainer,
    pattern: PatternConfig,
    writer_policy: WriterPolicy,
    telemetry: ForecastTelemetry,
    write_gate: Mutex<()>,
    last_version: AtomicU64,
}

impl ForecastService {
    /// Service kept entirely in memory.
    #[must_use]
    pub fn in_memory(config: &GridcastConfig, telemetry: ForecastTelemetry) -> Self {
        let pattern = config.pattern_config();
        Self {
            store: DatasetStore::in_memory(config.storage.backup_retention),
            artifacts: ArtifactStore::disabled(),
            registry: Registry::new(PatternProfile::fallback(&pattern), telemetry.clone()),
            trainer: Trainer::new(config.training_config()).with_pattern(pattern),
            pattern,
            writer_policy: config.service.writer_policy,
            telemetry,
            write_gate: Mutex::new(()),
            last_version: AtomicU64::new(0),
        }
    }

    /// Rebuilds the service from the data directory.
    ///
    /// The profile is relearned from the persisted dataset and the newest
    /// artifact is activated; an unusable artifact leaves the service pattern-backed
    /// and undecodable backup files are skipped.
    pub fn open(config: &GridcastConfig, telemetry: ForecastTelemetry) -> ForecastResult<Self> {
        let pattern = config.pattern_config();
        let store = DatasetStore::open(&config.storage.data_dir, config.storage.backup_retention)?;
        for skipped in store.skipped_backups() {
            let _ = telemetry.log(
                LogLevel::Warn,
                "gridcast.dataset.backup_skipped",
                json!({ "path": skipped.path, "error": skipped.reason }),
            );
        }
        let artifacts = ArtifactStore::open(config.models_dir())?;
        let profile = PatternProfile::learn(&store.snapshot(), &pattern);
        let registry = Registry::new(profile, telemetry.clone());
        let last_version = artifacts.latest_version()?;

        match artifacts
            .load_latest()
            .and_then(|artifact| match artifact {
                Some(artifact) => registry.activate_model(Arc::new(artifact)).map(Some),
                None => Ok(None),
            }) {
            Ok(state) => {
                let _ = telemetry.log(
                    LogLevel::Info,
                    "gridcast.service.opened",
                    json!({
                        "records": store.len(),
                        "backups": store.backup_count(),
                        "model_version": state.as_ref().and_then(|s| s.artifact().map(|a| a.version())),
                    }),
                );
            }
            Err(err) => {
                let _ = telemetry.log(
                    LogLevel::Warn,
                    "gridcast.model.load_failed",
                    json!({ "kind": err.kind(), "error": err.to_string(), "latest_version": last_version }),
                );
            }
        }

        Ok(Self {
            store,
            artifacts,
            registry,
            trainer: Trainer::new(config.training_config()).with_pattern(pattern),
            pattern,
            writer_policy: config.service.writer_policy,
            telemetry,
            write_gate: Mutex::new(()),
            last_version: AtomicU64::new(last_version),
        })
    }

    /// Validates and merges an upload, then refreshes the profile and retrains.
    ///
    /// `DataFormat` errors leave everything untouched. A training failure never
    /// fails the upload; it is reported in [`UploadReport::training`].
    pub fn upload(&self, upload: &TabularUpload) -> ForecastResult<UploadReport> {
        let _gate = self.writer("upload")?;
        let batch = match validator::validate(upload) {
            Ok(batch) => batch,
            Err(err) => {
                let _ = self.telemetry.log(
                    LogLevel::Warn,
                    "gridcast.upload.rejected",
                    json!({ "rows": upload.len(), "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        let appended = self.store.append(&batch.records)?;
        let _ = self.telemetry.event(
            "gridcast.dataset.appended",
            json!({
                "accepted": batch.records.len(),
                "rejected": batch.rejected.len(),
                "total_records": appended.total_records,
                "backup_seq": appended.backup.seq,
            }),
        );

        let snapshot = self.store.snapshot();
        self.registry
            .refresh_profile(PatternProfile::learn(&snapshot, &self.pattern));
        let training = self.train_and_activate(&snapshot);

        let mut message = format!("Successfully uploaded {} records", batch.records.len());
        if !batch.rejected.is_empty() {
            message.push_str(&format!("; {} invalid rows skipped", batch.rejected.len()));
        }
        if batch.heuristic_rows > 0 {
            message.push_str(&format!(
                "; hour/day_of_week inferred from row order for {} rows (best effort)",
                batch.heuristic_rows
            ));
        }
        message.push_str("; ");
        message.push_str(&training.note());

        let report = UploadReport {
            message,
            records_processed: batch.records.len(),
            total_records: appended.total_records,
            rejected_rows: batch.rejected.len(),
            rejections: batch.rejected.iter().map(ToString::to_string).collect(),
            heuristic_rows: batch.heuristic_rows,
            merge: appended.merge,
            training,
            state_version: self.registry.current().version(),
        };
        let _ = self.telemetry.log(
            LogLevel::Info,
            "gridcast.upload.completed",
            json!({
                "records_processed": report.records_processed,
                "total_records": report.total_records,
                "rejected_rows": report.rejected_rows,
                "heuristic_rows": report.heuristic_rows,
                "state_version": report.state_version,
            }),
        );
        Ok(report)
    }

    /// Never-failing point forecast.
    #[must_use]
    pub fn point_forecast(&self, request: &PredictionRequest) -> PointForecast {
        let prediction = self.registry.predict(request);
        PointForecast {
            forecasted_demand: prediction.demand_mw,
            timestamp: Utc::now(),
            source: prediction.source,
            state_version: prediction.state_version,
        }
    }

    /// 24-hour forecast; `context` defaults to today (UTC).
    pub fn forecast_24h(
        &self,
        base_temperature: f64,
        context: Option<ForecastContext>,
    ) -> ForecastResult<DailyForecast> {
        let state = self.registry.current();
        let daily = generator::forecast_day(
            &state,
            base_temperature,
            context.unwrap_or_else(ForecastContext::today),
        )?;
        if daily.degraded_hours > 0 {
            let _ = self.telemetry.log(
                LogLevel::Warn,
                "gridcast.predict.degraded",
                json!({ "state_version": daily.state_version, "hours": daily.degraded_hours }),
            );
        }
        Ok(daily)
    }

    /// Seven-day forecast; `start` defaults to today (UTC).
    pub fn weekly(
        &self,
        base_temperature: f64,
        start: Option<NaiveDate>,
    ) -> ForecastResult<WeeklyForecast> {
        let state = self.registry.current();
        generator::forecast_week(
            &state,
            base_temperature,
            start.unwrap_or_else(|| Utc::now().date_naive()),
        )
    }

    /// Analytics of a fresh 24-hour forecast.
    pub fn analytics(
        &self,
        base_temperature: f64,
        context: Option<ForecastContext>,
    ) -> ForecastResult<Analytics> {
        Ok(self.forecast_24h(base_temperature, context)?.analytics())
    }

    /// Dataset statistics.
    #[must_use]
    pub fn stats(&self) -> DatasetStats {
        self.store.snapshot().stats()
    }

    /// Restores the most recent backup and relearns the profile; any model is kept.
    pub fn reset(&self) -> ForecastResult<ResetReport> {
        let _gate = self.writer("reset")?;
        let Some(restored) = self.store.restore_latest()? else {
            return Ok(ResetReport {
                message: "No backup available; dataset unchanged".into(),
                restored: None,
                total_records: self.store.len(),
                state_version: self.registry.current().version(),
            });
        };
        let snapshot = self.store.snapshot();
        let state = self
            .registry
            .refresh_profile(PatternProfile::learn(&snapshot, &self.pattern));
        let _ = self.telemetry.event(
            "gridcast.dataset.restored",
            json!({
                "backup_seq": restored.restored.seq,
                "total_records": snapshot.len(),
                "replaced_records": restored.replaced_records,
            }),
        );
        Ok(ResetReport {
            message: format!(
                "Dataset restored to backup {} ({} records)",
                restored.restored.seq,
                snapshot.len()
            ),
            restored: Some(restored),
            total_records: snapshot.len(),
            state_version: state.version(),
        })
    }

    /// Retrains on the current dataset without uploading.
    pub fn retrain(&self) -> ForecastResult<TrainingOutcome> {
        let _gate = self.writer("retrain")?;
        let snapshot = self.store.snapshot();
        Ok(self.train_and_activate(&snapshot))
    }

    /// Operational status.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        let state = self.registry.current();
        let profile = state.profile();
        ServiceStatus {
            mode: state.mode(),
            state_version: state.version(),
            activated_at: state.activated_at(),
            artifact: state.artifact().map(|artifact| ArtifactSummary {
                id: artifact.id(),
                version: artifact.version(),
                metrics: *artifact.metrics(),
                trained_at: artifact.trained_at(),
                row_count: artifact.row_count(),
            }),
            profile: ProfileSummary {
                base_demand: profile.base_demand(),
                mean_temperature: profile.mean_temperature(),
                temperature_coefficient: profile.temperature_coefficient(),
                sample_count: profile.sample_count(),
            },
            dataset_records: self.store.len(),
            backups: self.store.backup_count(),
            backup_retention: self.store.retention(),
            skipped_backups: self.store.skipped_backups().len(),
            writer_policy: self.writer_policy,
        }
    }

    /// The registry serving predictions.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    fn writer(&self, operation: &str) -> ForecastResult<MutexGuard<'_, ()>> {
        match self.writer_policy {
            WriterPolicy::Serialize => Ok(self.write_gate.lock()),
            WriterPolicy::Reject => self.write_gate.try_lock().ok_or_else(|| {
                let _ = self.telemetry.log(
                    LogLevel::Warn,
                    "gridcast.writer.rejected",
                    json!({ "operation": operation }),
                );
                ForecastError::ConcurrencyConflict(format!(
                    "{operation} rejected: another write is in progress"
                ))
            }),
        }
    }

    // caller holds the write gate
    fn train_and_activate(&self, snapshot: &Dataset) -> TrainingOutcome {
        let version = self.last_version.load(Ordering::SeqCst) + 1;
        let artifact = match self
            .trainer
            .train_with_telemetry(snapshot, version, Some(&self.telemetry))
        {
            Ok(artifact) => artifact,
            Err(ForecastError::InsufficientData { needed, got }) => {
                let _ = self.telemetry.event(
                    "gridcast.training.skipped",
                    json!({ "needed": needed, "got": got }),
                );
                return TrainingOutcome::Skipped { needed, got };
            }
            Err(err) => return self.training_failed(&err),
        };
        if !artifact.outperforms_pattern() {
            let outcome = TrainingOutcome::Rejected {
                version,
                model_mae: artifact.metrics().mae,
                pattern_mae: artifact.baseline().map_or(0.0, |baseline| baseline.mae),
            };
            let _ = self.telemetry.log(
                LogLevel::Warn,
                "gridcast.training.rejected",
                serde_json::to_value(&outcome).unwrap_or_default(),
            );
            let _ = self.telemetry.event(
                "gridcast.training.rejected",
                serde_json::to_value(&outcome).unwrap_or_default(),
            );
            return outcome;
        }
        self.last_version.store(version, Ordering::SeqCst);

        if let Err(err) = self.artifacts.save(&artifact) {
            let _ = self.telemetry.log(
                LogLevel::Warn,
                "gridcast.model.persist_failed",
                json!({ "version": version, "error": err.to_string() }),
            );
        }
        let outcome = TrainingOutcome::Trained {
            version,
            artifact_id: artifact.id(),
            metrics: *artifact.metrics(),
            train_rows: artifact.train_rows(),
            holdout_rows: artifact.holdout_rows(),
        };
        if let Err(err) = self.registry.activate_model(Arc::new(artifact)) {
            return self.training_failed(&err);
        }
        let _ = self.telemetry.event(
            "gridcast.training.completed",
            serde_json::to_value(&outcome).unwrap_or_default(),
        );
        outcome
    }

    fn training_failed(&self, err: &ForecastError) -> TrainingOutcome {
        let _ = self.telemetry.log(
            LogLevel::Error,
            "gridcast.training.failed",
            json!({ "kind": err.kind(), "error": err.to_string() }),
        );
        TrainingOutcome::Failed {
            kind: err.kind().into(),
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DIURNAL_CURVE;
    use shared_event_bus::MemoryEventBus;
    use std::{fs, thread};
    use tempfile::tempdir;

    // demand = 2000 + 40*hour + 10*(temperature - 20), temperature follows the diurnal curve
    fn hourly_csv(rows: usize, first_month: usize) -> String {
        let mut csv = String::from("demand,temperature,hour,day_of_week,month\n");
        for i in 0..rows {
            let hour = i % 24;
            let temperature = 20.0 + DIURNAL_CURVE[hour];
            #[allow(clippy::cast_precision_loss)]
            let demand = 2000.0 + 40.0 * hour as f64 + 10.0 * (temperature - 20.0);
            csv.push_str(&format!(
                "{demand},{temperature},{hour},{},{}\n",
                (i / 24) % 7,
                first_month + i / 168
            ));
        }
        csv
    }

    fn upload(rows: usize) -> TabularUpload {
        TabularUpload::from_csv_reader(hourly_csv(rows, 1).as_bytes()).unwrap()
    }

    fn service() -> ForecastService {
        ForecastService::in_memory(&GridcastConfig::default(), ForecastTelemetry::disabled())
    }

    #[test]
    fn hourly_upload_trains_and_forecasts_historical_peak() {
        let service = service();
        let report = service.upload(&upload(200)).unwrap();
        assert_eq!(report.records_processed, 200);
        assert_eq!(report.total_records, 200);
        assert_eq!(report.heuristic_rows, 0);
        assert!(matches!(report.training, TrainingOutcome::Trained { version: 1, .. }));
        assert_eq!(service.status().mode, PredictorMode::ModelBacked);

        let daily = service
            .forecast_24h(25.0, Some(ForecastContext::new(2, 1).unwrap()))
            .unwrap();
        assert_eq!(daily.forecasts.len(), 24);
        assert_eq!(daily.peak_hour, 23);
        let total: f64 = daily.forecasts.iter().map(|f| f.predicted_demand).sum();
        assert!((daily.total_energy_mwh - total).abs() < 1e-6);
    }

    #[test]
    fn predictions_agree_with_reported_mae() {
        let service = service();
        let report = service.upload(&upload(200)).unwrap();
        let TrainingOutcome::Trained { metrics, .. } = report.training else {
            panic!("expected a trained model");
        };
        let snapshot = service.store.snapshot();
        let mut abs_err = 0.0;
        for record in snapshot.records() {
            let request = PredictionRequest::new(
                record.temperature.unwrap(),
                record.hour,
                record.day_of_week,
                record.month.unwrap(),
            )
            .unwrap();
            let served = service.point_forecast(&request);
            assert_eq!(served.source, PredictionSource::Model);
            abs_err += (served.forecasted_demand - record.demand_mw).abs();
        }
        #[allow(clippy::cast_precision_loss)]
        let observed = abs_err / snapshot.len() as f64;
        assert!((observed - metrics.mae).abs() < 0.5);
    }

    #[test]
    fn small_upload_succeeds_without_model() {
        let service = service();
        let report = service.upload(&upload(6)).unwrap();
        assert_eq!(report.records_processed, 6);
        assert_eq!(report.training, TrainingOutcome::Skipped { needed: 10, got: 6 });
        assert!(report.message.contains("need at least 10 rows"));
        assert_eq!(service.status().mode, PredictorMode::PatternBacked);
        let served = service.point_forecast(&PredictionRequest::new(30.0, 3, 1, 1).unwrap());
        assert_eq!(served.source, PredictionSource::Pattern);
        assert!(served.forecasted_demand > 0.0);
    }

    #[test]
    fn format_error_leaves_state_unchanged() {
        let service = service();
        service.upload(&upload(48)).unwrap();
        let stats = service.stats();
        let version = service.status().state_version;
        let bad = TabularUpload::from_csv_reader("temperature,hour\n20,1\n".as_bytes()).unwrap();
        assert_eq!(service.upload(&bad).unwrap_err().kind(), "DataFormatError");
        let junk = TabularUpload::from_csv_reader("demand\nn/a\n-3\n".as_bytes()).unwrap();
        assert_eq!(service.upload(&junk).unwrap_err().kind(), "DataFormatError");
        assert_eq!(service.stats(), stats);
        assert_eq!(service.status().state_version, version);
        assert_eq!(service.status().backups, 1);
    }

    #[test]
    fn heuristic_rows_are_reported() {
        let service = service();
        let text: String = std::iter::once("demand\n".to_string())
            .chain((0..30).map(|i| format!("{}\n", 1000 + i)))
            .collect();
        let report = service
            .upload(&TabularUpload::from_csv_reader(text.as_bytes()).unwrap())
            .unwrap();
        assert_eq!(report.heuristic_rows, 30);
        assert!(report.message.contains("best effort"));
    }

    #[test]
    fn reset_restores_previous_stats_and_keeps_model() {
        let service = service();
        service.upload(&upload(120)).unwrap();
        let before = service.stats();
        service.upload(&upload(200)).unwrap();
        assert_eq!(service.stats().records, 200);
        let report = service.reset().unwrap();
        assert!(report.restored.is_some());
        let after = service.stats();
        assert_eq!(after.records, before.records);
        assert_eq!(after.demand_stats, before.demand_stats);
        assert_eq!(service.status().mode, PredictorMode::ModelBacked);
        assert_eq!(service.status().profile.sample_count, 120);
    }

    #[test]
    fn reset_without_backup_is_a_no_op() {
        let service = service();
        let report = service.reset().unwrap();
        assert!(report.restored.is_none());
        assert_eq!(report.total_records, 0);
    }

    #[test]
    fn reject_policy_reports_conflict() {
        let mut config = GridcastConfig::default();
        config.service.writer_policy = WriterPolicy::Reject;
        let service = ForecastService::in_memory(&config, ForecastTelemetry::disabled());
        let _held = service.write_gate.lock();
        let err = service.upload(&upload(20)).unwrap_err();
        assert_eq!(err.kind(), "ConcurrencyConflictError");
        assert!(service.retrain().is_err());
        assert_eq!(service.stats().records, 0);
    }

    #[test]
    fn serialized_writers_both_commit() {
        let service = Arc::new(service());
        let first = upload(100);
        let second = TabularUpload::from_csv_reader(hourly_csv(200, 7).as_bytes()).unwrap();
        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|batch| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.upload(&batch).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(service.stats().records, 300);
        assert_eq!(service.status().backups, 2);
    }

    #[test]
    fn predictions_stay_valid_during_retraining() {
        let service = Arc::new(service());
        service.upload(&upload(150)).unwrap();
        let readers: Vec<_> = (0..3_u8)
            .map(|worker| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    for step in 0..300_u32 {
                        let hour = u8::try_from(step % 24).unwrap();
                        let request = PredictionRequest::new(28.0, hour, worker, 5).unwrap();
                        let served = service.point_forecast(&request);
                        assert!(served.forecasted_demand.is_finite());
                        assert!(served.forecasted_demand >= 0.0);
                    }
                })
            })
            .collect();
        for _ in 0..4 {
            assert!(matches!(service.retrain().unwrap(), TrainingOutcome::Trained { .. }));
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(service.status().artifact.unwrap().version, 5);
    }

    #[test]
    fn reopen_rebuilds_state_from_disk() {
        let dir = tempdir().unwrap();
        let config = GridcastConfig::default().with_data_dir(dir.path());
        {
            let service = ForecastService::open(&config, ForecastTelemetry::disabled()).unwrap();
            service.upload(&upload(120)).unwrap();
            service.upload(&upload(200)).unwrap();
        }
        let service = ForecastService::open(&config, ForecastTelemetry::disabled()).unwrap();
        let status = service.status();
        assert_eq!(status.dataset_records, 200);
        assert_eq!(status.backups, 2);
        assert_eq!(status.mode, PredictorMode::ModelBacked);
        assert_eq!(status.artifact.unwrap().version, 2);
        service.reset().unwrap();
        assert_eq!(service.stats().records, 120);
    }

    #[test]
    fn corrupt_artifact_falls_back_to_pattern() {
        let dir = tempdir().unwrap();
        let config = GridcastConfig::default().with_data_dir(dir.path());
        {
            let service = ForecastService::open(&config, ForecastTelemetry::disabled()).unwrap();
            service.upload(&upload(120)).unwrap();
        }
        fs::write(config.models_dir().join("model-v000002.json"), "{ truncated").unwrap();
        let log = dir.path().join("gridcast.log.jsonl");
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .log_path(&log)
            .build()
            .unwrap();
        let service = ForecastService::open(&config, telemetry).unwrap();
        assert_eq!(service.status().mode, PredictorMode::PatternBacked);
        let served = service.point_forecast(&PredictionRequest::new(21.0, 9, 2, 1).unwrap());
        assert!(served.forecasted_demand.is_finite() && served.forecasted_demand > 0.0);
        assert!(fs::read_to_string(&log).unwrap().contains("gridcast.model.load_failed"));
        let outcome = service.retrain().unwrap();
        assert!(matches!(outcome, TrainingOutcome::Trained { version: 3, .. }));
    }

    #[test]
    fn truncated_backup_does_not_block_open() {
        let dir = tempdir().unwrap();
        let config = GridcastConfig::default().with_data_dir(dir.path());
        {
            let service = ForecastService::open(&config, ForecastTelemetry::disabled()).unwrap();
            service.upload(&upload(120)).unwrap();
        }
        fs::write(dir.path().join("backups/backup-00000001.json"), "{ 1").unwrap();
        let log = dir.path().join("gridcast.log.jsonl");
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .log_path(&log)
            .build()
            .unwrap();
        let service = ForecastService::open(&config, telemetry).unwrap();
        let status = service.status();
        assert_eq!(status.dataset_records, 120);
        assert_eq!(status.backups, 0);
        assert_eq!(status.skipped_backups, 1);
        assert_eq!(status.mode, PredictorMode::ModelBacked);
        assert!(fs::read_to_string(&log).unwrap().contains("gridcast.dataset.backup_skipped"));
        assert!(service.reset().unwrap().restored.is_none());
    }

    #[test]
    fn publishes_lifecycle_events() {
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let service = ForecastService::in_memory(&GridcastConfig::default(), telemetry);
        service.upload(&upload(5)).unwrap();
        service.upload(&upload(60)).unwrap();
        service.reset().unwrap();
        assert_eq!(bus.topic("gridcast.dataset.appended").len(), 2);
        assert_eq!(bus.topic("gridcast.training.skipped").len(), 1);
        assert_eq!(bus.topic("gridcast.training.completed").len(), 1);
        assert_eq!(bus.topic("gridcast.dataset.restored").len(), 1);
        assert!(bus.topic("gridcast.registry.swapped").len() >= 3);
    }

    #[test]
    fn model_worse_than_pattern_is_not_activated() {
        let mut csv = String::from("demand,temperature,hour,day_of_week,month\n");
        for i in 0..200_u32 {
            let hour = i % 24;
            let offset = f64::from(hour) - 19.0;
            let demand = 1000.0 + 800.0 * (-offset * offset / 8.0).exp();
            csv.push_str(&format!("{demand},20,{hour},{},1\n", (i / 24) % 7));
        }
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let service = ForecastService::in_memory(&GridcastConfig::default(), telemetry);
        let report = service
            .upload(&TabularUpload::from_csv_reader(csv.as_bytes()).unwrap())
            .unwrap();

        let TrainingOutcome::Rejected {
            version,
            model_mae,
            pattern_mae,
        } = report.training
        else {
            panic!("expected the model to be rejected, got {:?}", report.training);
        };
        assert_eq!(version, 1);
        assert!(model_mae > pattern_mae);
        assert!(report.message.contains("exceeds pattern MAE"));
        assert_eq!(bus.topic("gridcast.training.rejected").len(), 1);
        assert!(bus.topic("gridcast.training.completed").is_empty());

        let status = service.status();
        assert_eq!(status.mode, PredictorMode::PatternBacked);
        assert!(status.artifact.is_none());
        let daily = service
            .forecast_24h(20.0, Some(ForecastContext::new(2, 1).unwrap()))
            .unwrap();
        assert_eq!(daily.peak_hour, 19);
        assert_eq!(daily.degraded_hours, 0);
        let served = service.point_forecast(&PredictionRequest::new(20.0, 19, 2, 1).unwrap());
        assert_eq!(served.source, PredictionSource::Pattern);
    }

    #[test]
    fn weekly_and_analytics_use_one_state() {
        let service = service();
        service.upload(&upload(200)).unwrap();
        let week = service
            .weekly(25.0, NaiveDate::from_ymd_opt(2025, 1, 6))
            .unwrap();
        assert_eq!(week.days.len(), 7);
        assert_eq!(week.state_version, service.status().state_version);
        let analytics = service
            .analytics(25.0, Some(ForecastContext::new(0, 1).unwrap()))
            .unwrap();
        assert_eq!(analytics.peak_hour, 23);
        assert!(analytics.max_demand >= analytics.avg_demand);
        assert!(analytics.avg_demand >= analytics.min_demand);
    }
}
