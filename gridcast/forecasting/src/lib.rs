#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Gridcast forecasting core: demand dataset management, pattern learning,
//! regression training and hot-swapped forecast serving.

/// Error types shared by every forecasting component.
#[path = "../error.rs"]
pub mod error;

/// Demand records, datasets and prediction requests.
#[path = "../record.rs"]
pub mod record;

/// Upload validation and normalization.
#[path = "../validator.rs"]
pub mod validator;

/// Append-only dataset with bounded backups.
#[path = "../dataset_store.rs"]
pub mod dataset_store;

/// Feature vectors and standardization.
#[path = "../features.rs"]
pub mod features;

/// Hour/day/temperature demand profile.
#[path = "../pattern.rs"]
pub mod pattern;

/// Regression trainer and model artifacts.
#[path = "../training/main.rs"]
pub mod training;

/// Versioned artifact persistence.
#[path = "../artifact_store.rs"]
pub mod artifact_store;

/// Immutable predictor state.
#[path = "../predictor.rs"]
pub mod predictor;

/// Live predictor state owner.
#[path = "../registry.rs"]
pub mod registry;

/// 24-hour and weekly forecast generation.
#[path = "../generator.rs"]
pub mod generator;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Forecasting service facade.
#[path = "../service.rs"]
pub mod service;

pub use config::{GridcastConfig, WriterPolicy};
pub use error::{ForecastError, ForecastResult, ValidationError};
pub use generator::{Analytics, DailyForecast, ForecastContext, WeeklyForecast};
pub use predictor::{PredictionSource, PredictorMode};
pub use record::{Dataset, DatasetStats, DemandRecord, PredictionRequest};
pub use service::{ForecastService, ServiceStatus, TrainingOutcome, UploadReport};
pub use telemetry::ForecastTelemetry;
pub use validator::TabularUpload;
