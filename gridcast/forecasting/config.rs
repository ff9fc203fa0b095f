use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::{pattern::PatternConfig, training::TrainingConfig};

/// Top-level gridcast configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridcastConfig {
    /// Dataset, backup and artifact storage.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Trainer settings.
    #[serde(default)]
    pub training: TrainingSettings,
    /// Pattern learner settings.
    #[serde(default)]
    pub pattern: PatternSettings,
    /// Service behaviour.
    #[serde(default)]
    pub service: ServiceSettings,
    /// Logging and events.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl GridcastConfig {
    /// Loads and validates a TOML file; relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading gridcast config {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&raw, &base).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text, resolving relative paths against `base`.
    pub fn from_toml_str(raw: &str, base: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.backup_retention == 0 {
            bail!("storage.backup_retention must be at least 1");
        }
        if self.training.min_rows < 2 {
            bail!("training.min_rows must be at least 2");
        }
        if !(self.training.holdout_ratio > 0.0 && self.training.holdout_ratio < 1.0) {
            bail!("training.holdout_ratio must lie in (0, 1)");
        }
        let base = self.pattern.default_base_demand;
        if !base.is_finite() || base <= 0.0 {
            bail!("pattern.default_base_demand must be finite and positive, got {base}");
        }
        if !self.pattern.default_mean_temperature.is_finite()
            || !self.pattern.default_temperature_coefficient.is_finite()
        {
            bail!("pattern defaults must be finite");
        }
        self.telemetry.level()?;
        Ok(())
    }

    /// Replaces the data directory (command-line override).
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = dir.into();
        self
    }

    /// Trainer configuration.
    #[must_use]
    pub const fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            min_rows: self.training.min_rows,
            seed: self.training.seed,
            holdout_ratio: self.training.holdout_ratio,
        }
    }

    /// Pattern learner configuration.
    #[must_use]
    pub const fn pattern_config(&self) -> PatternConfig {
        PatternConfig {
            min_temperature_samples: self.pattern.min_temperature_samples,
            default_temperature_coefficient: self.pattern.default_temperature_coefficient,
            default_base_demand: self.pattern.default_base_demand,
            default_mean_temperature: self.pattern.default_mean_temperature,
        }
    }

    /// Model artifact directory.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.storage.data_dir.join("models")
    }

    /// Structured log file, defaulting under the data directory.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.telemetry
            .log_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("logs/gridcast.log.jsonl"))
    }

    /// Event log file, defaulting under the data directory.
    #[must_use]
    pub fn event_log_path(&self) -> PathBuf {
        self.telemetry
            .event_log
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("logs/events.jsonl"))
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.storage.data_dir);
        if let Some(path) = self.telemetry.log_path.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.telemetry.event_log.as_mut() {
            resolve(path);
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root of the dataset, backups and models.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Backups retained before the oldest is evicted.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_retention: default_backup_retention(),
        }
    }
}

/// `[training]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Minimum dataset size for training.
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    /// Shuffle seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Evaluation share.
    #[serde(default = "default_holdout_ratio")]
    pub holdout_ratio: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            min_rows: default_min_rows(),
            seed: default_seed(),
            holdout_ratio: default_holdout_ratio(),
        }
    }
}

/// `[pattern]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSettings {
    /// Temperature rows needed to trust the fitted coefficient.
    #[serde(default = "default_min_temperature_samples")]
    pub min_temperature_samples: usize,
    /// Fallback temperature coefficient.
    #[serde(default = "default_temperature_coefficient")]
    pub default_temperature_coefficient: f64,
    /// Empty-dataset base demand, MW.
    #[serde(default = "default_base_demand")]
    pub default_base_demand: f64,
    /// Empty-dataset mean temperature, °C.
    #[serde(default = "default_mean_temperature")]
    pub default_mean_temperature: f64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            min_temperature_samples: default_min_temperature_samples(),
            default_temperature_coefficient: default_temperature_coefficient(),
            default_base_demand: default_base_demand(),
            default_mean_temperature: default_mean_temperature(),
        }
    }
}

/// What happens when a second writer arrives mid-write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterPolicy {
    /// Wait for the in-flight writer.
    #[default]
    Serialize,
    /// Fail fast with `ConcurrencyConflict`.
    Reject,
}

/// `[service]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Concurrent writer handling.
    #[serde(default)]
    pub writer_policy: WriterPolicy,
}

/// `[telemetry]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Structured log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event log.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Lowest level written.
    #[serde(default = "default_min_level")]
    pub min_level: String,
}

impl TelemetrySettings {
    /// Parsed minimum level.
    pub fn level(&self) -> Result<LogLevel> {
        self.min_level
            .parse()
            .with_context(|| format!("telemetry.min_level {:?}", self.min_level))
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_path: None,
            event_log: None,
            min_level: default_min_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("var/gridcast")
}

const fn default_backup_retention() -> usize {
    10
}

const fn default_min_rows() -> usize {
    10
}

const fn default_seed() -> u64 {
    42
}

const fn default_holdout_ratio() -> f64 {
    0.2
}

const fn default_min_temperature_samples() -> usize {
    10
}

const fn default_temperature_coefficient() -> f64 {
    0.004
}

const fn default_base_demand() -> f64 {
    3500.0
}

const fn default_mean_temperature() -> f64 {
    25.0
}

fn default_min_level() -> String {
    "INFO".into()
}
