use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ForecastError, ForecastResult},
    record::{DemandRecord, PredictionRequest},
};

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 6;

/// Canonical model input order.
pub const FEATURE_ORDER: [&str; FEATURE_COUNT] = [
    "temperature",
    "hour",
    "day_of_week",
    "month",
    "humidity",
    "is_holiday",
];

/// Fixed-order numeric representation of one record.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Returns the schema as owned strings, the form stored in artifacts.
#[must_use]
pub fn feature_schema() -> Vec<String> {
    FEATURE_ORDER.iter().map(|name| (*name).to_owned()).collect()
}

/// Fill values for optional inputs.
///
/// Continuous features use the mean, categorical ones the mode (smallest value
/// on ties). Computed from the training rows and frozen into the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureDefaults {
    /// Mean temperature.
    pub temperature: f64,
    /// Most common month.
    pub month: u8,
    /// Mean humidity.
    pub humidity: f64,
    /// Most common holiday flag.
    pub is_holiday: bool,
}

impl Default for FeatureDefaults {
    fn default() -> Self {
        Self {
            temperature: 25.0,
            month: 1,
            humidity: 60.0,
            is_holiday: false,
        }
    }
}

impl FeatureDefaults {
    /// Derives defaults from `records`; features never observed keep the static fallbacks.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DemandRecord>) -> Self {
        let mut temperature = (0.0, 0_u32);
        let mut humidity = (0.0, 0_u32);
        let mut months = [0_usize; 13];
        let mut holidays = [0_usize; 2];
        for record in records {
            if let Some(t) = record.temperature {
                temperature.0 += t;
                temperature.1 += 1;
            }
            if let Some(h) = record.humidity {
                humidity.0 += h;
                humidity.1 += 1;
            }
            if let Some(m) = record.month {
                months[usize::from(m).min(12)] += 1;
            }
            holidays[usize::from(record.is_holiday)] += 1;
        }

        let fallback = Self::default();
        let mean = |(sum, count): (f64, u32), default: f64| {
            if count == 0 {
                default
            } else {
                sum / f64::from(count)
            }
        };
        Self {
            temperature: mean(temperature, fallback.temperature),
            month: mode(&months[1..]).map_or(fallback.month, |idx| idx + 1),
            humidity: mean(humidity, fallback.humidity),
            is_holiday: mode(&holidays).is_some_and(|idx| idx == 1),
        }
    }
}

// index of the highest count, first on ties; None when nothing was counted
fn mode(counts: &[usize]) -> Option<u8> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, &count) in counts.iter().enumerate() {
        if count > 0 && !matches!(best, Some((_, top)) if top >= count) {
            best = Some((idx, count));
        }
    }
    best.and_then(|(idx, _)| u8::try_from(idx).ok())
}

/// Builds the feature vector for a stored record.
#[must_use]
pub fn vectorize_record(record: &DemandRecord, defaults: &FeatureDefaults) -> FeatureVector {
    [
        record.temperature.unwrap_or(defaults.temperature),
        f64::from(record.hour),
        f64::from(record.day_of_week),
        f64::from(record.month.unwrap_or(defaults.month)),
        record.humidity.unwrap_or(defaults.humidity),
        f64::from(u8::from(record.is_holiday)),
    ]
}

/// Builds the feature vector for an inference request.
///
/// Inputs the caller left out take the artifact's last-known defaults.
#[must_use]
pub fn vectorize_request(request: &PredictionRequest, defaults: &FeatureDefaults) -> FeatureVector {
    [
        request.temperature(),
        f64::from(request.hour()),
        f64::from(request.day_of_week()),
        f64::from(request.month()),
        request.humidity().unwrap_or(defaults.humidity),
        f64::from(u8::from(request.is_holiday().unwrap_or(defaults.is_holiday))),
    ]
}

/// Stacks feature vectors into a row-major matrix.
#[must_use]
pub fn to_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let mut matrix = Array2::zeros((rows.len(), FEATURE_COUNT));
    for (mut target, row) in matrix.axis_iter_mut(Axis(0)).zip(rows) {
        target.assign(&ArrayView1::from(&row[..]));
    }
    matrix
}

/// Per-feature standardization fitted on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Standardizer {
    /// Floor below which a feature's spread is treated as constant.
    pub const MIN_STD: f64 = 1e-9;

    /// Fits column means and population standard deviations.
    #[must_use]
    pub fn fit(matrix: &Array2<f64>) -> Self {
        let columns = matrix.ncols();
        let mean = matrix
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(columns));
        let std = if matrix.nrows() == 0 {
            Array1::ones(columns)
        } else {
            matrix
                .std_axis(Axis(0), 0.0)
                .mapv(|s| if s.is_finite() && s >= Self::MIN_STD { s } else { 1.0 })
        };
        Self {
            mean: mean.to_vec(),
            std: std.to_vec(),
        }
    }

    /// Column means.
    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Column standard deviations (already floored).
    #[must_use]
    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Number of columns the standardizer was fitted on.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Standardizes every row of `matrix`.
    pub fn transform(&self, matrix: &Array2<f64>) -> ForecastResult<Array2<f64>> {
        self.check(matrix.ncols())?;
        let mean = ArrayView1::from(&self.mean[..]);
        let std = ArrayView1::from(&self.std[..]);
        Ok((matrix - &mean) / &std)
    }

    /// Standardizes one vector.
    pub fn transform_row(&self, row: &[f64]) -> ForecastResult<Vec<f64>> {
        self.check(row.len())?;
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect())
    }

    fn check(&self, columns: usize) -> ForecastResult<()> {
        if columns != self.mean.len() || self.std.len() != self.mean.len() {
            return Err(ForecastError::ModelLoad(format!(
                "standardizer expects {} features, got {columns}",
                self.mean.len()
            )));
        }
        Ok(())
    }
}
