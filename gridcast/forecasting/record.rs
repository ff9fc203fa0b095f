use std::collections::HashMap;

use chrono::NaiveDateTime;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Accepted temperature band in °C. Values outside are clamped, not rejected.
pub const TEMPERATURE_RANGE: (f64, f64) = (-10.0, 55.0);
/// Accepted relative humidity band in percent.
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

/// One validated demand observation.
///
/// `hour` and `day_of_week` are always populated once a row has been through
/// the validator: either from the timestamp, from the upload, or from the
/// sequential best-effort heuristic. `day_of_week` counts from Monday = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    /// Observation time, if the upload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    /// Demand in MW, finite and non-negative.
    pub demand_mw: f64,
    /// Temperature in °C, clamped to [`TEMPERATURE_RANGE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Hour of day, 0..=23.
    pub hour: u8,
    /// Day of week, 0..=6.
    pub day_of_week: u8,
    /// Month, 1..=12.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u8>,
    /// Relative humidity, clamped to [`HUMIDITY_RANGE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Public holiday flag.
    #[serde(default)]
    pub is_holiday: bool,
    /// Grid region label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl DemandRecord {
    /// Minimal record with only the required fields set.
    #[must_use]
    pub const fn new(demand_mw: f64, hour: u8, day_of_week: u8) -> Self {
        Self {
            timestamp: None,
            demand_mw,
            temperature: None,
            hour,
            day_of_week,
            month: None,
            humidity: None,
            is_holiday: false,
            region: None,
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the month.
    #[must_use]
    pub const fn with_month(mut self, month: u8) -> Self {
        self.month = Some(month);
        self
    }

    /// Sets the timestamp (calendar fields are not re-derived here).
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Deduplication identity: `(timestamp, region)` when stamped, the full row otherwise.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self.timestamp {
            Some(timestamp) => RecordKey::Stamped {
                timestamp,
                region: self.region.clone(),
            },
            None => RecordKey::Row {
                demand: bits(self.demand_mw),
                temperature: self.temperature.map(bits),
                hour: self.hour,
                day_of_week: self.day_of_week,
                month: self.month,
                humidity: self.humidity.map(bits),
                is_holiday: self.is_holiday,
                region: self.region.clone(),
            },
        }
    }
}

// folds -0.0 into 0.0 so equal rows hash equally
fn bits(value: f64) -> u64 {
    (value + 0.0).to_bits()
}

/// Identity used to deduplicate records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Timestamped rows are unique per region.
    Stamped {
        /// Observation time.
        timestamp: NaiveDateTime,
        /// Region label.
        region: Option<String>,
    },
    /// Unstamped rows are unique by content.
    Row {
        /// Demand bits.
        demand: u64,
        /// Temperature bits.
        temperature: Option<u64>,
        /// Hour.
        hour: u8,
        /// Day of week.
        day_of_week: u8,
        /// Month.
        month: Option<u8>,
        /// Humidity bits.
        humidity: Option<u64>,
        /// Holiday flag.
        is_holiday: bool,
        /// Region label.
        region: Option<String>,
    },
}

/// Counts produced by [`Dataset::merged`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Records that introduced a new key.
    pub added: usize,
    /// Stamped records that superseded an older record with the same key.
    pub replaced: usize,
    /// Unstamped records identical to one already present.
    pub duplicates: usize,
}

/// Ordered, deduplicated collection of demand records.
///
/// Instances are immutable once built; the dataset store swaps whole
/// datasets rather than editing one in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<DemandRecord>,
}

impl Dataset {
    /// Builds a dataset, applying the deduplication rules in order.
    #[must_use]
    pub fn new(records: Vec<DemandRecord>) -> Self {
        Self::default().merged(&records).0
    }

    /// All records in order.
    #[must_use]
    pub fn records(&self) -> &[DemandRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns a new dataset with `incoming` appended.
    ///
    /// A stamped record whose `(timestamp, region)` already exists supersedes the
    /// older one, which is removed; an unstamped record identical to an existing
    /// one is skipped.
    #[must_use]
    pub fn merged(&self, incoming: &[DemandRecord]) -> (Self, MergeSummary) {
        let mut slots: Vec<Option<DemandRecord>> =
            self.records.iter().cloned().map(Some).collect();
        let mut index: HashMap<RecordKey, usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(pos, record)| record.as_ref().map(|r| (r.key(), pos)))
            .collect();
        let mut summary = MergeSummary::default();
        for record in incoming {
            let key = record.key();
            match (index.get(&key).copied(), &key) {
                (Some(_), RecordKey::Row { .. }) => summary.duplicates += 1,
                (Some(previous), RecordKey::Stamped { .. }) => {
                    slots[previous] = None;
                    index.insert(key, slots.len());
                    slots.push(Some(record.clone()));
                    summary.replaced += 1;
                }
                (None, _) => {
                    index.insert(key, slots.len());
                    slots.push(Some(record.clone()));
                    summary.added += 1;
                }
            }
        }
        let records = slots.into_iter().flatten().collect();
        (Self { records }, summary)
    }

    /// Summary statistics over the whole dataset.
    #[must_use]
    pub fn stats(&self) -> DatasetStats {
        let mut start: Option<NaiveDateTime> = None;
        let mut end: Option<NaiveDateTime> = None;
        let mut regions = IndexSet::new();
        let mut present = [false; 5];
        for record in &self.records {
            if let Some(ts) = record.timestamp {
                start = Some(start.map_or(ts, |current| current.min(ts)));
                end = Some(end.map_or(ts, |current| current.max(ts)));
                present[0] = true;
            }
            present[1] |= record.temperature.is_some();
            present[2] |= record.month.is_some();
            present[3] |= record.humidity.is_some();
            if let Some(region) = &record.region {
                present[4] = true;
                regions.insert(region.clone());
            }
        }

        let mut columns = Vec::new();
        if self.is_empty() {
            return DatasetStats {
                records: 0,
                date_range: DateRange { start, end },
                demand_stats: None,
                columns,
                regions: Vec::new(),
            };
        }
        let optional = |flag: bool, name: &str, columns: &mut Vec<String>| {
            if flag {
                columns.push(name.to_owned());
            }
        };
        optional(present[0], "timestamp", &mut columns);
        columns.push("demand".into());
        optional(present[1], "temperature", &mut columns);
        columns.push("hour".into());
        columns.push("day_of_week".into());
        optional(present[2], "month", &mut columns);
        optional(present[3], "humidity", &mut columns);
        columns.push("is_holiday".into());
        optional(present[4], "region", &mut columns);

        DatasetStats {
            records: self.len(),
            date_range: DateRange { start, end },
            demand_stats: DemandSummary::from_values(self.records.iter().map(|r| r.demand_mw)),
            columns,
            regions: regions.into_iter().collect(),
        }
    }
}

/// First and last observation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest timestamp.
    pub start: Option<NaiveDateTime>,
    /// Latest timestamp.
    pub end: Option<NaiveDateTime>,
}

/// Demand distribution summary. `std` is the sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandSummary {
    /// Mean demand.
    pub mean: f64,
    /// Minimum demand.
    pub min: f64,
    /// Maximum demand.
    pub max: f64,
    /// Sample standard deviation (0 for a single value).
    pub std: f64,
}

impl DemandSummary {
    /// Summarises a sequence of values; `None` when it is empty.
    #[must_use]
    pub fn from_values(values: impl Iterator<Item = f64> + Clone) -> Option<Self> {
        let mut count = 0_usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values.clone() {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        if count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let denominator = count as f64;
        let mean = sum / denominator;
        let std = if count > 1 {
            let squares: f64 = values.map(|value| (value - mean).powi(2)).sum();
            (squares / (denominator - 1.0)).sqrt()
        } else {
            0.0
        };
        Some(Self {
            mean,
            min,
            max,
            std,
        })
    }
}

/// Dataset statistics view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Record count.
    pub records: usize,
    /// Observation time span.
    pub date_range: DateRange,
    /// Demand summary, absent for an empty dataset.
    pub demand_stats: Option<DemandSummary>,
    /// Columns populated by at least one record, in canonical order.
    pub columns: Vec<String>,
    /// Distinct regions in first-seen order.
    pub regions: Vec<String>,
}

/// A structurally valid point-prediction request.
///
/// Construction validates the calendar fields; the temperature and humidity
/// are clamped into their accepted bands at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPredictionRequest")]
pub struct PredictionRequest {
    temperature: f64,
    hour: u8,
    day_of_week: u8,
    month: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_holiday: Option<bool>,
}

impl PredictionRequest {
    /// Validates and builds a request.
    pub fn new(temperature: f64, hour: u8, day_of_week: u8, month: u8) -> ForecastResult<Self> {
        if !temperature.is_finite() {
            return Err(ForecastError::InvalidRequest(format!(
                "temperature must be finite, got {temperature}"
            )));
        }
        if hour > 23 {
            return Err(ForecastError::InvalidRequest(format!(
                "hour must be in 0..=23, got {hour}"
            )));
        }
        if day_of_week > 6 {
            return Err(ForecastError::InvalidRequest(format!(
                "day_of_week must be in 0..=6, got {day_of_week}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(ForecastError::InvalidRequest(format!(
                "month must be in 1..=12, got {month}"
            )));
        }
        Ok(Self {
            temperature,
            hour,
            day_of_week,
            month,
            humidity: None,
            is_holiday: None,
        })
    }

    /// Supplies the humidity instead of the model's last-known default.
    pub fn with_humidity(mut self, humidity: f64) -> ForecastResult<Self> {
        if !humidity.is_finite() {
            return Err(ForecastError::InvalidRequest(format!(
                "humidity must be finite, got {humidity}"
            )));
        }
        self.humidity = Some(humidity);
        Ok(self)
    }

    /// Supplies the holiday flag.
    #[must_use]
    pub const fn with_holiday(mut self, is_holiday: bool) -> Self {
        self.is_holiday = Some(is_holiday);
        self
    }

    /// Requested temperature clamped to [`TEMPERATURE_RANGE`].
    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
            .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
    }

    /// Hour of day.
    #[must_use]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Day of week (Monday = 0).
    #[must_use]
    pub const fn day_of_week(&self) -> u8 {
        self.day_of_week
    }

    /// Month.
    #[must_use]
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Caller-supplied humidity, clamped to [`HUMIDITY_RANGE`].
    #[must_use]
    pub fn humidity(&self) -> Option<f64> {
        self.humidity
            .map(|value| value.clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1))
    }

    /// Caller-supplied holiday flag.
    #[must_use]
    pub const fn is_holiday(&self) -> Option<bool> {
        self.is_holiday
    }
}

#[derive(Deserialize)]
struct RawPredictionRequest {
    temperature: f64,
    hour: u8,
    day_of_week: u8,
    month: u8,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    is_holiday: Option<bool>,
}

impl TryFrom<RawPredictionRequest> for PredictionRequest {
    type Error = ForecastError;

    fn try_from(raw: RawPredictionRequest) -> ForecastResult<Self> {
        let mut request = Self::new(raw.temperature, raw.hour, raw.day_of_week, raw.month)?;
        if let Some(humidity) = raw.humidity {
            request = request.with_humidity(humidity)?;
        }
        if let Some(flag) = raw.is_holiday {
            request = request.with_holiday(flag);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn stamped_duplicates_supersede_older_rows() {
        let base = Dataset::new(vec![
            DemandRecord::new(100.0, 0, 0).with_timestamp(at(3, 0)),
            DemandRecord::new(110.0, 1, 0).with_timestamp(at(3, 1)),
        ]);
        let (merged, summary) =
            base.merged(&[DemandRecord::new(150.0, 0, 0).with_timestamp(at(3, 0))]);
        assert_eq!(merged.len(), 2);
        assert_eq!(summary.replaced, 1);
        assert_eq!(merged.records()[1].demand_mw, 150.0);
    }

    #[test]
    fn same_timestamp_in_other_region_is_distinct() {
        let base =
            Dataset::new(vec![DemandRecord::new(100.0, 0, 0)
                .with_timestamp(at(3, 0))
                .with_region("Addis Ababa")]);
        let (merged, summary) = base.merged(&[DemandRecord::new(90.0, 0, 0)
            .with_timestamp(at(3, 0))
            .with_region("Oromia")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(summary.added, 1);
    }

    #[test]
    fn unstamped_rows_deduplicate_by_content() {
        let row = DemandRecord::new(120.0, 5, 2).with_temperature(21.5);
        let data = Dataset::new(vec![row.clone(), row.clone(), row.with_month(4)]);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn negative_zero_matches_zero() {
        let data = Dataset::new(vec![
            DemandRecord::new(0.0, 1, 1),
            DemandRecord::new(-0.0, 1, 1),
        ]);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn stats_cover_columns_and_regions() {
        let data = Dataset::new(vec![
            DemandRecord::new(100.0, 0, 0)
                .with_timestamp(at(4, 0))
                .with_region("Amhara"),
            DemandRecord::new(300.0, 1, 0)
                .with_timestamp(at(3, 1))
                .with_temperature(20.0)
                .with_region("Amhara"),
        ]);
        let stats = data.stats();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.date_range.start, Some(at(3, 1)));
        assert_eq!(stats.date_range.end, Some(at(4, 0)));
        let demand = stats.demand_stats.unwrap();
        assert!((demand.mean - 200.0).abs() < 1e-9);
        assert!((demand.std - 141.421_356).abs() < 1e-5);
        assert_eq!(stats.regions, vec!["Amhara".to_string()]);
        assert!(stats.columns.contains(&"temperature".to_string()));
        assert!(!stats.columns.contains(&"humidity".to_string()));
    }

    #[test]
    fn empty_stats_have_no_summary() {
        let stats = Dataset::default().stats();
        assert_eq!(stats.records, 0);
        assert!(stats.demand_stats.is_none());
        assert!(stats.columns.is_empty());
    }

    #[test]
    fn request_validation_rejects_bad_calendar_fields() {
        assert!(PredictionRequest::new(25.0, 24, 0, 1).is_err());
        assert!(PredictionRequest::new(25.0, 0, 7, 1).is_err());
        assert!(PredictionRequest::new(25.0, 0, 0, 13).is_err());
        assert!(PredictionRequest::new(f64::NAN, 0, 0, 1).is_err());
        let request = PredictionRequest::new(80.0, 12, 3, 6).unwrap();
        assert_eq!(request.temperature(), TEMPERATURE_RANGE.1);
    }

    #[test]
    fn request_deserialization_validates() {
        let ok: PredictionRequest = serde_json::from_str(
            r#"{"temperature": 22.0, "hour": 5, "day_of_week": 1, "month": 2, "humidity": 140}"#,
        )
        .unwrap();
        assert_eq!(ok.humidity(), Some(100.0));
        let bad = serde_json::from_str::<PredictionRequest>(
            r#"{"temperature": 22.0, "hour": 30, "day_of_week": 1, "month": 2}"#,
        );
        assert!(bad.is_err());
    }
}
