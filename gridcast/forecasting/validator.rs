use std::{fs::File, io::Read, ops::RangeInclusive, path::Path};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::{
    error::{ForecastError, ForecastResult, ValidationError},
    record::{DemandRecord, HUMIDITY_RANGE, TEMPERATURE_RANGE},
};

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Raw tabular upload: a header row plus string cells.
///
/// Rows that could not be decoded keep their position so later rows retain
/// their sequential index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularUpload {
    headers: Vec<String>,
    rows: Vec<Result<Vec<String>, ValidationError>>,
}

impl TabularUpload {
    /// Builds an upload from already-split cells.
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows: rows.into_iter().map(Ok).collect(),
        }
    }

    /// Parses CSV text. Ragged rows are accepted; missing cells read as empty.
    ///
    /// Only an unreadable header fails the parse; a bad row is kept as a
    /// rejection for [`validate`] to count.
    pub fn from_csv_reader<R: Read>(reader: R) -> ForecastResult<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv
            .headers()
            .map_err(|err| ForecastError::DataFormat(format!("unreadable csv header: {err}")))?
            .iter()
            .map(str::to_owned)
            .collect();
        let rows: Vec<Result<Vec<String>, ValidationError>> = csv
            .byte_records()
            .enumerate()
            .map(|(row, record)| {
                let record = record.map_err(|err| ValidationError::Unreadable {
                    row,
                    reason: err.to_string(),
                })?;
                record
                    .iter()
                    .enumerate()
                    .map(|(column, cell)| {
                        std::str::from_utf8(cell)
                            .map(str::to_owned)
                            .map_err(|_| ValidationError::NotUtf8 { row, column })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect();
        Ok(Self { headers, rows })
    }

    /// Reads and parses a CSV file.
    pub fn from_csv_path(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| ForecastError::storage(format!("opening {}", path.display()), err))?;
        Self::from_csv_reader(file)
    }

    /// Header names as uploaded.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the upload has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Accepted records plus per-row rejections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    /// Rows that passed validation, in upload order.
    pub records: Vec<DemandRecord>,
    /// Dropped rows with their reasons.
    pub rejected: Vec<ValidationError>,
    /// Accepted rows whose hour or day of week came from the sequential heuristic.
    pub heuristic_rows: usize,
}

#[derive(Debug, Default)]
struct Columns {
    timestamp: Option<usize>,
    demand: Option<usize>,
    temperature: Option<usize>,
    hour: Option<usize>,
    day_of_week: Option<usize>,
    month: Option<usize>,
    humidity: Option<usize>,
    is_holiday: Option<usize>,
    region: Option<usize>,
}

impl Columns {
    fn resolve(headers: &[String]) -> Self {
        let mut columns = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            let slot = match header.trim().to_ascii_lowercase().as_str() {
                "datetime" | "timestamp" => &mut columns.timestamp,
                "demand" | "demand_mw" => &mut columns.demand,
                "temperature" | "temp" => &mut columns.temperature,
                "hour" => &mut columns.hour,
                "day_of_week" | "dow" => &mut columns.day_of_week,
                "month" => &mut columns.month,
                "humidity" => &mut columns.humidity,
                "is_holiday" | "holiday" => &mut columns.is_holiday,
                "region" => &mut columns.region,
                _ => continue,
            };
            // first matching header wins
            slot.get_or_insert(idx);
        }
        columns
    }
}

/// Validates an upload into demand records.
///
/// Fails with [`ForecastError::DataFormat`] when there is no demand column or
/// when every row is rejected; otherwise invalid rows are dropped and listed.
pub fn validate(upload: &TabularUpload) -> ForecastResult<ValidatedBatch> {
    let columns = Columns::resolve(&upload.headers);
    let Some(demand_col) = columns.demand else {
        return Err(ForecastError::DataFormat(
            "upload has no demand column (expected `demand` or `demand_mw`)".into(),
        ));
    };
    if upload.is_empty() {
        return Err(ForecastError::DataFormat("upload has no data rows".into()));
    }

    let mut batch = ValidatedBatch::default();
    for (idx, row) in upload.rows.iter().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                batch.rejected.push(err.clone());
                continue;
            }
        };
        let cells = RowCells { idx, row };
        match cells.parse(&columns, demand_col) {
            Ok((record, heuristic)) => {
                batch.heuristic_rows += usize::from(heuristic);
                batch.records.push(record);
            }
            Err(err) => batch.rejected.push(err),
        }
    }

    if batch.records.is_empty() {
        return Err(ForecastError::DataFormat(format!(
            "no valid demand rows ({} rejected)",
            batch.rejected.len()
        )));
    }
    Ok(batch)
}

struct RowCells<'a> {
    idx: usize,
    row: &'a [String],
}

impl RowCells<'_> {
    fn cell(&self, column: Option<usize>) -> Option<&str> {
        column
            .and_then(|col| self.row.get(col))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn number(&self, column: Option<usize>, name: &'static str) -> Result<Option<f64>, ValidationError> {
        let Some(raw) = self.cell(column) else {
            return Ok(None);
        };
        let value: f64 = raw.parse().map_err(|_| ValidationError::NotNumeric {
            row: self.idx,
            column: name,
            value: raw.to_owned(),
        })?;
        if !value.is_finite() {
            return Err(ValidationError::OutOfRange {
                row: self.idx,
                column: name,
                value,
            });
        }
        Ok(Some(value))
    }

    fn calendar(
        &self,
        column: Option<usize>,
        name: &'static str,
        range: RangeInclusive<u8>,
    ) -> Result<Option<u8>, ValidationError> {
        let Some(value) = self.number(column, name)? else {
            return Ok(None);
        };
        let in_range = value.fract() == 0.0
            && value >= f64::from(*range.start())
            && value <= f64::from(*range.end());
        if !in_range {
            return Err(ValidationError::OutOfRange {
                row: self.idx,
                column: name,
                value,
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Some(value as u8))
    }

    fn holiday(&self, column: Option<usize>) -> Result<bool, ValidationError> {
        let Some(raw) = self.cell(column) else {
            return Ok(false);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => Ok(true),
            "0" | "false" | "no" | "n" => Ok(false),
            _ => self
                .number(column, "is_holiday")
                .map(|value| value.is_some_and(|v| v != 0.0)),
        }
    }

    fn parse(&self, columns: &Columns, demand_col: usize) -> Result<(DemandRecord, bool), ValidationError> {
        let demand = self
            .number(Some(demand_col), "demand")?
            .ok_or(ValidationError::MissingDemand { row: self.idx })?;
        if demand < 0.0 {
            return Err(ValidationError::OutOfRange {
                row: self.idx,
                column: "demand",
                value: demand,
            });
        }

        let timestamp = match self.cell(columns.timestamp) {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| ValidationError::BadTimestamp {
                row: self.idx,
                value: raw.to_owned(),
            })?),
            None => None,
        };
        let hour = self.calendar(columns.hour, "hour", 0..=23)?;
        let day_of_week = self.calendar(columns.day_of_week, "day_of_week", 0..=6)?;
        let month = self.calendar(columns.month, "month", 1..=12)?;
        let temperature = self
            .number(columns.temperature, "temperature")?
            .map(|t| t.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1));
        let humidity = self
            .number(columns.humidity, "humidity")?
            .map(|h| h.clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1));
        let is_holiday = self.holiday(columns.is_holiday)?;
        let region = self.cell(columns.region).map(str::to_owned);

        let (hour, day_of_week, month, heuristic) = match timestamp {
            Some(ts) => (
                calendar_u8(ts.hour()),
                calendar_u8(ts.weekday().num_days_from_monday()),
                Some(calendar_u8(ts.month())),
                false,
            ),
            None => {
                let heuristic = hour.is_none() || day_of_week.is_none();
                (
                    hour.unwrap_or_else(|| calendar_u8_from_usize(self.idx % 24)),
                    day_of_week.unwrap_or_else(|| calendar_u8_from_usize((self.idx / 24) % 7)),
                    month,
                    heuristic,
                )
            }
        };

        let record = DemandRecord {
            timestamp,
            demand_mw: demand,
            temperature,
            hour,
            day_of_week,
            month,
            humidity,
            is_holiday,
            region,
        };
        Ok((record, heuristic))
    }
}

// calendar components never exceed 31
#[allow(clippy::cast_possible_truncation)]
const fn calendar_u8(value: u32) -> u8 {
    value as u8
}

#[allow(clippy::cast_possible_truncation)]
const fn calendar_u8_from_usize(value: usize) -> u8 {
    value as u8
}

/// Parses the timestamp layouts accepted in uploads.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
