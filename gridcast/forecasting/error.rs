use thiserror::Error;

/// Reasons a single uploaded row is rejected. Rejected rows are dropped and counted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// The demand cell is empty.
    #[error("row {row}: missing demand value")]
    MissingDemand {
        /// Zero-based data row index.
        row: usize,
    },
    /// A numeric cell could not be parsed.
    #[error("row {row}: column `{column}` is not numeric ({value:?})")]
    NotNumeric {
        /// Zero-based data row index.
        row: usize,
        /// Canonical column name.
        column: &'static str,
        /// Raw cell contents.
        value: String,
    },
    /// A value is NaN/infinite or otherwise outside its allowed range.
    #[error("row {row}: column `{column}` out of range ({value})")]
    OutOfRange {
        /// Zero-based data row index.
        row: usize,
        /// Canonical column name.
        column: &'static str,
        /// Offending value.
        value: f64,
    },
    /// The timestamp cell could not be parsed.
    #[error("row {row}: unparseable timestamp {value:?}")]
    BadTimestamp {
        /// Zero-based data row index.
        row: usize,
        /// Raw cell contents.
        value: String,
    },
    /// A cell is not valid UTF-8.
    #[error("row {row}: cell {column} is not valid utf-8")]
    NotUtf8 {
        /// Zero-based data row index.
        row: usize,
        /// Zero-based cell position.
        column: usize,
    },
    /// The CSV reader could not split the row.
    #[error("row {row}: unreadable csv record ({reason})")]
    Unreadable {
        /// Zero-based data row index.
        row: usize,
        /// Reader error.
        reason: String,
    },
}

impl ValidationError {
    /// Data row the error refers to.
    #[must_use]
    pub const fn row(&self) -> usize {
        match self {
            Self::MissingDemand { row }
            | Self::NotNumeric { row, .. }
            | Self::OutOfRange { row, .. }
            | Self::BadTimestamp { row, .. }
            | Self::NotUtf8 { row, .. }
            | Self::Unreadable { row, .. } => *row,
        }
    }
}

/// Errors raised by the forecasting core.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Upload has no usable demand column or no valid rows. Nothing was mutated.
    #[error("data format error: {0}")]
    DataFormat(String),
    /// Per-row violation; surfaced inside upload reports, never fatal on its own.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Dataset too small to train.
    #[error("insufficient data: need at least {needed} rows, have {got}")]
    InsufficientData {
        /// Minimum row count.
        needed: usize,
        /// Available row count.
        got: usize,
    },
    /// The regression could not be solved.
    #[error("training failed: {0}")]
    Training(String),
    /// Model artifact is unusable. Predictions fall back to the pattern profile.
    #[error("model load error: {0}")]
    ModelLoad(String),
    /// A second writer arrived while another was in flight.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    /// Malformed prediction request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Filesystem failure in the dataset or artifact store.
    #[error("storage error: {context}: {source}")]
    Storage {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding or decoding failure for persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForecastError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in upload messages and telemetry.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DataFormat(_) => "DataFormatError",
            Self::Validation(_) => "ValidationError",
            Self::InsufficientData { .. } => "InsufficientDataError",
            Self::Training(_) => "TrainingError",
            Self::ModelLoad(_) => "ModelLoadError",
            Self::ConcurrencyConflict(_) => "ConcurrencyConflictError",
            Self::InvalidRequest(_) => "InvalidRequestError",
            Self::Storage { .. } => "StorageError",
            Self::Serialization(_) => "SerializationError",
        }
    }
}

/// Result alias for the forecasting core.
pub type ForecastResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        let format = ForecastError::DataFormat("no demand column".into());
        let small = ForecastError::InsufficientData { needed: 10, got: 3 };
        assert_eq!(format.kind(), "DataFormatError");
        assert_eq!(small.kind(), "InsufficientDataError");
        assert!(small.to_string().contains("at least 10"));
    }

    #[test]
    fn validation_error_reports_row() {
        let err = ValidationError::OutOfRange {
            row: 7,
            column: "hour",
            value: 31.0,
        };
        assert_eq!(err.row(), 7);
        let wrapped: ForecastError = err.into();
        assert_eq!(wrapped.kind(), "ValidationError");
    }
}
