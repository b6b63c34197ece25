use serde::Serialize;
use thiserror::Error;

/// Which population of a comparison failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum Side {
    #[strum(to_string = "from")]
    From,
    #[strum(to_string = "to")]
    To,
}

/// Reason a marker series was rejected by the comparator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DataQualityIssue {
    Empty,
    ContainsNaN { count: usize },
    ContainsInfinite { count: usize },
    UnsupportedType { dtype: String },
}

impl std::fmt::Display for DataQualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "series is empty"),
            Self::ContainsNaN { count } => write!(f, "series contains {count} NaN value(s)"),
            Self::ContainsInfinite { count } => {
                write!(f, "series contains {count} infinite value(s)")
            }
            Self::UnsupportedType { dtype } => {
                write!(f, "series has unsupported type {dtype}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CytoNormError {
    #[error("Column not found in event table: {0}")]
    ColumnNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Column '{column}' is not numeric (dtype: {dtype})")]
    NonNumericColumn { column: String, dtype: String },

    #[error("Data quality error for marker '{marker}' ({side} population): {issue}")]
    DataQuality {
        marker: String,
        side: Side,
        issue: DataQualityIssue,
    },

    #[error("Failed to read table '{identifier}': {message}")]
    Source { identifier: String, message: String },

    #[error("Failed to write table '{identifier}': {message}")]
    Sink { identifier: String, message: String },

    #[error("Insufficient data: need at least {min} events, got {actual}")]
    InsufficientData { min: usize, actual: usize },

    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Statistical computation failed: {0}")]
    StatsError(String),
}

impl CytoNormError {
    pub fn data_quality(marker: impl Into<String>, side: Side, issue: DataQualityIssue) -> Self {
        Self::DataQuality {
            marker: marker.into(),
            side,
            issue,
        }
    }

    pub fn read_failed(identifier: impl Into<String>, message: impl ToString) -> Self {
        Self::Source {
            identifier: identifier.into(),
            message: message.to_string(),
        }
    }

    pub fn write_failed(identifier: impl Into<String>, message: impl ToString) -> Self {
        Self::Sink {
            identifier: identifier.into(),
            message: message.to_string(),
        }
    }

    /// Missing/misnamed columns and invalid settings; fatal for the whole run
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ColumnNotFound(_) | Self::ConfigError(_))
    }

    pub fn is_data_quality(&self) -> bool {
        matches!(self, Self::DataQuality { .. })
    }

    /// I/O boundary failures; fatal for one file only
    pub fn is_io_boundary(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::Sink { .. })
    }
}

pub type Result<T> = std::result::Result<T, CytoNormError>;
