use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Unknown report type: {0}")]
    UnknownReportType(String),

    #[error("Referenced {entity} '{id}' does not exist")]
    MissingReference { entity: &'static str, id: String },

    #[error("Invalid reporting policy: {0}")]
    InvalidPolicy(String),

    #[error("{entity} '{id}' violates its invariants: {details}")]
    InvariantViolation {
        entity: &'static str,
        id: String,
        details: String,
    },

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Report generation was cancelled")]
    Cancelled,

    #[error("Date calculation error: {0}")]
    Date(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Stable, caller-facing classification of a [`ReportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRange,
    UnknownReportType,
    MissingReference,
    InvalidPolicy,
    InvariantViolation,
    StoreUnavailable,
    Cancelled,
    InvalidDate,
    Serialization,
}

/// Uniform error envelope returned by the report facade. Callers map `kind` to
/// their own status codes and show `message` as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::UnknownReportType(_) => ErrorKind::UnknownReportType,
            Self::MissingReference { .. } => ErrorKind::MissingReference,
            Self::InvalidPolicy(_) => ErrorKind::InvalidPolicy,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::Store(_) => ErrorKind::StoreUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Date(_) => ErrorKind::InvalidDate,
            Self::Serialization(_) | Self::Csv(_) => ErrorKind::Serialization,
        }
    }
}

impl From<ReportError> for ErrorEnvelope {
    fn from(err: ReportError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
