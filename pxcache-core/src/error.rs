//! Structured error types for queries, the CSV cache, and providers.
//!
//! These are designed to be displayable in CLI output without further context.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid date '{input}': expected YYYYMMDD")]
    InvalidDate { input: String },

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("unknown sampling frequency '{0}'")]
    InvalidFrequency(String),

    #[error("query has no identifiers")]
    EmptyIdentifiers,

    #[error("query has no fields")]
    EmptyFields,

    #[error("field '{field}' not found in cached table (available: {})", available.join(", "))]
    FieldNotFound { field: String, available: Vec<String> },

    #[error("table shape error: {0}")]
    Shape(String),

    #[error("provider returned no data for {0}")]
    NoData(String),

    #[error("identifier not found: {identifier}")]
    IdentifierNotFound { identifier: String },

    #[error("field '{field}' is not supported by provider {provider}")]
    UnsupportedField { provider: String, field: String },

    #[error("frequency {frequency} is not supported by provider {provider}")]
    UnsupportedFrequency { provider: String, frequency: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("provider session failed: {0}")]
    Session(String),

    #[error("corrupt cache file {}: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_not_found_lists_available_fields() {
        let err = DataError::FieldNotFound {
            field: "PX_OPEN".into(),
            available: vec!["PX_LAST".into(), "PX_HIGH".into()],
        };
        assert_eq!(
            err.to_string(),
            "field 'PX_OPEN' not found in cached table (available: PX_LAST, PX_HIGH)"
        );
    }

    #[test]
    fn corrupt_error_names_the_file() {
        let err = DataError::corrupt("/tmp/PxData_DAILY_20200101_20200110.csv", "short row");
        assert!(err.to_string().contains("PxData_DAILY_20200101_20200110.csv"));
        assert!(err.to_string().contains("short row"));
    }
}
