//! Error taxonomy for the drift pipeline
//!
//! - [`InputError`]: invalid batch parameters, never retried
//! - [`crate::service::ServiceError`]: transient or fatal transformation failures
//! - [`AnalysisError`]: a statistic that cannot be computed; omitted from the report
//! - [`PersistenceError`]: result store I/O
//!
//! Stage failures are not errors at this level: they are recorded on the
//! experiment itself (see [`crate::pipeline::ExperimentStatus`]) so one failed
//! chain never aborts the batch.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid caller-supplied parameters. Surfaced before any work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("noise level must be in [0, 100], got {level}")]
    InvalidNoiseLevel { level: i64 },

    #[error("noise level {level} is listed more than once")]
    DuplicateNoiseLevel { level: u8 },

    #[error("input text is empty")]
    EmptyText,

    #[error("stage chain is empty: at least one skill is required")]
    EmptyChain,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A statistic that could not be computed from the available data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("vector dimension mismatch: {left} != {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl AnalysisError {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self::InsufficientData(reason.into())
    }
}

/// Result store failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for library entry points
#[derive(Error, Debug)]
pub enum DriftError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, DriftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_display() {
        let err = InputError::InvalidNoiseLevel { level: 101 };
        assert!(err.to_string().contains("101"));
        assert_eq!(InputError::EmptyText.to_string(), "input text is empty");
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::insufficient("need 2 groups");
        assert_eq!(err.to_string(), "insufficient data: need 2 groups");

        let err = AnalysisError::DimensionMismatch { left: 3, right: 4 };
        assert!(err.to_string().contains("3 != 4"));
    }

    #[test]
    fn test_drift_error_from_input() {
        let err: DriftError = InputError::EmptyChain.into();
        assert!(matches!(err, DriftError::Input(InputError::EmptyChain)));
    }
}
