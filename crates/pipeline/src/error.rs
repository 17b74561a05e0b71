use std::path::PathBuf;

use thiserror::Error;

use crate::model::{FactColumn, Stage};

/// Why a line does not fit its layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutViolation {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("line is {found} characters wide, layout needs {expected}")]
    TooNarrow { expected: usize, found: usize },
    #[error("unreadable delimited line: {0}")]
    Unreadable(String),
}

/// A line that violates its source layout. The line is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}:{line}: {reason}")]
pub struct MalformedRecord {
    pub source_name: String,
    pub line: usize,
    pub reason: String,
    pub raw: String,
}

/// A projection table points past the end of a record. Indicates a layout
/// or schema mismatch, so it aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}:{line}: projection field {field} is out of range (record has {available} fields)")]
pub struct ProjectionError {
    pub source_name: String,
    pub line: usize,
    pub field: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row '{row_id}', column '{column}': cannot normalize '{value}': {reason}")]
pub struct NormalizationError {
    pub row_id: String,
    pub column: FactColumn,
    pub value: String,
    pub reason: String,
}

/// The destination refused a row or batch. Never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sink rejected {target}: {message}")]
pub struct SinkFailure {
    pub target: String,
    pub message: String,
}

impl SinkFailure {
    pub fn row(rowid: i64, message: impl Into<String>) -> Self {
        Self { target: format!("row {rowid}"), message: message.into() }
    }

    pub fn batch(first_rowid: i64, len: usize, message: impl Into<String>) -> Self {
        Self {
            target: format!("batch of {len} rows starting at row {first_rowid}"),
            message: message.into(),
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self { target: "sink".into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Layout file is well-formed but inconsistent.
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    #[error("layout_version {found} is not supported (expected {supported})")]
    LayoutVersion { found: u32, supported: u32 },
    #[error(transparent)]
    Malformed(#[from] MalformedRecord),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Sink(#[from] SinkFailure),
    #[error("{0} stage cancelled")]
    Cancelled(Stage),
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Staged artifact exists but cannot be read back.
    #[error("artifact {}: {message}", path.display())]
    Artifact { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact { path: path.into(), message: message.into() }
    }

    /// Malformed lines are skipped and counted. Normalization failures are
    /// fatal unless the run is configured to skip them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_the_only_non_fatal_kind() {
        let malformed = PipelineError::from(MalformedRecord {
            source_name: "vehicle".into(),
            line: 3,
            reason: "expected 6 fields, found 5".into(),
            raw: "1,a,b,c,d".into(),
        });
        assert!(!malformed.is_fatal());
        assert_eq!(malformed.to_string(), "vehicle:3: expected 6 fields, found 5");

        let projection = PipelineError::from(ProjectionError {
            source_name: "payment".into(),
            line: 1,
            field: 9,
            available: 7,
        });
        assert!(projection.is_fatal());
        assert!(PipelineError::Cancelled(Stage::Load).is_fatal());
    }

    #[test]
    fn sink_failure_names_target() {
        let err = SinkFailure::batch(7, 3, "UNIQUE constraint failed");
        assert_eq!(
            err.to_string(),
            "sink rejected batch of 3 rows starting at row 7: UNIQUE constraint failed"
        );
    }
}
