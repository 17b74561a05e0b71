//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract. Schedulers rely on them to
//! decide whether to retry a stage.
//!
//! # Exit Code Ranges
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success                                                  |
//! | 1    | General error (unspecified)                              |
//! | 2    | CLI usage error (bad args, missing sink)                 |
//! | 3    | Layout file unreadable, unparseable or invalid           |
//! | 4    | Input or artifact I/O failure                            |
//! | 5    | Projection error (layout does not match the data)        |
//! | 6    | Normalization error under `on_error = "abort"`           |
//! | 7    | Sink rejected a row or batch                             |
//! | 8    | Run succeeded but recorded issues (`--fail-on-issues`)   |
//! | 9    | Run cancelled                                            |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `pipeline_exit_code` or the relevant command

use tolldata_pipeline::PipelineError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Layout file cannot be read, parsed or validated, or has an unsupported
/// `layout_version`.
pub const EXIT_CONFIG: u8 = 3;

/// Staged input or artifact cannot be read or written.
pub const EXIT_IO: u8 = 4;

/// A projection table references a field the data does not have.
pub const EXIT_PROJECTION: u8 = 5;

/// A value could not be normalized and the policy is `abort`.
pub const EXIT_NORMALIZATION: u8 = 6;

/// The destination refused a row or batch. Batches accepted before the
/// failure stay loaded; a SQLite sink skips them when the load is rerun.
pub const EXIT_SINK: u8 = 7;

/// Non-fatal issues were recorded and `--fail-on-issues` was given.
pub const EXIT_ISSUES: u8 = 8;

/// A stage observed the cancellation flag.
pub const EXIT_CANCELLED: u8 = 9;

/// Map a pipeline error to its exit code.
pub fn pipeline_exit_code(err: &PipelineError) -> u8 {
    match err {
        PipelineError::ConfigParse(_)
        | PipelineError::ConfigValidation(_)
        | PipelineError::LayoutVersion { .. } => EXIT_CONFIG,
        PipelineError::Io { .. } | PipelineError::Artifact { .. } => EXIT_IO,
        PipelineError::Projection(_) => EXIT_PROJECTION,
        PipelineError::Normalization(_) => EXIT_NORMALIZATION,
        PipelineError::Sink(_) => EXIT_SINK,
        PipelineError::Cancelled(_) => EXIT_CANCELLED,
        // Skipped by the engine; only reaches here through misuse
        PipelineError::Malformed(_) => EXIT_ERROR,
    }
}
