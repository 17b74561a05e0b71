//! `tolldata-pipeline`: consolidation pipeline for toll-transaction sources.
//!
//! Parses three physically different staged files (comma-delimited,
//! tab-delimited, fixed-width), projects them onto the fact-table columns,
//! joins them on row identifier and normalizes the result into a sink.
//! No CLI dependencies.

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod layout;
pub mod model;
pub mod normalize;
pub mod parse;
pub mod project;
pub mod sink;
pub mod summary;

pub use cancel::CancelFlag;
pub use config::PipelineConfig;
pub use consolidate::consolidate;
pub use engine::{run, SourceInputs};
pub use error::PipelineError;
pub use model::{FactColumn, FactRow, JoinGap, SourceKind, UnifiedRecord};
pub use normalize::normalize_and_load;
pub use parse::parse_record;
pub use project::project;
pub use sink::FactSink;
pub use summary::{RunReport, RunSummary};
