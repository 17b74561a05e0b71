use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::model::{DuplicateRow, JoinGap, SourceKind};

/// Non-fatal conditions counted per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MalformedRecord,
    JoinGap,
    DuplicateRowId,
    NormalizationError,
}

impl IssueKind {
    pub const ALL: [IssueKind; 4] = [
        Self::MalformedRecord,
        Self::JoinGap,
        Self::DuplicateRowId,
        Self::NormalizationError,
    ];
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRecord => write!(f, "malformed_record"),
            Self::JoinGap => write!(f, "join_gap"),
            Self::DuplicateRowId => write!(f, "duplicate_row_id"),
            Self::NormalizationError => write!(f, "normalization_error"),
        }
    }
}

/// Line statistics for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub name: String,
    pub kind: Option<SourceKind>,
    pub lines_read: usize,
    pub records: usize,
    pub malformed: usize,
}

/// Audit summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sources: Vec<SourceStats>,
    /// Identifiers present in all three sources.
    pub unified: usize,
    pub normalized: usize,
    /// Rows the sink accepted.
    pub loaded: usize,
    pub issues: BTreeMap<IssueKind, usize>,
}

impl RunSummary {
    pub fn record(&mut self, kind: IssueKind) {
        self.record_n(kind, 1);
    }

    pub fn record_n(&mut self, kind: IssueKind, n: usize) {
        if n > 0 {
            *self.issues.entry(kind).or_insert(0) += n;
        }
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_issues(&self) -> usize {
        self.issues.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_issues() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub layout_version: u32,
    pub engine_version: String,
    pub run_at: String,
}

impl RunMeta {
    pub fn now(config_name: &str, layout_version: u32) -> Self {
        Self {
            config_name: config_name.to_string(),
            layout_version,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Everything a run leaves behind for auditing, besides the loaded rows.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub summary: RunSummary,
    pub gaps: Vec<JoinGap>,
    pub duplicates: Vec<DuplicateRow>,
}
