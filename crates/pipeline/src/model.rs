use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Physical encoding of a staged source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Delimited,
    TabDelimited,
    FixedWidth,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [Self::Delimited, Self::TabDelimited, Self::FixedWidth];

    /// Lowest priority first. Merging in this order lets the
    /// highest-priority source (delimited) overwrite the others.
    pub const MERGE_ORDER: [SourceKind; 3] = [Self::FixedWidth, Self::TabDelimited, Self::Delimited];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delimited => "delimited",
            Self::TabDelimited => "tab_delimited",
            Self::FixedWidth => "fixed_width",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::Delimited => 0,
            Self::TabDelimited => 1,
            Self::FixedWidth => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fact schema
// ---------------------------------------------------------------------------

/// Canonical fact-table columns, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactColumn {
    Rowid,
    EventTs,
    VehicleNumber,
    VehicleType,
    NumberOfAxles,
    TollplazaId,
    TollplazaCode,
    PaymentType,
    VehicleCode,
}

/// How the normalizer treats a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Timestamp,
    Categorical,
    Text,
}

impl FactColumn {
    pub const ALL: [FactColumn; 9] = [
        Self::Rowid,
        Self::EventTs,
        Self::VehicleNumber,
        Self::VehicleType,
        Self::NumberOfAxles,
        Self::TollplazaId,
        Self::TollplazaCode,
        Self::PaymentType,
        Self::VehicleCode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rowid => "rowid",
            Self::EventTs => "event_ts",
            Self::VehicleNumber => "vehicle_number",
            Self::VehicleType => "vehicle_type",
            Self::NumberOfAxles => "number_of_axles",
            Self::TollplazaId => "tollplaza_id",
            Self::TollplazaCode => "tollplaza_code",
            Self::PaymentType => "payment_type",
            Self::VehicleCode => "vehicle_code",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Rowid | Self::NumberOfAxles | Self::TollplazaId => ColumnKind::Integer,
            Self::EventTs => ColumnKind::Timestamp,
            Self::VehicleType | Self::PaymentType => ColumnKind::Categorical,
            Self::VehicleNumber | Self::TollplazaCode | Self::VehicleCode => ColumnKind::Text,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for FactColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Row identifier
// ---------------------------------------------------------------------------

/// Join key shared verbatim by all three sources.
///
/// Ordering is numeric when both sides are decimal integers, so `"2"` sorts
/// before `"10"`. Numeric ids sort before non-numeric ones; everything else
/// (including ties like `"01"` vs `"1"`) falls back to byte order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key the consolidator joins on. Identifiers that load as the same
    /// integer `rowid` (`"1"`, `"01"`, `"+1"`) share one key, written in
    /// its plain decimal form; anything else is kept verbatim.
    pub fn join_key(&self) -> RowId {
        match self.0.parse::<i64>() {
            Ok(n) if n.to_string() != self.0 => RowId(n.to_string()),
            _ => self.clone(),
        }
    }

    fn numeric(&self) -> Option<u128> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }
}

impl Ord for RowId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RowId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Records, one type per lifecycle step
// ---------------------------------------------------------------------------

/// Fields of one physical line, in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: SourceKind,
    /// 1-based physical line number in the source file.
    pub line: usize,
    pub fields: Vec<String>,
}

/// The subset of canonical columns one source contributes. Always holds
/// `rowid`, mirrored in `row_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedRecord {
    pub kind: SourceKind,
    pub line: usize,
    pub row_id: RowId,
    pub values: BTreeMap<FactColumn, String>,
}

impl ProjectedRecord {
    pub fn get(&self, column: FactColumn) -> Option<&str> {
        self.values.get(&column).map(String::as_str)
    }
}

/// All three sources merged for one row identifier. Values are still raw
/// strings; typing happens in the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedRecord {
    pub row_id: RowId,
    pub values: BTreeMap<FactColumn, String>,
}

impl UnifiedRecord {
    pub fn get(&self, column: FactColumn) -> Option<&str> {
        self.values.get(&column).map(String::as_str)
    }
}

/// A normalized, typed row ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactRow {
    pub rowid: i64,
    pub event_ts: NaiveDateTime,
    pub vehicle_number: String,
    pub vehicle_type: String,
    pub number_of_axles: i64,
    pub tollplaza_id: i64,
    pub tollplaza_code: String,
    pub payment_type: String,
    pub vehicle_code: String,
}

impl FactRow {
    /// Column values rendered as text, in `FactColumn::ALL` order.
    pub fn to_fields(&self) -> [String; 9] {
        [
            self.rowid.to_string(),
            self.event_ts.format(crate::normalize::CANONICAL_TIMESTAMP_FORMAT).to_string(),
            self.vehicle_number.clone(),
            self.vehicle_type.clone(),
            self.number_of_axles.to_string(),
            self.tollplaza_id.to_string(),
            self.tollplaza_code.clone(),
            self.payment_type.clone(),
            self.vehicle_code.clone(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Join outcomes
// ---------------------------------------------------------------------------

/// A row identifier that did not appear in every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinGap {
    pub row_id: RowId,
    pub present_in: Vec<SourceKind>,
    pub missing_from: Vec<SourceKind>,
}

/// A repeated row identifier within one source. The first occurrence is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRow {
    pub row_id: RowId,
    pub kind: SourceKind,
    pub kept_line: usize,
    pub dropped_line: usize,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Project,
    Consolidate,
    Normalize,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Project => write!(f, "project"),
            Self::Consolidate => write!(f, "consolidate"),
            Self::Normalize => write!(f, "normalize"),
            Self::Load => write!(f, "load"),
        }
    }
}
