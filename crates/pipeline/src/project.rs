use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{MalformedRecord, PipelineError, ProjectionError};
use crate::model::{FactColumn, ProjectedRecord, RawRecord, RowId};

/// One entry of a projection table: 1-based source field → canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FieldMapping {
    pub field: usize,
    pub column: FactColumn,
}

/// Ordered field → column mappings for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionTable {
    mappings: Vec<FieldMapping>,
}

impl ProjectionTable {
    /// Field numbers start at 1. `rowid` must be mapped, and no column may be
    /// mapped twice.
    pub fn new(mappings: Vec<FieldMapping>) -> Result<Self, String> {
        let mut seen = Vec::with_capacity(mappings.len());
        for m in &mappings {
            if m.field == 0 {
                return Err(format!("column '{}': field numbers start at 1", m.column));
            }
            if seen.contains(&m.column) {
                return Err(format!("column '{}' is mapped more than once", m.column));
            }
            seen.push(m.column);
        }
        if !seen.contains(&FactColumn::Rowid) {
            return Err("projection does not map 'rowid'".into());
        }
        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    pub fn columns(&self) -> impl Iterator<Item = FactColumn> + '_ {
        self.mappings.iter().map(|m| m.column)
    }

    /// Highest field number referenced.
    pub fn max_field(&self) -> usize {
        self.mappings.iter().map(|m| m.field).max().unwrap_or(0)
    }
}

/// Keep only the fields this source contributes to the fact table.
///
/// An out-of-range field is a [`ProjectionError`]; an empty row identifier
/// makes the line a [`MalformedRecord`].
pub fn project(
    source_name: &str,
    table: &ProjectionTable,
    record: RawRecord,
) -> Result<ProjectedRecord, PipelineError> {
    let mut values = BTreeMap::new();
    for m in &table.mappings {
        let value = record.fields.get(m.field - 1).ok_or_else(|| ProjectionError {
            source_name: source_name.to_string(),
            line: record.line,
            field: m.field,
            available: record.fields.len(),
        })?;
        values.insert(m.column, value.clone());
    }

    let row_id = RowId::new(values.get(&FactColumn::Rowid).cloned().unwrap_or_default());
    if row_id.is_empty() {
        return Err(MalformedRecord {
            source_name: source_name.to_string(),
            line: record.line,
            reason: "row identifier is empty".into(),
            raw: record.fields.join("|"),
        }
        .into());
    }

    Ok(ProjectedRecord {
        kind: record.kind,
        line: record.line,
        row_id,
        values,
    })
}
