use std::collections::{btree_map, BTreeMap};

use tracing::debug;

use crate::cancel::CancelFlag;
use crate::error::PipelineError;
use crate::model::{DuplicateRow, JoinGap, ProjectedRecord, RowId, SourceKind, Stage, UnifiedRecord};

/// One slot per source kind, indexed by `SourceKind::slot`.
type Slots = [Option<ProjectedRecord>; 3];

/// Result of joining the three projected streams.
pub struct Consolidation {
    /// Complete rows, ascending by row identifier, merged on demand.
    pub records: UnifiedRecords,
    /// Identifiers missing from at least one source, ascending.
    pub gaps: Vec<JoinGap>,
    /// Repeated identifiers within a single source.
    pub duplicates: Vec<DuplicateRow>,
}

/// Join projected streams on row identifier.
///
/// Every stream is indexed by identifier first, so inputs need not be sorted
/// and output order is always ascending. Identifiers are matched on
/// [`RowId::join_key`], so `"01"` and `"1"` are the same row. Records are
/// slotted by their own `kind`; the outer iterator is normally one stream
/// per source.
pub fn consolidate<I>(streams: I, cancel: &CancelFlag) -> Result<Consolidation, PipelineError>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = ProjectedRecord>,
{
    let mut index: BTreeMap<RowId, Slots> = BTreeMap::new();
    let mut duplicates = Vec::new();

    for stream in streams {
        for record in stream {
            cancel.check(Stage::Consolidate)?;
            let key = record.row_id.join_key();
            let slots = index.entry(key.clone()).or_default();
            let slot = &mut slots[record.kind.slot()];
            match slot.as_ref().map(|kept| kept.line) {
                Some(kept_line) => duplicates.push(DuplicateRow {
                    row_id: key,
                    kind: record.kind,
                    kept_line,
                    dropped_line: record.line,
                }),
                None => *slot = Some(record),
            }
        }
    }

    let mut gaps = Vec::new();
    let mut complete = 0;
    for (row_id, slots) in &index {
        let (present_in, missing_from): (Vec<SourceKind>, Vec<SourceKind>) =
            SourceKind::ALL.into_iter().partition(|k| slots[k.slot()].is_some());
        if missing_from.is_empty() {
            complete += 1;
        } else {
            gaps.push(JoinGap { row_id: row_id.clone(), present_in, missing_from });
        }
    }

    Ok(Consolidation {
        records: UnifiedRecords { inner: index.into_iter(), remaining: complete },
        gaps,
        duplicates,
    })
}

/// Lazy, forward-only sequence of merged rows.
pub struct UnifiedRecords {
    inner: btree_map::IntoIter<RowId, Slots>,
    remaining: usize,
}

impl Iterator for UnifiedRecords {
    type Item = UnifiedRecord;

    fn next(&mut self) -> Option<UnifiedRecord> {
        for (row_id, slots) in self.inner.by_ref() {
            if slots.iter().all(Option::is_some) {
                self.remaining -= 1;
                return Some(merge(row_id, slots));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for UnifiedRecords {}

/// Merge one complete set of slots. Sources are applied lowest priority
/// first, so on a shared column delimited > tab-delimited > fixed-width.
fn merge(row_id: RowId, mut slots: Slots) -> UnifiedRecord {
    let mut values = BTreeMap::new();
    for kind in SourceKind::MERGE_ORDER {
        let Some(record) = slots[kind.slot()].take() else {
            continue;
        };
        for (column, value) in record.values {
            if let Some(previous) = values.get(&column) {
                if *previous != value {
                    debug!(row_id = %row_id, %column, %kind, replaced = %previous, with = %value, "column overridden by higher-priority source");
                }
            }
            values.insert(column, value);
        }
    }
    UnifiedRecord { row_id, values }
}
