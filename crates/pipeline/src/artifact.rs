//! Staged artifacts passed between stages when they run as separate steps.
//! Every function takes an explicit path; there is no implicit staging area.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

use crate::error::PipelineError;
use crate::model::{FactColumn, ProjectedRecord, RowId, SourceKind, UnifiedRecord};

fn create(path: &Path) -> Result<csv::Writer<BufWriter<File>>, PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn open(path: &Path) -> Result<csv::Reader<File>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(csv::Reader::from_reader(file))
}

/// Write a projected stream. The header is `columns`, which must start with
/// `rowid`; each record's source line number is not kept.
pub fn write_projected<I>(path: &Path, columns: &[FactColumn], records: I) -> Result<usize, PipelineError>
where
    I: IntoIterator<Item = ProjectedRecord>,
{
    let mut writer = create(path)?;
    let fail = |e: csv::Error| PipelineError::artifact(path, e.to_string());

    writer.write_record(columns.iter().map(|c| c.name())).map_err(fail)?;
    let mut written = 0;
    for record in records {
        writer
            .write_record(columns.iter().map(|&c| record.get(c).unwrap_or("")))
            .map_err(fail)?;
        written += 1;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(written)
}

/// Read a projected stream back. Line numbers refer to the artifact file.
pub fn read_projected(path: &Path, kind: SourceKind) -> Result<Vec<ProjectedRecord>, PipelineError> {
    let mut reader = open(path)?;
    let columns = header_columns(path, &mut reader)?;
    if !columns.contains(&FactColumn::Rowid) {
        return Err(PipelineError::artifact(path, "header has no 'rowid' column"));
    }

    let mut out = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| PipelineError::artifact(path, e.to_string()))?;
        let values: BTreeMap<FactColumn, String> =
            columns.iter().copied().zip(row.iter().map(str::to_string)).collect();
        let row_id = RowId::new(values.get(&FactColumn::Rowid).cloned().unwrap_or_default());
        if row_id.is_empty() {
            return Err(PipelineError::artifact(path, format!("row {}: empty rowid", index + 1)));
        }
        out.push(ProjectedRecord { kind, line: index + 2, row_id, values });
    }
    Ok(out)
}

/// Write the consolidated stream with all nine fact columns.
pub fn write_unified<I>(path: &Path, records: I) -> Result<usize, PipelineError>
where
    I: IntoIterator<Item = UnifiedRecord>,
{
    let mut writer = create(path)?;
    let fail = |e: csv::Error| PipelineError::artifact(path, e.to_string());

    writer.write_record(FactColumn::ALL.iter().map(|c| c.name())).map_err(fail)?;
    let mut written = 0;
    for record in records {
        writer
            .write_record(FactColumn::ALL.iter().map(|&c| record.get(c).unwrap_or("")))
            .map_err(fail)?;
        written += 1;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(written)
}

/// Read a consolidated stream. Every fact column must be in the header.
pub fn read_unified(path: &Path) -> Result<Vec<UnifiedRecord>, PipelineError> {
    let mut reader = open(path)?;
    let columns = header_columns(path, &mut reader)?;
    if let Some(missing) = FactColumn::ALL.iter().find(|c| !columns.contains(c)) {
        return Err(PipelineError::artifact(path, format!("header is missing column '{missing}'")));
    }

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| PipelineError::artifact(path, e.to_string()))?;
        let values: BTreeMap<FactColumn, String> =
            columns.iter().copied().zip(row.iter().map(str::to_string)).collect();
        let row_id = RowId::new(values.get(&FactColumn::Rowid).cloned().unwrap_or_default());
        out.push(UnifiedRecord { row_id, values });
    }
    Ok(out)
}

fn header_columns(path: &Path, reader: &mut csv::Reader<File>) -> Result<Vec<FactColumn>, PipelineError> {
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::artifact(path, e.to_string()))?;
    headers
        .iter()
        .map(|name| {
            FactColumn::from_name(name.trim())
                .ok_or_else(|| PipelineError::artifact(path, format!("unknown column '{name}' in header")))
        })
        .collect()
}

/// Pretty-printed JSON report (gap report, run report).
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| PipelineError::artifact(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn projected(id: &str, vehicle_type: &str) -> ProjectedRecord {
        ProjectedRecord {
            kind: SourceKind::Delimited,
            line: 9,
            row_id: RowId::from(id),
            values: BTreeMap::from([
                (FactColumn::Rowid, id.to_string()),
                (FactColumn::VehicleType, vehicle_type.to_string()),
            ]),
        }
    }

    #[test]
    fn projected_stream_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vehicle.csv");
        let columns = [FactColumn::Rowid, FactColumn::VehicleType];
        let n = write_projected(&path, &columns, vec![projected("1", "car"), projected("2", "Van, large")]).unwrap();
        assert_eq!(n, 2);

        let back = read_projected(&path, SourceKind::Delimited).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].row_id.as_str(), "2");
        assert_eq!(back[1].get(FactColumn::VehicleType), Some("Van, large"));
        assert_eq!(back[1].line, 3);
    }

    #[test]
    fn unified_stream_requires_all_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unified.csv");
        std::fs::write(&path, "rowid,vehicle_type\n1,car\n").unwrap();
        let err = read_unified(&path).unwrap_err();
        assert!(err.to_string().contains("event_ts"), "{err}");
    }

    #[test]
    fn unknown_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.csv");
        std::fs::write(&path, "rowid,colour\n1,red\n").unwrap();
        let err = read_projected(&path, SourceKind::FixedWidth).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }
}
