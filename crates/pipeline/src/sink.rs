//! Destination sinks. The core only needs "append row(s)"; durability is the
//! sink's business.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::config::{SinkConfig, SinkKind};
use crate::error::{PipelineError, SinkFailure};
use crate::model::{FactColumn, FactRow};
use crate::normalize::CANONICAL_TIMESTAMP_FORMAT;

/// Append-only fact destination.
pub trait FactSink {
    fn append(&mut self, row: FactRow) -> Result<(), SinkFailure>;

    /// Append several rows; success or failure is reported for the batch.
    fn append_batch(&mut self, rows: Vec<FactRow>) -> Result<(), SinkFailure> {
        for row in rows {
            self.append(row)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkFailure> {
        Ok(())
    }
}

/// Open the sink described by `config`. Relative paths resolve against `base_dir`.
pub fn open_sink(config: &SinkConfig, base_dir: &Path) -> Result<Box<dyn FactSink>, PipelineError> {
    let path = base_dir.join(&config.path);
    match config.kind {
        SinkKind::Csv => Ok(Box::new(CsvSink::create(&path)?)),
        SinkKind::Sqlite => Ok(Box::new(SqliteSink::open(&path, &config.table)?)),
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Buffers rows and hands them to the inner sink `batch_size` at a time.
/// Each row is passed on exactly once.
pub struct BatchingSink<'a> {
    inner: &'a mut dyn FactSink,
    buffer: Vec<FactRow>,
    batch_size: usize,
    submitted: usize,
}

impl<'a> BatchingSink<'a> {
    pub fn new(inner: &'a mut dyn FactSink, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self { inner, buffer: Vec::with_capacity(batch_size), batch_size, submitted: 0 }
    }

    /// Rows the inner sink has accepted.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    fn drain(&mut self) -> Result<(), SinkFailure> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        let len = batch.len();
        self.inner.append_batch(batch)?;
        self.submitted += len;
        Ok(())
    }
}

impl FactSink for BatchingSink<'_> {
    fn append(&mut self, row: FactRow) -> Result<(), SinkFailure> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.drain()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkFailure> {
        self.drain()?;
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<FactRow>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FactRow> {
        self.rows
    }
}

impl FactSink for MemorySink {
    fn append(&mut self, row: FactRow) -> Result<(), SinkFailure> {
        self.rows.push(row);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Nine-column CSV with a header row.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Append to `path`, creating it when absent. The header is written only
    /// into an empty file; existing rows are never truncated.
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;
        let empty = file.metadata().map_err(|e| PipelineError::io(path, e))?.len() == 0;
        Ok(Self::with_header(file, empty)?)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Result<Self, SinkFailure> {
        Self::with_header(inner, true)
    }

    fn with_header(inner: W, header: bool) -> Result<Self, SinkFailure> {
        let mut writer = csv::Writer::from_writer(inner);
        if header {
            writer
                .write_record(FactColumn::ALL.iter().map(|c| c.name()))
                .map_err(|e| SinkFailure::sink(e.to_string()))?;
        }
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> Result<W, SinkFailure> {
        self.writer.into_inner().map_err(|e| SinkFailure::sink(e.to_string()))
    }
}

impl<W: Write> FactSink for CsvSink<W> {
    fn append(&mut self, row: FactRow) -> Result<(), SinkFailure> {
        self.writer
            .write_record(&row.to_fields())
            .map_err(|e| SinkFailure::row(row.rowid, e.to_string()))
    }

    fn flush(&mut self) -> Result<(), SinkFailure> {
        self.writer.flush().map_err(|e| SinkFailure::sink(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Appends into a `tolldata_fact`-shaped table, created when absent.
/// A batch is one transaction: it lands whole or not at all.
///
/// Loading is idempotent per `rowid`: a row already stored with identical
/// values is skipped, so a failed load can be rerun from the start. A stored
/// row with different values is a failure.
pub struct SqliteSink {
    conn: Connection,
    insert_sql: String,
    same_sql: String,
}

impl SqliteSink {
    pub fn open(path: &Path, table: &str) -> Result<Self, PipelineError> {
        let conn = Connection::open(path).map_err(|e| SinkFailure::sink(e.to_string()))?;
        Ok(Self::with_connection(conn, table)?)
    }

    pub fn in_memory(table: &str) -> Result<Self, SinkFailure> {
        let conn = Connection::open_in_memory().map_err(|e| SinkFailure::sink(e.to_string()))?;
        Self::with_connection(conn, table)
    }

    /// `table` must already be a validated identifier.
    fn with_connection(conn: Connection, table: &str) -> Result<Self, SinkFailure> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                rowid INTEGER PRIMARY KEY,
                event_ts TEXT NOT NULL,
                vehicle_number TEXT NOT NULL,
                vehicle_type TEXT NOT NULL,
                number_of_axles INTEGER NOT NULL,
                tollplaza_id INTEGER NOT NULL,
                tollplaza_code TEXT NOT NULL,
                payment_type TEXT NOT NULL,
                vehicle_code TEXT NOT NULL
            );"
        ))
        .map_err(|e| SinkFailure::sink(e.to_string()))?;

        let columns: Vec<&str> = FactColumn::ALL.iter().map(|c| c.name()).collect();
        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(rowid) DO NOTHING",
            columns.join(", ")
        );
        let matches: Vec<String> = columns.iter().enumerate().map(|(i, c)| format!("{c} = ?{}", i + 1)).collect();
        let same_sql = format!("SELECT COUNT(*) FROM {table} WHERE {}", matches.join(" AND "));
        Ok(Self { conn, insert_sql, same_sql })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Insert one row. `Ok(false)` when it was already stored with the same
/// values.
fn insert_row(conn: &Connection, insert_sql: &str, same_sql: &str, row: &FactRow) -> Result<bool, String> {
    let event_ts = row.event_ts.format(CANONICAL_TIMESTAMP_FORMAT).to_string();
    let values = params![
        row.rowid,
        event_ts,
        row.vehicle_number,
        row.vehicle_type,
        row.number_of_axles,
        row.tollplaza_id,
        row.tollplaza_code,
        row.payment_type,
        row.vehicle_code,
    ];

    let mut insert = conn.prepare_cached(insert_sql).map_err(|e| e.to_string())?;
    if insert.execute(values).map_err(|e| e.to_string())? == 1 {
        return Ok(true);
    }

    let mut same = conn.prepare_cached(same_sql).map_err(|e| e.to_string())?;
    let stored: i64 = same.query_row(values, |r| r.get(0)).map_err(|e| e.to_string())?;
    if stored == 0 {
        return Err(format!("rowid {} is already loaded with different values", row.rowid));
    }
    debug!(rowid = row.rowid, "row already loaded, skipping");
    Ok(false)
}

impl FactSink for SqliteSink {
    fn append(&mut self, row: FactRow) -> Result<(), SinkFailure> {
        insert_row(&self.conn, &self.insert_sql, &self.same_sql, &row)
            .map_err(|e| SinkFailure::row(row.rowid, e))?;
        Ok(())
    }

    fn append_batch(&mut self, rows: Vec<FactRow>) -> Result<(), SinkFailure> {
        let Some(first) = rows.first().map(|r| r.rowid) else {
            return Ok(());
        };
        let fail = |e: String| SinkFailure::batch(first, rows.len(), e);

        let tx = self.conn.transaction().map_err(|e| fail(e.to_string()))?;
        for row in &rows {
            insert_row(&tx, &self.insert_sql, &self.same_sql, row).map_err(fail)?;
        }
        tx.commit().map_err(|e| fail(e.to_string()))
    }
}
