use std::borrow::Cow;
use std::io::BufRead;
use std::path::PathBuf;

use crate::config::Source;
use crate::error::{LayoutViolation, MalformedRecord, PipelineError};
use crate::layout::{Layout, ParseLine};
use crate::model::{RawRecord, SourceKind};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode one physical line, without its terminator.
///
/// Tries UTF-8 first and falls back to Windows-1252 (common for files
/// exported from spreadsheet tools).
pub fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    let bytes = &raw[..end];

    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded
        }
    }
}

/// Parse one raw line into a [`RawRecord`]. Pure: the same bytes always
/// produce the same record.
pub fn parse_record(
    kind: SourceKind,
    layout: &Layout,
    line: usize,
    raw: &[u8],
) -> Result<RawRecord, LayoutViolation> {
    let text = decode_line(raw);
    let fields = layout.parse_line(&text)?;
    Ok(RawRecord { kind, line, fields })
}

/// Lazy reader over one staged source file.
///
/// Yields one item per non-blank line after `skip_lines`. Layout violations
/// come back as [`PipelineError::Malformed`] so the caller can skip and
/// count them; I/O failures are fatal.
pub struct SourceReader<'a, R> {
    source: &'a Source,
    path: PathBuf,
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl<'a, R: BufRead> SourceReader<'a, R> {
    pub fn new(source: &'a Source, path: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            source,
            path: path.into(),
            reader,
            line: 0,
            buf: Vec::new(),
        }
    }

    /// Lines consumed so far, including skipped and blank ones.
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for SourceReader<'_, R> {
    type Item = Result<RawRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(PipelineError::io(self.path.clone(), e))),
            }
            self.line += 1;
            if self.line == 1 && self.buf.starts_with(UTF8_BOM) {
                self.buf.drain(..UTF8_BOM.len());
            }

            if self.line <= self.source.skip_lines {
                continue;
            }
            if decode_line(&self.buf).trim().is_empty() {
                continue;
            }

            let parsed = parse_record(self.source.kind, &self.source.layout, self.line, &self.buf);
            return Some(parsed.map_err(|violation| {
                MalformedRecord {
                    source_name: self.source.name.clone(),
                    line: self.line,
                    reason: violation.to_string(),
                    raw: decode_line(&self.buf).into_owned(),
                }
                .into()
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::model::FactColumn;
    use crate::project::FieldMapping;

    fn csv_source(skip_lines: usize) -> Source {
        let config = SourceConfig {
            kind: SourceKind::Delimited,
            file: "vehicle-data.csv".into(),
            delimiter: None,
            fields: Some(3),
            columns: None,
            skip_lines,
            project: vec![FieldMapping { field: 1, column: FactColumn::Rowid }],
        };
        Source::from_config("vehicle", &config).unwrap()
    }

    #[test]
    fn decode_strips_terminators() {
        assert_eq!(decode_line(b"a,b\r\n"), "a,b");
        assert_eq!(decode_line(b"a,b\n"), "a,b");
        assert_eq!(decode_line(b"a,b"), "a,b");
    }

    #[test]
    fn decode_falls_back_to_windows_1252() {
        // 0xE9 is 'é' in Windows-1252 and invalid as a lone UTF-8 byte
        assert_eq!(decode_line(b"caf\xe9\n"), "café");
    }

    #[test]
    fn reader_skips_header_and_blank_lines() {
        let source = csv_source(1);
        let data = "Rowid,Timestamp,Type\n1,a,car\n\n2,b,van\n";
        let mut reader = SourceReader::new(&source, "vehicle-data.csv", data.as_bytes());
        let records: Vec<RawRecord> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 2);
        assert_eq!(records[1].line, 4);
        assert_eq!(records[1].fields, vec!["2", "b", "van"]);
        assert_eq!(reader.lines_read(), 4);
    }

    #[test]
    fn reader_drops_byte_order_mark() {
        let source = csv_source(0);
        let data = "\u{feff}1,a,car\n2,b,van\n";
        let records: Vec<RawRecord> = SourceReader::new(&source, "vehicle-data.csv", data.as_bytes())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records[0].fields, vec!["1", "a", "car"]);
        assert_eq!(records[1].fields[0], "2");
    }

    #[test]
    fn reader_reports_malformed_lines_and_continues() {
        let source = csv_source(0);
        let data = "1,a,car\n2,b\n3,c,van\n";
        let items: Vec<_> = SourceReader::new(&source, "vehicle-data.csv", data.as_bytes()).collect();
        assert_eq!(items.len(), 3);
        match &items[1] {
            Err(PipelineError::Malformed(m)) => {
                assert_eq!(m.line, 2);
                assert_eq!(m.raw, "2,b");
                assert_eq!(m.source_name, "vehicle");
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
        assert!(items[2].is_ok());
    }
}
