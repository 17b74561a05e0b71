//! Physical line layouts.
//!
//! A closed set of variants chosen by the `kind` tag of each source in the
//! layout file. Every variant turns one decoded line into its fields.

use serde::Deserialize;

use crate::error::{LayoutViolation, PipelineError};

/// Split one decoded line into fields.
pub trait ParseLine {
    fn parse_line(&self, line: &str) -> Result<Vec<String>, LayoutViolation>;

    /// Number of fields every parsed line carries.
    fn field_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Delimited
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedLayout {
    delimiter: char,
    fields: usize,
}

impl DelimitedLayout {
    pub fn new(delimiter: char, fields: usize) -> Result<Self, PipelineError> {
        if fields == 0 {
            return Err(PipelineError::ConfigValidation(
                "delimited layout must declare at least one field".into(),
            ));
        }
        if delimiter == '\n' || delimiter == '\r' || delimiter == '"' {
            return Err(PipelineError::ConfigValidation(format!(
                "{delimiter:?} cannot be used as a delimiter"
            )));
        }
        if !delimiter.is_ascii() {
            return Err(PipelineError::ConfigValidation(format!(
                "delimiter {delimiter:?} must be a single ASCII character"
            )));
        }
        Ok(Self { delimiter, fields })
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

impl ParseLine for DelimitedLayout {
    fn parse_line(&self, line: &str) -> Result<Vec<String>, LayoutViolation> {
        // Checked ASCII in `new`, so the cast keeps the character.
        let record = csv::ReaderBuilder::new()
            .delimiter(self.delimiter as u8)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes())
            .into_records()
            .next()
            .transpose()
            .map_err(|e| LayoutViolation::Unreadable(e.to_string()))?
            .unwrap_or_default();
        if record.len() != self.fields {
            return Err(LayoutViolation::FieldCount {
                expected: self.fields,
                found: record.len(),
            });
        }
        Ok(record.iter().map(str::to_string).collect())
    }

    fn field_count(&self) -> usize {
        self.fields
    }
}

// ---------------------------------------------------------------------------
// Fixed width
// ---------------------------------------------------------------------------

/// Character range `[start, end)` of one fixed-width column.
/// Written as a two-element array in the layout file: `[0, 6]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(usize, usize)")]
pub struct FixedColumn {
    pub start: usize,
    pub end: usize,
}

impl From<(usize, usize)> for FixedColumn {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

/// Column offsets are checked once here; lines are only width-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWidthLayout {
    columns: Vec<FixedColumn>,
    width: usize,
}

impl FixedWidthLayout {
    pub fn new(columns: Vec<FixedColumn>) -> Result<Self, PipelineError> {
        if columns.is_empty() {
            return Err(PipelineError::ConfigValidation(
                "fixed-width layout must declare at least one column".into(),
            ));
        }

        let mut prev_end = 0;
        for (i, col) in columns.iter().enumerate() {
            if col.start >= col.end {
                return Err(PipelineError::ConfigValidation(format!(
                    "fixed-width column {} is empty or reversed: [{}, {}]",
                    i + 1,
                    col.start,
                    col.end
                )));
            }
            if col.start < prev_end {
                return Err(PipelineError::ConfigValidation(format!(
                    "fixed-width column {} starts at {} but the previous column ends at {prev_end}",
                    i + 1,
                    col.start
                )));
            }
            prev_end = col.end;
        }

        Ok(Self { columns, width: prev_end })
    }

    /// Minimum line width in characters.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl ParseLine for FixedWidthLayout {
    fn parse_line(&self, line: &str) -> Result<Vec<String>, LayoutViolation> {
        // ASCII lines slice directly; otherwise map character offsets to bytes.
        if line.is_ascii() {
            if line.len() < self.width {
                return Err(LayoutViolation::TooNarrow { expected: self.width, found: line.len() });
            }
            return Ok(self
                .columns
                .iter()
                .map(|c| line[c.start..c.end].trim().to_string())
                .collect());
        }

        let mut offsets: Vec<usize> = line.char_indices().map(|(i, _)| i).collect();
        let chars = offsets.len();
        if chars < self.width {
            return Err(LayoutViolation::TooNarrow { expected: self.width, found: chars });
        }
        offsets.push(line.len());

        Ok(self
            .columns
            .iter()
            .map(|c| line[offsets[c.start]..offsets[c.end]].trim().to_string())
            .collect())
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Delimited(DelimitedLayout),
    FixedWidth(FixedWidthLayout),
}

impl ParseLine for Layout {
    fn parse_line(&self, line: &str) -> Result<Vec<String>, LayoutViolation> {
        match self {
            Self::Delimited(l) => l.parse_line(line),
            Self::FixedWidth(l) => l.parse_line(line),
        }
    }

    fn field_count(&self) -> usize {
        match self {
            Self::Delimited(l) => l.field_count(),
            Self::FixedWidth(l) => l.field_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(spec: &[(usize, usize)]) -> Vec<FixedColumn> {
        spec.iter().copied().map(FixedColumn::from).collect()
    }

    #[test]
    fn delimited_splits_and_trims() {
        let layout = DelimitedLayout::new(',', 6).unwrap();
        let fields = layout.parse_line("1, 04:50:00 ,XXX1,CAR,2,1").unwrap();
        assert_eq!(fields, vec!["1", "04:50:00", "XXX1", "CAR", "2", "1"]);
    }

    #[test]
    fn delimited_rejects_wrong_field_count() {
        let layout = DelimitedLayout::new('\t', 7).unwrap();
        let err = layout.parse_line("1\tx\ty").unwrap_err();
        assert_eq!(err, LayoutViolation::FieldCount { expected: 7, found: 3 });
    }

    #[test]
    fn delimited_requires_fields() {
        assert!(DelimitedLayout::new(',', 0).is_err());
        assert!(DelimitedLayout::new('\n', 3).is_err());
        assert!(DelimitedLayout::new('§', 3).is_err());
    }

    #[test]
    fn delimited_keeps_quoted_delimiters() {
        let layout = DelimitedLayout::new(',', 3).unwrap();
        let fields = layout.parse_line("1,\"Van, large\",VC1").unwrap();
        assert_eq!(fields, vec!["1", "Van, large", "VC1"]);

        let tab = DelimitedLayout::new('\t', 2).unwrap();
        assert_eq!(tab.parse_line("7\t\"a\tb\"").unwrap(), vec!["7", "a\tb"]);
    }

    #[test]
    fn fixed_width_slices_and_trims() {
        let layout = FixedWidthLayout::new(cols(&[(0, 5), (5, 15), (15, 25), (25, 35), (35, 47), (47, 57)])).unwrap();
        let line = "2    04:50:22  XXX2      1         101         CASH      ";
        let fields = layout.parse_line(line).unwrap();
        assert_eq!(fields, vec!["2", "04:50:22", "XXX2", "1", "101", "CASH"]);
    }

    #[test]
    fn fixed_width_rejects_short_lines() {
        let layout = FixedWidthLayout::new(cols(&[(0, 4), (4, 10)])).unwrap();
        let err = layout.parse_line("12345").unwrap_err();
        assert_eq!(err, LayoutViolation::TooNarrow { expected: 10, found: 5 });
    }

    #[test]
    fn fixed_width_ignores_gaps_and_trailing_content() {
        let layout = FixedWidthLayout::new(cols(&[(0, 3), (4, 7)])).unwrap();
        let fields = layout.parse_line(" 42|abc|tail").unwrap();
        assert_eq!(fields, vec!["42", "abc"]);
    }

    #[test]
    fn fixed_width_counts_characters_not_bytes() {
        let layout = FixedWidthLayout::new(cols(&[(0, 4), (4, 8)])).unwrap();
        let fields = layout.parse_line("Łódź  ab").unwrap();
        assert_eq!(fields, vec!["Łódź", "ab"]);
        assert!(layout.parse_line("Łódź").is_err());
    }

    #[test]
    fn fixed_width_validates_offsets_once() {
        assert!(FixedWidthLayout::new(vec![]).is_err());
        assert!(FixedWidthLayout::new(cols(&[(0, 5), (3, 8)])).is_err());
        assert!(FixedWidthLayout::new(cols(&[(4, 4)])).is_err());
        let ok = FixedWidthLayout::new(cols(&[(0, 5), (5, 8)])).unwrap();
        assert_eq!(ok.width(), 8);
    }
}
