use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::layout::{DelimitedLayout, FixedColumn, FixedWidthLayout, Layout, ParseLine};
use crate::model::{FactColumn, SourceKind};
use crate::project::{FieldMapping, ProjectionTable};

/// Layout file revision this build understands. Layout changes bump it.
pub const LAYOUT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub layout_version: u32,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub sink: Option<SinkConfig>,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Staged file name, resolved against the staging directory.
    pub file: String,
    /// Defaults to `,` for delimited and tab for tab-delimited sources.
    #[serde(default)]
    pub delimiter: Option<char>,
    /// Declared field count (delimited kinds).
    #[serde(default)]
    pub fields: Option<usize>,
    /// `[start, end)` character offsets (fixed-width kind).
    #[serde(default)]
    pub columns: Option<Vec<FixedColumn>>,
    /// Leading lines to skip, e.g. a header row.
    #[serde(default)]
    pub skip_lines: usize,
    pub project: Vec<FieldMapping>,
}

/// A validated source: layout and projection table ready to use.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    pub file: String,
    pub layout: Layout,
    pub projection: ProjectionTable,
    pub skip_lines: usize,
}

impl Source {
    pub fn from_config(name: &str, config: &SourceConfig) -> Result<Self, PipelineError> {
        let invalid = |msg: String| PipelineError::ConfigValidation(format!("source '{name}': {msg}"));

        let layout = match config.kind {
            SourceKind::Delimited | SourceKind::TabDelimited => {
                if config.columns.is_some() {
                    return Err(invalid("'columns' only applies to fixed_width sources".into()));
                }
                let default_delim = if config.kind == SourceKind::TabDelimited { '\t' } else { ',' };
                let fields = config
                    .fields
                    .ok_or_else(|| invalid(format!("{} source requires 'fields'", config.kind)))?;
                let layout = DelimitedLayout::new(config.delimiter.unwrap_or(default_delim), fields)
                    .map_err(|e| in_source(name, e))?;
                Layout::Delimited(layout)
            }
            SourceKind::FixedWidth => {
                if config.delimiter.is_some() || config.fields.is_some() {
                    return Err(invalid(
                        "'delimiter' and 'fields' do not apply to fixed_width sources".into(),
                    ));
                }
                let columns = config
                    .columns
                    .clone()
                    .ok_or_else(|| invalid("fixed_width source requires 'columns'".into()))?;
                Layout::FixedWidth(FixedWidthLayout::new(columns).map_err(|e| in_source(name, e))?)
            }
        };

        let projection = ProjectionTable::new(config.project.clone()).map_err(invalid)?;
        if projection.max_field() > layout.field_count() {
            return Err(invalid(format!(
                "projection references field {} but the layout has {} fields",
                projection.max_field(),
                layout.field_count()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            kind: config.kind,
            file: config.file.clone(),
            layout,
            projection,
            skip_lines: config.skip_lines,
        })
    }
}

fn in_source(name: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::ConfigValidation(msg) => {
            PipelineError::ConfigValidation(format!("source '{name}': {msg}"))
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// What to do with a row whose value cannot be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Abort,
    Skip,
}

impl std::fmt::Display for OnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default)]
    pub on_error: OnError,
    /// Full date-time formats, tried in order.
    #[serde(default = "default_timestamp_formats")]
    pub timestamp_formats: Vec<String>,
    /// Time-of-day formats, used only when `anchor_date` is set.
    #[serde(default = "default_time_formats")]
    pub time_formats: Vec<String>,
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            on_error: OnError::default(),
            timestamp_formats: default_timestamp_formats(),
            time_formats: default_time_formats(),
            anchor_date: None,
        }
    }
}

fn default_timestamp_formats() -> Vec<String> {
    vec![
        "%a %b %d %H:%M:%S %Y".into(),
        "%Y-%m-%d %H:%M:%S".into(),
        "%Y-%m-%dT%H:%M:%S".into(),
    ]
}

fn default_time_formats() -> Vec<String> {
    vec!["%H:%M:%S".into()]
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl SinkConfig {
    /// Parse a `csv:PATH` / `sqlite:PATH` command-line spec.
    pub fn from_spec(spec: &str) -> Result<Self, PipelineError> {
        let (kind, path) = spec.split_once(':').ok_or_else(|| {
            PipelineError::ConfigValidation(format!("sink '{spec}' must look like csv:PATH or sqlite:PATH"))
        })?;
        let kind = match kind {
            "csv" => SinkKind::Csv,
            "sqlite" => SinkKind::Sqlite,
            other => {
                return Err(PipelineError::ConfigValidation(format!(
                    "unknown sink kind '{other}' (expected csv or sqlite)"
                )))
            }
        };
        if path.is_empty() {
            return Err(PipelineError::ConfigValidation(format!("sink '{spec}' has no path")));
        }
        Ok(Self {
            kind,
            path: path.to_string(),
            table: default_table(),
            batch_size: default_batch_size(),
        })
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::ConfigValidation("sink batch_size must be at least 1".into()));
        }
        let valid_table = !self.table.is_empty()
            && !self.table.starts_with(|c: char| c.is_ascii_digit())
            && self.table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(PipelineError::ConfigValidation(format!(
                "sink table '{}' is not a plain identifier",
                self.table
            )));
        }
        Ok(())
    }
}

fn default_table() -> String {
    "tolldata_fact".into()
}

fn default_batch_size() -> usize {
    500
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| PipelineError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        // Never guess at an unknown layout revision
        if self.layout_version != LAYOUT_VERSION {
            return Err(PipelineError::LayoutVersion {
                found: self.layout_version,
                supported: LAYOUT_VERSION,
            });
        }

        // Exactly one source per physical format
        for kind in SourceKind::ALL {
            let count = self.sources.values().filter(|s| s.kind == kind).count();
            if count != 1 {
                return Err(PipelineError::ConfigValidation(format!(
                    "expected exactly one {kind} source, found {count}"
                )));
            }
        }

        // Every fact column must come from somewhere
        let sources = self.sources()?;
        let covered: BTreeSet<FactColumn> = sources.iter().flat_map(|s| s.projection.columns()).collect();
        let missing: Vec<&str> = FactColumn::ALL
            .iter()
            .filter(|c| !covered.contains(c))
            .map(|c| c.name())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::ConfigValidation(format!(
                "no source projects column(s): {}",
                missing.join(", ")
            )));
        }

        if let Some(ref sink) = self.sink {
            sink.validate()?;
        }

        Ok(())
    }

    /// Validated sources, in merge-priority order (delimited first).
    pub fn sources(&self) -> Result<Vec<Source>, PipelineError> {
        let mut sources = self
            .sources
            .iter()
            .map(|(name, cfg)| Source::from_config(name, cfg))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort_by_key(|s| s.kind.slot());
        Ok(sources)
    }

    /// Rows per sink batch; the sink section's value when present.
    pub fn batch_size(&self) -> usize {
        self.sink.as_ref().map_or_else(default_batch_size, |s| s.batch_size)
    }

    /// Sink from the layout file, replaced by `spec` when given. A spec
    /// inherits the configured table name and batch size.
    pub fn sink_or(&self, spec: Option<&str>) -> Result<Option<SinkConfig>, PipelineError> {
        let Some(spec) = spec else {
            return Ok(self.sink.clone());
        };
        let mut sink = SinkConfig::from_spec(spec)?;
        if let Some(ref configured) = self.sink {
            sink.table = configured.table.clone();
            sink.batch_size = configured.batch_size;
        }
        sink.validate()?;
        Ok(Some(sink))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "tolldata"
layout_version = 1

[sources.vehicle]
kind = "delimited"
file = "vehicle-data.csv"
fields = 6
project = [
    { field = 1, column = "rowid" },
    { field = 2, column = "event_ts" },
    { field = 3, column = "vehicle_number" },
    { field = 4, column = "vehicle_type" },
    { field = 5, column = "number_of_axles" },
    { field = 6, column = "vehicle_code" },
]

[sources.tollplaza]
kind = "tab_delimited"
file = "tollplaza-data.tsv"
fields = 7
project = [
    { field = 1, column = "rowid" },
    { field = 6, column = "tollplaza_id" },
    { field = 7, column = "tollplaza_code" },
]

[sources.payment]
kind = "fixed_width"
file = "payment-data.txt"
columns = [[0, 6], [7, 31], [32, 42], [42, 48], [48, 58], [58, 62], [62, 68]]
project = [
    { field = 1, column = "rowid" },
    { field = 6, column = "payment_type" },
]
"#;

    #[test]
    fn parse_valid() {
        let config = PipelineConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "tolldata");
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.normalize.on_error, OnError::Abort);
        assert!(config.sink.is_none());

        let sources = config.sources().unwrap();
        let kinds: Vec<SourceKind> = sources.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, SourceKind::ALL.to_vec());
        assert_eq!(sources[1].name, "tollplaza");
        match &sources[1].layout {
            Layout::Delimited(l) => assert_eq!(l.delimiter(), '\t'),
            other => panic!("unexpected layout {other:?}"),
        }
    }

    #[test]
    fn parse_normalize_and_sink() {
        let input = format!(
            r#"{VALID}
[normalize]
on_error = "skip"
anchor_date = "2021-08-19"

[sink]
kind = "sqlite"
path = "tolldata.db"
batch_size = 50
"#
        );
        let config = PipelineConfig::from_toml(&input).unwrap();
        assert_eq!(config.normalize.on_error, OnError::Skip);
        assert_eq!(config.normalize.anchor_date, NaiveDate::from_ymd_opt(2021, 8, 19));
        assert_eq!(config.normalize.timestamp_formats.len(), 3);
        let sink = config.sink.unwrap();
        assert_eq!(sink.kind, SinkKind::Sqlite);
        assert_eq!(sink.table, "tolldata_fact");
        assert_eq!(sink.batch_size, 50);
    }

    #[test]
    fn reject_unknown_layout_version() {
        let input = VALID.replace("layout_version = 1", "layout_version = 2");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, PipelineError::LayoutVersion { found: 2, supported: 1 }));
    }

    #[test]
    fn reject_missing_kind() {
        let input = VALID.replace(r#"kind = "tab_delimited""#, r#"kind = "delimited""#);
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("exactly one"), "{err}");
    }

    #[test]
    fn reject_projection_past_layout() {
        let input = VALID.replace("{ field = 7, column = \"tollplaza_code\" }", "{ field = 8, column = \"tollplaza_code\" }");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("field 8"), "{err}");
    }

    #[test]
    fn reject_uncovered_column() {
        let input = VALID.replace("    { field = 6, column = \"payment_type\" },\n", "");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("payment_type"), "{err}");
    }

    #[test]
    fn reject_overlapping_columns() {
        let input = VALID.replace("[7, 31]", "[5, 31]");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("source 'payment'"), "{err}");
    }

    #[test]
    fn reject_unknown_column_name() {
        let input = VALID.replace("\"vehicle_code\"", "\"Vehicle_Code\"");
        let err = PipelineConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigParse(_)));
    }

    #[test]
    fn sink_spec_inherits_configured_table() {
        let input = format!(
            r#"{VALID}
[sink]
kind = "csv"
path = "out.csv"
table = "fact_2021"
batch_size = 10
"#
        );
        let config = PipelineConfig::from_toml(&input).unwrap();
        let sink = config.sink_or(Some("sqlite:run.db")).unwrap().unwrap();
        assert_eq!(sink.kind, SinkKind::Sqlite);
        assert_eq!(sink.path, "run.db");
        assert_eq!(sink.table, "fact_2021");
        assert_eq!(sink.batch_size, 10);

        assert!(config.sink_or(Some("parquet:x")).is_err());
        assert!(config.sink_or(Some("csv:")).is_err());
        assert_eq!(config.sink_or(None).unwrap().unwrap().path, "out.csv");
    }

    #[test]
    fn reject_bad_table_name() {
        let input = format!(
            r#"{VALID}
[sink]
kind = "sqlite"
path = "x.db"
table = "fact; DROP TABLE x"
"#
        );
        assert!(PipelineConfig::from_toml(&input).is_err());
    }
}
