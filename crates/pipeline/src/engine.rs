use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::config::{NormalizeConfig, OnError, PipelineConfig, Source};
use crate::consolidate::{consolidate, Consolidation};
use crate::error::PipelineError;
use crate::model::{ProjectedRecord, Stage, UnifiedRecord};
use crate::normalize::{normalize_and_load, Normalizer};
use crate::parse::SourceReader;
use crate::project::project;
use crate::sink::{BatchingSink, FactSink};
use crate::summary::{IssueKind, RunMeta, RunReport, RunSummary, SourceStats};

/// Staged input file per source name.
#[derive(Debug, Clone, Default)]
pub struct SourceInputs {
    paths: BTreeMap<String, PathBuf>,
}

impl SourceInputs {
    /// Each source's `file`, resolved against `base_dir`.
    pub fn resolve(config: &PipelineConfig, base_dir: &Path) -> Self {
        let paths = config
            .sources
            .iter()
            .map(|(name, source)| (name.clone(), base_dir.join(&source.file)))
            .collect();
        Self { paths }
    }

    pub fn with(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(name.into(), path.into());
        self
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }
}

/// Projected records of one source plus its line statistics.
#[derive(Debug)]
pub struct Extraction {
    pub records: Vec<ProjectedRecord>,
    pub stats: SourceStats,
}

/// Parse and project one source. Malformed lines are logged, counted and
/// skipped; anything else stops the extraction.
pub fn extract_source<R: BufRead>(
    source: &Source,
    path: &Path,
    reader: R,
    cancel: &CancelFlag,
) -> Result<Extraction, PipelineError> {
    let mut stats = SourceStats {
        name: source.name.clone(),
        kind: Some(source.kind),
        ..SourceStats::default()
    };
    let mut records = Vec::new();

    let mut lines = SourceReader::new(source, path, reader);
    for item in lines.by_ref() {
        cancel.check(Stage::Parse)?;
        let projected = item.and_then(|raw| project(&source.name, &source.projection, raw));
        match projected {
            Ok(record) => records.push(record),
            Err(PipelineError::Malformed(m)) => {
                warn!(source = %m.source_name, line = m.line, raw = %m.raw, "skipping malformed record: {}", m.reason);
                stats.malformed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    stats.lines_read = lines.lines_read();
    stats.records = records.len();

    info!(
        source = %source.name,
        kind = %source.kind,
        records = stats.records,
        malformed = stats.malformed,
        "extracted"
    );
    Ok(Extraction { records, stats })
}

pub fn extract_file(source: &Source, path: &Path, cancel: &CancelFlag) -> Result<Extraction, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    extract_source(source, path, BufReader::new(file), cancel)
}

/// Join extracted streams, counting gaps and duplicates into `summary`.
pub fn consolidate_streams<I>(
    streams: I,
    cancel: &CancelFlag,
    summary: &mut RunSummary,
) -> Result<Consolidation, PipelineError>
where
    I: IntoIterator<Item = Vec<ProjectedRecord>>,
{
    let consolidation = consolidate(streams, cancel)?;

    for gap in &consolidation.gaps {
        debug!(row_id = %gap.row_id, present_in = ?gap.present_in, missing_from = ?gap.missing_from, "join gap");
    }
    for dup in &consolidation.duplicates {
        warn!(
            row_id = %dup.row_id,
            kind = %dup.kind,
            kept_line = dup.kept_line,
            dropped_line = dup.dropped_line,
            "duplicate row identifier, keeping first occurrence"
        );
    }
    if !consolidation.gaps.is_empty() {
        warn!(gaps = consolidation.gaps.len(), "row identifiers missing from at least one source");
    }

    summary.unified = consolidation.records.len();
    summary.record_n(IssueKind::JoinGap, consolidation.gaps.len());
    summary.record_n(IssueKind::DuplicateRowId, consolidation.duplicates.len());
    info!(unified = summary.unified, "consolidated");
    Ok(consolidation)
}

/// Normalize merged rows and hand them to `sink` in batches.
///
/// Under `OnError::Skip` a row that fails normalization is logged, counted and
/// left out; under `OnError::Abort` it ends the load. Batches already accepted
/// by the sink stay there; buffered rows are dropped on any error.
pub fn load<I>(
    records: I,
    config: &NormalizeConfig,
    sink: &mut dyn FactSink,
    batch_size: usize,
    cancel: &CancelFlag,
    summary: &mut RunSummary,
) -> Result<(), PipelineError>
where
    I: IntoIterator<Item = UnifiedRecord>,
{
    let normalizer = Normalizer::new(config);
    let mut batching = BatchingSink::new(sink, batch_size);

    for record in records {
        cancel.check(Stage::Normalize)?;
        match normalize_and_load(&record, &normalizer, &mut batching) {
            Ok(()) => summary.normalized += 1,
            Err(PipelineError::Normalization(e)) if config.on_error == OnError::Skip => {
                warn!(row_id = %e.row_id, column = %e.column, value = %e.value, "skipping row: {}", e.reason);
                summary.record(IssueKind::NormalizationError);
            }
            Err(e) => return Err(e),
        }
    }

    cancel.check(Stage::Load)?;
    batching.flush()?;
    summary.loaded += batching.submitted();
    info!(normalized = summary.normalized, loaded = summary.loaded, "loaded");
    Ok(())
}

/// Run every stage in order: extract all three sources, consolidate,
/// normalize and load into `sink`.
pub fn run(
    config: &PipelineConfig,
    inputs: &SourceInputs,
    sink: &mut dyn FactSink,
    cancel: &CancelFlag,
) -> Result<RunReport, PipelineError> {
    let mut summary = RunSummary::default();
    let mut streams = Vec::with_capacity(3);

    for source in config.sources()? {
        let path = inputs.path(&source.name).ok_or_else(|| {
            PipelineError::ConfigValidation(format!("no input file given for source '{}'", source.name))
        })?;
        let extraction = extract_file(&source, path, cancel)?;
        summary.record_n(IssueKind::MalformedRecord, extraction.stats.malformed);
        summary.sources.push(extraction.stats);
        streams.push(extraction.records);
    }

    let Consolidation { records, gaps, duplicates } = consolidate_streams(streams, cancel, &mut summary)?;
    load(records, &config.normalize, sink, config.batch_size(), cancel, &mut summary)?;

    Ok(RunReport {
        meta: RunMeta::now(&config.name, config.layout_version),
        summary,
        gaps,
        duplicates,
    })
}
