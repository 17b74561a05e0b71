//! `tolldata extract | consolidate | load`: one stage at a time, through
//! explicit staged artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tolldata_pipeline::artifact::{read_projected, read_unified, write_json, write_projected, write_unified};
use tolldata_pipeline::config::OnError;
use tolldata_pipeline::consolidate::Consolidation;
use tolldata_pipeline::engine::{consolidate_streams, extract_file, load};
use tolldata_pipeline::model::{DuplicateRow, FactColumn, JoinGap};
use tolldata_pipeline::summary::{IssueKind, RunMeta, RunReport, RunSummary};
use tolldata_pipeline::{CancelFlag, PipelineConfig};

use crate::run::{config_dir, describe_sink, load_config, resolve_sink};
use crate::CliError;

/// Write the stage's run report when `--report` was given.
fn write_report(
    path: Option<&Path>,
    config: &PipelineConfig,
    summary: RunSummary,
    gaps: Vec<JoinGap>,
    duplicates: Vec<DuplicateRow>,
) -> Result<(), CliError> {
    let Some(path) = path else {
        return Ok(());
    };
    let report = RunReport {
        meta: RunMeta::now(&config.name, config.layout_version),
        summary,
        gaps,
        duplicates,
    };
    write_json(path, &report)?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

pub fn cmd_extract(
    config_path: PathBuf,
    source_name: String,
    input: Option<PathBuf>,
    output: PathBuf,
    report: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let sources = config.sources()?;
    let source = sources.iter().find(|s| s.name == source_name).ok_or_else(|| {
        let known: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        CliError::args(format!("unknown source '{source_name}'"))
            .with_hint(format!("sources in this layout: {}", known.join(", ")))
    })?;

    let input = input.unwrap_or_else(|| config_dir(&config_path).join(&source.file));
    let extraction = extract_file(source, &input, &CancelFlag::new())?;
    let columns: Vec<FactColumn> = source.projection.columns().collect();
    let written = write_projected(&output, &columns, extraction.records)?;

    eprintln!(
        "{}: {} records, {} malformed, wrote {}",
        source.name,
        written,
        extraction.stats.malformed,
        output.display()
    );

    let mut summary = RunSummary::default();
    summary.record_n(IssueKind::MalformedRecord, extraction.stats.malformed);
    summary.sources.push(extraction.stats);
    write_report(report.as_deref(), &config, summary, Vec::new(), Vec::new())
}

pub fn cmd_consolidate(
    config_path: PathBuf,
    inputs: Vec<String>,
    output: PathBuf,
    gaps: Option<PathBuf>,
    report: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let sources = config.sources()?;

    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
    for spec in &inputs {
        let (name, file) = spec
            .split_once('=')
            .ok_or_else(|| CliError::args(format!("--input '{spec}' must look like NAME=FILE")))?;
        if files.insert(name.to_string(), PathBuf::from(file)).is_some() {
            return Err(CliError::args(format!("--input given twice for source '{name}'")));
        }
    }

    let mut staged = Vec::with_capacity(sources.len());
    for source in &sources {
        let file = files.remove(&source.name).ok_or_else(|| {
            CliError::args(format!("missing --input for source '{}'", source.name))
                .with_hint(format!("add --input {}=FILE", source.name))
        })?;
        staged.push((file, source.kind));
    }
    if let Some(extra) = files.keys().next() {
        return Err(CliError::args(format!("unknown source '{extra}' in --input")));
    }

    let streams = staged
        .iter()
        .map(|(file, kind)| read_projected(file, *kind))
        .collect::<Result<Vec<_>, _>>()?;

    let mut summary = RunSummary::default();
    let Consolidation { records, gaps: join_gaps, duplicates } =
        consolidate_streams(streams, &CancelFlag::new(), &mut summary)?;
    if let Some(ref path) = gaps {
        write_json(path, &join_gaps)?;
        eprintln!("wrote {}", path.display());
    }
    let written = write_unified(&output, records)?;

    eprintln!(
        "{} unified, {} gaps, {} duplicates, wrote {}",
        written,
        summary.count(IssueKind::JoinGap),
        summary.count(IssueKind::DuplicateRowId),
        output.display()
    );
    write_report(report.as_deref(), &config, summary, join_gaps, duplicates)
}

pub fn cmd_load(
    config_path: PathBuf,
    input: PathBuf,
    sink: Option<String>,
    on_error: Option<OnError>,
    report: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut config = load_config(&config_path)?;
    if let Some(on_error) = on_error {
        config.normalize.on_error = on_error;
    }

    let records = read_unified(&input)?;
    let (sink_config, mut sink) = resolve_sink(&config, &config_path, sink.as_deref())?;

    let mut summary = RunSummary::default();
    load(
        records,
        &config.normalize,
        sink.as_mut(),
        sink_config.batch_size,
        &CancelFlag::new(),
        &mut summary,
    )?;

    eprintln!(
        "{} normalized, {} skipped, {} loaded into {}",
        summary.normalized,
        summary.count(IssueKind::NormalizationError),
        summary.loaded,
        describe_sink(&sink_config)
    );
    drop(sink);
    write_report(report.as_deref(), &config, summary, Vec::new(), Vec::new())
}
