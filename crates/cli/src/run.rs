//! `tolldata validate` and `tolldata run`.

use std::path::{Path, PathBuf};

use tolldata_pipeline::artifact::write_json;
use tolldata_pipeline::config::{OnError, SinkConfig};
use tolldata_pipeline::sink::{open_sink, FactSink};
use tolldata_pipeline::summary::{IssueKind, RunReport};
use tolldata_pipeline::{CancelFlag, PipelineConfig, SourceInputs};

use crate::exit_codes::{EXIT_CONFIG, EXIT_ISSUES};
use crate::CliError;

/// Read and validate a layout file.
pub(crate) fn load_config(path: &Path) -> Result<PipelineConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::new(EXIT_CONFIG, format!("cannot read {}: {e}", path.display())))?;
    Ok(PipelineConfig::from_toml(&text)?)
}

/// Directory relative `file` entries resolve against.
pub(crate) fn config_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Open the sink named on the command line, or the one in the layout file.
/// A command-line path is relative to the working directory, a configured
/// one to the layout file.
pub(crate) fn resolve_sink(
    config: &PipelineConfig,
    config_path: &Path,
    spec: Option<&str>,
) -> Result<(SinkConfig, Box<dyn FactSink>), CliError> {
    let sink = config.sink_or(spec)?.ok_or_else(|| {
        CliError::args("no sink configured")
            .with_hint("pass --sink csv:PATH or --sink sqlite:PATH, or add a [sink] section")
    })?;
    let base = if spec.is_some() { Path::new(".") } else { config_dir(config_path) };
    let opened = open_sink(&sink, base)?;
    Ok((sink, opened))
}

pub(crate) fn describe_sink(sink: &SinkConfig) -> String {
    match sink.kind {
        tolldata_pipeline::config::SinkKind::Csv => format!("csv {}", sink.path),
        tolldata_pipeline::config::SinkKind::Sqlite => format!("sqlite {} ({})", sink.path, sink.table),
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let sources = config.sources()?;

    eprintln!("{}: layout_version {} ok", config.name, config.layout_version);
    for source in &sources {
        eprintln!(
            "  {:<10} {:<13} {} ({} columns)",
            source.name,
            source.kind.as_str(),
            source.file,
            source.projection.mappings().len()
        );
    }
    eprintln!("  on_error   {}", config.normalize.on_error);
    if let Some(ref sink) = config.sink {
        eprintln!("  sink       {}", describe_sink(sink));
    }
    Ok(())
}

pub struct RunArgs {
    pub config: PathBuf,
    pub staging: Option<PathBuf>,
    pub sink: Option<String>,
    pub on_error: Option<OnError>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub gaps: Option<PathBuf>,
    pub fail_on_issues: bool,
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let mut config = load_config(&args.config)?;
    if let Some(on_error) = args.on_error {
        config.normalize.on_error = on_error;
    }

    let staging = args
        .staging
        .clone()
        .unwrap_or_else(|| config_dir(&args.config).to_path_buf());
    let inputs = SourceInputs::resolve(&config, &staging);
    let (sink_config, mut sink) = resolve_sink(&config, &args.config, args.sink.as_deref())?;
    config.sink = Some(sink_config.clone());

    let report = tolldata_pipeline::run(&config, &inputs, sink.as_mut(), &CancelFlag::new())?;
    drop(sink);

    if let Some(ref path) = args.output {
        write_json(path, &report)?;
        eprintln!("wrote {}", path.display());
    }
    if let Some(ref path) = args.gaps {
        write_json(path, &report.gaps)?;
        eprintln!("wrote {}", path.display());
    }
    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::other(format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    print_summary(&report, &sink_config);

    if args.fail_on_issues && !report.summary.is_clean() {
        return Err(CliError::new(
            EXIT_ISSUES,
            format!("{} issue(s) recorded", report.summary.total_issues()),
        ));
    }
    Ok(())
}

/// Human summary on stderr.
fn print_summary(report: &RunReport, sink: &SinkConfig) {
    let s = &report.summary;
    for source in &s.sources {
        eprintln!(
            "  {:<10} {} lines, {} records, {} malformed",
            source.name, source.lines_read, source.records, source.malformed
        );
    }
    eprintln!(
        "{}: {} unified, {} normalized, {} loaded into {}",
        report.meta.config_name,
        s.unified,
        s.normalized,
        s.loaded,
        describe_sink(sink)
    );
    if !s.is_clean() {
        let parts: Vec<String> = IssueKind::ALL
            .iter()
            .filter(|k| s.count(**k) > 0)
            .map(|k| format!("{} {}", s.count(*k), k))
            .collect();
        eprintln!("issues: {}", parts.join(", "));
    }
}
