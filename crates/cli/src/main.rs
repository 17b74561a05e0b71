// tolldata CLI - run the toll-data consolidation pipeline, whole or by stage

mod exit_codes;
mod logging;
mod run;
mod stages;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tolldata_pipeline::config::OnError;
use tolldata_pipeline::PipelineError;

use exit_codes::{pipeline_exit_code, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "tolldata")]
#[command(about = "Consolidate toll-transaction sources into one fact table")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Debug-level logs (ignored when RUST_LOG is set)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a layout file without touching any data
    #[command(after_help = "\
Examples:
  tolldata validate tolldata.toml")]
    Validate {
        /// Path to the layout file
        config: PathBuf,
    },

    /// Run every stage: extract, consolidate, normalize and load
    #[command(after_help = "\
Examples:
  tolldata run tolldata.toml --sink sqlite:tolldata.db
  tolldata run tolldata.toml --staging /srv/staging --sink csv:transformed_data.csv
  tolldata run tolldata.toml --on-error skip --json --gaps gaps.json
  tolldata run tolldata.toml --fail-on-issues")]
    Run {
        /// Path to the layout file
        config: PathBuf,

        /// Directory holding the staged inputs (default: the layout file's directory)
        #[arg(long)]
        staging: Option<PathBuf>,

        /// Destination, csv:PATH or sqlite:PATH (default: [sink] in the layout file)
        #[arg(long, value_name = "SPEC")]
        sink: Option<String>,

        /// Override the normalization failure policy
        #[arg(long, value_enum)]
        on_error: Option<OnErrorArg>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the run report to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the join gap report to a file
        #[arg(long)]
        gaps: Option<PathBuf>,

        /// Exit non-zero when any malformed line, gap, duplicate or skipped row was recorded
        #[arg(long)]
        fail_on_issues: bool,
    },

    /// Parse and project one source into a staged CSV
    #[command(after_help = "\
Examples:
  tolldata extract tolldata.toml --source vehicle --output vehicle.projected.csv --report vehicle.report.json
  tolldata extract tolldata.toml --source payment --input /tmp/payment-data.txt --output payment.projected.csv")]
    Extract {
        /// Path to the layout file
        config: PathBuf,

        /// Source name from the layout file
        #[arg(long)]
        source: String,

        /// Input file (default: the source's `file`, next to the layout file)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Projected CSV to write
        #[arg(long)]
        output: PathBuf,

        /// Write the stage's run report to a file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Join three projected CSVs into one unified CSV
    #[command(after_help = "\
Examples:
  tolldata consolidate tolldata.toml \\
      --input vehicle=vehicle.projected.csv \\
      --input tollplaza=tollplaza.projected.csv \\
      --input payment=payment.projected.csv \\
      --output unified.csv --gaps gaps.json --report consolidate.report.json")]
    Consolidate {
        /// Path to the layout file
        config: PathBuf,

        /// Projected input, one per source
        #[arg(long, value_name = "NAME=FILE", required = true)]
        input: Vec<String>,

        /// Unified CSV to write
        #[arg(long)]
        output: PathBuf,

        /// Write the join gap report to a file
        #[arg(long)]
        gaps: Option<PathBuf>,

        /// Write the stage's run report to a file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Normalize a unified CSV and append it to the sink
    #[command(after_help = "\
Examples:
  tolldata load tolldata.toml --input unified.csv --sink sqlite:tolldata.db --report load.report.json")]
    Load {
        /// Path to the layout file
        config: PathBuf,

        /// Unified CSV produced by `consolidate`
        #[arg(long)]
        input: PathBuf,

        /// Destination, csv:PATH or sqlite:PATH (default: [sink] in the layout file)
        #[arg(long, value_name = "SPEC")]
        sink: Option<String>,

        /// Override the normalization failure policy
        #[arg(long, value_enum)]
        on_error: Option<OnErrorArg>,

        /// Write the stage's run report to a file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnErrorArg {
    Abort,
    Skip,
}

impl From<OnErrorArg> for OnError {
    fn from(arg: OnErrorArg) -> Self {
        match arg {
            OnErrorArg::Abort => OnError::Abort,
            OnErrorArg::Skip => OnError::Skip,
        }
    }
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\npipeline: tolldata-pipeline ", env!("CARGO_PKG_VERSION"),
            "\nbuild:    debug",
            "\ntarget:   ", env!("TARGET"),
            "\nlayout_version: 1",
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\npipeline: tolldata-pipeline ", env!("CARGO_PKG_VERSION"),
            "\nbuild:    release",
            "\ntarget:   ", env!("TARGET"),
            "\nlayout_version: 1",
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_json, cli.verbose);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "tolldata starting");

    let result = match cli.command {
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Run { config, staging, sink, on_error, json, output, gaps, fail_on_issues } => {
            run::cmd_run(run::RunArgs {
                config,
                staging,
                sink,
                on_error: on_error.map(OnError::from),
                json,
                output,
                gaps,
                fail_on_issues,
            })
        }
        Commands::Extract { config, source, input, output, report } => {
            stages::cmd_extract(config, source, input, output, report)
        }
        Commands::Consolidate { config, input, output, gaps, report } => {
            stages::cmd_consolidate(config, input, output, gaps, report)
        }
        Commands::Load { config, input, sink, on_error, report } => {
            stages::cmd_load(config, input, sink, on_error.map(OnError::from), report)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        let hint = match &err {
            PipelineError::LayoutVersion { supported, .. } => {
                Some(format!("this build reads layout_version = {supported}"))
            }
            PipelineError::Normalization(_) => {
                Some("fix the source value, or rerun with --on-error skip to leave such rows out".to_string())
            }
            PipelineError::Projection(_) => {
                Some("the layout file does not match the staged data; check `fields` and `columns`".to_string())
            }
            PipelineError::Sink(_) => Some(
                "nothing was retried; a sqlite sink skips rows it already holds on rerun, \
                 a csv sink keeps the rows written so far"
                    .to_string(),
            ),
            _ => None,
        };
        Self { code: pipeline_exit_code(&err), message: err.to_string(), hint }
    }
}
