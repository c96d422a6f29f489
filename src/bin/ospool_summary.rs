use std::process::ExitCode;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ospool_summary::aggregate::Aggregator;
use ospool_summary::app::{App, Confirm, Decline, ProgressSink, SummarizeOptions};
use ospool_summary::config::{
    CREDENTIAL_VARS, ConfigLoader, OUTPUT_VARS, ResolvedConfig, SUMMARIZE_VARS,
};
use ospool_summary::domain::DateRange;
use ospool_summary::error::SummaryError;
use ospool_summary::fos::FieldOfScienceTable;
use ospool_summary::output::{ConsoleOutput, JsonOutput, OutputMode};
use ospool_summary::pool::AccessPointMap;
use ospool_summary::registry::{RegistryCache, RegistryHttpClient};
use ospool_summary::search::SearchHttpClient;
use ospool_summary::tui::TerminalConfirm;
use ospool_summary::validate::SearchBaselineSource;

type HttpApp = App<SearchHttpClient, RegistryHttpClient, SearchBaselineSource<SearchHttpClient>>;

#[derive(Parser)]
#[command(name = "ospool-summary")]
#[command(about = "Daily OSPool usage summaries, checked against the daily reports")]
#[command(version, author)]
struct Cli {
    /// Print JSON results and never prompt.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Load environment variables from this file first.
    #[arg(long, global = true)]
    env_file: Option<String>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Delete all summary documents for a date or range")]
    Delete(DeleteArgs),
    #[command(about = "Summarize and index the OSPool usage for a date or range")]
    Summarize(SummarizeArgs),
    #[command(about = "Compare indexed summaries with the daily reports")]
    Validate(RangeArgs),
    #[command(about = "Report projects and resources left without an institution")]
    ReportQuality,
}

#[derive(Args, Clone)]
struct RangeArgs {
    #[arg(value_parser = parse_date)]
    date: NaiveDate,

    #[arg(value_parser = parse_date)]
    end: Option<NaiveDate>,
}

impl RangeArgs {
    fn range(&self) -> DateRange {
        DateRange::new(self.date, self.end)
    }
}

#[derive(Args, Clone)]
struct DeleteArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Skip the confirmation.
    #[arg(long)]
    force: bool,
}

#[derive(Args, Clone)]
struct SummarizeArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Index even when the data is more than 5% off the daily report.
    #[arg(long)]
    force: bool,

    #[arg(long)]
    dry_run: bool,
}

/// `2024-01-01` or `2024-01-01T00:00:00`.
fn parse_date(value: &str) -> Result<NaiveDate, String> {
    value
        .parse::<NaiveDate>()
        .or_else(|_| value.parse::<NaiveDateTime>().map(|datetime| datetime.date()))
        .map_err(|_| format!("invalid date `{value}`, expected YYYY-MM-DD"))
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SummaryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SummaryError) -> u8 {
    match error {
        SummaryError::MissingConfig(_)
        | SummaryError::FieldOfScienceTable(_)
        | SummaryError::EnvFileMissing(_)
        | SummaryError::EnvFileRead { .. } => 2,
        SummaryError::SearchHttp(_)
        | SummaryError::SearchStatus { .. }
        | SummaryError::ShardFailure(_)
        | SummaryError::RegistryHttp(_)
        | SummaryError::RegistryStatus { .. }
        | SummaryError::RegistryParse { .. } => 3,
        _ => 1,
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let env_file = cli.env_file.as_deref();

    match cli.command {
        Commands::Delete(args) => {
            let app = build_app(&ConfigLoader::resolve(env_file, &credentialed_vars())?)?;
            with_io(output_mode, |confirm, sink| {
                let result = app.delete(&args.range.range(), args.force, confirm, sink)?;
                match output_mode {
                    OutputMode::NonInteractive => {
                        JsonOutput::print_delete(&result).into_diagnostic()?
                    }
                    OutputMode::Interactive => ConsoleOutput::print_delete(&result),
                }
                Ok(())
            })
        }
        Commands::Summarize(args) => {
            let required = credentialed_vars()
                .into_iter()
                .chain(SUMMARIZE_VARS.iter().copied())
                .collect::<Vec<_>>();
            let app = build_app(&ConfigLoader::resolve(env_file, &required)?)?;
            let options = SummarizeOptions {
                force: args.force,
                dry_run: args.dry_run,
            };
            with_io(output_mode, |confirm, sink| {
                let result = app.summarize(&args.range.range(), options, confirm, sink)?;
                match output_mode {
                    OutputMode::NonInteractive => {
                        JsonOutput::print_summarize(&result).into_diagnostic()?
                    }
                    OutputMode::Interactive => ConsoleOutput::print_summarize(&result),
                }
                Ok(())
            })
        }
        Commands::Validate(args) => {
            let app = build_app(&ConfigLoader::resolve(env_file, &credentialed_vars())?)?;
            with_io(output_mode, |_, sink| {
                let result = app.validate(&args.range(), sink)?;
                match output_mode {
                    OutputMode::NonInteractive => {
                        JsonOutput::print_validate(&result).into_diagnostic()?
                    }
                    OutputMode::Interactive => ConsoleOutput::print_validate(&result),
                }
                Ok(())
            })
        }
        Commands::ReportQuality => {
            let app = build_app(&ConfigLoader::resolve(env_file, OUTPUT_VARS)?)?;
            with_io(output_mode, |_, sink| {
                let result = app.report_quality(sink)?;
                match output_mode {
                    OutputMode::NonInteractive => {
                        JsonOutput::print_quality(&result).into_diagnostic()?
                    }
                    OutputMode::Interactive => ConsoleOutput::print_quality(&result),
                }
                Ok(())
            })
        }
    }
}

fn credentialed_vars() -> Vec<&'static str> {
    OUTPUT_VARS.iter().chain(CREDENTIAL_VARS).copied().collect()
}

fn with_io<F>(output_mode: OutputMode, f: F) -> miette::Result<()>
where
    F: FnOnce(&dyn Confirm, &dyn ProgressSink) -> miette::Result<()>,
{
    match output_mode {
        OutputMode::NonInteractive => f(&Decline, &JsonOutput),
        OutputMode::Interactive => f(&TerminalConfirm::default(), &ConsoleOutput),
    }
}

fn build_app(config: &ResolvedConfig) -> Result<HttpApp, SummaryError> {
    let access_points =
        AccessPointMap::load(config.access_point_map.as_deref())?.pool_access_points();
    tracing::debug!(count = access_points.len(), "pool access points");

    let raw = SearchHttpClient::new(&config.raw)?;
    let aggregator = Aggregator::new(raw, config.raw_index.clone(), access_points);
    let registry = RegistryCache::new(RegistryHttpClient::new(
        config.topology_url.clone(),
        config.institutions_url.clone(),
    )?);
    let fos = match config.fos_table.as_deref() {
        Some(path) => FieldOfScienceTable::load(path)?,
        None => FieldOfScienceTable::empty(),
    };
    let baseline = SearchBaselineSource::new(
        SearchHttpClient::new(&config.daily)?,
        config.daily_index.clone(),
        config.daily_id_prefix.clone(),
    );

    Ok(App::new(
        SearchHttpClient::new(&config.output)?,
        config.output_index.clone(),
        aggregator,
        registry,
        fos,
        baseline,
    ))
}
