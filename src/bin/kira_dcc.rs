use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_dcc::app::{
    App, AppSettings, DownloadOptions, LoadOptions, SearchQuery, SelectOptions, SelectRequest,
};
use kira_dcc::config::{ConfigLoader, ResolvedConfig};
use kira_dcc::dcc::DccHttpClient;
use kira_dcc::domain::{DownloadKind, ExperimentAccession, Role, default_download_kinds};
use kira_dcc::error::KiraError;
use kira_dcc::merge::MergePlan;
use kira_dcc::output::{ConsoleOutput, JsonOutput, OutputMode};
use kira_dcc::store::Store;
use kira_dcc::tools::{MergeExecutor, SystemMergeExecutor, ToolPaths};

#[derive(Parser)]
#[command(name = "kira-dcc")]
#[command(about = "Select, download and merge canonical files of DCC experiments")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to kira-dcc.json (defaults to ./kira-dcc.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Pick the canonical signal track, alignment or peak set")]
    Select(SelectArgs),
    #[command(about = "Download all files of the given kinds")]
    Download(DownloadArgs),
    #[command(about = "Show experiment metadata and files")]
    Info(InfoArgs),
    #[command(about = "Search experiments on the DCC")]
    Search(SearchArgs),
    #[command(about = "Show biosample metadata")]
    Biosample(InfoArgs),
    #[command(about = "Resolve an alias to the object it names")]
    Alias(AliasArgs),
}

#[derive(Args)]
struct SelectArgs {
    #[arg(value_enum)]
    role: Role,

    accessions: Vec<String>,

    #[arg(long)]
    assembly: Option<String>,

    /// Download selected files and compute merged artifacts
    #[arg(long)]
    process: bool,

    #[arg(long)]
    dry_run: bool,

    /// Re-fetch cached metadata older than the refresh period
    #[arg(long)]
    refresh: bool,

    #[arg(long)]
    force: bool,

    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

#[derive(Args)]
struct DownloadArgs {
    accessions: Vec<String>,

    #[arg(long, value_enum, value_delimiter = ',')]
    kind: Vec<DownloadKind>,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    refresh: bool,

    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

#[derive(Args)]
struct InfoArgs {
    accession: String,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct AliasArgs {
    /// e.g. `lab:sample-1`
    alias: String,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    assay: Option<String>,

    #[arg(long)]
    organism: Option<String>,

    #[arg(long)]
    status: Option<String>,

    /// Extra search filter as key=value (repeatable)
    #[arg(long = "term", value_parser = parse_term)]
    terms: Vec<(String, String)>,
}

fn parse_term(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got {value}"))
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::NoAccessions(_)
        | KiraError::InvalidAccession(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_) => 2,
        KiraError::DccHttp(_)
        | KiraError::DccStatus { .. }
        | KiraError::MissingCredentials(_)
        | KiraError::MissingTool(_)
        | KiraError::ToolFailed(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;
    let store = match &config.data_root {
        Some(root) => Store::new_with_root(root.clone()),
        None => Store::new()?,
    };
    let dcc = DccHttpClient::new(&config.host)?;

    match cli.command {
        Commands::Select(args) => run_select(args, &config, store, dcc, output_mode),
        Commands::Download(args) => run_download(args, &config, store, dcc, output_mode),
        Commands::Info(args) => run_info(args, &config, store, dcc, output_mode),
        Commands::Search(args) => run_search(args, &config, store, dcc, output_mode),
        Commands::Biosample(args) => run_biosample(args, &config, store, dcc, output_mode),
        Commands::Alias(args) => run_alias(args, &config, store, dcc, output_mode),
    }
}

/// Executor for commands that never compute derived artifacts.
struct NopExecutor;

impl MergeExecutor for NopExecutor {
    fn compute_mean_signal(&self, _plan: &MergePlan) -> Result<(), KiraError> {
        Err(KiraError::MissingTool("merge executor not configured".to_string()))
    }

    fn compute_intersect_peaks(&self, _plan: &MergePlan) -> Result<(), KiraError> {
        Err(KiraError::MissingTool("merge executor not configured".to_string()))
    }
}

fn settings(config: &ResolvedConfig, jobs: Option<usize>) -> AppSettings {
    let mut settings = AppSettings::from(config);
    if let Some(jobs) = jobs.filter(|jobs| *jobs > 0) {
        settings.jobs = jobs;
    }
    settings
}

fn parse_accessions(values: &[String]) -> Result<Vec<ExperimentAccession>, KiraError> {
    values.iter().map(|value| value.parse()).collect()
}

fn select_requests(
    args: &SelectArgs,
    config: &ResolvedConfig,
) -> Result<Vec<SelectRequest>, KiraError> {
    let requests = if args.accessions.is_empty() {
        config
            .experiments_for(args.role)
            .map(|entry| SelectRequest {
                accession: entry.accession.clone(),
                role: args.role,
                assembly: args.assembly.clone().or_else(|| entry.assembly.clone()),
            })
            .collect::<Vec<_>>()
    } else {
        parse_accessions(&args.accessions)?
            .into_iter()
            .map(|accession| SelectRequest {
                accession,
                role: args.role,
                assembly: args.assembly.clone(),
            })
            .collect()
    };
    if requests.is_empty() {
        return Err(KiraError::NoAccessions(format!("role {}", args.role)));
    }
    Ok(requests)
}

fn download_accessions(
    args: &DownloadArgs,
    config: &ResolvedConfig,
) -> Result<Vec<ExperimentAccession>, KiraError> {
    let accessions = if args.accessions.is_empty() {
        config
            .experiments
            .iter()
            .map(|entry| entry.accession.clone())
            .collect::<Vec<_>>()
    } else {
        parse_accessions(&args.accessions)?
    };
    if accessions.is_empty() {
        return Err(KiraError::NoAccessions("download".to_string()));
    }
    Ok(accessions)
}

fn run_select(
    args: SelectArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let requests = select_requests(&args, config)?;

    let tools = ToolPaths::resolve(
        config.tools.wiggletools.clone(),
        config.tools.wig_to_big_wig.clone(),
        config.tools.bedtools.clone(),
    );
    let executor = SystemMergeExecutor::new(tools, config.chrom_sizes.clone(), store.genome_dir());
    let app = App::new(store, dcc, executor, settings(config, args.jobs));
    let options = SelectOptions {
        process: args.process,
        dry_run: args.dry_run,
        force: args.force,
        refresh: args.refresh,
    };

    let result = match output_mode {
        OutputMode::NonInteractive => {
            let result = app.select(&requests, options, &JsonOutput)?;
            JsonOutput::print_select(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.select(&requests, options, &console)?;
            console.print_select(&result).into_diagnostic()?;
            result
        }
    };

    match result.failed() {
        0 => Ok(()),
        failed => Err(miette::Report::msg(format!(
            "{failed} of {} selections failed",
            result.items.len()
        ))),
    }
}

fn run_download(
    args: DownloadArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let accessions = download_accessions(&args, config)?;
    let kinds = if args.kind.is_empty() {
        default_download_kinds()
    } else {
        args.kind
    };

    let app = App::new(store, dcc, NopExecutor, settings(config, args.jobs));
    let options = DownloadOptions {
        force: args.force,
        dry_run: args.dry_run,
        refresh: args.refresh,
    };

    let result = match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&accessions, &kinds, options, &JsonOutput)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.download(&accessions, &kinds, options, &console)?;
            console.print_download(&result).into_diagnostic()?;
            result
        }
    };

    match result.failed() {
        0 => Ok(()),
        failed => Err(miette::Report::msg(format!(
            "{failed} of {} experiments had download errors",
            result.items.len()
        ))),
    }
}

fn run_info(
    args: InfoArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let accession = args.accession.parse::<ExperimentAccession>()?;
    let app = App::new(store, dcc, NopExecutor, settings(config, None));
    let options = LoadOptions {
        refresh: args.refresh,
        ..LoadOptions::default()
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.info(&accession, options, &JsonOutput)?;
            JsonOutput::print_info(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.info(&accession, options, &console)?;
            console.print_info(&result).into_diagnostic()
        }
    }
}

fn run_biosample(
    args: InfoArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let accession = args.accession.parse::<ExperimentAccession>()?;
    let app = App::new(store, dcc, NopExecutor, settings(config, None));
    let options = LoadOptions {
        refresh: args.refresh,
        ..LoadOptions::default()
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.biosample(&accession, options, &JsonOutput)?;
            JsonOutput::print_biosample(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.biosample(&accession, options, &console)?;
            console.print_biosample(&result).into_diagnostic()
        }
    }
}

fn run_alias(
    args: AliasArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(store, dcc, NopExecutor, settings(config, None));

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.lookup_alias(&args.alias, &JsonOutput)?;
            JsonOutput::print_alias(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.lookup_alias(&args.alias, &console)?;
            console.print_alias(&result).into_diagnostic()
        }
    }
}

fn run_search(
    args: SearchArgs,
    config: &ResolvedConfig,
    store: Store,
    dcc: DccHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(store, dcc, NopExecutor, settings(config, None));
    let query = SearchQuery {
        assay: args.assay,
        organism: args.organism,
        status: args.status,
        terms: args.terms,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.search(&query, &JsonOutput)?;
            JsonOutput::print_search(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new();
            let result = app.search(&query, &console)?;
            console.print_search(&result).into_diagnostic()
        }
    }
}
