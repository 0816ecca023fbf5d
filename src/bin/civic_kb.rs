use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use civic_kb::builder::{self, BuildOptions, Builder, CancelToken};
use civic_kb::config::{ConfigLoader, ResolvedConfig};
use civic_kb::domain::SnapshotKind;
use civic_kb::enrichment::GraphqlHttpClient;
use civic_kb::error::CivicError;
use civic_kb::fs_util;
use civic_kb::http;
use civic_kb::liftover::{self, ChainFile, Liftover, NoLiftover};
use civic_kb::lookup::{self, LookupService};
use civic_kb::normalize::CoordinateNormalizer;
use civic_kb::output::{JsonOutput, OutputMode, TextOutput};
use civic_kb::snapshot::{self, SnapshotHttpClient};
use civic_kb::store::StoreWriter;

#[derive(Parser)]
#[command(name = "civic-kb")]
#[command(about = "Builds and queries local CIViC variant and gene stores")]
#[command(version, author)]
struct Cli {
    /// Path to a civic-kb.json config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build a store from the monthly CIViC snapshot")]
    Build(BuildArgs),
    #[command(about = "Query a built store")]
    Lookup(LookupArgs),
    #[command(about = "Print the snapshot URL a build would download")]
    SnapshotUrl(SnapshotUrlArgs),
}

#[derive(Args)]
struct BuildArgs {
    kind: SnapshotKind,

    /// Snapshot month as YYYY-MM (defaults to the current month)
    #[arg(long)]
    date: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    store_dir: Option<String>,

    #[arg(long)]
    chain_file: Option<String>,
}

#[derive(Args)]
struct LookupArgs {
    #[command(subcommand)]
    command: LookupCommand,
}

#[derive(Subcommand)]
enum LookupCommand {
    #[command(about = "Find variants at a position with the given alleles")]
    Variant {
        chromosome: String,
        position: i64,
        reference_base: String,
        variant_base: String,
    },
    #[command(about = "Find a gene by name")]
    Gene { name: String },
}

#[derive(Args)]
struct SnapshotUrlArgs {
    kind: SnapshotKind,

    #[arg(long)]
    date: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(civic) = report.downcast_ref::<CivicError>() {
            return ExitCode::from(map_exit_code(civic));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CivicError) -> u8 {
    match error {
        CivicError::NotFound { .. }
        | CivicError::InvalidEntityId(_)
        | CivicError::InvalidKind(_)
        | CivicError::InvalidSnapshotDate(_)
        | CivicError::ConfigRead(_)
        | CivicError::ConfigParse(_)
        | CivicError::MissingColumn(_) => 2,
        err if err.is_transport() => 3,
        CivicError::Store { .. } | CivicError::StoreLocked(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref());
    init_tracing(config.as_ref().ok())?;
    let config = config?;

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Build(args) => run_build(args, config, output_mode),
        Commands::Lookup(args) => run_lookup(args, &config, output_mode),
        Commands::SnapshotUrl(args) => {
            let date = resolve_date(args.date.as_deref())?;
            let url = snapshot::snapshot_url(&config.download_base_url, args.kind, date);
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print_url(&args.kind.to_string(), &url).into_diagnostic()
                }
                OutputMode::Text => {
                    println!("{url}");
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing(config: Option<&ResolvedConfig>) -> miette::Result<()> {
    let writer = match config.and_then(|config| config.log_file.as_ref()) {
        Some(path) => {
            fs_util::ensure_parent(path.as_std_path())?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .into_diagnostic()?;
            BoxMakeWriter::new(std::io::stderr.and(Arc::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(())
}

fn resolve_date(value: Option<&str>) -> Result<NaiveDate, CivicError> {
    match value {
        Some(value) => snapshot::parse_snapshot_date(value),
        None => Ok(snapshot::snapshot_date(&Local::now())),
    }
}

fn run_build(
    args: BuildArgs,
    mut config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if let Some(dir) = args.store_dir {
        config.store_dir = dir.into();
    }
    if let Some(path) = args.chain_file {
        config.chain_file = Some(path.into());
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }

    let cancel = match config.run_timeout {
        Some(timeout) => CancelToken::with_timeout(timeout),
        None => CancelToken::new(),
    };
    let options = BuildOptions {
        workers: config.workers,
        snapshot_date: resolve_date(args.date.as_deref())?,
        cancel,
    };

    let normalizer = match args.kind {
        SnapshotKind::Variant => CoordinateNormalizer::new(load_liftover(&config)?),
        SnapshotKind::Gene => CoordinateNormalizer::without_liftover(),
    };
    let pipeline = builder::pipeline_for(args.kind, normalizer);

    let snapshots = SnapshotHttpClient::new(&config.download_base_url, config.snapshot_timeout)?;
    let enrichment = GraphqlHttpClient::new(&config.graphql_url, config.request_timeout)?;
    let store = StoreWriter::open(config.store_path(args.kind))?;

    let summary = Builder::new(snapshots, enrichment, options).run(pipeline.as_ref(), store)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic(),
        OutputMode::Text => TextOutput::print_summary(&summary).into_diagnostic(),
    }
}

fn load_liftover(config: &ResolvedConfig) -> Result<Arc<dyn Liftover>, CivicError> {
    let path = match &config.chain_file {
        Some(path) => path.clone(),
        None => {
            let path = liftover::default_chain_path()?;
            let client = http::build_client(config.snapshot_timeout, CivicError::LiftoverHttp)?;
            liftover::ensure_chain_file(&client, &config.chain_url, &path)?;
            path
        }
    };
    let chains = ChainFile::from_path(&path)?;
    if chains.chain_count() == 0 {
        tracing::warn!(path = %path, "chain file has no chains; legacy coordinates will be skipped");
        return Ok(Arc::new(NoLiftover));
    }
    Ok(Arc::new(chains))
}

fn run_lookup(
    args: LookupArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match args.command {
        LookupCommand::Variant {
            chromosome,
            position,
            reference_base,
            variant_base,
        } => {
            let service = LookupService::open(&config.store_path(SnapshotKind::Variant))?;
            let chromosome = lookup::strip_chr_prefix(&chromosome);
            let hits = service.variants(chromosome, position, &reference_base, &variant_base)?;
            if hits.is_empty() {
                return Err(CivicError::NotFound {
                    kind: "variant",
                    key: format!("{chromosome}:{position} {reference_base}>{variant_base}"),
                }
                .into());
            }
            match output_mode {
                OutputMode::Json => JsonOutput::print_variants(&hits).into_diagnostic(),
                OutputMode::Text => TextOutput::print_variants(&hits).into_diagnostic(),
            }
        }
        LookupCommand::Gene { name } => {
            let service = LookupService::open(&config.store_path(SnapshotKind::Gene))?;
            let hits = service.genes(&name)?;
            if hits.is_empty() {
                return Err(CivicError::NotFound {
                    kind: "gene",
                    key: name,
                }
                .into());
            }
            match output_mode {
                OutputMode::Json => JsonOutput::print_genes(&hits).into_diagnostic(),
                OutputMode::Text => TextOutput::print_genes(&hits).into_diagnostic(),
            }
        }
    }
}
