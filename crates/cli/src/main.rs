use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use photo_indexer_core::{
    apply_sync, app_paths, extract_index, load_config, plan_sync, read_index, undo_sync,
    AppConfig, ExiftoolCommand, ExtractOptions, MetadataBackend, MetadataTool, NativeExifReader,
    SyncOptions, SyncPlan, SyncReport,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "photo-indexer-cli")]
#[command(about = "Builds a JSON index of a photo folder and keeps it in sync with bulk renames")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read metadata from every image in a folder and write the index
    Extract(ExtractArgs),
    /// Rename indexed files with a template and update the index
    Rename(RenameArgs),
    /// Reverse the last rename recorded in a folder
    Undo(UndoArgs),
    /// Print tag counts from an index
    Tags(TagsArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    input_dir: PathBuf,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    /// Seconds allowed per file
    #[arg(long)]
    timeout: Option<u64>,
    /// Prefix for each record's path field
    #[arg(long)]
    path_prefix: Option<String>,
}

#[derive(Debug, Args)]
struct RenameArgs {
    folder: PathBuf,
    #[arg(long)]
    json: Option<PathBuf>,
    /// Placeholders: {counter}, {counter:03}, {ext}, {date}, {id}
    #[arg(long)]
    pattern: Option<String>,
    #[arg(long)]
    start: Option<u64>,
    #[arg(long, default_value_t = false)]
    no_backup: bool,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct UndoArgs {
    folder: PathBuf,
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TagsArgs {
    #[arg(long)]
    json: Option<PathBuf>,
    /// Show only the most common tags
    #[arg(long)]
    top: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Exiftool,
    Native,
}

impl From<BackendArg> for MetadataBackend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Exiftool => MetadataBackend::Exiftool,
            BackendArg::Native => MetadataBackend::Native,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config()?;
    match cli.command {
        Commands::Extract(args) => cmd_extract(args, &config),
        Commands::Rename(args) => cmd_rename(args, &config),
        Commands::Undo(args) => cmd_undo(args, &config),
        Commands::Tags(args) => cmd_tags(args, &config),
        Commands::Config(config_args) => match config_args.action {
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn cmd_extract(args: ExtractArgs, config: &AppConfig) -> Result<()> {
    let backend = args.backend.map(Into::into).unwrap_or(config.backend);
    let timeout = Duration::from_secs(args.timeout.unwrap_or(config.tool_timeout_secs));
    let tool: Box<dyn MetadataTool> = match backend {
        MetadataBackend::Exiftool => {
            Box::new(ExiftoolCommand::new(&config.exiftool_program, timeout))
        }
        MetadataBackend::Native => Box::new(NativeExifReader),
    };

    let options = ExtractOptions {
        source_dir: args.input_dir,
        output: args.output.unwrap_or_else(|| config.output.clone()),
        path_prefix: args
            .path_prefix
            .unwrap_or_else(|| config.path_prefix.clone()),
    };
    let report = extract_index(&options, tool.as_ref())?;

    println!(
        "processed {} of {} image(s), {} skipped -> {}",
        report.processed(),
        report.discovered,
        report.skipped.len(),
        options.output.display()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.filename, skipped.reason);
    }
    Ok(())
}

fn cmd_rename(args: RenameArgs, config: &AppConfig) -> Result<()> {
    let options = SyncOptions {
        target_dir: args.folder,
        index_path: args.json.unwrap_or_else(|| config.output.clone()),
        template: args.pattern.unwrap_or_else(|| config.template.clone()),
        counter_start: args.start.unwrap_or(config.counter_start),
        backup: config.backup && !args.no_backup,
    };

    let plan = plan_sync(&options)?;
    if args.dry_run {
        match args.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            OutputFormat::Table => print_plan(&plan),
        }
        eprintln!("dry run: no files or index were changed");
        return Ok(());
    }

    let report = apply_sync(plan)?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }

    if !report.persistence_errors.is_empty() {
        for err in &report.persistence_errors {
            error!("{err}");
        }
        bail!("files were renamed but the index or mapping could not be saved");
    }
    if report.renamed.is_empty() && !report.failed.is_empty() {
        bail!("no file could be renamed");
    }
    Ok(())
}

fn cmd_undo(args: UndoArgs, config: &AppConfig) -> Result<()> {
    let index_path = args.json.unwrap_or_else(|| config.output.clone());
    let report = undo_sync(&args.folder, &index_path)?;
    for entry in &report.restored {
        println!("{} -> {}", entry.from, entry.to);
    }
    for failed in &report.failed {
        warn!(
            "{} could not be restored and is now {}",
            failed.original_name, failed.quarantine_name
        );
    }
    println!(
        "restored {} file(s), {} failed, {} missing",
        report.restored.len(),
        report.failed.len(),
        report.missing.len()
    );
    if !report.persistence_errors.is_empty() {
        bail!(report.persistence_errors.join("; "));
    }
    Ok(())
}

fn cmd_tags(args: TagsArgs, config: &AppConfig) -> Result<()> {
    let index_path = args.json.unwrap_or_else(|| config.output.clone());
    let index = read_index(&index_path)?;
    let counts = match args.top {
        Some(limit) => index.top_tags(limit),
        None => index.tag_counts().into_iter().collect(),
    };
    for (tag, count) in &counts {
        println!("{count:>5}  {tag}");
    }
    info!(
        photos = index.photos.len(),
        tags = index.unique_tags().len(),
        "index summary"
    );
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let paths = app_paths()?;
    println!("config file: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn print_plan(plan: &SyncPlan) {
    println!("original -> planned (id)");
    for candidate in &plan.candidates {
        println!(
            "{} -> {} ({})",
            candidate.original_name, candidate.planned_name, candidate.record_id
        );
    }
    for name in &plan.unmatched {
        println!("{name} (not in index, skipped)");
    }
    println!(
        "\nsummary: candidates={} unmatched={} start={} backup={}",
        plan.candidates.len(),
        plan.unmatched.len(),
        plan.counter_start,
        plan.backup
    );
}

fn print_report(report: &SyncReport) {
    for entry in &report.renamed {
        println!("{} -> {}", entry.from, entry.to);
    }
    for failed in &report.failed {
        println!(
            "FAILED {} -> {} (left as {}): {}",
            failed.original_name, failed.target_name, failed.quarantine_name, failed.error
        );
    }
    if let Some(path) = &report.backup_path {
        println!("original names saved to {}", path.display());
    }
    if let Some(path) = &report.mapping_path {
        println!("mapping saved to {}", path.display());
    }
    println!(
        "\nsummary: renamed={} failed={} unmatched={}",
        report.renamed.len(),
        report.failed.len(),
        report.unmatched.len()
    );
}
