//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use geonote_core::{
    DocumentStore, FsStore, LocationPipeline, LocationService, ProcessRunner, ProgressReporter,
    Resolver, RunOutcome,
};
use geonote_shared::{
    AppConfig, Document, DocumentCreated, ResolverConfig, WatchConfig, init_config, load_config,
    load_config_from, validate_config,
};
use geonote_watcher::NoteWatcher;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// geonote: tag new notes with where you were when you wrote them.
#[derive(Parser)]
#[command(
    name = "geonote",
    version,
    about = "Add the current location to the metadata block of newly created notes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.geonote/geonote.toml.
    #[arg(long, global = true, env = "GEONOTE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Watch note directories and tag every new note until Ctrl-C.
    Watch {
        /// Directories to watch (defaults to the configured vaults).
        dirs: Vec<PathBuf>,
    },

    /// Tag a single note with the current location.
    Tag {
        /// Note to tag.
        file: PathBuf,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolve and print the current location.
    Locate,

    /// Merge a given location into a note without running the lookup command.
    Merge {
        /// Note to merge into.
        file: PathBuf,

        /// Location value to insert.
        #[arg(short, long)]
        location: String,

        /// Write the result back instead of printing it.
        #[arg(short, long)]
        write: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "geonote=info",
        1 => "geonote=debug",
        _ => "geonote=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Watch { dirs } => cmd_watch(config_path, dirs).await,
        Command::Tag { file, json } => cmd_tag(config_path, file, json).await,
        Command::Locate => cmd_locate(config_path).await,
        Command::Merge {
            file,
            location,
            write,
        } => cmd_merge(&file, &location, write).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load and validate the config from `--config` or the default location.
fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    validate_config(&config)?;
    Ok(config)
}

fn build_pipeline(config: &AppConfig) -> LocationPipeline {
    LocationPipeline::new(
        Arc::new(ProcessRunner),
        Arc::new(FsStore),
        ResolverConfig::from(config),
        config.watch.extensions.clone(),
    )
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_watch(config_path: Option<&Path>, dirs: Vec<PathBuf>) -> Result<()> {
    let config = load(config_path)?;

    let mut watch = WatchConfig::from(&config);
    if !dirs.is_empty() {
        watch.roots = dirs;
    }
    if watch.roots.is_empty() {
        return Err(eyre!(
            "no directories to watch: pass one or add a [[vaults]] entry to the config"
        ));
    }
    for root in &watch.roots {
        if !root.is_dir() {
            return Err(eyre!("'{}' is not a directory", root.display()));
        }
    }

    let watcher = NoteWatcher::new(watch);
    let mut service = LocationService::new(build_pipeline(&config));
    service.start(&watcher)?;

    println!("Watching for new notes (Ctrl-C to stop):");
    for root in watcher.roots() {
        println!("  {}", root.display());
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl-C: {e}"))?;

    info!("shutting down");
    service.stop().await;
    Ok(())
}

async fn cmd_tag(config_path: Option<&Path>, file: PathBuf, json: bool) -> Result<()> {
    let config = load(config_path)?;
    let pipeline = build_pipeline(&config);

    info!(path = %file.display(), "tagging note");

    let reporter = CliProgress::new();
    let outcome = pipeline
        .handle_created(DocumentCreated::new(file), &reporter)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome {
        RunOutcome::Failed { .. } => Err(eyre!("note was not tagged")),
        _ => Ok(()),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Tagged {
            path,
            location,
            previous,
        } => {
            println!();
            println!("  Note tagged!");
            println!("  Path:     {}", path.display());
            println!("  Location: {location}");
            if let Some(previous) = previous {
                println!("  Replaced: {previous}");
            }
            println!();
        }
        RunOutcome::Skipped { path } => {
            println!("Skipped {}: not a note", path.display());
        }
        RunOutcome::Failed { path, error, .. } => {
            eprintln!("Failed to tag {}: {error}", path.display());
        }
    }
}

async fn cmd_locate(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let resolver = Resolver::new(Arc::new(ProcessRunner), ResolverConfig::from(&config));

    let reporter = CliProgress::new();
    let result = resolver.resolve(&reporter).await;
    reporter.finish();

    println!("{}", result?);
    Ok(())
}

async fn cmd_merge(file: &Path, location: &str, write: bool) -> Result<()> {
    let document = Document::new(file);
    let content = FsStore.read(&document).await?;

    let merged = geonote_frontmatter::merge(&content, location);

    if write {
        FsStore.write(&document, &merged).await?;
        info!(path = %document, location, "location merged");
    } else {
        print!("{merged}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn attempt(&self, attempt: u32, max_attempts: u32) {
        self.spinner
            .set_message(format!("Resolving location [{attempt}/{max_attempts}]"));
    }

    fn retrying(&self, remaining: u32, delay: Duration) {
        self.spinner.set_message(format!(
            "Lookup failed, retrying in {:.1}s ({remaining} left)",
            delay.as_secs_f64()
        ));
    }

    fn done(&self, _outcome: &RunOutcome) {
        self.finish();
    }
}
