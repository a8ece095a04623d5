//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use battlecard_core::{run_bulk, run_pipeline, PipelineOptions, PipelinePorts};
use battlecard_engine::ProgressReporter;
use battlecard_shared::{
    config_dir, config_file_path, init_config, load_config, Phase, RunStatus,
};
use battlecard_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Database file under the config directory.
const DB_FILE_NAME: &str = "battlecard.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BattleCard — research a company into a sales battle card.
#[derive(Parser)]
#[command(
    name = "battlecard",
    version,
    about = "Generate competitive battle cards from public company information.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Generate a battle card for one company.
    Run {
        /// Company name to research.
        company: String,

        /// Output directory for the artifacts (defaults to config).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Generate battle cards for every company in a file, one name per line.
    Bulk {
        /// Input file; blank lines and lines starting with '#' are skipped.
        file: String,

        /// Maximum companies processed in parallel.
        #[arg(short, long, default_value = "3")]
        concurrency: u32,

        /// Output directory for the artifacts (defaults to config).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// List registered runs.
    List,

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
        0 => "battlecard=info",
        1 => "battlecard=debug",
        _ => "battlecard=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { company, out } => cmd_run(&company, out.as_deref()).await,
        Command::Bulk {
            file,
            concurrency,
            out,
        } => cmd_bulk(&file, concurrency, out.as_deref()).await,
        Command::List => cmd_list().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn open_storage() -> Result<Arc<Storage>> {
    let db_path = config_dir()?.join(DB_FILE_NAME);
    Ok(Arc::new(Storage::open(&db_path).await?))
}

async fn cmd_run(company: &str, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let ports = PipelinePorts::from_config(&config)?;

    let mut options = PipelineOptions::from_config(&config);
    if let Some(out) = out {
        options.output_dir = PathBuf::from(out);
    }

    let storage = open_storage().await?;
    info!(company, out = %options.output_dir.display(), "generating battle card");

    let reporter = CliProgress::new();
    let report = run_pipeline(company, &ports, &options, &reporter, Some(storage)).await?;

    match report.status {
        RunStatus::Complete => {
            let state = &report.state;
            println!();
            println!("  Battle card generated!");
            println!("  Company:     {}", state.company_name);
            println!("  Run:         {}", report.run_id);
            println!(
                "  Website:     {}",
                state.official_site.as_deref().unwrap_or("not found")
            );
            println!("  Competitors: {}", state.competitors.len());
            println!(
                "  Pricing:     {}",
                match &state.pricing_record {
                    Some(record) => format!("{} plans", record.len()),
                    None => "not available".to_string(),
                }
            );
            println!("  News items:  {}", state.news_items.len());
            if !state.errors.is_empty() {
                println!("  Warnings:    {} (see log)", state.errors.len());
            }
            println!(
                "  Card:        {}",
                state.artifact_path.as_deref().unwrap_or("-")
            );
            println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
            println!();
            Ok(())
        }
        RunStatus::Failed => {
            println!();
            println!("  Run failed for {}.", report.state.company_name);
            for entry in &report.state.errors {
                println!(
                    "    {} (attempt {}) [{}]: {}",
                    entry.phase, entry.attempt, entry.kind, entry.message
                );
            }
            println!();
            Err(eyre!("battle card generation failed for '{company}'"))
        }
    }
}

async fn cmd_bulk(file: &str, concurrency: u32, out: Option<&str>) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read company list '{file}': {e}"))?;
    let companies: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    if companies.is_empty() {
        return Err(eyre!("'{file}' contains no company names"));
    }

    let config = load_config()?;
    let ports = PipelinePorts::from_config(&config)?;
    let mut options = PipelineOptions::from_config(&config);
    if let Some(out) = out {
        options.output_dir = PathBuf::from(out);
    }
    let storage = open_storage().await?;

    info!(
        companies = companies.len(),
        concurrency, "starting bulk generation"
    );
    println!("  Processing {} companies...", companies.len());

    let report = run_bulk(companies, concurrency, ports, options, Some(storage)).await;

    println!();
    for outcome in &report.outcomes {
        match outcome.status {
            RunStatus::Complete => println!(
                "  ok    {} -> {}",
                outcome.company,
                outcome.artifact_path.as_deref().unwrap_or("-")
            ),
            RunStatus::Failed => println!(
                "  FAIL  {} ({})",
                outcome.company,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!();
    println!(
        "  Batch complete: {}/{} succeeded.",
        report.completed(),
        report.outcomes.len()
    );
    let failed = report.failed_companies();
    if !failed.is_empty() {
        println!("  Failed companies: {}", failed.join(", "));
    }
    println!();
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let storage = open_storage().await?;
    let runs = storage.list_runs().await?;

    if runs.is_empty() {
        println!("No runs recorded yet. Try `battlecard run <company>`.");
        return Ok(());
    }

    println!();
    for run in runs {
        println!(
            "  {}  {:10}  {}  {}",
            run.started_at,
            run.status,
            run.company,
            run.artifact_path.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config file created at {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let path = config_file_path()?;
    println!("# resolved config ({})", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn phase_label(phase: Phase) -> &'static str {
        match phase {
            Phase::Detect => "Researching company",
            Phase::Price => "Collecting pricing",
            Phase::Intelligence => "Gathering news",
            Phase::Synthesize => "Writing battle card",
            Phase::Deliver => "Saving artifacts",
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, phase: Phase, attempt: u32) {
        let label = Self::phase_label(phase);
        if attempt > 1 {
            self.spinner
                .set_message(format!("{label} (attempt {attempt})"));
        } else {
            self.spinner.set_message(label);
        }
    }

    fn finished(&self, _status: RunStatus) {
        self.spinner.finish_and_clear();
    }
}
