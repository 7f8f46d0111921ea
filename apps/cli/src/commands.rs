//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use tenderscope_core::{
    OpenRouterAssessor, ProgressReporter, RelevanceService, RunOptions, RunSummary,
    ScoringOptions, report_from_store,
};
use tenderscope_crawler::build_renderer;
use tenderscope_opendata::OpenDataClient;
use tenderscope_shared::{
    AppConfig, CancelFlag, RenderBackend, api_key, config_file_path, expand_home, init_config,
    load_config, validate_api_key,
};
use tenderscope_storage::Storage;
use tenderscope_transport::HttpTransport;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TenderScope: find and rank relevant procurement opportunities.
#[derive(Parser)]
#[command(
    name = "tenderscope",
    version,
    about = "Collect, score and rank public procurement opportunities.",
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

/// Render backend override.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Backend {
    Static,
    Browserless,
}

impl From<Backend> for RenderBackend {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Static => RenderBackend::Static,
            Backend::Browserless => RenderBackend::Browserless,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Collect, classify, enrich and score opportunities, then write the report.
    Run(RunArgs),

    /// Rebuild the report from the historical store.
    Report {
        /// Store database path (overrides config).
        #[arg(long)]
        store: Option<String>,

        /// Report base path; `.json` and `.md` are appended.
        #[arg(long)]
        report: Option<String>,
    },

    /// Set the manual tracking fields of a stored opportunity.
    Track {
        /// Opportunity identifier.
        id: String,

        /// Application status, e.g. "Aplicada".
        #[arg(long)]
        status: Option<String>,

        /// Person responsible for the opportunity.
        #[arg(long)]
        owner: Option<String>,

        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,

        /// Store database path (overrides config).
        #[arg(long)]
        store: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Listing pages to process (0 = all discovered pages).
    #[arg(long)]
    max_pages: Option<u32>,

    /// Store database path (overrides config).
    #[arg(long)]
    store: Option<String>,

    /// Report base path; `.json` and `.md` are appended.
    #[arg(long)]
    report: Option<String>,

    /// Skip relevance scoring.
    #[arg(long)]
    no_scoring: bool,

    /// Skip the open-data search API.
    #[arg(long)]
    no_open_data: bool,

    /// Render backend for the listing.
    #[arg(long, value_enum)]
    backend: Option<Backend>,
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
        0 => "tenderscope=info",
        1 => "tenderscope=debug",
        _ => "tenderscope=trace",
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
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Report { store, report } => cmd_report(store, report).await,
        Command::Track {
            id,
            status,
            owner,
            notes,
            store,
        } => cmd_track(&id, status, owner, notes, store).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Fold command-line overrides into the loaded config.
fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(max_pages) = args.max_pages {
        config.defaults.max_pages = max_pages;
    }
    if let Some(store) = &args.store {
        config.defaults.store_path = store.clone();
    }
    if let Some(report) = &args.report {
        config.defaults.report_path = report.clone();
    }
    if args.no_scoring {
        config.scoring.enabled = false;
    }
    if args.no_open_data {
        config.open_data.enabled = false;
    }
    if let Some(backend) = args.backend {
        config.render.backend = backend.into();
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = load_config()?;
    apply_overrides(&mut config, &args);

    // Fail on a missing key before touching the network.
    let service = if config.scoring.enabled {
        let key = api_key(&config)?;
        Some(OpenRouterAssessor::new(
            key,
            config.openrouter.default_model.clone(),
            &config.scoring,
        )?)
    } else {
        None
    };

    let store_path = expand_home(&config.defaults.store_path)?;
    let storage = Storage::open(&store_path).await?;

    let transport = HttpTransport::new(&config.transport)?;
    let mut render = build_renderer(
        &config.render,
        &config.listing.pagination_selector,
        transport.clone(),
    )?;
    let open_data = if config.open_data.enabled {
        Some(OpenDataClient::new(transport, &config.open_data)?)
    } else {
        None
    };

    let options = RunOptions {
        listing: config.listing.clone(),
        max_pages: config.defaults.max_pages,
        categories: config.categories.clone(),
        scoring: ScoringOptions::from(&config.scoring),
        backfill: config.scoring.backfill,
        report_path: Some(expand_home(&config.defaults.report_path)?),
    };

    let cancel = CancelFlag::new();
    spawn_interrupt_handler(cancel.clone());

    info!(
        store = %store_path.display(),
        backend = render.name(),
        scoring = config.scoring.enabled,
        open_data = config.open_data.enabled,
        "starting run"
    );

    let reporter = CliProgress::new();
    let result = tenderscope_core::run(
        &options,
        render.as_mut(),
        open_data.as_ref(),
        service.as_ref().map(|s| s as &dyn RelevanceService),
        &storage,
        &reporter,
        &cancel,
    )
    .await?;

    print_summary(&result.summary);
    if let Some(paths) = &result.report {
        println!("  Report:     {}", paths.markdown.display());
        println!("              {}", paths.json.display());
    }
    println!();

    Ok(())
}

/// What to do after the n-th Ctrl-C of a run.
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// Let the current item finish, then stop with partial results.
    Drain,
    /// Leave immediately.
    Exit,
}

fn on_interrupt(count: u32, cancel: &CancelFlag) -> InterruptAction {
    if count == 1 {
        warn!("interrupt received, finishing current item (press Ctrl-C again to abort)");
        cancel.cancel();
        InterruptAction::Drain
    } else {
        warn!("second interrupt received, aborting");
        InterruptAction::Exit
    }
}

/// Listen for Ctrl-C for the lifetime of the run.
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        let mut count = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            count += 1;
            if on_interrupt(count, &cancel) == InterruptAction::Exit {
                std::process::exit(130);
            }
        }
    });
}

fn print_summary(s: &RunSummary) {
    println!();
    if s.cancelled {
        println!("  Run cancelled; partial results were saved.");
    } else {
        println!("  Run complete.");
    }
    println!("  Run ID:     {}", s.run_id);
    println!(
        "  Pages:      {}/{} processed, {} skipped",
        s.pages_processed, s.pages_discovered, s.pages_skipped
    );
    println!(
        "  Records:    {} listing rows, {} open data, {} matched, {} filtered out",
        s.rows_extracted, s.open_data_records, s.records_classified, s.records_filtered_out
    );
    println!(
        "  Details:    {} enriched, {} with contract code",
        s.details_enriched, s.contract_codes
    );
    println!(
        "  Scoring:    {} calls, {} cached, {} adopted, {} need manual review",
        s.scoring.calls, s.scoring.cache_hits, s.scoring.adopted, s.scoring.sentinels
    );
    println!(
        "  Store:      {} -> {} entries ({} added, {} updated)",
        s.store_before, s.store_after, s.merge.added, s.merge.updated
    );
    if !s.failures.is_empty() {
        let parts: Vec<String> = s
            .failures
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect();
        println!("  Failures:   {}", parts.join(", "));
    }
    println!("  Time:       {:.1}s", s.elapsed_ms as f64 / 1000.0);
}

async fn cmd_report(store: Option<String>, report: Option<String>) -> Result<()> {
    let config = load_config()?;
    let store_path = expand_home(store.as_deref().unwrap_or(&config.defaults.store_path))?;
    let report_base = expand_home(report.as_deref().unwrap_or(&config.defaults.report_path))?;

    existing_store(&store_path)?;
    let storage = Storage::open_readonly(&store_path).await?;
    let (paths, rows) = report_from_store(&storage, &report_base).await?;

    println!("  {rows} opportunities written to");
    println!("  {}", paths.markdown.display());
    println!("  {}", paths.json.display());
    Ok(())
}

/// Commands that only read or edit past runs need a store to exist.
fn existing_store(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(eyre!(
            "no store at {}; run `tenderscope run` first",
            path.display()
        ));
    }
    Ok(())
}

async fn cmd_track(
    id: &str,
    status: Option<String>,
    owner: Option<String>,
    notes: Option<String>,
    store: Option<String>,
) -> Result<()> {
    if status.is_none() && owner.is_none() && notes.is_none() {
        return Err(eyre!("nothing to update; pass --status, --owner or --notes"));
    }
    let config = load_config()?;
    let store_path = expand_home(store.as_deref().unwrap_or(&config.defaults.store_path))?;
    existing_store(&store_path)?;

    let storage = Storage::open(&store_path).await?;
    storage
        .set_tracking(id, status.as_deref(), owner.as_deref(), notes.as_deref())
        .await?;
    println!("  Updated {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using indicatif spinners.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, stage: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("{stage} [{current}/{total}]"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let path = config_file_path()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", path.display());
    println!("{toml_str}");
    if config.scoring.enabled && validate_api_key(&config).is_err() {
        println!(
            "# warning: {} is not set; `run` needs it unless --no-scoring is given",
            config.openrouter.api_key_env
        );
    }
    Ok(())
}
