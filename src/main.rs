//! Analysis Monitor - run a data-analysis job and watch its results arrive
//!
//! Runs a job definition on a background worker, renders per-table
//! progress and the run log, and prints the aggregated results.
//!
//! Exit codes:
//!   0 - Job succeeded (or a stored result was shown)
//!   1 - Runtime error (bad arguments, unreadable job, config failure, etc.)
//!   2 - Job failed
//!   3 - Job cancelled

use analysis_monitor::analysis::{
    JobExecutionCoordinator, ListenerRegistry, Notifier, RunOutcome, TracingListener,
};
use analysis_monitor::cli::{Args, OutputFormat};
use analysis_monitor::config::{Config, CONFIG_FILE_NAME};
use analysis_monitor::engine::LocalEngine;
use analysis_monitor::models::AnalysisJob;
use analysis_monitor::report::{self, ConsolePresenter};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Analysis Monitor v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default configuration file.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to tune the engine, display and preferences.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run a job, or show a stored result. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let notifier = Notifier::new(config.engine.notification_capacity);
    let presenter = ConsolePresenter::new(&config.display, &config.preferences);
    let console = tokio::spawn(presenter.follow(notifier.subscribe()));

    let coordinator = match &args.load_result {
        Some(path) => load_stored_result(path, notifier, &config)?,
        None => start_job(&args, notifier, &config)?,
    };
    let coordinator = Arc::new(coordinator);

    if let Some(ms) = args.cancel_after_ms {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            info!("Cancelling after {}ms", ms);
            coordinator.cancel();
        });
    }

    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the job");
                coordinator.cancel();
            }
        });
    }

    let outcome = coordinator.await_result().await?;

    if let Err(e) = console.await {
        debug!("Console task ended abnormally: {}", e);
    }

    if config.display.show_summary {
        let output = match args.format {
            OutputFormat::Json => match outcome.result() {
                Some(result) => report::generate_json_summary(result)?,
                None => serde_json::json!({
                    "state": outcome.state().to_string(),
                    "cause": failure_text(&outcome),
                })
                .to_string(),
            },
            OutputFormat::Markdown => report::generate_markdown_summary(
                coordinator.datastore_name(),
                &outcome,
                coordinator.progress(),
                config.display.max_payload_chars,
            ),
        };
        println!("{}", output);
    }

    let duration = start_time.elapsed().as_secs_f64();
    info!(state = %outcome.state(), "Finished in {:.1}s", duration);

    Ok(match outcome {
        RunOutcome::Succeeded(_) => 0,
        RunOutcome::Failed(_) => 2,
        RunOutcome::Cancelled(_) => 3,
    })
}

fn failure_text(outcome: &RunOutcome) -> Option<String> {
    match outcome {
        RunOutcome::Failed(cause) => Some(cause.to_string()),
        _ => None,
    }
}

/// Read a job definition and start it on the local engine.
fn start_job(args: &Args, notifier: Notifier, config: &Config) -> Result<JobExecutionCoordinator> {
    let path = args
        .job
        .as_deref()
        .context("No job definition given")?;

    let job = load_job(path)?;
    eprintln!(
        "🔬 Running job {} ({} tables, {} components)",
        path.display(),
        job.tables.len(),
        job.components.len()
    );

    let engine = Arc::new(LocalEngine::new((&config.engine).into()));
    let mut listeners = ListenerRegistry::new();
    if config.general.verbose {
        listeners.register(Arc::new(TracingListener));
    }

    let coordinator = JobExecutionCoordinator::new(Arc::new(job), engine, notifier)
        .with_listeners(listeners)
        .with_job_file(path)
        .with_preferences(config.preferences.clone());
    coordinator.start()?;
    Ok(coordinator)
}

/// Wrap an exported result so it is shown like a finished run.
fn load_stored_result(
    path: &Path,
    notifier: Notifier,
    config: &Config,
) -> Result<JobExecutionCoordinator> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read result file: {}", path.display()))?;
    let result = report::parse_json_result(&content)
        .with_context(|| format!("Invalid result file: {}", path.display()))?;

    eprintln!(
        "📂 Showing stored result {} ({} results)",
        path.display(),
        result.result_count()
    );

    Ok(
        JobExecutionCoordinator::from_result(Arc::new(AnalysisJob::default()), &result, notifier)
            .with_job_file(path)
            .with_preferences(config.preferences.clone()),
    )
}

fn load_job(path: &Path) -> Result<AnalysisJob> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
