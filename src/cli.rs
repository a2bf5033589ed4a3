//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Analysis Monitor - run an analysis job and watch its results arrive
///
/// Runs a data-analysis job definition on a background worker, shows
/// per-table progress and the run log, and prints the aggregated results.
///
/// Examples:
///   analysis-monitor --job jobs/customers.toml
///   analysis-monitor --job jobs/customers.toml --format json
///   analysis-monitor --job jobs/customers.toml --cancel-after-ms 500
///   analysis-monitor --load-result results.json
///   analysis-monitor --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Job definition to run (TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["init_config", "load_result"],
        conflicts_with = "load_result"
    )]
    pub job: Option<PathBuf>,

    /// Show a previously exported result (JSON) instead of running a job
    #[arg(long, value_name = "FILE")]
    pub load_result: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .analysis-monitor.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format of the result summary (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Do not draw progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Rows between two progress updates
    #[arg(long, value_name = "ROWS")]
    pub progress_interval: Option<u64>,

    /// Simulated work per row, in microseconds
    #[arg(long, value_name = "MICROS")]
    pub row_delay_micros: Option<u64>,

    /// Request cancellation after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub cancel_after_ms: Option<u64>,

    /// Generate a default .analysis-monitor.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the result summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.progress_interval == Some(0) {
            return Err("Progress interval must be at least 1 row".to_string());
        }

        for path in [&self.job, &self.load_result].into_iter().flatten() {
            if !path.is_file() {
                return Err(format!("File does not exist: {}", path.display()));
            }
        }

        if self.load_result.is_some() && self.cancel_after_ms.is_some() {
            return Err("--cancel-after-ms needs a job to cancel".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
