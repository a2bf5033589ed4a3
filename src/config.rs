//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.analysis-monitor.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".analysis-monitor.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Job engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Console display settings.
    #[serde(default)]
    pub display: DisplayConfig,

    /// User preferences, handed to the presentation layer as-is.
    #[serde(default)]
    pub preferences: PreferencesConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Settings for running jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows between two progress events.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Simulated work per row in the local engine, in microseconds.
    #[serde(default)]
    pub row_delay_micros: u64,

    /// Buffer size of the notification channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            row_delay_micros: 0,
            notification_capacity: default_notification_capacity(),
        }
    }
}

fn default_progress_interval() -> u64 {
    100
}

fn default_notification_capacity() -> usize {
    crate::analysis::notify::DEFAULT_CAPACITY
}

/// Console display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Show progress bars while the job runs.
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Print the result summary when the job ends.
    #[serde(default = "default_true")]
    pub show_summary: bool,

    /// Maximum characters of a result payload shown in the summary.
    #[serde(default = "default_max_payload_chars")]
    pub max_payload_chars: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_progress: true,
            show_summary: true,
            max_payload_chars: default_max_payload_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_payload_chars() -> usize {
    200
}

/// User preferences. The monitor does not interpret these; presenters do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// Switch to the first result when a job succeeds.
    #[serde(default = "default_true")]
    pub focus_first_result: bool,

    /// Show descriptor icons next to result collections.
    #[serde(default = "default_true")]
    pub show_icons: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            focus_first_result: true,
            show_icons: true,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load configuration from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(interval) = args.progress_interval {
            self.engine.progress_interval = interval;
        }
        if let Some(delay) = args.row_delay_micros {
            self.engine.row_delay_micros = delay;
        }

        // Flags always override
        if args.no_progress || args.quiet {
            self.display.show_progress = false;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
