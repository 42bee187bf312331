//! Configuration types for docshift batch conversion.

use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the external conversion engine and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the scripted application.
    /// Default: "Pages".
    pub application: String,

    /// Export format passed to the application's `export` command.
    /// Default: "Microsoft Word".
    pub export_format: String,

    /// Path to the osascript binary. If None, searches PATH.
    pub osascript_path: Option<PathBuf>,

    /// Timeout for individual document conversions.
    /// Default: 120 seconds.
    pub conversion_timeout: Duration,

    /// Number of conversions an engine instance serves before a planned restart.
    /// This bounds memory growth in the external application.
    /// Default: 5.
    pub restart_threshold: u32,

    /// Consecutive failures after which the batch is aborted.
    /// Default: 5.
    pub max_consecutive_failures: u32,

    /// Time to let the application settle after activation.
    /// Default: 2 seconds.
    pub launch_settle: Duration,

    /// Time to let the application exit after a quit request.
    /// Default: 3 seconds.
    pub quit_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application: "Pages".to_string(),
            export_format: "Microsoft Word".to_string(),
            osascript_path: None,
            conversion_timeout: Duration::from_secs(120),
            restart_threshold: 5,
            max_consecutive_failures: 5,
            launch_settle: Duration::from_secs(2),
            quit_settle: Duration::from_secs(3),
        }
    }
}

impl EngineConfig {
    /// Set the conversion timeout.
    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.conversion_timeout = timeout;
        self
    }

    /// Set the number of conversions between planned restarts.
    pub fn restart_threshold(mut self, threshold: u32) -> Self {
        self.restart_threshold = threshold;
        self
    }

    /// Set the consecutive failure limit.
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Set the osascript binary path.
    pub fn osascript_path(mut self, path: PathBuf) -> Self {
        self.osascript_path = Some(path);
        self
    }

    /// Set both settle delays at once.
    pub fn settle(mut self, launch: Duration, quit: Duration) -> Self {
        self.launch_settle = launch;
        self.quit_settle = quit;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.application.trim().is_empty() {
            return Err(ConversionError::InvalidConfig(
                "application must not be empty".to_string(),
            ));
        }
        if self.conversion_timeout.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "conversion_timeout must be greater than 0".to_string(),
            ));
        }
        if self.restart_threshold == 0 {
            return Err(ConversionError::InvalidConfig(
                "restart_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConversionError::InvalidConfig(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the orchestrator treats unsafe filenames before converting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMode {
    /// Do not look at filenames.
    Off,
    /// Scan and warn, but convert files as they are.
    #[default]
    Warn,
    /// Rename unsafe files before discovery.
    Apply,
}

impl std::str::FromStr for SanitizeMode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(SanitizeMode::Off),
            "warn" => Ok(SanitizeMode::Warn),
            "apply" => Ok(SanitizeMode::Apply),
            other => Err(ConversionError::InvalidConfig(format!(
                "unknown sanitize mode '{}', expected off, warn or apply",
                other
            ))),
        }
    }
}

/// Configuration for discovery and batch processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Files processed per chunk. Smaller chunks lose less progress per crash.
    /// Default: 5.
    pub batch_size: usize,

    /// Extension of convertible source files, without the dot.
    /// Default: "pages".
    pub source_extension: String,

    /// Extension of produced output files, without the dot.
    /// Default: "docx".
    pub target_extension: String,

    /// Name of the per-folder directory that receives converted originals.
    /// Default: "pages".
    pub archive_dir_name: String,

    /// Filename handling before conversion.
    pub sanitize: SanitizeMode,

    /// Restart the engine at every chunk boundary, independent of the count.
    /// Default: true.
    pub restart_at_chunk_boundary: bool,

    /// Pause between files.
    /// Default: 500 milliseconds.
    pub settle_between_files: Duration,

    /// Directory for run logs. If None, uses the Desktop or home directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            source_extension: "pages".to_string(),
            target_extension: "docx".to_string(),
            archive_dir_name: "pages".to_string(),
            sanitize: SanitizeMode::default(),
            restart_at_chunk_boundary: true,
            settle_between_files: Duration::from_millis(500),
            log_dir: None,
        }
    }
}

impl BatchConfig {
    /// Create a batch config with the given chunk size.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Set the sanitize mode.
    pub fn sanitize(mut self, mode: SanitizeMode) -> Self {
        self.sanitize = mode;
        self
    }

    /// Enable or disable restarts at chunk boundaries.
    pub fn restart_at_chunk_boundary(mut self, enabled: bool) -> Self {
        self.restart_at_chunk_boundary = enabled;
        self
    }

    /// Set the pause between files.
    pub fn settle_between_files(mut self, delay: Duration) -> Self {
        self.settle_between_files = delay;
        self
    }

    /// Set the log directory.
    pub fn log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    /// Resolve where run logs go.
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .or_else(dirs::desktop_dir)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Whether `ext` is the source extension (case-insensitive).
    pub fn is_source_extension(&self, ext: &str) -> bool {
        ext.eq_ignore_ascii_case(&self.source_extension)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConversionError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("source_extension", &self.source_extension),
            ("target_extension", &self.target_extension),
            ("archive_dir_name", &self.archive_dir_name),
        ] {
            if value.is_empty() || value.contains(&['/', '\\', '.'][..]) {
                return Err(ConversionError::InvalidConfig(format!(
                    "{} must be a plain non-empty name, got '{}'",
                    name, value
                )));
            }
        }
        if self.source_extension.eq_ignore_ascii_case(&self.target_extension) {
            return Err(ConversionError::InvalidConfig(
                "source_extension and target_extension must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Combined configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Engine configuration.
    pub engine: EngineConfig,

    /// Batch configuration.
    pub batch: BatchConfig,
}

impl ConverterConfig {
    /// Create a converter config with the given chunk size and restart threshold.
    pub fn new(batch_size: usize, restart_threshold: u32) -> Self {
        Self {
            engine: EngineConfig::default().restart_threshold(restart_threshold),
            batch: BatchConfig::with_batch_size(batch_size),
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: ConverterConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}
