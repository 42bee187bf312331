//! Error types for docshift batch conversion.

use crate::model::ConversionStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the docshift library.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The scripting bridge binary is not installed or not found in PATH.
    #[error("Scripting bridge not found. Please ensure 'osascript' is in PATH")]
    EngineNotFound,

    /// The conversion engine could not be launched.
    #[error("Failed to start conversion engine '{application}': {message}")]
    EngineStartFailed {
        application: String,
        message: String,
    },

    /// The engine reported an explicit error for one document.
    #[error("Conversion failed for '{path}': {message}")]
    ConversionFailed { path: PathBuf, message: String },

    /// A single conversion exceeded its watchdog.
    #[error("Conversion timed out after {timeout_secs} seconds for '{path}'")]
    Timeout { path: PathBuf, timeout_secs: u64 },

    /// The engine claimed success but no output file appeared.
    #[error("Engine reported success but output '{0}' is missing")]
    OutputMissing(PathBuf),

    /// Too many consecutive failures; the engine is considered unusable.
    #[error("Engine unusable after {consecutive_failures} consecutive failures")]
    EngineUnusable { consecutive_failures: u32 },

    /// Input file not found.
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    /// Root folder missing or not a directory.
    #[error("Root folder not found or not a directory: {0}")]
    RootNotFound(PathBuf),

    /// The archived original would overwrite an existing entry.
    #[error("Archive destination already exists: {0}")]
    ArchiveConflict(PathBuf),

    /// Moving the original into the archive folder failed.
    #[error("Failed to archive '{path}': {message}")]
    ArchiveFailed { path: PathBuf, message: String },

    /// A sanitizing rename could not be completed.
    #[error("Failed to rename '{from}' to '{to}': {message}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    /// A conversion record was resolved twice.
    #[error("Record for '{path}' already resolved as {from}")]
    InvalidTransition {
        path: PathBuf,
        from: ConversionStatus,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Filesystem or process I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Whether this error left the document unconverted, as opposed to
    /// archive trouble after the output was written.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            ConversionError::InputNotFound(_)
                | ConversionError::ConversionFailed { .. }
                | ConversionError::Timeout { .. }
                | ConversionError::OutputMissing(_)
                | ConversionError::EngineStartFailed { .. }
                | ConversionError::EngineNotFound
        )
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ConversionError>;
