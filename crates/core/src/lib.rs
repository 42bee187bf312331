//! # docshift-core
//!
//! Batch conversion of word-processor documents through a scriptable
//! desktop application that leaks memory and occasionally hangs.
//!
//! The library walks a folder tree, converts each pending document one at a
//! time, moves converted originals into a per-folder archive directory and
//! keeps the external application healthy by restarting it on a schedule and
//! killing it when it stops responding. Re-running over the same tree only
//! picks up work that is still missing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshift_core::{ConverterConfig, Orchestrator, RunLog};
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Restart the application every 5 files, 5 files per chunk
//!     let config = ConverterConfig::new(5, 5);
//!     let log = Arc::new(RunLog::create(&config.batch.resolved_log_dir())?);
//!     let mut orchestrator = Orchestrator::with_script_bridge(config, log)?;
//!
//!     let summary = orchestrator
//!         .run(Path::new("/Users/me/Documents"), &CancellationToken::new())
//!         .await?;
//!
//!     println!("{} converted, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Checking file names
//!
//! ```rust,no_run
//! use docshift_core::{BatchConfig, RenameMode, Sanitizer};
//! use std::path::Path;
//!
//! let report = Sanitizer::new()
//!     .run(Path::new("/Users/me/Documents"), &BatchConfig::default(), RenameMode::DryRun)?;
//! for entry in &report.entries {
//!     println!("{} -> {}", entry.from.display(), entry.to.display());
//! }
//! # Ok::<(), docshift_core::ConversionError>(())
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod reporter;
pub mod sanitizer;

// Re-export main types for convenience
pub use config::{BatchConfig, ConverterConfig, EngineConfig, SanitizeMode};
pub use discovery::{discover, DiscoveryPlan};
pub use engine::{ConversionEngine, ScriptBridgeEngine};
pub use error::{ConversionError, Result};
pub use lifecycle::{EngineHandle, EngineState, EngineSupervisor};
pub use model::{
    BatchSummary, ConversionProgress, ConversionRecord, ConversionStage, ConversionStatus,
    FailedFile, FolderFailure, SourceFile,
};
pub use orchestrator::{BatchState, Orchestrator};
pub use reporter::{format_progress, format_summary, EventKind, LogEvent, RunLog};
pub use sanitizer::{
    sanitize_name, scan_name, IssueKind, RenameEntry, RenameMode, RenameOutcome, RenameReport,
    Sanitizer,
};

/// Initialize logging. `RUST_LOG` wins over `default_filter` when set.
/// Call this once at application startup if you want to see logs.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
