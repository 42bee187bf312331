//! Batch orchestrator that ties discovery, the sanitizer and the engine
//! supervisor together.
//!
//! Files are converted strictly one at a time. A failing file is recorded and
//! skipped past; only a persistently broken engine aborts the batch.

use crate::config::{BatchConfig, ConverterConfig, SanitizeMode};
use crate::discovery;
use crate::engine::{ConversionEngine, ScriptBridgeEngine};
use crate::error::{ConversionError, Result};
use crate::lifecycle::EngineSupervisor;
use crate::model::{
    BatchSummary, ConversionProgress, ConversionRecord, ConversionStage, ConversionStatus,
    FailedFile, SourceFile,
};
use crate::reporter::{EventKind, LogEvent, RunLog};
use crate::sanitizer::{RenameMode, RenameOutcome, Sanitizer};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run counters. Created fresh by every run and discarded at the end,
/// after its final snapshot is logged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchState {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub conversions_since_restart: u32,
    pub current_folder: Option<PathBuf>,
}

impl BatchState {
    /// Files that reached a final state.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    fn count(&mut self, status: ConversionStatus) {
        match status {
            ConversionStatus::Succeeded => {
                self.attempted += 1;
                self.succeeded += 1;
            }
            ConversionStatus::Failed => {
                self.attempted += 1;
                self.failed += 1;
            }
            ConversionStatus::SkippedAlreadyConverted => self.skipped += 1,
            ConversionStatus::NotAttempted => self.not_attempted += 1,
            ConversionStatus::Pending => {}
        }
    }
}

/// Main batch driver.
pub struct Orchestrator<E: ConversionEngine> {
    config: ConverterConfig,
    supervisor: EngineSupervisor<E>,
    log: Arc<RunLog>,
}

impl Orchestrator<ScriptBridgeEngine> {
    /// Orchestrator backed by the real scripting bridge.
    pub fn with_script_bridge(config: ConverterConfig, log: Arc<RunLog>) -> Result<Self> {
        let engine = ScriptBridgeEngine::new(config.engine.clone())?;
        Self::new(config, engine, log)
    }
}

impl<E: ConversionEngine> Orchestrator<E> {
    /// Create an orchestrator around any engine.
    pub fn new(config: ConverterConfig, engine: E, log: Arc<RunLog>) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing orchestrator with batch_size={}, restart_threshold={}, timeout={:?}",
            config.batch.batch_size, config.engine.restart_threshold, config.engine.conversion_timeout
        );
        let supervisor = EngineSupervisor::new(engine, config.engine.clone(), Arc::clone(&log));
        Ok(Self {
            config,
            supervisor,
            log,
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &EngineSupervisor<E> {
        &self.supervisor
    }

    pub fn log(&self) -> &Arc<RunLog> {
        &self.log
    }

    /// Use a different run log from now on.
    pub fn set_log(&mut self, log: Arc<RunLog>) {
        self.supervisor.set_log(Arc::clone(&log));
        self.log = log;
    }

    /// Convert everything pending under `root`.
    pub async fn run(&mut self, root: &Path, cancel: &CancellationToken) -> Result<BatchSummary> {
        self.run_with_progress(root, cancel, |_| {}).await
    }

    /// Convert everything pending under `root`, reporting progress per file.
    pub async fn run_with_progress<F>(
        &mut self,
        root: &Path,
        cancel: &CancellationToken,
        progress_callback: F,
    ) -> Result<BatchSummary>
    where
        F: Fn(ConversionProgress) + Send + Sync,
    {
        let start = Instant::now();
        let batch = self.config.batch.clone();
        let root = root
            .canonicalize()
            .map_err(|_| ConversionError::RootNotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(ConversionError::RootNotFound(root));
        }

        info!("Starting {} to {} conversion", batch.source_extension, batch.target_extension);
        info!("Target directory: {:?}", root);
        self.log
            .record(LogEvent::new(EventKind::RunStarted).path(&root));
        self.supervisor.reset();

        let mut summary = BatchSummary::default();
        let mut state = BatchState::default();

        let excluded = match batch.sanitize {
            SanitizeMode::Apply => self.sanitize(&root, &batch, &mut summary)?,
            _ => HashSet::new(),
        };

        let plan = discovery::discover(&root, &batch)?;

        for failure in plan.folder_errors {
            self.log.record(
                LogEvent::new(EventKind::FolderFailed)
                    .path(&failure.path)
                    .reason(&failure.error),
            );
            summary.folder_failures.push(failure);
        }

        for file in &plan.skipped {
            info!("Skipping (already converted): {}", file.name);
            let record =
                ConversionRecord::skipped(&file.path, file.output_path(&batch.target_extension));
            self.log.record_conversion(&record);
            state.count(record.status);
            summary.records.push(record);
        }

        let pending: Vec<SourceFile> = plan
            .pending
            .into_iter()
            .filter(|f| !excluded.contains(&f.path))
            .collect();

        if batch.sanitize == SanitizeMode::Warn {
            for file in pending.iter().filter(|f| !f.issues.is_empty()) {
                let issues: Vec<String> = file.issues.iter().map(|i| i.to_string()).collect();
                self.log.record(
                    LogEvent::new(EventKind::FilenameWarning)
                        .path(&file.path)
                        .reason(issues.join(", ")),
                );
            }
        }

        let total_files = pending.len() + state.skipped;
        summary.total = total_files;
        info!("To be converted: {}", pending.len());

        let mut next_index = 0;
        let mut stop_reason: Option<String> = None;

        if !pending.is_empty() {
            let chunk_count = pending.len().div_ceil(batch.batch_size);

            'chunks: for (chunk_index, chunk) in pending.chunks(batch.batch_size).enumerate() {
                debug!("Chunk {}/{}", chunk_index + 1, chunk_count);

                for file in chunk {
                    if cancel.is_cancelled() {
                        summary.cancelled = true;
                        stop_reason = Some("cancelled".to_string());
                        break 'chunks;
                    }

                    if state.current_folder.as_deref() != Some(file.parent.as_path()) {
                        debug!("Entering folder {:?}", file.parent);
                        state.current_folder = Some(file.parent.clone());
                    }

                    progress_callback(ConversionProgress {
                        file_index: next_index,
                        total_files,
                        completed: state.completed(),
                        current_file: file.name.clone(),
                        stage: ConversionStage::Converting,
                    });

                    let record = self.convert_file(file, &batch).await;
                    self.log.record_conversion(&record);
                    state.count(record.status);
                    if record.status == ConversionStatus::Failed {
                        summary.failed_files.push(FailedFile {
                            input_path: record.source.clone(),
                            error: record.reason.clone().unwrap_or_default(),
                        });
                    }

                    progress_callback(ConversionProgress {
                        file_index: next_index,
                        total_files,
                        completed: state.completed(),
                        current_file: file.name.clone(),
                        stage: if record.status == ConversionStatus::Succeeded {
                            ConversionStage::Completed
                        } else {
                            ConversionStage::Failed
                        },
                    });

                    summary.records.push(record);
                    next_index += 1;

                    self.supervisor.record_conversion().await;
                    state.conversions_since_restart = self.supervisor.conversions_since_restart();

                    if self.supervisor.failure_limit_reached() {
                        let err = self.supervisor.unusable_error();
                        error!("Aborting batch: {}", err);
                        summary.aborted = true;
                        stop_reason = Some(err.to_string());
                        break 'chunks;
                    }

                    if !batch.settle_between_files.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(batch.settle_between_files) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                }

                if batch.restart_at_chunk_boundary && chunk_index + 1 < chunk_count {
                    self.supervisor.restart("chunk boundary").await;
                }
            }
        }

        let reason = stop_reason.unwrap_or_else(|| "not reached".to_string());
        for file in &pending[next_index..] {
            let mut record =
                ConversionRecord::pending(&file.path, file.output_path(&batch.target_extension));
            if let Err(e) = record.resolve(
                ConversionStatus::NotAttempted,
                Some(reason.clone()),
                std::time::Duration::ZERO,
            ) {
                warn!("{}", e);
            }
            self.log.record_conversion(&record);
            state.count(record.status);
            summary.records.push(record);
        }

        self.supervisor.shutdown().await;
        state.conversions_since_restart = 0;

        summary.attempted = state.attempted;
        summary.succeeded = state.succeeded;
        summary.failed = state.failed;
        summary.skipped = state.skipped;
        summary.not_attempted = state.not_attempted;
        summary.engine_restarts = self.supervisor.restarts();
        summary.elapsed = start.elapsed();

        let kind = if summary.aborted {
            EventKind::RunAborted
        } else if summary.cancelled {
            EventKind::RunCancelled
        } else {
            EventKind::RunFinished
        };
        self.log.record(
            LogEvent::new(kind)
                .path(&root)
                .outcome(serde_json::to_string(&state).unwrap_or_default())
                .duration(summary.elapsed),
        );

        info!(
            "Run finished: {} succeeded, {} failed, {} skipped, {} not attempted in {:?}",
            summary.succeeded, summary.failed, summary.skipped, summary.not_attempted, summary.elapsed
        );
        Ok(summary)
    }

    /// Rename unsafe files before discovery. Returns the paths that could not
    /// be renamed; they are left out of the batch.
    fn sanitize(
        &self,
        root: &Path,
        batch: &BatchConfig,
        summary: &mut BatchSummary,
    ) -> Result<HashSet<PathBuf>> {
        let report = Sanitizer::new().run(root, batch, RenameMode::Apply)?;
        let mut excluded = HashSet::new();

        for entry in report.entries {
            match entry.outcome {
                RenameOutcome::Renamed => {
                    self.log.record(
                        LogEvent::new(EventKind::FileRenamed)
                            .path(&entry.from)
                            .outcome(entry.to.to_string_lossy()),
                    );
                    if let Some((ref from, ref to)) = entry.output {
                        self.log.record(
                            LogEvent::new(EventKind::FileRenamed)
                                .path(from)
                                .outcome(to.to_string_lossy()),
                        );
                    }
                }
                RenameOutcome::Failed(reason) => {
                    self.log.record(
                        LogEvent::new(EventKind::RenameFailed)
                            .path(&entry.from)
                            .reason(&reason),
                    );
                    summary.sanitize_failures.push(FailedFile {
                        input_path: entry.from.clone(),
                        error: reason,
                    });
                    excluded.insert(entry.from);
                }
                RenameOutcome::Planned => {}
            }
        }

        Ok(excluded)
    }

    /// Convert one file and archive the original. Never fails the batch.
    async fn convert_file(&mut self, file: &SourceFile, batch: &BatchConfig) -> ConversionRecord {
        let output = file.output_path(&batch.target_extension);
        let mut record = ConversionRecord::pending(&file.path, &output);
        let start = Instant::now();

        let result = match self.supervisor.convert(&file.path, &output).await {
            Ok(()) => archive(file, &batch.archive_dir_name),
            Err(e) => Err(e),
        };

        let resolved = match result {
            Ok(dest) => {
                info!("✓ Converted: {} (original moved to {:?})", file.name, dest);
                record.succeed(start.elapsed())
            }
            Err(e) => {
                if e.is_engine_failure() {
                    error!("✗ Failed to convert {}: {}", file.name, e);
                } else {
                    // Output was written; the original needs manual review.
                    warn!("✗ Converted {} but could not archive it: {}", file.name, e);
                }
                record.fail(e.to_string(), start.elapsed())
            }
        };
        if let Err(e) = resolved {
            warn!("{}", e);
        }
        record
    }
}

/// Move a converted original into its folder's archive directory, creating
/// the directory on first use. Never overwrites.
fn archive(file: &SourceFile, archive_dir_name: &str) -> Result<PathBuf> {
    let dest = file.archive_path(archive_dir_name);
    if dest.symlink_metadata().is_ok() {
        return Err(ConversionError::ArchiveConflict(dest));
    }
    let archive_dir = file.parent.join(archive_dir_name);
    std::fs::create_dir_all(&archive_dir).map_err(|e| ConversionError::ArchiveFailed {
        path: file.path.clone(),
        message: e.to_string(),
    })?;
    std::fs::rename(&file.path, &dest).map_err(|e| ConversionError::ArchiveFailed {
        path: file.path.clone(),
        message: e.to_string(),
    })?;
    Ok(dest)
}
