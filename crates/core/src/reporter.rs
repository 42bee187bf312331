//! Progress and run-log reporting.
//!
//! Every record transition and engine lifecycle event is appended to a
//! per-run JSON-lines file and mirrored to `tracing`. The file is the only
//! durable trace a run leaves behind.

use crate::discovery::DiscoveryPlan;
use crate::error::Result;
use crate::model::{BatchSummary, ConversionProgress, ConversionRecord, ConversionStatus};
use crate::orchestrator::BatchState;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Kind of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunFinished,
    RunCancelled,
    RunAborted,
    FileSkipped,
    FileSucceeded,
    FileFailed,
    FileNotAttempted,
    FolderFailed,
    FilenameWarning,
    FileRenamed,
    RenameFailed,
    EngineStarted,
    EngineRestarted,
    EngineHung,
    EngineTerminated,
    EngineStopped,
}

/// One line of the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl LogEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: Uuid::nil(),
            kind,
            path: None,
            outcome: None,
            reason: None,
            duration_ms: None,
            generation: None,
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Event for a resolved conversion record.
    pub fn for_record(record: &ConversionRecord) -> Self {
        let kind = match record.status {
            ConversionStatus::Succeeded => EventKind::FileSucceeded,
            ConversionStatus::Failed => EventKind::FileFailed,
            ConversionStatus::SkippedAlreadyConverted => EventKind::FileSkipped,
            ConversionStatus::NotAttempted | ConversionStatus::Pending => EventKind::FileNotAttempted,
        };
        let mut event = LogEvent::new(kind)
            .path(&record.source)
            .outcome(record.status.to_string())
            .duration(record.duration);
        event.reason = record.reason.clone();
        event
    }
}

/// File-backed sinks keep only per-kind counts; the file holds the events.
#[derive(Debug, Default)]
struct Sink {
    file: Option<File>,
    events: Option<Vec<LogEvent>>,
    counts: HashMap<EventKind, usize>,
}

/// Append-only log for one run.
#[derive(Debug)]
pub struct RunLog {
    run_id: Uuid,
    path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl RunLog {
    /// Create `docshift_<timestamp>.log` in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut attempt = 0u32;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("docshift_{}.log", stamp)
            } else {
                format!("docshift_{}_{}.log", stamp, attempt)
            };
            let path = dir.join(name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };

        info!("Writing run log to {:?}", path);
        Ok(Self {
            run_id: Uuid::new_v4(),
            path: Some(path),
            sink: Mutex::new(Sink {
                file: Some(file),
                ..Default::default()
            }),
        })
    }

    /// A log that keeps events in memory only.
    pub fn in_memory() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            path: None,
            sink: Mutex::new(Sink {
                events: Some(Vec::new()),
                ..Default::default()
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Location of the log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one event and mirror it to tracing.
    pub fn record(&self, mut event: LogEvent) {
        event.run_id = self.run_id;
        mirror(&event);

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = sink.file.as_mut() {
            let written = serde_json::to_string(&event)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(file, "{}", line))
                .and_then(|()| file.flush());
            if let Err(e) = written {
                error!("Failed to append to run log {:?}: {}", self.path, e);
            }
        }
        *sink.counts.entry(event.kind).or_insert(0) += 1;
        if let Some(events) = sink.events.as_mut() {
            events.push(event);
        }
    }

    /// Convenience for resolved records.
    pub fn record_conversion(&self, record: &ConversionRecord) {
        self.record(LogEvent::for_record(record));
    }

    /// Log a run that ends before any conversion: nothing pending, or the
    /// user declined to start. Records the plan's folder failures and
    /// skipped files between a start and a closing event of `kind`.
    pub fn record_idle_run(
        &self,
        plan: &DiscoveryPlan,
        target_extension: &str,
        kind: EventKind,
        reason: Option<&str>,
    ) {
        self.record(LogEvent::new(EventKind::RunStarted).path(&plan.root));
        for failure in &plan.folder_errors {
            self.record(
                LogEvent::new(EventKind::FolderFailed)
                    .path(&failure.path)
                    .reason(&failure.error),
            );
        }
        for file in &plan.skipped {
            self.record_conversion(&ConversionRecord::skipped(
                &file.path,
                file.output_path(target_extension),
            ));
        }

        let state = BatchState {
            skipped: plan.skipped.len(),
            ..Default::default()
        };
        let mut closing = LogEvent::new(kind)
            .path(&plan.root)
            .outcome(serde_json::to_string(&state).unwrap_or_default());
        if let Some(reason) = reason {
            closing = closing.reason(reason);
        }
        self.record(closing);
    }

    /// Snapshot of everything recorded so far. Always empty for a
    /// file-backed log; read the file instead.
    pub fn events(&self) -> Vec<LogEvent> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
            .unwrap_or_default()
    }

    /// Number of recorded events of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Number of events recorded so far, of any kind.
    pub fn total(&self) -> usize {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .values()
            .sum()
    }
}

fn mirror(event: &LogEvent) {
    let path = event
        .path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let reason = event.reason.as_deref().unwrap_or("");
    match event.kind {
        EventKind::FileFailed
        | EventKind::FolderFailed
        | EventKind::RenameFailed
        | EventKind::EngineHung
        | EventKind::RunAborted => {
            warn!(kind = ?event.kind, generation = event.generation, "{} {}", path, reason)
        }
        EventKind::FilenameWarning | EventKind::FileNotAttempted | EventKind::RunCancelled => {
            warn!(kind = ?event.kind, "{} {}", path, reason)
        }
        _ => info!(kind = ?event.kind, generation = event.generation, "{} {}", path, reason),
    }
}

/// Render a fixed-width progress bar.
pub fn render_bar(completed: usize, total: usize, width: usize) -> String {
    let fraction = if total == 0 {
        1.0
    } else {
        (completed as f64 / total as f64).min(1.0)
    };
    let filled = (width as f64 * fraction) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// One terminal line for a progress update.
pub fn format_progress(progress: &ConversionProgress) -> String {
    let name: String = progress.current_file.chars().take(50).collect();
    format!(
        "[{}] {}/{} - {:<50}",
        render_bar(progress.completed, progress.total_files, 40),
        progress.completed,
        progress.total_files,
        name
    )
}

/// Human-readable end-of-run summary.
pub fn format_summary(summary: &BatchSummary, log_path: Option<&Path>) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    let headline = if summary.aborted {
        "CONVERSION ABORTED"
    } else if summary.cancelled {
        "CONVERSION CANCELLED"
    } else {
        "CONVERSION COMPLETE"
    };
    out.push_str(headline);
    out.push('\n');
    out.push_str(&format!("Documents found:        {}\n", summary.total));
    out.push_str(&format!("Successfully converted: {}\n", summary.succeeded));
    out.push_str(&format!("Already converted:      {}\n", summary.skipped));
    out.push_str(&format!("Errors:                 {}\n", summary.failed));
    if summary.not_attempted > 0 {
        out.push_str(&format!("Not attempted:          {}\n", summary.not_attempted));
    }
    out.push_str(&format!("Engine restarts:        {}\n", summary.engine_restarts));
    out.push_str(&format!("Elapsed:                {:.1?}\n", summary.elapsed));

    for failed in &summary.failed_files {
        out.push_str(&format!("  ✗ {}: {}\n", failed.input_path.display(), failed.error));
    }
    for failed in &summary.sanitize_failures {
        out.push_str(&format!("  ✗ rename {}: {}\n", failed.input_path.display(), failed.error));
    }
    for folder in &summary.folder_failures {
        out.push_str(&format!("  ✗ folder {}: {}\n", folder.path.display(), folder.error));
    }
    if let Some(path) = log_path {
        out.push_str(&format!("\nLog file: {}\n", path.display()));
    }
    out.push_str(&rule);
    out
}
