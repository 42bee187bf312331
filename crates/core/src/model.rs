//! Data model shared by discovery, the orchestrator and the reporter.

use crate::error::{ConversionError, Result};
use crate::sanitizer::IssueKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A convertible document found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Canonical absolute path. This is the file's identity.
    pub path: PathBuf,
    /// Folder containing the file.
    pub parent: PathBuf,
    /// File name including extension.
    pub name: String,
    /// Size in bytes (summed over contents for package documents).
    pub size: u64,
    /// Filename issues detected by the sanitizer.
    pub issues: BTreeSet<IssueKind>,
}

impl SourceFile {
    /// Build a source file entry for `path`, which must already be canonical.
    pub fn new(path: PathBuf, size: u64, issues: BTreeSet<IssueKind>) -> Self {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            parent,
            name,
            size,
            issues,
        }
    }

    /// Sibling output path: same folder, same stem, `target_extension`.
    pub fn output_path(&self, target_extension: &str) -> PathBuf {
        self.path.with_extension(target_extension)
    }

    /// Where this file goes once converted.
    pub fn archive_path(&self, archive_dir_name: &str) -> PathBuf {
        self.parent.join(archive_dir_name).join(&self.name)
    }
}

/// Lifecycle status of one conversion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionStatus {
    Pending,
    Succeeded,
    Failed,
    SkippedAlreadyConverted,
    NotAttempted,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Pending => "pending",
            ConversionStatus::Succeeded => "succeeded",
            ConversionStatus::Failed => "failed",
            ConversionStatus::SkippedAlreadyConverted => "skipped-already-converted",
            ConversionStatus::NotAttempted => "not-attempted",
        };
        f.write_str(s)
    }
}

/// Audit record for one source file. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub source: PathBuf,
    pub output: PathBuf,
    pub status: ConversionStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub duration: Duration,
}

impl ConversionRecord {
    /// Open a pending record.
    pub fn pending(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            status: ConversionStatus::Pending,
            timestamp: Utc::now(),
            reason: None,
            duration: Duration::ZERO,
        }
    }

    /// A record resolved as already converted at discovery time.
    pub fn skipped(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let mut record = Self::pending(source, output);
        record.status = ConversionStatus::SkippedAlreadyConverted;
        record
    }

    /// Resolve the record. Fails if it already left `Pending`.
    pub fn resolve(
        &mut self,
        status: ConversionStatus,
        reason: Option<String>,
        duration: Duration,
    ) -> Result<()> {
        if self.status != ConversionStatus::Pending {
            return Err(ConversionError::InvalidTransition {
                path: self.source.clone(),
                from: self.status,
            });
        }
        if status == ConversionStatus::Pending {
            return Err(ConversionError::InvalidTransition {
                path: self.source.clone(),
                from: self.status,
            });
        }
        self.status = status;
        self.reason = reason;
        self.duration = duration;
        self.timestamp = Utc::now();
        Ok(())
    }

    pub fn succeed(&mut self, duration: Duration) -> Result<()> {
        self.resolve(ConversionStatus::Succeeded, None, duration)
    }

    pub fn fail(&mut self, reason: impl Into<String>, duration: Duration) -> Result<()> {
        self.resolve(ConversionStatus::Failed, Some(reason.into()), duration)
    }
}

/// A file that failed, with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub input_path: PathBuf,
    pub error: String,
}

/// A folder that could not be traversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Source files found, pending and skipped together.
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    /// Planned and failure-driven engine restarts.
    pub engine_restarts: u32,
    pub elapsed: Duration,
    pub failed_files: Vec<FailedFile>,
    pub folder_failures: Vec<FolderFailure>,
    pub sanitize_failures: Vec<FailedFile>,
    pub records: Vec<ConversionRecord>,
    pub cancelled: bool,
    pub aborted: bool,
}

impl BatchSummary {
    /// True when every pending file succeeded or was legitimately skipped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
            && self.not_attempted == 0
            && !self.cancelled
            && !self.aborted
            && self.folder_failures.is_empty()
            && self.sanitize_failures.is_empty()
    }

    /// Records with the given status.
    pub fn records_with(&self, status: ConversionStatus) -> impl Iterator<Item = &ConversionRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }
}

/// Stage of a file within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStage {
    /// Handed to the engine.
    Converting,
    /// Converted and archived.
    Completed,
    /// Failed with error.
    Failed,
}

/// Progress information passed to run callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProgress {
    /// Index of the current pending file.
    pub file_index: usize,
    /// Total files in the run, skipped ones included.
    pub total_files: usize,
    /// succeeded + failed + skipped so far.
    pub completed: usize,
    /// Name of the current file.
    pub current_file: String,
    pub stage: ConversionStage,
}

impl ConversionProgress {
    /// Fraction of the run that is done, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_files == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total_files as f64).min(1.0)
        }
    }
}
