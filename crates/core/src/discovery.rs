//! Work discovery.
//!
//! Walks a folder tree in lexical order and splits the convertible files into
//! pending work and files whose output already exists. Pending work is
//! derived from filesystem state alone, so an interrupted run is resumed by
//! simply running again.

use crate::config::BatchConfig;
use crate::error::{ConversionError, Result};
use crate::model::{FolderFailure, SourceFile};
use crate::sanitizer;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Discovery result for one root folder.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryPlan {
    /// Canonical root that was walked.
    pub root: PathBuf,
    /// Files still to convert, in walk order.
    pub pending: Vec<SourceFile>,
    /// Files whose output already exists.
    pub skipped: Vec<SourceFile>,
    /// Folders that could not be read.
    pub folder_errors: Vec<FolderFailure>,
}

impl DiscoveryPlan {
    /// Pending and skipped together.
    pub fn total(&self) -> usize {
        self.pending.len() + self.skipped.len()
    }
}

/// Collect source paths under `root` in deterministic order.
///
/// Hidden entries, archive folders and the insides of package documents are
/// never visited. Unreadable folders are reported and the walk continues.
pub(crate) fn walk_sources(
    root: &Path,
    config: &BatchConfig,
) -> Result<(Vec<PathBuf>, Vec<FolderFailure>)> {
    if !root.is_dir() {
        return Err(ConversionError::RootNotFound(root.to_path_buf()));
    }

    let mut sources = Vec::new();
    let mut failures = Vec::new();
    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!("Cannot read folder {:?}: {}", path, e);
                failures.push(FolderFailure {
                    path,
                    error: e.to_string(),
                });
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        let name = entry.file_name().to_string_lossy();

        if name.starts_with('.') {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if is_dir && name == config.archive_dir_name.as_str() {
            debug!("Skipping archive folder {:?}", entry.path());
            walker.skip_current_dir();
            continue;
        }

        let is_source = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| config.is_source_extension(e));
        if is_source {
            // Package documents are directories; treat them as one file.
            if is_dir {
                walker.skip_current_dir();
            }
            sources.push(entry.into_path());
        }
    }

    Ok((sources, failures))
}

/// Size of a file, or the summed size of a package directory.
fn entry_size(path: &Path) -> u64 {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum(),
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}

/// Whether a usable output already sits next to the source.
fn already_converted(output: &Path) -> bool {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => true,
        Ok(_) => {
            warn!(
                "Found empty output {:?}, treating the source as not converted",
                output
            );
            false
        }
        Err(_) => false,
    }
}

/// Discover pending and already-converted source files under `root`.
pub fn discover(root: &Path, config: &BatchConfig) -> Result<DiscoveryPlan> {
    let root = root
        .canonicalize()
        .map_err(|_| ConversionError::RootNotFound(root.to_path_buf()))?;
    let (sources, folder_errors) = walk_sources(&root, config)?;

    let mut plan = DiscoveryPlan {
        root,
        folder_errors,
        ..Default::default()
    };

    for path in sources {
        let size = entry_size(&path);
        let issues = sanitizer::scan(&path);
        let source = SourceFile::new(path, size, issues);

        if already_converted(&source.output_path(&config.target_extension)) {
            debug!("Skipping (already converted): {}", source.name);
            plan.skipped.push(source);
        } else {
            plan.pending.push(source);
        }
    }

    info!(
        "Found {} {} documents under {:?}: {} pending, {} already converted",
        plan.total(),
        config.source_extension,
        plan.root,
        plan.pending.len(),
        plan.skipped.len()
    );

    Ok(plan)
}
