//! Filename sanitizer.
//!
//! Detects names the scripting bridge or the filesystem chokes on and
//! rewrites them to a safe form. [`scan`] and [`sanitize_name`] are pure;
//! [`Sanitizer`] adds per-folder collision resolution and the rename pass.

use crate::config::BatchConfig;
use crate::discovery;
use crate::error::{ConversionError, Result};
use crate::model::FolderFailure;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SEPARATORS: &[char] = &['\\', '/'];
const RESERVED: &[char] = &[':', '*', '?', '<', '>', '|', '"'];
const EMPTY_STEM: &str = "untitled";

/// Kinds of unsafe filename patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// Backslash or slash inside the name.
    PathSeparator,
    /// `: * ? < > | "`
    ReservedPunctuation,
    /// Tabs, newlines and other control characters.
    ControlCharacter,
    /// Whitespace right before the extension.
    TrailingWhitespace,
    LeadingWhitespace,
    ConsecutiveWhitespace,
    /// Name is not valid UTF-8.
    NonUtf8,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::PathSeparator => "path separator",
            IssueKind::ReservedPunctuation => "reserved punctuation",
            IssueKind::ControlCharacter => "control character",
            IssueKind::TrailingWhitespace => "trailing space before extension",
            IssueKind::LeadingWhitespace => "leading space",
            IssueKind::ConsecutiveWhitespace => "consecutive spaces",
            IssueKind::NonUtf8 => "invalid UTF-8",
        };
        f.write_str(s)
    }
}

/// Split a file name into stem and extension. Only a plain alphanumeric
/// suffix counts as an extension, so a mangled suffix is sanitized as stem.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx + 1..];
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&name[..idx], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

fn join_name(stem: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Issues in a bare file name.
pub fn scan_name(name: &str) -> BTreeSet<IssueKind> {
    let mut issues = BTreeSet::new();
    let (stem, _) = split_name(name);

    if stem.contains(SEPARATORS) {
        issues.insert(IssueKind::PathSeparator);
    }
    if stem.contains(RESERVED) {
        issues.insert(IssueKind::ReservedPunctuation);
    }
    if stem.chars().any(char::is_control) {
        issues.insert(IssueKind::ControlCharacter);
    }
    if stem.ends_with(char::is_whitespace) {
        issues.insert(IssueKind::TrailingWhitespace);
    }
    if stem.starts_with(char::is_whitespace) {
        issues.insert(IssueKind::LeadingWhitespace);
    }
    let mut prev_ws = false;
    for c in stem.chars() {
        let ws = c.is_whitespace();
        if ws && prev_ws {
            issues.insert(IssueKind::ConsecutiveWhitespace);
            break;
        }
        prev_ws = ws;
    }
    issues
}

/// Issues in the final component of `path`. Pure.
pub fn scan(path: &Path) -> BTreeSet<IssueKind> {
    let Some(name) = path.file_name() else {
        return BTreeSet::new();
    };
    match name.to_str() {
        Some(name) => scan_name(name),
        None => {
            let mut issues = scan_name(&name.to_string_lossy());
            issues.insert(IssueKind::NonUtf8);
            issues
        }
    }
}

/// Rewrite a file name into its safe form, preserving the extension.
/// `scan_name(&sanitize_name(n))` is always empty.
pub fn sanitize_name(name: &str) -> String {
    // Cleaning a mangled suffix can expose a real extension, and with it a
    // new stem to trim; repeat until nothing changes.
    let mut current = clean_once(name);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_once(name: &str) -> String {
    let (stem, ext) = split_name(name);

    let mapped: String = stem
        .chars()
        .map(|c| {
            if SEPARATORS.contains(&c) {
                '-'
            } else if RESERVED.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    let mut chars = mapped.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            collapsed.push(' ');
        } else {
            collapsed.push(c);
        }
    }

    let trimmed = collapsed.trim();
    let stem = if trimmed.is_empty() { EMPTY_STEM } else { trimmed };
    join_name(stem, ext)
}

/// How a rename pass treats the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenameMode {
    /// Report intended renames only.
    DryRun,
    /// Perform them.
    Apply,
}

/// What happened to one file during a rename pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenameOutcome {
    Planned,
    Renamed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameEntry {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Existing converted output that moves together with the source.
    pub output: Option<(PathBuf, PathBuf)>,
    pub issues: BTreeSet<IssueKind>,
    pub outcome: RenameOutcome,
}

/// Result of [`Sanitizer::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameReport {
    /// Source files looked at.
    pub scanned: usize,
    /// One entry per file with issues.
    pub entries: Vec<RenameEntry>,
    pub folder_failures: Vec<FolderFailure>,
}

impl RenameReport {
    pub fn renamed(&self) -> impl Iterator<Item = &RenameEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome == RenameOutcome::Renamed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RenameEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, RenameOutcome::Failed(_)))
    }
}

/// Stateful rewriter that keeps track of names claimed per folder, so two
/// files sanitized to the same name in one pass never collide.
#[derive(Debug, Default)]
pub struct Sanitizer {
    /// Lowercased names per folder; the target filesystem may be case-insensitive.
    taken: HashMap<PathBuf, HashSet<String>>,
    /// Extension of the sibling output a candidate name must also leave free.
    output_extension: Option<String>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reserve `<stem>.<extension>` for every rewritten name, so a renamed
    /// source never lands next to an output that belongs to another file.
    pub fn output_extension(mut self, extension: impl Into<String>) -> Self {
        self.output_extension = Some(extension.into());
        self
    }

    fn output_name(&self, name: &str) -> Option<String> {
        let ext = self.output_extension.as_deref()?;
        Some(Path::new(name).with_extension(ext).to_string_lossy().to_lowercase())
    }

    fn taken_in(&mut self, dir: &Path) -> Result<&mut HashSet<String>> {
        match self.taken.entry(dir.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut names = HashSet::new();
                for item in std::fs::read_dir(dir)? {
                    names.insert(item?.file_name().to_string_lossy().to_lowercase());
                }
                Ok(entry.insert(names))
            }
        }
    }

    /// Sanitized, collision-free path for `path`. A clean name is returned
    /// unchanged. The chosen name is reserved for the rest of this pass.
    pub fn rewrite(&mut self, path: &Path) -> Result<PathBuf> {
        let Some(file_name) = path.file_name() else {
            return Ok(path.to_path_buf());
        };
        let original = file_name.to_string_lossy();
        let clean = sanitize_name(&original);
        if clean == original && file_name.to_str().is_some() {
            return Ok(path.to_path_buf());
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let (stem, ext) = split_name(&clean);
        let mut candidate = clean.clone();
        let mut counter = 1u32;
        loop {
            let output = self.output_name(&candidate);
            let taken = self.taken_in(parent)?;
            let free = !taken.contains(&candidate.to_lowercase())
                && output.as_ref().map_or(true, |o| !taken.contains(o));
            if free {
                taken.insert(candidate.to_lowercase());
                if let Some(output) = output {
                    taken.insert(output);
                }
                return Ok(parent.join(candidate));
            }
            candidate = join_name(&format!("{}_{}", stem, counter), ext);
            counter += 1;
        }
    }

    /// Rename a single file. Never overwrites.
    fn rename(from: &Path, to: &Path) -> Result<()> {
        if to.symlink_metadata().is_ok() {
            return Err(ConversionError::RenameFailed {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                message: "target already exists".to_string(),
            });
        }
        std::fs::rename(from, to).map_err(|e| ConversionError::RenameFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Rename a source and, if present, its converted output. The source is
    /// moved back when the output cannot follow.
    fn rename_with_output(
        from: &Path,
        to: &Path,
        output: Option<&(PathBuf, PathBuf)>,
    ) -> Result<()> {
        Self::rename(from, to)?;
        if let Some((output_from, output_to)) = output {
            if let Err(e) = Self::rename(output_from, output_to) {
                if let Err(undo) = std::fs::rename(to, from) {
                    warn!("Could not move {:?} back to {:?}: {}", to, from, undo);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Scan every source file under `root` and rename the unsafe ones
    /// according to `mode`. Per-file failures are reported, never raised.
    /// An existing converted output is renamed along with its source.
    pub fn run(&mut self, root: &Path, config: &BatchConfig, mode: RenameMode) -> Result<RenameReport> {
        self.output_extension = Some(config.target_extension.clone());
        let (sources, folder_failures) = discovery::walk_sources(root, config)?;
        let mut report = RenameReport {
            scanned: sources.len(),
            folder_failures,
            ..Default::default()
        };

        for source in sources {
            let issues = scan(&source);
            if issues.is_empty() {
                continue;
            }

            let existing_output = source.with_extension(&config.target_extension);
            let has_output = existing_output.symlink_metadata().is_ok();

            let (to, output, outcome) = match self.rewrite(&source) {
                Ok(to) => {
                    let output = has_output
                        .then(|| (existing_output, to.with_extension(&config.target_extension)));
                    let outcome = match mode {
                        RenameMode::DryRun => RenameOutcome::Planned,
                        RenameMode::Apply => {
                            match Self::rename_with_output(&source, &to, output.as_ref()) {
                                Ok(()) => {
                                    info!("Renamed {:?} -> {:?}", source, to.file_name());
                                    RenameOutcome::Renamed
                                }
                                Err(e) => {
                                    warn!("{}", e);
                                    RenameOutcome::Failed(e.to_string())
                                }
                            }
                        }
                    };
                    (to, output, outcome)
                }
                Err(e) => {
                    warn!("Cannot sanitize {:?}: {}", source, e);
                    (source.clone(), None, RenameOutcome::Failed(e.to_string()))
                }
            };
            debug!("{:?} issues {:?} -> {:?}", source, issues, outcome);

            report.entries.push(RenameEntry {
                from: source,
                to,
                output,
                issues,
                outcome,
            });
        }

        Ok(report)
    }
}
