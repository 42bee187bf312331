//! Integration tests for docshift-core.
//!
//! The real scripting bridge only exists on macOS, so these tests drive the
//! orchestrator with an in-process engine that writes output files itself and
//! can be told to fail or hang based on the document name.
//!
//! Run with: cargo test --package docshift-core --test integration_tests

use async_trait::async_trait;
use docshift_core::{
    BatchConfig, ConversionEngine, ConversionError, ConversionProgress, ConversionStatus,
    ConverterConfig, EngineConfig, EngineState, EventKind, Orchestrator, Result, RunLog,
    SanitizeMode,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the fake engine saw, shared with the test body.
#[derive(Default)]
struct Ledger {
    launches: AtomicU32,
    quits: AtomicU32,
    kills: AtomicU32,
    converted: Mutex<Vec<PathBuf>>,
    /// Conversions served by each launched instance, in launch order.
    served: Mutex<Vec<u32>>,
}

impl Ledger {
    fn converted(&self) -> Vec<PathBuf> {
        self.converted.lock().unwrap().clone()
    }

    fn max_served(&self) -> u32 {
        self.served.lock().unwrap().iter().copied().max().unwrap_or(0)
    }
}

/// Fails documents named "*fail*", hangs on "*hang*", converts the rest.
#[derive(Clone, Default)]
struct FakeEngine {
    ledger: Arc<Ledger>,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    fn name(&self) -> &str {
        "FakePages"
    }

    async fn launch(&self) -> Result<()> {
        self.ledger.launches.fetch_add(1, Ordering::SeqCst);
        self.ledger.served.lock().unwrap().push(0);
        Ok(())
    }

    async fn convert(&self, source: &Path, output: &Path) -> Result<()> {
        let name = source.file_name().unwrap().to_string_lossy().to_string();
        if name.contains("hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if name.contains("fail") {
            return Err(ConversionError::ConversionFailed {
                path: source.to_path_buf(),
                message: "ERROR -1708: document could not be exported".to_string(),
            });
        }

        fs::write(output, b"PK converted")?;
        if let Some(last) = self.ledger.served.lock().unwrap().last_mut() {
            *last += 1;
        }
        let done = {
            let mut converted = self.ledger.converted.lock().unwrap();
            converted.push(source.to_path_buf());
            converted.len()
        };
        if let Some((after, ref token)) = self.cancel_after {
            if done >= after {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.ledger.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.ledger.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> ConverterConfig {
    ConverterConfig {
        engine: EngineConfig::default()
            .conversion_timeout(Duration::from_millis(200))
            .settle(Duration::ZERO, Duration::ZERO),
        batch: BatchConfig::default().settle_between_files(Duration::ZERO),
    }
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"pages document").unwrap();
}

fn orchestrator(config: ConverterConfig, engine: FakeEngine) -> Orchestrator<FakeEngine> {
    Orchestrator::new(config, engine, Arc::new(RunLog::in_memory())).unwrap()
}

#[tokio::test]
async fn test_end_to_end_sanitize_convert_archive() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    touch(&root.join("A.pages"));
    touch(&root.join("B :bad.pages"));
    touch(&root.join("C.pages"));
    fs::write(root.join("C.docx"), b"earlier export").unwrap();

    let mut config = test_config();
    config.batch = config.batch.sanitize(SanitizeMode::Apply);
    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());

    let summary = orch.run(root, &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.is_clean());

    assert!(root.join("A.docx").exists());
    assert!(root.join("B bad.docx").exists());
    assert!(root.join("pages/A.pages").exists());
    assert!(root.join("pages/B bad.pages").exists());
    assert!(!root.join("A.pages").exists());
    assert!(!root.join("B :bad.pages").exists());
    assert!(root.join("C.pages").exists());
    assert_eq!(fs::read(root.join("C.docx")).unwrap(), b"earlier export");

    let log = orch.log();
    assert_eq!(log.count(EventKind::FileRenamed), 1);
    assert_eq!(log.count(EventKind::FileSucceeded), 2);
    assert_eq!(log.count(EventKind::FileSkipped), 1);
    assert_eq!(log.count(EventKind::FileFailed), 0);
    assert_eq!(log.count(EventKind::RunFinished), 1);
    assert_eq!(orch.supervisor().state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_second_run_converts_nothing() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("A.pages"));
    touch(&dir.path().join("sub/B.pages"));

    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let first = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();
    assert_eq!(first.succeeded, 2);
    let launches = engine.ledger.launches.load(Ordering::SeqCst);

    let second = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();
    assert_eq!(second.attempted, 0);
    assert_eq!(second.total, 0);
    assert_eq!(engine.ledger.converted().len(), 2);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), launches);
}

#[tokio::test]
async fn test_unarchived_originals_are_skipped_on_rerun() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("A.pages"));
    fs::write(dir.path().join("A.docx"), b"from an interrupted run").unwrap();

    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.attempted, 0);
    assert!(engine.ledger.converted().is_empty());
}

#[tokio::test]
async fn test_empty_folder_never_starts_engine() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.txt"), b"not a document").unwrap();

    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(summary.succeeded + summary.failed + summary.skipped, 0);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 0);
    assert_eq!(orch.supervisor().state(), EngineState::Stopped);
    assert!(!dir.path().join("pages").exists());
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let mut orch = orchestrator(test_config(), FakeEngine::default());
    let result = orch
        .run(Path::new("/definitely/not/here"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ConversionError::RootNotFound(_))));
}

#[tokio::test]
async fn test_failed_file_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));
    touch(&dir.path().join("b_fail.pages"));
    touch(&dir.path().join("c.pages"));

    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_clean());
    assert_eq!(summary.failed_files.len(), 1);
    assert!(summary.failed_files[0].error.contains("-1708"));

    // The failed original stays where it was, without output.
    assert!(dir.path().join("b_fail.pages").exists());
    assert!(!dir.path().join("b_fail.docx").exists());
    assert!(dir.path().join("pages/c.pages").exists());
    assert!(engine.ledger.kills.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_archive_folder_only_created_on_success() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("ok/good.pages"));
    touch(&dir.path().join("bad/only_fail.pages"));

    let mut orch = orchestrator(test_config(), FakeEngine::default());
    orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert!(dir.path().join("ok/pages/good.pages").exists());
    assert!(!dir.path().join("bad/pages").exists());
}

#[tokio::test]
async fn test_hung_conversion_is_killed_and_batch_continues() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a_hang.pages"));
    touch(&dir.path().join("b.pages"));

    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    let failed: Vec<_> = summary.records_with(ConversionStatus::Failed).collect();
    assert!(failed[0].reason.as_deref().unwrap().contains("timed out"));
    assert_eq!(engine.ledger.kills.load(Ordering::SeqCst), 1);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 2);
    assert_eq!(orch.log().count(EventKind::EngineHung), 1);
}

#[tokio::test]
async fn test_no_instance_serves_more_than_threshold() {
    let dir = TempDir::new().unwrap();
    for i in 0..7 {
        touch(&dir.path().join(format!("doc{}.pages", i)));
    }

    let mut config = test_config();
    config.engine = config.engine.restart_threshold(3);
    config.batch = BatchConfig::with_batch_size(100)
        .settle_between_files(Duration::ZERO)
        .restart_at_chunk_boundary(false);

    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.succeeded, 7);
    assert_eq!(engine.ledger.max_served(), 3);
    assert_eq!(summary.engine_restarts, 2);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_chunk_boundaries_restart_engine() {
    let dir = TempDir::new().unwrap();
    for i in 0..6 {
        touch(&dir.path().join(format!("doc{}.pages", i)));
    }

    let mut config = test_config();
    config.engine = config.engine.restart_threshold(100);
    config.batch = BatchConfig::with_batch_size(2).settle_between_files(Duration::ZERO);

    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.succeeded, 6);
    // Three chunks, no restart after the last one.
    assert_eq!(summary.engine_restarts, 2);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 3);
    assert_eq!(engine.ledger.max_served(), 2);
}

#[tokio::test]
async fn test_consecutive_failures_abort_batch() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("f1_fail.pages"));
    touch(&dir.path().join("f2_fail.pages"));
    touch(&dir.path().join("f3.pages"));
    touch(&dir.path().join("f4.pages"));

    let mut config = test_config();
    config.engine = config.engine.max_consecutive_failures(2);

    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.not_attempted, 2);
    assert!(engine.ledger.converted().is_empty());
    assert!(!summary.is_clean());
    assert_eq!(orch.log().count(EventKind::RunAborted), 1);
    assert_eq!(orch.log().count(EventKind::FileNotAttempted), 2);
}

#[tokio::test]
async fn test_cancellation_stops_after_current_file() {
    let dir = TempDir::new().unwrap();
    for i in 0..5 {
        touch(&dir.path().join(format!("doc{}.pages", i)));
    }

    let cancel = CancellationToken::new();
    let engine = FakeEngine {
        cancel_after: Some((2, cancel.clone())),
        ..Default::default()
    };
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.not_attempted, 3);
    assert!(summary.succeeded + summary.failed + summary.skipped <= 5);
    assert_eq!(orch.supervisor().state(), EngineState::Stopped);
    assert_eq!(orch.log().count(EventKind::RunCancelled), 1);

    // Every converted file was archived; nothing half-done is left.
    assert_eq!(fs::read_dir(dir.path().join("pages")).unwrap().count(), 2);
    for i in 2..5 {
        assert!(dir.path().join(format!("doc{}.pages", i)).exists());
        assert!(!dir.path().join(format!("doc{}.docx", i)).exists());
    }
}

#[tokio::test]
async fn test_cancelled_before_start_launches_nothing() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = FakeEngine::default();
    let mut orch = orchestrator(test_config(), engine.clone());
    let summary = orch.run(dir.path(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 0);
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_archive_conflict_downgrades_to_failed() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));
    fs::create_dir(dir.path().join("pages")).unwrap();
    fs::write(dir.path().join("pages/a.pages"), b"archived long ago").unwrap();

    let mut orch = orchestrator(test_config(), FakeEngine::default());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);
    assert!(summary.failed_files[0].error.contains("already exists"));
    assert!(dir.path().join("a.pages").exists());
    assert!(dir.path().join("a.docx").exists());
    assert_eq!(
        fs::read(dir.path().join("pages/a.pages")).unwrap(),
        b"archived long ago"
    );
}

#[tokio::test]
async fn test_apply_mode_keeps_converted_file_skipped() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("C:x.pages"));
    fs::write(dir.path().join("C:x.docx"), b"earlier export").unwrap();

    let mut config = test_config();
    config.batch = config.batch.sanitize(SanitizeMode::Apply);
    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 0);
    assert!(engine.ledger.converted().is_empty());
    assert_eq!(engine.ledger.launches.load(Ordering::SeqCst), 0);

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["C x.docx", "C x.pages"]);
    assert_eq!(fs::read(dir.path().join("C x.docx")).unwrap(), b"earlier export");
    assert_eq!(orch.log().count(EventKind::FileRenamed), 2);
}

#[tokio::test]
async fn test_apply_mode_never_lands_on_unrelated_output() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("B:x.pages"));
    fs::write(dir.path().join("B x.docx"), b"belongs to an archived file").unwrap();

    let mut config = test_config();
    config.batch = config.batch.sanitize(SanitizeMode::Apply);
    let engine = FakeEngine::default();
    let mut orch = orchestrator(config, engine.clone());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 0);
    assert!(dir.path().join("B x_1.docx").exists());
    assert!(dir.path().join("pages/B x_1.pages").exists());
    assert_eq!(
        fs::read(dir.path().join("B x.docx")).unwrap(),
        b"belongs to an archived file"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_folder_is_reported_and_run_continues() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));
    touch(&dir.path().join("locked/b.pages"));
    touch(&dir.path().join("z/c.pages"));
    let locked = dir.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    let mut orch = orchestrator(test_config(), FakeEngine::default());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let summary = summary.unwrap();

    assert!(dir.path().join("pages/a.pages").exists());
    assert!(dir.path().join("z/pages/c.pages").exists());

    // Root ignores permission bits, so only check when the walk was denied.
    if summary.succeeded == 2 {
        assert_eq!(summary.folder_failures.len(), 1);
        assert!(summary.folder_failures[0].path.ends_with("locked"));
        assert_eq!(orch.log().count(EventKind::FolderFailed), 1);
        assert!(!summary.aborted);
        assert!(!summary.is_clean());
    }
}

#[tokio::test]
async fn test_warn_mode_keeps_names_and_logs_issues() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("B :bad.pages"));

    let mut orch = orchestrator(test_config(), FakeEngine::default());
    let summary = orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert!(dir.path().join("B :bad.docx").exists());
    assert!(dir.path().join("pages/B :bad.pages").exists());
    assert_eq!(orch.log().count(EventKind::FilenameWarning), 1);
    assert_eq!(orch.log().count(EventKind::FileRenamed), 0);
}

#[tokio::test]
async fn test_progress_reaches_total() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));
    touch(&dir.path().join("b.pages"));
    touch(&dir.path().join("c.pages"));
    fs::write(dir.path().join("c.docx"), b"done").unwrap();

    let updates: Arc<Mutex<Vec<ConversionProgress>>> = Arc::default();
    let sink = Arc::clone(&updates);
    let mut orch = orchestrator(test_config(), FakeEngine::default());
    orch.run_with_progress(dir.path(), &CancellationToken::new(), move |p| {
        sink.lock().unwrap().push(p)
    })
    .await
    .unwrap();

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 4);
    let last = updates.last().unwrap();
    assert_eq!(last.total_files, 3);
    assert_eq!(last.completed, 3);
    assert!((last.fraction() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_run_log_file_has_one_json_line_per_event() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    touch(&dir.path().join("a.pages"));
    touch(&dir.path().join("b_fail.pages"));

    let log = Arc::new(RunLog::create(logs.path()).unwrap());
    let mut orch = Orchestrator::new(test_config(), FakeEngine::default(), Arc::clone(&log)).unwrap();
    orch.run(dir.path(), &CancellationToken::new()).await.unwrap();

    let contents = fs::read_to_string(log.path().unwrap()).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), log.total());
    assert!(log.events().is_empty());
    assert_eq!(log.count(EventKind::FileFailed), 1);
    assert!(lines.iter().any(|l| l["kind"] == "file_failed"));
    assert!(lines.iter().any(|l| l["kind"] == "file_succeeded"));
    assert_eq!(lines.first().unwrap()["kind"], "run_started");
    assert_eq!(lines.last().unwrap()["kind"], "run_finished");
}
