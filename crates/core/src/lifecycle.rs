//! Engine lifecycle supervision.
//!
//! The external application leaks memory and occasionally wedges, so the
//! supervisor owns its single live instance, recycles it after a fixed number
//! of conversions, and kills it when a conversion overruns its watchdog.
//!
//! States: `NotStarted → Running → (Restarting → Running)* → Stopped`, with
//! `Hung` entered on a timeout and always left through [`EngineSupervisor::force_terminate`].

use crate::config::EngineConfig;
use crate::engine::ConversionEngine;
use crate::error::{ConversionError, Result};
use crate::reporter::{EventKind, LogEvent, RunLog};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ownership token for one live engine instance. Never cloned, never reused.
#[derive(Debug)]
pub struct EngineHandle {
    generation: u64,
    started_at: DateTime<Utc>,
}

impl EngineHandle {
    /// Monotonic instance number, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running,
    /// Retired for a planned restart; the next conversion relaunches.
    Restarting,
    /// A conversion overran its timeout.
    Hung,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Owns the external engine and its single live [`EngineHandle`].
pub struct EngineSupervisor<E: ConversionEngine> {
    engine: E,
    config: EngineConfig,
    log: Arc<RunLog>,
    state: EngineState,
    handle: Option<EngineHandle>,
    last_generation: u64,
    conversions_since_restart: u32,
    consecutive_failures: u32,
    restarts: u32,
}

impl<E: ConversionEngine> fmt::Debug for EngineSupervisor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSupervisor")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("conversions_since_restart", &self.conversions_since_restart)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl<E: ConversionEngine> EngineSupervisor<E> {
    pub fn new(engine: E, config: EngineConfig, log: Arc<RunLog>) -> Self {
        Self {
            engine,
            config,
            log,
            state: EngineState::NotStarted,
            handle: None,
            last_generation: 0,
            conversions_since_restart: 0,
            consecutive_failures: 0,
            restarts: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn handle(&self) -> Option<&EngineHandle> {
        self.handle.as_ref()
    }

    /// Restarts performed so far, planned or after a failure.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn conversions_since_restart(&self) -> u32 {
        self.conversions_since_restart
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Swap the run log, e.g. when a new run begins.
    pub fn set_log(&mut self, log: Arc<RunLog>) {
        self.log = log;
    }

    /// Prepare for a new run after a previous `shutdown`.
    pub fn reset(&mut self) {
        if self.state == EngineState::Stopped {
            self.state = EngineState::NotStarted;
        }
        self.conversions_since_restart = 0;
        self.consecutive_failures = 0;
        self.restarts = 0;
    }

    /// Whether the batch should give up on the engine.
    pub fn failure_limit_reached(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    /// The error describing an exhausted engine.
    pub fn unusable_error(&self) -> ConversionError {
        ConversionError::EngineUnusable {
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// Start the engine unless a healthy instance is already live.
    pub async fn ensure_running(&mut self) -> Result<&EngineHandle> {
        if self.state != EngineState::Running || self.handle.is_none() {
            self.launch().await?;
        }
        match self.handle {
            Some(ref handle) => Ok(handle),
            None => Err(ConversionError::EngineStartFailed {
                application: self.engine.name().to_string(),
                message: "no live instance after launch".to_string(),
            }),
        }
    }

    async fn launch(&mut self) -> Result<()> {
        let relaunch = self.state == EngineState::Restarting;
        let launched = match timeout(self.config.conversion_timeout, self.engine.launch()).await {
            Ok(result) => result,
            Err(_) => {
                // A wedged activation may have left a half-started instance.
                self.force_terminate("launch timed out").await;
                Err(ConversionError::EngineStartFailed {
                    application: self.engine.name().to_string(),
                    message: format!("no response within {:?}", self.config.conversion_timeout),
                })
            }
        };
        if let Err(e) = launched {
            self.consecutive_failures += 1;
            self.state = EngineState::NotStarted;
            self.log.record(
                LogEvent::new(EventKind::EngineTerminated)
                    .outcome("launch-failed")
                    .reason(e.to_string()),
            );
            return Err(e);
        }

        self.last_generation += 1;
        let handle = EngineHandle {
            generation: self.last_generation,
            started_at: Utc::now(),
        };
        let kind = if relaunch {
            EventKind::EngineRestarted
        } else {
            EventKind::EngineStarted
        };
        info!("{} instance {} up", self.engine.name(), handle.generation);
        self.log
            .record(LogEvent::new(kind).generation(handle.generation));

        self.state = EngineState::Running;
        self.conversions_since_restart = 0;
        self.handle = Some(handle);
        Ok(())
    }

    /// Convert one file under the watchdog. Any failure takes the instance
    /// down so the next attempt gets a fresh one.
    pub async fn convert(&mut self, source: &Path, output: &Path) -> Result<()> {
        self.ensure_running().await?;

        let limit = self.config.conversion_timeout;
        match timeout(limit, self.engine.convert(source, output)).await {
            Ok(Ok(())) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Ok(Err(e)) => {
                self.consecutive_failures += 1;
                warn!("Engine failed on {:?}: {}", source.file_name(), e);
                self.force_terminate(&e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                self.consecutive_failures += 1;
                self.state = EngineState::Hung;
                self.log.record(
                    LogEvent::new(EventKind::EngineHung)
                        .path(source)
                        .duration(limit)
                        .generation(self.last_generation),
                );
                self.force_terminate("conversion timed out").await;
                Err(ConversionError::Timeout {
                    path: source.to_path_buf(),
                    timeout_secs: limit.as_secs(),
                })
            }
        }
    }

    /// Count one served conversion; retire the instance once the threshold
    /// is reached. Returns whether a planned restart was triggered.
    pub async fn record_conversion(&mut self) -> bool {
        if self.state != EngineState::Running {
            return false;
        }
        self.conversions_since_restart += 1;
        if self.conversions_since_restart >= self.config.restart_threshold {
            self.restart("restart threshold reached").await
        } else {
            false
        }
    }

    /// Planned restart: quit the live instance and leave the supervisor in
    /// `Restarting`. No-op unless an instance is running.
    pub async fn restart(&mut self, reason: &str) -> bool {
        if self.state != EngineState::Running {
            return false;
        }
        info!("Restarting {} for memory cleanup: {}", self.engine.name(), reason);
        self.stop_instance().await;
        let generation = self.retire();
        self.restarts += 1;
        self.state = EngineState::Restarting;
        self.log.record(
            LogEvent::new(EventKind::EngineTerminated)
                .outcome("planned-restart")
                .reason(reason)
                .generation(generation),
        );
        true
    }

    /// Kill the engine immediately, whatever its state.
    pub async fn force_terminate(&mut self, reason: &str) {
        if let Err(e) = self.engine.kill().await {
            warn!("Failed to kill {}: {}", self.engine.name(), e);
        }
        let generation = self.retire();
        if generation != 0 {
            self.restarts += 1;
        }
        self.state = EngineState::NotStarted;
        self.log.record(
            LogEvent::new(EventKind::EngineTerminated)
                .outcome("killed")
                .reason(reason)
                .generation(generation),
        );
    }

    /// Stop the engine at the end of a batch. Never starts one.
    pub async fn shutdown(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        let was_live = self.handle.is_some();
        if was_live {
            self.stop_instance().await;
        }
        let generation = self.retire();
        self.state = EngineState::Stopped;
        debug!("Engine supervisor stopped");
        if was_live {
            self.log
                .record(LogEvent::new(EventKind::EngineStopped).generation(generation));
        }
    }

    /// Quit gracefully, falling back to a kill. The quit request is bounded
    /// by the conversion timeout.
    async fn stop_instance(&mut self) {
        let reason = match timeout(self.config.conversion_timeout, self.engine.quit()).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "quit timed out".to_string(),
        };
        warn!("Graceful quit of {} failed ({}), killing", self.engine.name(), reason);
        if let Err(e) = self.engine.kill().await {
            warn!("Failed to kill {}: {}", self.engine.name(), e);
        }
    }

    /// Drop the live handle. Returns its generation, or 0 if none was live.
    fn retire(&mut self) -> u64 {
        self.conversions_since_restart = 0;
        self.handle.take().map(|h| h.generation).unwrap_or(0)
    }
}
