//! Conversion engine adapter.
//!
//! The external application is reached through [`ConversionEngine`], so the
//! lifecycle supervisor can be driven by the real scripting bridge or by a
//! test double that simulates crashes and hangs.

use crate::config::EngineConfig;
use crate::error::{ConversionError, Result};
use async_process::Command;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Capability interface of the external conversion application.
///
/// Implementations may block for as long as the application does; the
/// supervisor bounds every `convert` call with a timeout and drops the future
/// when it fires.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Human-readable engine name for logs.
    fn name(&self) -> &str;

    /// Bring a fresh application instance up.
    async fn launch(&self) -> Result<()>;

    /// Export `source` to `output`. Returns once the application finished or failed.
    async fn convert(&self, source: &Path, output: &Path) -> Result<()>;

    /// Ask the application to exit.
    async fn quit(&self) -> Result<()>;

    /// Kill the application regardless of its state.
    async fn kill(&self) -> Result<()>;
}

/// Reply the export script prints on success.
const SUCCESS_MARKER: &str = "SUCCESS";

/// Drives a scriptable desktop application through `osascript`.
#[derive(Debug)]
pub struct ScriptBridgeEngine {
    config: EngineConfig,
    osascript_path: PathBuf,
}

impl ScriptBridgeEngine {
    /// Create an adapter; fails if the scripting bridge is unavailable.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let osascript_path = Self::find_osascript(&config)?;
        info!("Found scripting bridge at: {:?}", osascript_path);
        Ok(Self {
            config,
            osascript_path,
        })
    }

    /// Find the osascript binary.
    fn find_osascript(config: &EngineConfig) -> Result<PathBuf> {
        if let Some(ref path) = config.osascript_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(ConversionError::EngineNotFound);
        }

        let system = PathBuf::from("/usr/bin/osascript");
        if system.exists() {
            return Ok(system);
        }

        which::which("osascript").map_err(|_| ConversionError::EngineNotFound)
    }

    /// Run one AppleScript snippet and capture its output.
    async fn run_script(&self, script: &str) -> Result<std::process::Output> {
        let output = Command::new(&self.osascript_path)
            .arg("-e")
            .arg(script)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    fn tell(&self, command: &str) -> String {
        format!(
            "tell application \"{}\" to {}",
            escape_applescript(&self.config.application),
            command
        )
    }

    /// Script that opens, exports and closes one document.
    fn export_script(&self, source: &Path, output: &Path) -> String {
        format!(
            r#"
tell application "{app}"
    try
        set theDoc to open POSIX file "{source}"
        delay 1
        export theDoc to POSIX file "{output}" as {format}
        close theDoc saving no
        return "{marker}"
    on error errMsg number errNum
        return "ERROR " & errNum & ": " & errMsg
    end try
end tell
"#,
            app = escape_applescript(&self.config.application),
            source = escape_applescript(&source.to_string_lossy()),
            output = escape_applescript(&output.to_string_lossy()),
            format = self.config.export_format,
            marker = SUCCESS_MARKER,
        )
    }
}

/// Escape a string for use inside an AppleScript string literal.
pub fn escape_applescript(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl ConversionEngine for ScriptBridgeEngine {
    fn name(&self) -> &str {
        &self.config.application
    }

    async fn launch(&self) -> Result<()> {
        let output = self.run_script(&self.tell("activate")).await?;
        if !output.status.success() {
            return Err(ConversionError::EngineStartFailed {
                application: self.config.application.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tokio::time::sleep(self.config.launch_settle).await;
        Ok(())
    }

    async fn convert(&self, source: &Path, output_path: &Path) -> Result<()> {
        if !source.exists() {
            return Err(ConversionError::InputNotFound(source.to_path_buf()));
        }

        let start = Instant::now();
        debug!("{} converting {:?}", self.config.application, source.file_name());

        let output = self.run_script(&self.export_script(source, output_path)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply = stdout.trim();

        if !output.status.success() || reply != SUCCESS_MARKER {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = [reply, stderr.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("Unknown error")
                .to_string();
            error!("Conversion failed for {:?}: {}", source, message);
            return Err(ConversionError::ConversionFailed {
                path: source.to_path_buf(),
                message,
            });
        }

        if !output_path.exists() {
            return Err(ConversionError::OutputMissing(output_path.to_path_buf()));
        }

        debug!("Converted {:?} in {:?}", source.file_name(), start.elapsed());
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        let output = self.run_script(&self.tell("quit")).await?;
        if !output.status.success() {
            warn!(
                "Quit request to {} failed: {}",
                self.config.application,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        tokio::time::sleep(self.config.quit_settle).await;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let killall = which::which("killall").unwrap_or_else(|_| PathBuf::from("/usr/bin/killall"));
        let status = Command::new(killall)
            .arg("-9")
            .arg(&self.config.application)
            .status()
            .await?;
        // killall exits non-zero when nothing matched, which is fine here.
        if !status.success() {
            debug!("killall found no running {}", self.config.application);
        }
        Ok(())
    }
}
