//! Vendor shell adapter.
//!
//! Every hardware change goes through the switch SDK's remote shell. This
//! module turns engine intents (create/remove a session, enable/disable a
//! queue) into CLI strings, runs them through a [`CommandRunner`] and
//! decides from the exit code and the shell's reply whether the command
//! worked.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, trace};

use crate::error::{FcdError, FcdResult};
use crate::schema::ParamSchema;
use crate::shell::{self, ExecResult};
use crate::tables::constants::CPU_QUEUE_COUNT;
use crate::types::{ParamMap, SessionKind};

/// Default remote shell script.
pub const DEFAULT_REMOTE_SHELL: &str = "/innovium/remote_shell.sh";

/// Directory the remote shell must run from.
pub const DEFAULT_SHELL_WORKDIR: &str = "/innovium";

/// Remote shell server port.
pub const DEFAULT_SHELL_PORT: u16 = 9999;

const SHELL_BANNER: &str = "Connected to Innovium Shell Server";

static SDK_ENABLED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)enable :\s+TRUE").expect("Invalid regex pattern"));

/// Runs one vendor CLI command string.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> FcdResult<ExecResult>;
}

/// Runs commands through the SDK remote shell script.
#[derive(Debug, Clone)]
pub struct InnoShellRunner {
    script: String,
    workdir: PathBuf,
    port: u16,
}

impl InnoShellRunner {
    pub fn new(script: impl Into<String>, workdir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            script: script.into(),
            workdir: workdir.into(),
            port,
        }
    }
}

impl Default for InnoShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_SHELL, DEFAULT_SHELL_WORKDIR, DEFAULT_SHELL_PORT)
    }
}

#[async_trait]
impl CommandRunner for InnoShellRunner {
    async fn run(&self, command: &str) -> FcdResult<ExecResult> {
        let port = self.port.to_string();
        let args = ["-n", "-r", port.as_str(), "-C", command];
        let mut result = shell::exec_program(&self.script, &args, &self.workdir).await?;
        // The shell reports CLI errors on either stream.
        result.stdout = result.combined_output();
        result.stderr.clear();
        Ok(result)
    }
}

/// What a command was meant to do; selects the failure marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Create,
    Delete,
    Apply,
}

/// Extracts the CLI reply from raw shell output.
///
/// The reply is the first non-empty line after the connect banner. The
/// shell's own `Script ...` and `Exiting shell ...` lines are not part of it.
pub fn extract_reply(output: &str) -> Option<String> {
    let normalized = output.replace("\r\n", "\n").replace('\r', "\n");
    let (_, after) = normalized.split_once(SHELL_BANNER)?;
    after
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty())
        .filter(|line| !line.starts_with("Script ") && !line.starts_with("Exiting shell"))
        .map(str::to_string)
}

/// Decides whether a command failed.
///
/// Returns the failure detail, or `None` on success. HDC delete prints
/// benign replies; only an embedded ` rc:` code marks an error there.
pub fn classify_output(
    kind: SessionKind,
    action: CommandAction,
    result: &ExecResult,
) -> Option<String> {
    if !result.success() {
        return Some(format!(
            "exit code {}: {}",
            result.exit_code,
            result.combined_output().trim()
        ));
    }

    let reply = extract_reply(&result.stdout)?;
    match (kind, action) {
        (SessionKind::Hdc, CommandAction::Delete) => reply.contains(" rc:").then_some(reply),
        (SessionKind::Bdc, CommandAction::Delete) => None,
        _ => Some(reply),
    }
}

/// Builds `config <kind> create_instance ...` from session params.
pub fn create_command(kind: SessionKind, params: &ParamMap) -> String {
    let schema = ParamSchema::for_kind(kind);
    let mut cmd = format!("config {} create_instance", kind.cli_name());
    for (field, value) in params {
        if schema.skip_on_create(field) {
            continue;
        }
        cmd.push_str(&format!(" -{} {}", schema.cli_flag(field), value));
    }
    cmd
}

/// Builds `config <kind> delete_instance`.
pub fn delete_command(kind: SessionKind) -> String {
    format!("config {} delete_instance", kind.cli_name())
}

/// Builds `config hdc apply_instance ...`. Without a devport the
/// command targets every devport.
pub fn apply_command(
    enable: bool,
    queues: &str,
    devport: Option<&str>,
    delay_threshold: Option<&str>,
) -> String {
    let mut cmd = format!("config hdc apply_instance -queue {}", queues);
    match devport {
        Some(devport) => cmd.push_str(&format!(" -devport {}", devport)),
        None => cmd.push_str(" -devport_all"),
    }
    cmd.push_str(if enable { " -enable" } else { " -disable" });
    if let Some(threshold) = delay_threshold {
        cmd.push_str(&format!(" -delay_threshold={}", threshold));
    }
    cmd
}

/// Hardware programming interface used by the reconciliation engine.
pub struct TelemetryShell {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
}

impl TelemetryShell {
    pub fn new(runner: Arc<dyn CommandRunner>, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn execute(&self, command: &str) -> FcdResult<ExecResult> {
        info!("CMD={}", command);
        if self.dry_run {
            return Ok(ExecResult::ok(""));
        }
        let result = self.runner.run(command).await?;
        trace!(command, output = %result.stdout, "Command output");
        Ok(result)
    }

    async fn execute_checked(
        &self,
        kind: SessionKind,
        action: CommandAction,
        command: &str,
    ) -> FcdResult<()> {
        let result = self.execute(command).await?;
        match classify_output(kind, action, &result) {
            Some(message) => Err(FcdError::hardware(command, message)),
            None => Ok(()),
        }
    }

    /// Creates the session. A failed create is followed by a best-effort
    /// delete to clear partial SDK state.
    #[instrument(skip(self, params))]
    pub async fn create_session(&self, kind: SessionKind, params: &ParamMap) -> FcdResult<()> {
        info!("Add {} session config", kind);
        let command = create_command(kind, params);
        if let Err(e) = self.execute_checked(kind, CommandAction::Create, &command).await {
            if let Err(cleanup) = self.remove_session(kind).await {
                debug!(error = %cleanup, "Cleanup after failed create also failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Deletes the session.
    #[instrument(skip(self))]
    pub async fn remove_session(&self, kind: SessionKind) -> FcdResult<()> {
        info!("Remove {} session config", kind);
        self.execute_checked(kind, CommandAction::Delete, &delete_command(kind))
            .await
    }

    /// Enables or disables queue monitoring. BDC has no per-queue state.
    #[instrument(skip(self))]
    pub async fn apply_queue(
        &self,
        kind: SessionKind,
        enable: bool,
        queues: &str,
        devport: Option<&str>,
        delay_threshold: Option<&str>,
    ) -> FcdResult<()> {
        if kind == SessionKind::Bdc {
            return Ok(());
        }
        let command = apply_command(enable, queues, devport, delay_threshold);
        self.execute_checked(kind, CommandAction::Apply, &command).await
    }

    /// Returns true when the queues on `devport` accept an HDC instance.
    #[instrument(skip(self))]
    pub async fn queue_status(
        &self,
        kind: SessionKind,
        devport: &str,
        queues: &str,
    ) -> FcdResult<bool> {
        if kind == SessionKind::Bdc || self.dry_run {
            return Ok(true);
        }
        let command = format!("config hdc get_queue_status -queue {} -devport {}", queues, devport);
        let result = self.execute(&command).await?;
        if !result.success() {
            return Ok(false);
        }
        Ok(extract_reply(&result.stdout).is_some_and(|reply| reply.contains("True")))
    }

    /// Pushes the switch id to the SDK node.
    pub async fn set_switch_id(&self, switch_id: u16) -> FcdResult<()> {
        let command = format!("ifcs set node switch_id {}", switch_id);
        let result = self.execute(&command).await?;
        if !result.success() {
            return Err(FcdError::hardware(command, result.combined_output()));
        }
        Ok(())
    }

    /// Returns true once the SDK node reports `enable : TRUE`.
    pub async fn sdk_enabled(&self) -> bool {
        match self.execute("ifcs show node").await {
            Ok(result) => SDK_ENABLED_RE.is_match(&result.stdout),
            Err(e) => {
                trace!(error = %e, "SDK not ready");
                false
            }
        }
    }

    /// Returns true once every CPU queue has been created.
    pub async fn cpu_queues_ready(&self) -> bool {
        let marker = format!("Total cpu_queue count: {}", CPU_QUEUE_COUNT);
        match self.execute("ifcs show cpu_queue").await {
            Ok(result) => result.stdout.contains(&marker),
            Err(e) => {
                trace!(error = %e, "CPU queues not ready");
                false
            }
        }
    }
}
