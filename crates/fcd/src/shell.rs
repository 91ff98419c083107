//! Process execution helpers.
//!
//! Two entry points: [`exec`] runs a command line through `/bin/sh -c`
//! (used for the kernel route lookup), [`exec_program`] runs a program
//! with an explicit argument vector and working directory (used for the
//! vendor remote shell, whose command string must reach it unsplit).

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{FcdError, FcdResult};

/// Path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Regex for characters that need escaping in shell double-quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// ```
/// use sonic_fcd::shell::shellquote;
///
/// assert_eq!(shellquote("10.0.0.1"), "\"10.0.0.1\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Successful result with the given output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with the given exit code.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output (stdout then stderr).
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

async fn run(mut command: Command, cmdline: &str) -> FcdResult<ExecResult> {
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| FcdError::ShellExec {
            command: cmdline.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmdline, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmdline,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a command line through `/bin/sh -c`.
pub async fn exec(cmd: &str) -> FcdResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(cmd);
    run(command, cmd).await
}

/// Executes `program` with `args` from `workdir`.
pub async fn exec_program(program: &str, args: &[&str], workdir: &Path) -> FcdResult<ExecResult> {
    let cmdline = format!("{} {}", program, args.join(" "));
    tracing::debug!(command = %cmdline, "Executing program");
    let mut command = Command::new(program);
    command.args(args).current_dir(workdir);
    run(command, &cmdline).await
}
