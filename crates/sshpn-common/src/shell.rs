//! Shell command execution utilities.
//!
//! Commands are run through `/bin/sh -c` so that pipes, redirects and
//! `&&` chains inside rendered operations behave as written. Every value
//! interpolated into a command should go through [`shellquote`].
//!
//! # Example
//!
//! ```ignore
//! use sshpn_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set {} up", IP_CMD, shellquote("tun0"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{TunnelError, TunnelResult};

/// OpenSSH client.
pub const SSH_CMD: &str = "ssh";

/// `ip` from iproute2. Looked up on `PATH` because the remote layout is unknown.
pub const IP_CMD: &str = "ip";

/// `iptables` for the NAT table.
pub const IPTABLES_CMD: &str = "iptables";

/// Privilege escalation prefix for local commands.
pub const SUDO_CMD: &str = "sudo";

/// Path to the `grep` command.
pub const GREP_CMD: &str = "grep";

/// Shell used for every executed command.
pub const SH_CMD: &str = "/bin/sh";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// This function wraps the string in double quotes and escapes any
/// characters that have special meaning inside double quotes:
/// - `$` (variable expansion)
/// - `` ` `` (command substitution)
/// - `"` (quote termination)
/// - `\` (escape character)
/// - newline (command termination)
///
/// # Example
///
/// ```
/// use sshpn_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// assert_eq!(shellquote("with\"quote"), "\"with\\\"quote\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The trimmed stdout output.
    pub stdout: String,
    /// The trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Converts a non-zero exit into [`TunnelError::ShellCommandFailed`].
    pub fn into_stdout(self, cmd: &str) -> TunnelResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(TunnelError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

/// Executes a shell command asynchronously.
///
/// Stdin is inherited so that `ssh` can still prompt for a password or
/// host-key confirmation when a session is being established.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The command execution result
/// * `Err(TunnelError)` - If the command could not be spawned
pub async fn exec(cmd: &str) -> TunnelResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| TunnelError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command with every stdio stream inherited from sshpn.
///
/// Needed for `ssh -f`: the backgrounded master keeps its stdout/stderr
/// open, so capturing them would never reach EOF. It also lets `sudo`
/// prompt on the terminal.
pub async fn exec_inherited(cmd: &str) -> TunnelResult<()> {
    tracing::debug!(command = %cmd, "Executing shell command (inherited stdio)");

    let status = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| TunnelError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = status.code().unwrap_or(-1);
    if status.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
        Ok(())
    } else {
        tracing::warn!(command = %cmd, exit_code = exit_code, "Command failed");
        Err(TunnelError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code,
            output: String::new(),
        })
    }
}

/// Executes a shell command and returns an error on non-zero exit.
///
/// # Returns
///
/// * `Ok(String)` - The stdout output on success
/// * `Err(TunnelError)` - If the command fails or returns non-zero
pub async fn exec_or_throw(cmd: &str) -> TunnelResult<String> {
    exec(cmd).await?.into_stdout(cmd)
}
