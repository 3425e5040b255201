//! Operation executors
//!
//! Orchestrators decide *what* runs; an [`Executor`] decides *how*.
//! [`ShellExecutor`] runs operations, [`DryRunExecutor`] prints them and
//! [`RecordingExecutor`] captures them for inspection.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sshpn_common::{shell, OpTarget, Operation, TunnelError, TunnelResult};
use tracing::{debug, info};

use crate::commands;
use crate::types::SessionTarget;

/// Capability to apply operations on either end of a session.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `op` on the remote end of `target`'s session.
    async fn run_remote(&self, target: &SessionTarget, op: &Operation) -> TunnelResult<String>;

    /// Runs `op` in the local shell.
    async fn run_local(&self, op: &Operation) -> TunnelResult<String>;

    /// Dispatches on the operation's target.
    async fn run(&self, target: &SessionTarget, op: &Operation) -> TunnelResult<String> {
        match op.target {
            OpTarget::Remote => self.run_remote(target, op).await,
            OpTarget::Local => self.run_local(op).await,
        }
    }
}

/// Renders the exact local command line that applies `op`.
pub fn command_line(target: &SessionTarget, op: &Operation) -> String {
    match op.target {
        OpTarget::Remote => commands::run_remote(target, &op.render()),
        OpTarget::Local => op.render(),
    }
}

/// Executes operations through `/bin/sh`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run_remote(&self, target: &SessionTarget, op: &Operation) -> TunnelResult<String> {
        if op.is_empty() {
            return Ok(String::new());
        }
        let cmd = command_line(target, op);
        debug!(host = %target.host, steps = op.len(), "Running remote operation");
        shell::exec_or_throw(&cmd).await
    }

    async fn run_local(&self, op: &Operation) -> TunnelResult<String> {
        if op.is_empty() {
            return Ok(String::new());
        }
        debug!(steps = op.len(), "Running local operation");
        shell::exec_inherited(&op.render()).await?;
        Ok(String::new())
    }
}

/// Prints the command line of every operation instead of running it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    pub fn new() -> Self {
        Self
    }

    fn print(line: &str) -> TunnelResult<String> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)
            .map_err(|e| TunnelError::internal(format!("cannot write to stdout: {}", e)))?;
        Ok(String::new())
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn run_remote(&self, target: &SessionTarget, op: &Operation) -> TunnelResult<String> {
        info!(host = %target.host, "Dry run: remote operation not executed");
        Self::print(&command_line(target, op))
    }

    async fn run_local(&self, op: &Operation) -> TunnelResult<String> {
        info!("Dry run: local operation not executed");
        Self::print(&op.render())
    }
}

/// Captures operations in order. Optionally fails the first operation
/// whose rendering contains a given fragment.
#[derive(Debug, Default, Clone)]
pub struct RecordingExecutor {
    captured: Arc<Mutex<Vec<Operation>>>,
    fail_on: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails (after recording) any operation containing `fragment`.
    pub fn failing_on(fragment: impl Into<String>) -> Self {
        Self {
            captured: Default::default(),
            fail_on: Some(fragment.into()),
        }
    }

    /// Operations captured so far, in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.captured.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Every step of every operation, flattened, in order.
    pub fn steps(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .flat_map(|op| op.steps)
            .collect()
    }

    fn record(&self, op: &Operation) -> TunnelResult<String> {
        self.captured
            .lock()
            .map_err(|_| TunnelError::internal("recording lock poisoned"))?
            .push(op.clone());

        match &self.fail_on {
            Some(fragment) if op.render().contains(fragment.as_str()) => {
                Err(TunnelError::ShellCommandFailed {
                    command: op.render(),
                    exit_code: 1,
                    output: format!("injected failure on '{}'", fragment),
                })
            }
            _ => Ok(String::new()),
        }
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run_remote(&self, _target: &SessionTarget, op: &Operation) -> TunnelResult<String> {
        self.record(op)
    }

    async fn run_local(&self, op: &Operation) -> TunnelResult<String> {
        self.record(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshpn_common::JoinPolicy;

    #[test]
    fn test_command_line_remote_wraps_in_ssh() {
        let target = SessionTarget::new("example.com");
        let op = Operation::remote(JoinPolicy::Chained)
            .step("ip link set tun0 up")
            .step("echo 1 > /proc/sys/net/ipv4/ip_forward");
        let line = command_line(&target, &op);
        assert!(line.starts_with("ssh -S"));
        assert!(line.ends_with(
            "\"(ip link set tun0 up && echo 1 > /proc/sys/net/ipv4/ip_forward)\""
        ));
    }

    #[test]
    fn test_command_line_local_is_rendered() {
        let target = SessionTarget::new("example.com");
        let op = Operation::single(OpTarget::Local, "sudo ip link set tun0 up");
        assert_eq!(command_line(&target, &op), "sudo ip link set tun0 up");
    }

    #[tokio::test]
    async fn test_recording_dispatch() {
        let exec = RecordingExecutor::new();
        let target = SessionTarget::new("example.com");

        exec.run(&target, &Operation::single(OpTarget::Remote, "true"))
            .await
            .unwrap();
        exec.run(&target, &Operation::single(OpTarget::Local, "ip r"))
            .await
            .unwrap();

        let ops = exec.operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].target, OpTarget::Remote);
        assert_eq!(ops[1].target, OpTarget::Local);
        assert_eq!(exec.steps(), vec!["true", "ip r"]);
    }

    #[tokio::test]
    async fn test_recording_injected_failure() {
        let exec = RecordingExecutor::failing_on("iptables");
        let op = Operation::single(OpTarget::Local, "iptables -t nat -L");
        assert!(exec.run_local(&op).await.is_err());
        assert_eq!(exec.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_shell_executor_local() {
        let exec = ShellExecutor::new();
        let op = Operation::local(JoinPolicy::Chained).step("true").step("true");
        assert!(exec.run_local(&op).await.is_ok());

        let op = Operation::local(JoinPolicy::Chained).step("false").step("true");
        assert!(exec.run_local(&op).await.is_err());

        let op = Operation::local(JoinPolicy::Independent).step("false").step("true");
        assert!(exec.run_local(&op).await.is_ok());
    }
}
