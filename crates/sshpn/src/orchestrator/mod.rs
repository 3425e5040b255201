//! Tunnel orchestrators
//!
//! One invocation runs exactly one [`LifecyclePhase`] for exactly one
//! [`TunnelSpec`]. The orchestrator gathers facts, builds operations and
//! hands them to the executor in order; any failure aborts the rest of the
//! phase. Applied operations are not rolled back, so an interrupted start
//! may leave a half-configured tunnel that needs a manual cleanup or a
//! re-run.
//!
//! Running start or stop concurrently for the same tunnel identity is not
//! supported: both invocations would race on the same state entry.

mod proxy;
mod tap;
mod tun;

use sshpn_common::{OpTarget, Operation, TunnelResult};
use tracing::{debug, info};

use crate::commands;
use crate::executor::Executor;
use crate::facts::FactProvider;
use crate::state::StateStore;
use crate::types::{LifecyclePhase, SessionTarget, TunnelIdentity, TunnelSpec};

/// Per-invocation switches that shape the generated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Suppress the success notice.
    pub quiet: bool,
    /// Prefix local steps with sudo.
    pub sudo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            sudo: true,
        }
    }
}

/// Result of a completed phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Message for the operator; `None` in quiet mode.
    pub notice: Option<String>,
}

/// Sequences facts, state and operations for one tunnel.
pub struct TunnelOrchestrator<'a> {
    target: &'a SessionTarget,
    executor: &'a dyn Executor,
    facts: &'a dyn FactProvider,
    store: &'a dyn StateStore,
    options: RunOptions,
}

impl<'a> TunnelOrchestrator<'a> {
    pub fn new(
        target: &'a SessionTarget,
        executor: &'a dyn Executor,
        facts: &'a dyn FactProvider,
        store: &'a dyn StateStore,
    ) -> Self {
        Self {
            target,
            executor,
            facts,
            store,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &SessionTarget {
        self.target
    }

    /// Runs `phase` for `spec`.
    pub async fn run(&self, spec: &TunnelSpec, phase: LifecyclePhase) -> TunnelResult<PhaseOutcome> {
        info!(
            mode = spec.mode(),
            tunnel = %spec.identity(),
            host = %self.target.host,
            phase = %phase,
            "Running tunnel phase"
        );

        match (spec, phase) {
            (TunnelSpec::Tun(t), LifecyclePhase::Start) => self.start_tun(t).await,
            (TunnelSpec::Tun(t), LifecyclePhase::Stop) => self.stop_tun(t).await,
            (TunnelSpec::Tap(t), LifecyclePhase::Start) => self.start_tap(t).await,
            (TunnelSpec::Tap(t), LifecyclePhase::Stop) => self.stop_tap(t).await,
            (TunnelSpec::Proxy(p), LifecyclePhase::Start) => self.start_proxy(p).await,
            (TunnelSpec::Proxy(p), LifecyclePhase::Stop) => self.stop_proxy(p).await,
        }
    }

    /// Applies one operation through the executor.
    async fn apply(&self, op: &Operation) -> TunnelResult<String> {
        debug!(target_shell = %op.target, command = %op.render(), "Applying operation");
        self.executor.run(self.target, op).await
    }

    /// Opens the multiplexed session together with the tunnel or forward.
    async fn open_session(&self, identity: &TunnelIdentity) -> TunnelResult<()> {
        self.establish(commands::session_init(self.target, identity), identity)
            .await
    }

    /// Runs a prepared session command for `identity`.
    async fn establish(&self, cmd: String, identity: &TunnelIdentity) -> TunnelResult<()> {
        self.apply(&Operation::single(OpTarget::Local, cmd)).await?;
        info!(tunnel = %identity, host = %self.target.host, "Session established");
        Ok(())
    }

    async fn close_session(&self) -> TunnelResult<()> {
        let cmd = commands::session_stop(self.target);
        self.apply(&Operation::single(OpTarget::Local, cmd)).await?;
        info!(host = %self.target.host, "Session closed");
        Ok(())
    }

    /// Local step text, privileged when configured.
    fn local_step(&self, cmd: String) -> String {
        if self.options.sudo {
            commands::sudo(&cmd)
        } else {
            cmd
        }
    }

    fn notice(&self, message: impl Into<String>) -> PhaseOutcome {
        if self.options.quiet {
            PhaseOutcome::default()
        } else {
            PhaseOutcome {
                notice: Some(message.into()),
            }
        }
    }
}
