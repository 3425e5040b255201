//! sshpn - transparent tunnels over a multiplexed ssh session
//!
//! sshpn turns one ssh connection into:
//! - an L3 (tun) VPN with NAT on the remote end and routes on the local end
//! - an L2 (tap) device pair
//! - a SOCKS proxy through a dynamic forward
//!
//! Orchestrators build [`Operation`](sshpn_common::Operation)s and hand
//! them to an [`Executor`]; network facts come from a [`FactProvider`] and
//! the little state that Stop needs lives in a [`StateStore`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod executor;
pub mod facts;
pub mod orchestrator;
pub mod state;
pub mod types;

pub use cli::{Cli, TunnelRequest};
pub use config::SshpnConfig;
pub use executor::{DryRunExecutor, Executor, RecordingExecutor, ShellExecutor};
pub use facts::{FactProvider, ShellFactProvider, StaticFacts};
pub use orchestrator::{PhaseOutcome, RunOptions, TunnelOrchestrator};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{
    DeviceKind, DeviceName, IpPrefix, LifecyclePhase, ProxySpec, RoutingPolicy, SessionTarget,
    TapSpec, TunSpec, TunnelIdentity, TunnelSpec,
};
