//! Test fixtures for common tunnel scenarios
//!
//! Provides reusable specs, fact sets and a [`Harness`] that wires the
//! orchestrator to in-memory collaborators.

use sshpn::{
    LifecyclePhase, MemoryStateStore, PhaseOutcome, RecordingExecutor, RunOptions, SessionTarget,
    StateStore, StaticFacts, TunnelOrchestrator, TunnelSpec,
};
use sshpn_common::TunnelResult;

use crate::OperationVerifier;

/// Common tun spec fixtures
pub mod tun_fixtures {
    use sshpn::{DeviceName, IpPrefix, RoutingPolicy, TunSpec, TunnelSpec};

    fn prefixes(subnets: &[&str]) -> Vec<IpPrefix> {
        subnets
            .iter()
            .map(|s| s.parse().expect("fixture subnet"))
            .collect()
    }

    /// tun0 with default addresses and no routing
    pub fn tun_default() -> TunnelSpec {
        TunnelSpec::Tun(TunSpec::new(DeviceName::tun(0)))
    }

    /// Tunnel routing only the listed subnets
    pub fn tun_subnets(index: u32, subnets: &[&str]) -> TunnelSpec {
        TunnelSpec::Tun(
            TunSpec::new(DeviceName::tun(index))
                .with_routing(RoutingPolicy::Subnets(prefixes(subnets))),
        )
    }

    /// Tunnel routing everything except the listed subnets
    pub fn tun_all(index: u32, exclude: &[&str]) -> TunnelSpec {
        TunnelSpec::Tun(TunSpec::new(DeviceName::tun(index)).with_routing(
            RoutingPolicy::All {
                exclude: prefixes(exclude),
            },
        ))
    }
}

/// Common fact fixtures
pub mod facts_fixtures {
    use sshpn::StaticFacts;

    pub const REMOTE_DEV: &str = "eth0";
    pub const PUBLIC_IP: &str = "203.0.113.7";
    pub const LOCAL_DEV: &str = "wlan0";
    pub const GATEWAY: &str = "192.168.1.1";

    /// A remote on eth0 seen as 203.0.113.7, a laptop on wlan0
    pub fn laptop_on_wifi() -> StaticFacts {
        StaticFacts::new(
            REMOTE_DEV,
            PUBLIC_IP.parse().expect("fixture address"),
            LOCAL_DEV,
            GATEWAY.parse().expect("fixture address"),
        )
    }

    /// Same as [`laptop_on_wifi`] with existing masquerade rules
    pub fn with_nat_rules(rules: &[u32]) -> StaticFacts {
        laptop_on_wifi().with_nat_rules(rules.to_vec())
    }
}

/// Common session fixtures
pub mod session_fixtures {
    use sshpn::SessionTarget;

    pub fn example_com() -> SessionTarget {
        SessionTarget::new("example.com")
    }

    pub fn custom_socket(host: &str, socket: &str) -> SessionTarget {
        SessionTarget::new(host)
            .with_user("admin")
            .with_socket(socket)
    }
}

/// Orchestrator wired to recording collaborators.
pub struct Harness {
    pub target: SessionTarget,
    pub executor: RecordingExecutor,
    pub facts: StaticFacts,
    pub store: MemoryStateStore,
    pub options: RunOptions,
}

impl Harness {
    pub fn new(target: SessionTarget, facts: StaticFacts) -> Self {
        Self {
            target,
            executor: RecordingExecutor::new(),
            facts,
            store: MemoryStateStore::new(),
            options: RunOptions::default(),
        }
    }

    /// example.com with [`facts_fixtures::laptop_on_wifi`]
    pub fn standard() -> Self {
        Self::new(
            session_fixtures::example_com(),
            facts_fixtures::laptop_on_wifi(),
        )
    }

    pub fn with_executor(mut self, executor: RecordingExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_store(mut self, store: MemoryStateStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(&self, spec: &TunnelSpec, phase: LifecyclePhase) -> TunnelResult<PhaseOutcome> {
        TunnelOrchestrator::new(&self.target, &self.executor, &self.facts, &self.store)
            .with_options(self.options)
            .run(spec, phase)
            .await
    }

    pub async fn start(&self, spec: &TunnelSpec) -> TunnelResult<PhaseOutcome> {
        self.run(spec, LifecyclePhase::Start).await
    }

    pub async fn stop(&self, spec: &TunnelSpec) -> TunnelResult<PhaseOutcome> {
        self.run(spec, LifecyclePhase::Stop).await
    }

    /// Verifier over everything executed so far.
    pub fn verifier(&self) -> OperationVerifier {
        OperationVerifier::new(self.executor.operations())
    }

    pub fn state(&self, key: &str) -> Option<String> {
        self.store.get(key).ok().flatten()
    }
}
