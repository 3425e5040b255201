//! L3 (tun) tunnel lifecycle

use std::io;
use std::net::IpAddr;

use sshpn_common::{JoinPolicy, Operation, TunnelError, TunnelResult};
use tracing::{info, warn};

use super::{PhaseOutcome, TunnelOrchestrator};
use crate::commands::*;
use crate::facts::REMOTE_PUBLIC_ADDRESS;
use crate::state::PUBLIC_IP_FACT;
use crate::types::{RoutingPolicy, TunSpec, TunnelIdentity};

impl TunnelOrchestrator<'_> {
    pub(super) async fn start_tun(&self, spec: &TunSpec) -> TunnelResult<PhaseOutcome> {
        let identity = TunnelIdentity::Device(spec.name);
        self.open_session(&identity).await?;

        let remote_dev = self.facts.remote_default_device(self.target).await?;
        let public_ip = self.facts.remote_public_address(self.target).await?;
        // The host route goes via the IPv4 default gateway.
        if !public_ip.is_ipv4() {
            return Err(TunnelError::fact_query(
                REMOTE_PUBLIC_ADDRESS,
                format!("{} is not an IPv4 address", public_ip),
            ));
        }
        info!(
            remote_dev = %remote_dev,
            public_ip = %public_ip,
            "Discovered remote facts"
        );

        self.apply(&remote_start_op(spec, &remote_dev)).await?;

        // Without this entry stop cannot find the host route to remove.
        let key = identity.state_key(PUBLIC_IP_FACT);
        self.store.put(&key, &public_ip.to_string())?;

        let local_dev = self.facts.local_default_device().await?;
        let gateway = self.facts.local_default_gateway().await?;

        let mut local = Operation::local(JoinPolicy::Chained);
        for step in local_start_steps(spec, public_ip, gateway, &local_dev) {
            local.push(self.local_step(step));
        }
        self.apply(&local).await?;

        info!(device = %spec.name, host = %self.target.host, "L3 tunnel created");
        Ok(self.notice("L3 tunnel created successfully"))
    }

    pub(super) async fn stop_tun(&self, spec: &TunSpec) -> TunnelResult<PhaseOutcome> {
        let identity = TunnelIdentity::Device(spec.name);
        let key = identity.state_key(PUBLIC_IP_FACT);

        let public_ip: IpAddr = self
            .store
            .get(&key)?
            .ok_or_else(|| TunnelError::state_missing(&key))?
            .parse()
            .map_err(|_| TunnelError::State {
                key: key.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, "not an IP address"),
            })?;

        let rules = self
            .facts
            .remote_nat_rule_numbers(self.target, spec.laddr)
            .await?;
        if rules.is_empty() {
            warn!(laddr = %spec.laddr, "No NAT rule found for tunnel address");
        }

        self.apply(&remote_stop_op(&rules)).await?;
        self.close_session().await?;
        self.store.delete(&key)?;

        let local_dev = self.facts.local_default_device().await?;

        let mut local = Operation::local(JoinPolicy::Chained);
        for step in local_stop_steps(spec, public_ip, &local_dev) {
            local.push(self.local_step(step));
        }
        self.apply(&local).await?;

        info!(device = %spec.name, host = %self.target.host, "L3 tunnel stopped");
        Ok(self.notice("L3 tunnel stopped successfully"))
    }
}

/// Address, masquerade, forwarding and link-up on the remote end.
fn remote_start_op(spec: &TunSpec, remote_dev: &str) -> Operation {
    Operation::remote(JoinPolicy::Chained)
        .step(build_add_p2p_address_cmd(spec.raddr, spec.laddr, &spec.name))
        .step(build_add_masquerade_cmd(spec.laddr, remote_dev))
        .step(build_backup_ip_forward_cmd())
        .step(build_enable_ip_forward_cmd())
        .step(build_set_link_up_cmd(&spec.name))
}

/// Deletes the masquerade rules highest line first, then restores forwarding.
fn remote_stop_op(rules: &[u32]) -> Operation {
    let mut lines = rules.to_vec();
    lines.sort_unstable_by(|a, b| b.cmp(a));
    lines.dedup();

    let mut op = Operation::remote(JoinPolicy::Chained);
    op.extend(lines.into_iter().map(build_del_nat_rule_cmd));
    op.push(build_restore_ip_forward_cmd());
    op.push(build_remove_ip_forward_backup_cmd());
    op
}

fn local_start_steps(
    spec: &TunSpec,
    public_ip: IpAddr,
    gateway: IpAddr,
    local_dev: &str,
) -> Vec<String> {
    let dev = spec.name.to_string();
    let mut steps = vec![
        build_add_p2p_address_cmd(spec.laddr, spec.raddr, &spec.name),
        build_set_link_up_cmd(&spec.name),
        build_add_host_route_cmd(public_ip, gateway, local_dev),
    ];

    match &spec.routing {
        RoutingPolicy::All { exclude } => {
            steps.extend(
                default_covering_prefixes()
                    .iter()
                    .map(|p| build_add_route_cmd(&p.to_string(), &dev)),
            );
            // Assumes the excluded subnets sit behind the default device.
            steps.extend(
                exclude
                    .iter()
                    .map(|p| build_add_route_cmd(&p.to_string(), local_dev)),
            );
        }
        RoutingPolicy::Subnets(subnets) => {
            steps.extend(
                subnets
                    .iter()
                    .map(|p| build_add_route_cmd(&p.to_string(), &dev)),
            );
        }
    }
    steps
}

/// Routes through the tunnel device disappear with the device, so only the
/// routes bound to the local default device are removed.
fn local_stop_steps(spec: &TunSpec, public_ip: IpAddr, local_dev: &str) -> Vec<String> {
    let mut steps = vec![build_del_host_route_cmd(public_ip, local_dev)];
    steps.extend(
        spec.routing
            .excluded()
            .iter()
            .map(|p| build_del_route_cmd(&p.to_string(), local_dev)),
    );
    steps
}
