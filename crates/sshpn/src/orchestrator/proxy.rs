//! SOCKS proxy lifecycle

use sshpn_common::{OpTarget, Operation, TunnelError, TunnelResult};
use tracing::{debug, info};

use super::{PhaseOutcome, TunnelOrchestrator};
use crate::commands::{self, PROBE_CMD};
use crate::types::{ProxySpec, TunnelIdentity};

impl TunnelOrchestrator<'_> {
    pub(super) async fn start_proxy(&self, spec: &ProxySpec) -> TunnelResult<PhaseOutcome> {
        if spec.udp {
            return Err(TunnelError::not_supported("UDP forwarding through the proxy"));
        }
        if !spec.routing.is_empty() {
            return Err(TunnelError::not_supported("Routing traffic through the proxy"));
        }

        let cmd = commands::session_init_socks(self.target, &spec.proxy_host, spec.port);
        self.establish(cmd, &TunnelIdentity::Port(spec.port)).await?;
        self.apply(&Operation::single(OpTarget::Remote, PROBE_CMD))
            .await?;

        let bind = commands::socks_bind(&spec.proxy_host, spec.port);
        debug!(bind = %bind, "Dynamic forward active");
        info!(port = spec.port, host = %self.target.host, "SOCKS proxy created");
        Ok(self.notice(format!("SOCKS proxy listening on {}", bind)))
    }

    pub(super) async fn stop_proxy(&self, _spec: &ProxySpec) -> TunnelResult<PhaseOutcome> {
        Err(TunnelError::not_supported("Stopping a proxy"))
    }
}
