//! L2 (tap) tunnel lifecycle
//!
//! Only the device pair is created. Addressing (DHCP) and routing are
//! rejected up front rather than silently skipped.

use sshpn_common::{OpTarget, Operation, TunnelError, TunnelResult};
use tracing::info;

use super::{PhaseOutcome, TunnelOrchestrator};
use crate::commands::build_show_link_cmd;
use crate::types::{TapSpec, TunnelIdentity};

impl TunnelOrchestrator<'_> {
    pub(super) async fn start_tap(&self, spec: &TapSpec) -> TunnelResult<PhaseOutcome> {
        if spec.dhcp {
            return Err(TunnelError::not_supported("DHCP on tap tunnels"));
        }
        if spec.all {
            return Err(TunnelError::not_supported("Routing all traffic over a tap tunnel"));
        }

        self.open_session(&TunnelIdentity::Device(spec.name)).await?;

        // Confirms the remote end of the device exists.
        let probe = Operation::single(OpTarget::Remote, build_show_link_cmd(&spec.name));
        self.apply(&probe).await?;

        info!(device = %spec.name, "Tap devices are up but have no addresses or routes");
        info!(device = %spec.name, host = %self.target.host, "L2 tunnel created");
        Ok(self.notice("L2 tunnel created successfully"))
    }

    pub(super) async fn stop_tap(&self, _spec: &TapSpec) -> TunnelResult<PhaseOutcome> {
        Err(TunnelError::not_supported("Stopping a tap tunnel"))
    }
}
