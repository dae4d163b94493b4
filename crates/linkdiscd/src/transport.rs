//! Switch transport seam
//!
//! The discovery core never talks to switches directly. Packet-out and
//! flow installation go through a [`Transport`] supplied by the
//! switch-management layer.

use crate::lldp::{ETH_TYPE_LLDP, LLDP_MAC_NEAREST_BRIDGE, PROBE_FRAME_LEN};
use crate::types::{Dpid, MacAddress, PortNo};

/// Flow rule that sends discovery frames to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptRule {
    pub dl_dst: MacAddress,
    pub dl_type: u16,
    /// Bytes of each matched frame forwarded to the controller
    pub max_len: u16,
}

impl InterceptRule {
    /// Match LLDP to the nearest-bridge address and punt whole probes
    pub fn lldp() -> Self {
        Self {
            dl_dst: LLDP_MAC_NEAREST_BRIDGE,
            dl_type: ETH_TYPE_LLDP,
            max_len: PROBE_FRAME_LEN as u16,
        }
    }
}

/// Packet and flow primitives provided by the switch-management layer.
///
/// Implementations must not block: `send_packet_out` is a fire-and-forget
/// enqueue. Failures are not reported back; a port whose probes never
/// arrive is eventually classified by its drop count.
pub trait Transport: Send + Sync + 'static {
    /// Emit `payload` out of `port_no` on switch `dpid`
    fn send_packet_out(&self, dpid: Dpid, port_no: PortNo, payload: &[u8]);

    /// Install `rule` on a newly joined switch. Called by the flow-table
    /// manager, not by the discovery engine.
    fn install_discovery_intercept_rule(&self, dpid: Dpid, rule: InterceptRule);
}
