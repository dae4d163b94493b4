//! Core types for link discovery
//!
//! Switches are identified by their 64-bit datapath id and ports by their
//! 32-bit OpenFlow port number.

use serde::{Deserialize, Serialize};
use std::fmt;

/// OpenFlow datapath (switch) id
pub type Dpid = u64;

/// OpenFlow port number
pub type PortNo = u32;

/// Highest physical port number; anything above is a reserved port
/// (IN_PORT, FLOOD, CONTROLLER, LOCAL, ...).
pub const OFPP_MAX: PortNo = 0xffff_ff00;

/// Check if a port number refers to an OpenFlow reserved port
#[inline]
pub fn is_reserved_port(port_no: PortNo) -> bool {
    port_no > OFPP_MAX
}

/// Render a datapath id as fixed-width (16 digit) lowercase hex
pub fn dpid_to_str(dpid: Dpid) -> String {
    format!("{:016x}", dpid)
}

/// Parse a datapath id rendered by [`dpid_to_str`]
pub fn str_to_dpid(s: &str) -> Option<Dpid> {
    if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Dpid::from_str_radix(s, 16).ok()
}

/// MAC address representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Zero MAC address
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// Raw octets
    #[inline]
    pub fn octets(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// One side of a physical link: a port on a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub dpid: Dpid,
    pub port_no: PortNo,
}

impl Endpoint {
    pub const fn new(dpid: Dpid, port_no: PortNo) -> Self {
        Self { dpid, port_no }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", dpid_to_str(self.dpid), self.port_no)
    }
}

/// Directional link: a probe sent from `src` was received at `dst`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl Link {
    pub const fn new(src: Endpoint, dst: Endpoint) -> Self {
        Self { src, dst }
    }

    /// The opposite direction of the same physical link
    #[inline]
    pub const fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Port description as reported by the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: PortNo,
    pub hw_addr: MacAddress,
    /// OFPPC_PORT_DOWN in the port config
    pub admin_down: bool,
    /// OFPPS_LINK_DOWN in the port state
    pub link_down: bool,
}

impl PortDesc {
    /// A port counts as down when it is administratively or link-state down
    #[inline]
    pub fn is_down(&self) -> bool {
        self.admin_down || self.link_down
    }
}

/// Link state change published to topology consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Up { src: Endpoint, dst: Endpoint },
    Down { src: Endpoint, dst: Endpoint },
}

impl LinkEvent {
    pub fn up(link: Link) -> Self {
        LinkEvent::Up {
            src: link.src,
            dst: link.dst,
        }
    }

    pub fn down(link: Link) -> Self {
        LinkEvent::Down {
            src: link.src,
            dst: link.dst,
        }
    }

    /// The directional link this event refers to
    pub fn link(&self) -> Link {
        match *self {
            LinkEvent::Up { src, dst } | LinkEvent::Down { src, dst } => Link::new(src, dst),
        }
    }
}
