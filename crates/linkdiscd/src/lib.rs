//! Link Discovery Daemon for SONiC
//!
//! This crate discovers the physical topology between OpenFlow switches by
//! sending an LLDP probe out of every switch port and recording which probes
//! come back, on which port, and how recently.
//!
//! # Architecture
//!
//! ```text
//!  switch events          +-------------------+   packet-out
//!  (join/leave, port  --->|  DiscoveryEngine  |----------------> Transport
//!   add/del/modify,       |                   |
//!   packet-in)            |  probe sender ----+--> PortSchedule
//!                         |  link sweeper ----+--> LinkTable
//!                         +---------+---------+
//!                                   |
//!                                   v
//!                          LinkEvent::{Up, Down}
//! ```
//!
//! - [`lldp`] builds and parses probe frames.
//! - [`PortSchedule`] keeps per-port probe state in send order.
//! - [`LinkTable`] keeps directional link confirmations.
//! - [`DiscoveryEngine`] runs the probe sender and the link sweeper.
//! - [`Fabric`] is an in-process [`Transport`] used by the lab mode of the
//!   `linkdiscd` binary and by the integration tests.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fabric;
pub mod link_set;
pub mod linked_map;
pub mod lldp;
pub mod port_set;
pub mod transport;
pub mod types;

pub use config::{DiscoveryConfig, LabConfig, LabLink, LabSwitch, LinkdiscConfig, LoggingConfig};
pub use discovery::{DiscoveryEngine, DiscoveryTasks, LinkEvents, PacketVerdict};
pub use error::{DiscoveryError, Result};
pub use fabric::{Fabric, Frame, FrameReceiver};
pub use link_set::{LinkInfo, LinkTable, PortDeleted};
pub use linked_map::LinkedMap;
pub use port_set::{NextWake, PortSchedule, ProbeState, SendPlan};
pub use transport::{InterceptRule, Transport};
pub use types::{Dpid, Endpoint, Link, LinkEvent, MacAddress, PortDesc, PortNo};
