//! Simulated switch fabric
//!
//! An in-process [`Transport`] that wires switch ports together with
//! virtual cables. A packet-out on one end of a cable is delivered as an
//! inbound packet on the other end, provided the receiving switch has the
//! discovery intercept rule installed. Cables can be cut and restored to
//! exercise link failure.

use crate::discovery::{DiscoveryEngine, PacketVerdict};
use crate::transport::{InterceptRule, Transport};
use crate::types::{dpid_to_str, Dpid, Endpoint, PortNo};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A frame emitted by a switch port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub src: Endpoint,
    pub payload: Vec<u8>,
}

/// Receiving side of the fabric's wire
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

#[derive(Debug, Default)]
struct Wiring {
    cables: HashMap<Endpoint, Endpoint>,
    // both ends of every cut cable
    cut: HashSet<Endpoint>,
}

/// Virtual cabling between switch ports
#[derive(Debug)]
pub struct Fabric {
    wiring: RwLock<Wiring>,
    rules: Mutex<HashMap<Dpid, InterceptRule>>,
    sent: Mutex<HashMap<Endpoint, u64>>,
    wire: mpsc::UnboundedSender<Frame>,
}

impl Fabric {
    pub fn new() -> (Arc<Self>, FrameReceiver) {
        let (wire, rx) = mpsc::unbounded_channel();
        let fabric = Arc::new(Self {
            wiring: RwLock::new(Wiring::default()),
            rules: Mutex::new(HashMap::new()),
            sent: Mutex::new(HashMap::new()),
            wire,
        });
        (fabric, rx)
    }

    /// Plug a cable between `a` and `b`, replacing whatever either end was
    /// plugged into before
    pub fn connect(&self, a: Endpoint, b: Endpoint) {
        let mut wiring = self.wiring.write();
        for end in [a, b] {
            if let Some(old) = wiring.cables.remove(&end) {
                wiring.cables.remove(&old);
                wiring.cut.remove(&old);
            }
            wiring.cut.remove(&end);
        }
        wiring.cables.insert(a, b);
        wiring.cables.insert(b, a);
    }

    /// Cut the cable between `a` and `b`. Returns false if they are not
    /// cabled together.
    pub fn cut(&self, a: Endpoint, b: Endpoint) -> bool {
        let mut wiring = self.wiring.write();
        if wiring.cables.get(&a) != Some(&b) {
            return false;
        }
        wiring.cut.insert(a);
        wiring.cut.insert(b);
        true
    }

    /// Repair a cut cable. Returns false if they are not cabled together.
    pub fn restore(&self, a: Endpoint, b: Endpoint) -> bool {
        let mut wiring = self.wiring.write();
        if wiring.cables.get(&a) != Some(&b) {
            return false;
        }
        wiring.cut.remove(&a);
        wiring.cut.remove(&b);
        true
    }

    /// The live far end of the cable plugged into `ep`
    pub fn peer(&self, ep: &Endpoint) -> Option<Endpoint> {
        let wiring = self.wiring.read();
        if wiring.cut.contains(ep) {
            return None;
        }
        wiring.cables.get(ep).copied()
    }

    pub fn has_intercept_rule(&self, dpid: Dpid) -> bool {
        self.rules.lock().contains_key(&dpid)
    }

    /// Frames transmitted out of `ep` so far
    pub fn sent_count(&self, ep: &Endpoint) -> u64 {
        self.sent.lock().get(ep).copied().unwrap_or(0)
    }

    /// Work out what the switch at the far end of `frame` hands to the
    /// controller, if anything
    pub fn route(&self, frame: &Frame) -> Option<(Endpoint, Vec<u8>)> {
        let dst = self.peer(&frame.src)?;
        let rule = self.rules.lock().get(&dst.dpid).copied()?;
        if !matches_rule(&rule, &frame.payload) {
            return None;
        }
        let len = frame.payload.len().min(rule.max_len as usize);
        Some((dst, frame.payload[..len].to_vec()))
    }

    /// Deliver frames from the wire to `engine` until `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        mut frames: FrameReceiver,
        engine: DiscoveryEngine,
        shutdown: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let Some((dst, data)) = self.route(&frame) else {
                trace!(src = %frame.src, "Frame lost on the wire");
                continue;
            };
            let verdict = engine.on_inbound_packet(dst.dpid, dst.port_no, &data);
            if verdict == PacketVerdict::Ignored {
                debug!(src = %frame.src, dst = %dst, "Frame not consumed by discovery");
            }
        }
        debug!("Fabric delivery stopped");
    }
}

fn matches_rule(rule: &InterceptRule, frame: &[u8]) -> bool {
    if frame.len() < 14 {
        return false;
    }
    frame[..6] == rule.dl_dst.octets()[..] && u16::from_be_bytes([frame[12], frame[13]]) == rule.dl_type
}

impl Transport for Fabric {
    fn send_packet_out(&self, dpid: Dpid, port_no: PortNo, payload: &[u8]) {
        let src = Endpoint::new(dpid, port_no);
        *self.sent.lock().entry(src).or_insert(0) += 1;
        let frame = Frame {
            src,
            payload: payload.to_vec(),
        };
        if self.wire.send(frame).is_err() {
            trace!(src = %src, "Fabric wire closed");
        }
    }

    fn install_discovery_intercept_rule(&self, dpid: Dpid, rule: InterceptRule) {
        debug!(dpid = %dpid_to_str(dpid), max_len = rule.max_len, "Intercept rule installed");
        self.rules.lock().insert(dpid, rule);
    }
}
