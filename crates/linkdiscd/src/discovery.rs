//! Discovery engine
//!
//! Owns the port schedule and the link table and drives them with two
//! tasks:
//!
//! - the probe sender, which walks the schedule in send order, emits
//!   probes for due ports and sleeps until the head of the schedule
//!   becomes due again or a topology event wakes it;
//! - the link sweeper, which periodically evicts stale links whose source
//!   port keeps dropping probes or no longer exists.
//!
//! Each table sits behind its own mutex. A lock is held for one table
//! operation only and the two locks are never held together.

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::link_set::{LinkInfo, LinkTable, PortDeleted};
use crate::lldp;
use crate::port_set::{NextWake, PortSchedule, ProbeState};
use crate::transport::Transport;
use crate::types::{
    dpid_to_str, is_reserved_port, Dpid, Endpoint, Link, LinkEvent, PortDesc, PortNo,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of offering an inbound frame to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketVerdict {
    /// Not a discovery probe; the caller should keep processing it
    Ignored,
    /// A probe was consumed. `drop` asks the transport to discard the
    /// frame buffered on the switch.
    Handled { drop: bool },
}

/// Receiving side of the link event stream
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

struct Shared {
    config: DiscoveryConfig,
    transport: Arc<dyn Transport>,
    ports: Mutex<PortSchedule>,
    links: Mutex<LinkTable>,
    switches: Mutex<HashSet<Dpid>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    probe_wake: Notify,
    sweep_wake: Notify,
    shutdown: CancellationToken,
}

/// Handle to the discovery engine.
///
/// Cloning is cheap; every clone drives the same tables. Event handlers
/// are synchronous and never block, so the switch-management layer can
/// call them straight from its dispatch loop.
#[derive(Clone)]
pub struct DiscoveryEngine {
    shared: Arc<Shared>,
}

/// Running probe sender and link sweeper
pub struct DiscoveryTasks {
    shutdown: CancellationToken,
    probe: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl DiscoveryTasks {
    /// Stop both loops and wait for them to return
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.probe.await {
            warn!(error = %e, "Probe sender task failed");
        }
        if let Err(e) = self.sweep.await {
            warn!(error = %e, "Link sweeper task failed");
        }
        info!("Discovery engine stopped");
    }
}

impl DiscoveryEngine {
    /// Create an engine with empty tables.
    ///
    /// Link up/down events are published on the returned receiver. The
    /// loops do not run until [`DiscoveryEngine::spawn`] is called.
    pub fn new(config: DiscoveryConfig, transport: Arc<dyn Transport>) -> Result<(Self, LinkEvents)> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            transport,
            ports: Mutex::new(PortSchedule::new()),
            links: Mutex::new(LinkTable::new()),
            switches: Mutex::new(HashSet::new()),
            events,
            probe_wake: Notify::new(),
            sweep_wake: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        Ok((Self { shared }, rx))
    }

    /// Start the probe sender and link sweeper on the current runtime
    pub fn spawn(&self) -> DiscoveryTasks {
        let probe = tokio::spawn(probe_loop(self.shared.clone()));
        let sweep = tokio::spawn(sweep_loop(self.shared.clone()));
        info!(
            send_period_ms = self.shared.config.send_period_per_port_ms,
            sweep_period_ms = self.shared.config.sweep_period_ms,
            "Discovery engine started"
        );
        DiscoveryTasks {
            shutdown: self.shared.shutdown.clone(),
            probe,
            sweep,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.shared.config
    }

    /// A switch joined: register it and add every reported port
    #[instrument(skip_all, fields(dpid = %dpid_to_str(dpid), ports = ports.len()))]
    pub fn on_switch_connected(&self, dpid: Dpid, ports: &[PortDesc]) {
        self.shared.switches.lock().insert(dpid);
        info!("Switch connected");
        for port in ports {
            self.on_port_added(dpid, port);
        }
    }

    /// A switch left: delete all of its scheduled ports, then forget it
    #[instrument(skip_all, fields(dpid = %dpid_to_str(dpid)))]
    pub fn on_switch_disconnected(&self, dpid: Dpid) {
        let ports = self.shared.ports.lock().ports_of(dpid);
        for port_no in ports {
            self.on_port_deleted(dpid, port_no);
        }
        self.shared.switches.lock().remove(&dpid);
        info!("Switch disconnected");
    }

    pub fn on_port_added(&self, dpid: Dpid, port: &PortDesc) {
        if is_reserved_port(port.port_no) {
            return;
        }
        self.shared.switches.lock().insert(dpid);

        let ep = Endpoint::new(dpid, port.port_no);
        let payload = lldp::encode(dpid, port.port_no, port.hw_addr, self.shared.config.probe_ttl_secs);
        let is_down = port.is_down();
        self.shared.ports.lock().add_port(ep, is_down, Arc::from(payload));
        debug!(port = %ep, is_down, "Port added");
        self.shared.probe_wake.notify_one();
    }

    pub fn on_port_deleted(&self, dpid: Dpid, port_no: PortNo) {
        if is_reserved_port(port_no) {
            return;
        }
        let ep = Endpoint::new(dpid, port_no);
        debug!(port = %ep, "Port deleted");
        self.shared.ports.lock().remove(&ep);
        self.shared.link_down(&ep);
        self.shared.probe_wake.notify_one();
        self.shared.sweep_wake.notify_one();
    }

    pub fn on_port_modified(&self, dpid: Dpid, port_no: PortNo, admin_down: bool, link_down: bool) {
        if is_reserved_port(port_no) {
            return;
        }
        let ep = Endpoint::new(dpid, port_no);
        let is_down = admin_down || link_down;
        if !self.shared.ports.lock().set_down(&ep, is_down) {
            debug!(port = %ep, "Modify for unscheduled port");
        }
        debug!(port = %ep, is_down, "Port modified");
        if is_down {
            self.shared.link_down(&ep);
        }
        self.shared.probe_wake.notify_one();
    }

    /// Offer a frame received on `(dpid, in_port)` to the engine.
    ///
    /// Every frame the transport could not classify lands here, so
    /// anything that does not decode as a probe is routine and only
    /// logged at debug level.
    pub fn on_inbound_packet(&self, dpid: Dpid, in_port: PortNo, data: &[u8]) -> PacketVerdict {
        let (src_dpid, src_port) = match lldp::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(dpid = %dpid_to_str(dpid), in_port, error = %e, "Ignoring packet");
                return PacketVerdict::Ignored;
            }
        };

        let src = Endpoint::new(src_dpid, src_port);
        let dst = Endpoint::new(dpid, in_port);
        let link = Link::new(src, dst);
        self.shared.link_confirmed(link, Instant::now());

        PacketVerdict::Handled {
            drop: self.shared.config.explicit_drop,
        }
    }

    /// Current links, optionally only those touching `dpid`
    pub fn list_links(&self, dpid: Option<Dpid>) -> Vec<LinkInfo> {
        self.shared.links.lock().list(Instant::now(), dpid)
    }

    /// Snapshot of a port's probe state
    pub fn port_state(&self, ep: &Endpoint) -> Option<ProbeState> {
        self.shared.ports.lock().get(ep).cloned()
    }

    pub fn is_connected(&self, dpid: Dpid) -> bool {
        self.shared.is_connected(dpid)
    }
}

impl Shared {
    fn is_connected(&self, dpid: Dpid) -> bool {
        self.switches.lock().contains(&dpid)
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!(link = %event.link(), "Link event receiver closed");
        }
    }

    fn link_confirmed(&self, link: Link, now: Instant) {
        let (created, bidirectional) = {
            let mut links = self.links.lock();
            let created = !links.contains(&link);
            (created, links.update(link, now))
        };
        if created {
            info!(link = %link, "Link up");
            self.emit(LinkEvent::up(link));
        }

        // any successful reception proves the receiving port alive
        if !self.ports.lock().mark_received(&link.dst) {
            debug!(port = %link.dst, "Probe received on unscheduled port");
            return;
        }
        if !bidirectional && self.ports.lock().move_to_front(&link.dst) {
            // the reverse direction is likely up as well; probe it now
            self.probe_wake.notify_one();
        }
    }

    /// Cascade a port going away into the link table
    fn link_down(&self, ep: &Endpoint) {
        let PortDeleted { peer, removed } = match self.links.lock().port_deleted(ep) {
            Ok(deleted) => deleted,
            Err(e) => {
                debug!(port = %ep, error = %e, "No link to remove");
                return;
            }
        };
        for link in removed {
            info!(link = %link, "Link down: port removed");
            self.emit(LinkEvent::down(link));
        }
        if self.is_connected(peer.dpid) {
            self.ports.lock().move_to_front(&peer);
        }
    }

    fn send_probe(&self, ep: &Endpoint, now: Instant) {
        let state = match self.ports.lock().mark_sent(ep, now) {
            Ok(state) => state,
            Err(e) => {
                // removed since the pass was planned
                debug!(port = %ep, error = %e, "Skipping probe");
                return;
            }
        };
        if state.is_down {
            return;
        }
        self.transport.send_packet_out(ep.dpid, ep.port_no, &state.payload);
    }

    /// The source of an expired link can no longer refresh it: its switch
    /// is gone, its port is unscheduled, or the port keeps dropping probes.
    fn source_silent(&self, ep: &Endpoint) -> bool {
        if !self.is_connected(ep.dpid) {
            return true;
        }
        self.ports
            .lock()
            .get(ep)
            .map_or(true, |state| state.drop_count > self.config.link_drop_threshold)
    }

    /// One sweep pass at `now`. Returns the evicted links.
    fn sweep(&self, now: Instant) -> Vec<Link> {
        let timeout = self.config.link_timeout();
        let expired = self.links.lock().expired(now, timeout);
        let candidates: Vec<Link> = expired
            .into_iter()
            .filter(|link| self.source_silent(&link.src))
            .collect();

        let mut deleted = Vec::with_capacity(candidates.len());
        for link in candidates {
            match self.links.lock().remove_if_stale(&link, now, timeout) {
                Ok(true) => deleted.push(link),
                Ok(false) => debug!(link = %link, "Link refreshed during sweep"),
                Err(e) => debug!(error = %e, "Link already removed"),
            }
        }

        for link in &deleted {
            info!(link = %link, "Link down: probe timeout");
            self.emit(LinkEvent::down(*link));

            let rev_link = link.reverse();
            if deleted.contains(&rev_link) {
                continue;
            }
            // the reverse direction is most likely gone too; check it early
            if let Some(expire) = now.checked_sub(timeout) {
                self.links.lock().adjust_reverse_timestamp(&rev_link, expire);
            }
            if self.is_connected(link.dst.dpid) {
                self.ports.lock().move_to_front(&link.dst);
                self.probe_wake.notify_one();
            }
        }
        deleted
    }
}

async fn wait_for(wake: NextWake) {
    match wake {
        NextWake::Immediate => {}
        NextWake::At(deadline) => time::sleep_until(deadline).await,
        NextWake::Idle => std::future::pending::<()>().await,
    }
}

async fn probe_loop(shared: Arc<Shared>) {
    let period = shared.config.send_period_per_port();
    let guard = shared.config.send_guard();

    loop {
        let plan = shared.ports.lock().plan_sends(Instant::now(), period);

        for ep in &plan.immediate {
            shared.send_probe(ep, Instant::now());
        }
        for (i, ep) in plan.due.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => return,
                    _ = time::sleep(guard) => {}
                }
            }
            shared.send_probe(ep, Instant::now());
        }

        let wake = shared.ports.lock().next_wake(period);
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return,
            _ = shared.probe_wake.notified() => {}
            _ = wait_for(wake) => {}
        }
    }
}

async fn sweep_loop(shared: Arc<Shared>) {
    let period = shared.config.sweep_period();

    loop {
        let evicted = shared.sweep(Instant::now());
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Sweep evicted links");
        }

        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return,
            _ = shared.sweep_wake.notified() => {}
            _ = time::sleep(period) => {}
        }
    }
}
