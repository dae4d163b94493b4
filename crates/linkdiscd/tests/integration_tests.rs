//! Integration tests for linkdiscd
//!
//! Drives the discovery engine over the simulated fabric with a paused
//! clock:
//! - Bidirectional link confirmation
//! - Link timeout after a cable cut, and rediscovery after repair
//! - Port removal and port down while probing
//! - Switch disconnect

use pretty_assertions::assert_eq;
use sonic_linkdiscd::{
    DiscoveryConfig, DiscoveryEngine, DiscoveryTasks, Dpid, Endpoint, Fabric, InterceptRule, Link,
    LinkEvent, LinkEvents, MacAddress, PacketVerdict, PortDesc, PortNo, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const P1: Endpoint = Endpoint::new(1, 1);
const P2: Endpoint = Endpoint::new(2, 1);

/// Test fixture: engine running over a fabric
struct TestSetup {
    fabric: Arc<Fabric>,
    engine: DiscoveryEngine,
    events: LinkEvents,
    tasks: DiscoveryTasks,
    shutdown: CancellationToken,
    delivery: JoinHandle<()>,
}

impl TestSetup {
    fn new() -> Self {
        let (fabric, frames) = Fabric::new();
        let (engine, events) = DiscoveryEngine::new(DiscoveryConfig::default(), fabric.clone())
            .expect("default config is valid");
        let tasks = engine.spawn();
        let shutdown = CancellationToken::new();
        let delivery = tokio::spawn(fabric.clone().run(frames, engine.clone(), shutdown.clone()));
        Self {
            fabric,
            engine,
            events,
            tasks,
            shutdown,
            delivery,
        }
    }

    /// Join a switch with the given ports, all up
    fn add_switch(&self, dpid: Dpid, ports: &[PortNo]) {
        self.fabric
            .install_discovery_intercept_rule(dpid, InterceptRule::lldp());
        let ports: Vec<PortDesc> = ports.iter().map(|&p| port(p)).collect();
        self.engine.on_switch_connected(dpid, &ports);
    }

    /// Two switches joined by a single cable P1 <-> P2
    fn pair() -> Self {
        let setup = Self::new();
        setup.fabric.connect(P1, P2);
        setup.add_switch(1, &[1]);
        setup.add_switch(2, &[1]);
        setup
    }

    fn drain(&mut self) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }

    fn links(&self) -> Vec<Link> {
        self.engine
            .list_links(None)
            .into_iter()
            .map(|info| Link::new(info.src, info.dst))
            .collect()
    }

    async fn stop(self) {
        self.tasks.shutdown().await;
        self.shutdown.cancel();
        self.delivery.await.expect("delivery task");
    }
}

fn port(port_no: PortNo) -> PortDesc {
    PortDesc {
        port_no,
        hw_addr: MacAddress([0x02, 0, 0, 0, 0, port_no as u8]),
        admin_down: false,
        link_down: false,
    }
}

fn count(events: &[LinkEvent], wanted: LinkEvent) -> usize {
    events.iter().filter(|ev| **ev == wanted).count()
}

#[tokio::test(start_paused = true)]
async fn test_bidirectional_confirmation() {
    let mut setup = TestSetup::pair();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(setup.links(), vec![Link::new(P1, P2), Link::new(P2, P1)]);
    for info in setup.engine.list_links(None) {
        assert!(info.age_secs < 0.1, "age {}", info.age_secs);
    }

    let events = setup.drain();
    assert_eq!(count(&events, LinkEvent::up(Link::new(P1, P2))), 1);
    assert_eq!(count(&events, LinkEvent::up(Link::new(P2, P1))), 1);
    assert_eq!(events.len(), 2);

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_links_stay_up_while_probes_flow() {
    let mut setup = TestSetup::pair();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(setup.links().len(), 2);
    for info in setup.engine.list_links(None) {
        assert!(info.age_secs <= 1.0, "age {}", info.age_secs);
    }
    // only the two initial link-up events
    assert_eq!(setup.drain().len(), 2);
    // roughly one probe per port per period
    let sent = setup.fabric.sent_count(&P1);
    assert!((60..=70).contains(&sent), "sent {}", sent);

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_times_out_after_cut() {
    let mut setup = TestSetup::pair();
    sleep(Duration::from_millis(10)).await;
    setup.drain();

    assert!(setup.fabric.cut(P1, P2));

    // within the link timeout nothing is evicted
    sleep(Duration::from_secs(12)).await;
    assert_eq!(setup.links().len(), 2);
    assert!(setup.drain().is_empty());

    // timeout plus drop threshold has passed
    sleep(Duration::from_secs(4)).await;
    assert!(setup.links().is_empty());
    let events = setup.drain();
    assert_eq!(count(&events, LinkEvent::down(Link::new(P1, P2))), 1);
    assert_eq!(count(&events, LinkEvent::down(Link::new(P2, P1))), 1);

    // no repeated link-down for an already evicted link
    sleep(Duration::from_secs(20)).await;
    assert!(setup.drain().is_empty());

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_rediscovered_after_restore() {
    let mut setup = TestSetup::pair();
    sleep(Duration::from_millis(10)).await;
    assert!(setup.fabric.cut(P1, P2));
    sleep(Duration::from_secs(16)).await;
    assert!(setup.links().is_empty());
    setup.drain();

    assert!(setup.fabric.restore(P1, P2));
    sleep(Duration::from_secs(2)).await;

    assert_eq!(setup.links(), vec![Link::new(P1, P2), Link::new(P2, P1)]);
    let events = setup.drain();
    assert_eq!(count(&events, LinkEvent::up(Link::new(P1, P2))), 1);
    assert_eq!(count(&events, LinkEvent::up(Link::new(P2, P1))), 1);
    assert!(setup.engine.port_state(&P1).unwrap().drop_count <= 1);

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_port_deleted_while_probing() {
    let mut setup = TestSetup::new();
    for p in 1..=4 {
        setup.fabric.connect(Endpoint::new(1, p), Endpoint::new(2, p));
    }
    setup.add_switch(1, &[1, 2, 3, 4]);
    setup.add_switch(2, &[1, 2, 3, 4]);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(setup.links().len(), 8);
    setup.drain();

    // port vanishes between sender passes
    setup.fabric.cut(P1, P2);
    setup.engine.on_port_deleted(1, 1);
    let events = setup.drain();
    assert_eq!(
        events,
        vec![
            LinkEvent::down(Link::new(P1, P2)),
            LinkEvent::down(Link::new(P2, P1)),
        ]
    );
    assert!(setup.engine.port_state(&P1).is_none());

    let sent_p1 = setup.fabric.sent_count(&P1);
    let sent_other = setup.fabric.sent_count(&Endpoint::new(1, 2));
    sleep(Duration::from_secs(5)).await;

    // the sender kept going for every other port
    assert_eq!(setup.fabric.sent_count(&P1), sent_p1);
    assert!(setup.fabric.sent_count(&Endpoint::new(1, 2)) > sent_other);
    assert_eq!(setup.links().len(), 6);
    assert!(!setup.links().contains(&Link::new(P2, P1)));
    assert!(setup.drain().is_empty());

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_port_down_and_up() {
    let mut setup = TestSetup::pair();
    sleep(Duration::from_millis(10)).await;
    setup.drain();

    setup.fabric.cut(P1, P2);
    setup.engine.on_port_modified(1, 1, false, true);
    assert_eq!(setup.drain().len(), 2);
    assert!(setup.links().is_empty());

    let sent = setup.fabric.sent_count(&P1);
    sleep(Duration::from_secs(5)).await;
    // down ports are not transmitted on, but their counters advance
    assert_eq!(setup.fabric.sent_count(&P1), sent);
    let state = setup.engine.port_state(&P1).unwrap();
    assert!(state.is_down);
    assert!(state.drop_count > 0);

    setup.fabric.restore(P1, P2);
    setup.engine.on_port_modified(1, 1, false, false);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(setup.links(), vec![Link::new(P1, P2), Link::new(P2, P1)]);

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_disconnect() {
    let mut setup = TestSetup::new();
    let p3 = Endpoint::new(3, 1);
    let p1b = Endpoint::new(1, 2);
    setup.fabric.connect(P1, P2);
    setup.fabric.connect(p1b, p3);
    setup.add_switch(1, &[1, 2]);
    setup.add_switch(2, &[1]);
    setup.add_switch(3, &[1]);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(setup.links().len(), 4);
    assert_eq!(setup.engine.list_links(Some(3)).len(), 2);
    assert_eq!(setup.engine.list_links(Some(1)).len(), 4);
    setup.drain();

    setup.fabric.cut(p1b, p3);
    setup.engine.on_switch_disconnected(3);
    assert!(!setup.engine.is_connected(3));
    assert!(setup.engine.list_links(Some(3)).is_empty());
    let events = setup.drain();
    assert_eq!(count(&events, LinkEvent::down(Link::new(p3, p1b))), 1);
    assert_eq!(count(&events, LinkEvent::down(Link::new(p1b, p3))), 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(setup.links(), vec![Link::new(P1, P2), Link::new(P2, P1)]);

    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_discovery_traffic() {
    let setup = TestSetup::pair();
    let arp = [0xffu8; 42];
    assert_eq!(
        setup.engine.on_inbound_packet(1, 1, &arp),
        PacketVerdict::Ignored
    );
    assert_eq!(
        setup.engine.on_inbound_packet(1, 1, &[]),
        PacketVerdict::Ignored
    );
    setup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listing_json() {
    let setup = TestSetup::pair();
    sleep(Duration::from_millis(10)).await;

    let json = serde_json::to_value(setup.engine.list_links(Some(1))).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["dp1"], "0000000000000001");
    assert_eq!(rows[0]["port1"], 1);
    assert_eq!(rows[0]["dp2"], "0000000000000002");
    assert_eq!(rows[0]["port2"], 1);

    setup.stop().await;
}
