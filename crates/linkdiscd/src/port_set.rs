//! Per-port probe schedule
//!
//! Every known port has a [`ProbeState`]. Entries are kept in send order:
//! never-sent entries first, then by non-decreasing `last_sent_at`. The
//! sender only has to look at the head of the schedule to find due ports,
//! and can stop at the first entry that is not yet due.

use crate::error::{DiscoveryError, Result};
use crate::linked_map::LinkedMap;
use crate::types::{Dpid, Endpoint, PortNo};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Probe bookkeeping for one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeState {
    /// Port is administratively or link-state down; probes are not transmitted
    pub is_down: bool,
    /// Pre-built probe frame for this port
    pub payload: Arc<[u8]>,
    /// When the last probe was sent; `None` means due immediately
    pub last_sent_at: Option<Instant>,
    /// Probes sent since the last confirmed reception on this port
    pub drop_count: u32,
}

impl ProbeState {
    fn new(is_down: bool, payload: Arc<[u8]>) -> Self {
        Self {
            is_down,
            payload,
            last_sent_at: None,
            drop_count: 0,
        }
    }
}

/// Ports to probe on one sender pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendPlan {
    /// Never-sent ports, sent back to back
    pub immediate: Vec<Endpoint>,
    /// Ports whose period has elapsed, sent with a guard interval between them
    pub due: Vec<Endpoint>,
    /// Expiry of the first not-yet-due port, if the scan stopped early
    pub next_expiry: Option<Instant>,
}

/// When the sender should wake up next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextWake {
    /// A never-sent port is waiting
    Immediate,
    /// The earliest port becomes due at this instant
    At(Instant),
    /// Nothing scheduled; wait for a topology signal
    Idle,
}

/// Ordered set of probe states keyed by endpoint
#[derive(Debug, Default)]
pub struct PortSchedule {
    ports: LinkedMap<Endpoint, ProbeState>,
}

impl PortSchedule {
    pub fn new() -> Self {
        Self {
            ports: LinkedMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn get(&self, ep: &Endpoint) -> Option<&ProbeState> {
        self.ports.get(ep)
    }

    /// Register a port. A new port goes to the front so it is probed on the
    /// next pass; a known port only has its down flag refreshed.
    pub fn add_port(&mut self, ep: Endpoint, is_down: bool, payload: Arc<[u8]>) {
        match self.ports.get_mut(&ep) {
            Some(state) => state.is_down = is_down,
            None => {
                self.ports.prepend(ep, ProbeState::new(is_down, payload));
            }
        }
    }

    /// Record a probe send and move the port to the back of the schedule.
    ///
    /// Fails with [`DiscoveryError::PortNotFound`] if the port was removed
    /// since the caller planned the send.
    pub fn mark_sent(&mut self, ep: &Endpoint, now: Instant) -> Result<ProbeState> {
        let state = self
            .ports
            .get_mut(ep)
            .ok_or(DiscoveryError::PortNotFound(*ep))?;
        state.last_sent_at = Some(now);
        state.drop_count = state.drop_count.saturating_add(1);
        let snapshot = state.clone();
        self.ports.move_to_back(ep);
        Ok(snapshot)
    }

    /// A probe was received on this port: reset its drop count.
    /// Returns false if the port is unknown.
    pub fn mark_received(&mut self, ep: &Endpoint) -> bool {
        match self.ports.get_mut(ep) {
            Some(state) => {
                state.drop_count = 0;
                true
            }
            None => false,
        }
    }

    /// Make the port due immediately. Returns false if the port is unknown.
    pub fn move_to_front(&mut self, ep: &Endpoint) -> bool {
        match self.ports.get_mut(ep) {
            Some(state) => state.last_sent_at = None,
            None => return false,
        }
        self.ports.move_to_front(ep)
    }

    /// Update the down flag. The send timestamp is cleared, so the entry is
    /// repositioned among the never-sent ports at the front.
    /// Returns false if the port is unknown.
    pub fn set_down(&mut self, ep: &Endpoint, is_down: bool) -> bool {
        match self.ports.get_mut(ep) {
            Some(state) => {
                state.is_down = is_down;
                state.last_sent_at = None;
            }
            None => return false,
        }
        self.ports.move_to_front(ep)
    }

    pub fn remove(&mut self, ep: &Endpoint) -> Option<ProbeState> {
        self.ports.remove(ep)
    }

    /// Ports currently scheduled on a switch
    pub fn ports_of(&self, dpid: Dpid) -> Vec<PortNo> {
        self.ports
            .keys()
            .filter(|ep| ep.dpid == dpid)
            .map(|ep| ep.port_no)
            .collect()
    }

    /// Entries in send order
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &ProbeState)> {
        self.ports.iter()
    }

    /// Collect the ports to probe at `now`, stopping at the first entry
    /// whose period has not elapsed.
    pub fn plan_sends(&self, now: Instant, period: Duration) -> SendPlan {
        let mut plan = SendPlan::default();
        for (ep, state) in self.ports.iter() {
            match state.last_sent_at {
                None => plan.immediate.push(*ep),
                Some(sent) => {
                    let expire = sent + period;
                    if expire <= now {
                        plan.due.push(*ep);
                    } else {
                        plan.next_expiry = Some(expire);
                        break;
                    }
                }
            }
        }
        plan
    }

    /// Next wake-up derived from the head of the schedule
    pub fn next_wake(&self, period: Duration) -> NextWake {
        match self.ports.front() {
            None => NextWake::Idle,
            Some((_, state)) => match state.last_sent_at {
                None => NextWake::Immediate,
                Some(sent) => NextWake::At(sent + period),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PERIOD: Duration = Duration::from_millis(900);

    fn payload() -> Arc<[u8]> {
        Arc::from(vec![0u8; 4])
    }

    fn ep(dpid: Dpid, port_no: PortNo) -> Endpoint {
        Endpoint::new(dpid, port_no)
    }

    fn order(schedule: &PortSchedule) -> Vec<Endpoint> {
        schedule.iter().map(|(ep, _)| *ep).collect()
    }

    fn assert_send_order(schedule: &PortSchedule) {
        let mut seen_sent: Option<Instant> = None;
        for (ep, state) in schedule.iter() {
            match (state.last_sent_at, seen_sent) {
                (None, Some(_)) => panic!("never-sent {} after a sent entry", ep),
                (Some(ts), Some(prev)) => assert!(prev <= ts, "{} out of order", ep),
                (Some(ts), None) => seen_sent = Some(ts),
                (None, None) => {}
            }
        }
    }

    #[test]
    fn test_add_port_goes_to_front() {
        let mut schedule = PortSchedule::new();
        schedule.add_port(ep(1, 1), false, payload());
        schedule.add_port(ep(1, 2), false, payload());
        assert_eq!(order(&schedule), vec![ep(1, 2), ep(1, 1)]);

        // re-adding a known port only refreshes the down flag
        schedule.add_port(ep(1, 1), true, payload());
        assert_eq!(order(&schedule), vec![ep(1, 2), ep(1, 1)]);
        assert!(schedule.get(&ep(1, 1)).unwrap().is_down);
    }

    #[test]
    fn test_mark_sent_moves_to_back_and_counts() {
        let now = Instant::now();
        let mut schedule = PortSchedule::new();
        schedule.add_port(ep(1, 1), false, payload());
        schedule.add_port(ep(1, 2), true, payload());

        let state = schedule.mark_sent(&ep(1, 2), now).unwrap();
        assert!(state.is_down);
        assert_eq!(state.drop_count, 1);
        assert_eq!(state.last_sent_at, Some(now));
        assert_eq!(order(&schedule), vec![ep(1, 1), ep(1, 2)]);

        schedule.mark_sent(&ep(1, 2), now).unwrap();
        assert_eq!(schedule.get(&ep(1, 2)).unwrap().drop_count, 2);

        assert!(schedule.mark_received(&ep(1, 2)));
        assert_eq!(schedule.get(&ep(1, 2)).unwrap().drop_count, 0);
        assert_eq!(order(&schedule), vec![ep(1, 1), ep(1, 2)]);
    }

    #[test]
    fn test_removed_port_is_not_found() {
        let mut schedule = PortSchedule::new();
        schedule.add_port(ep(1, 1), false, payload());
        schedule.remove(&ep(1, 1));

        let err = schedule.mark_sent(&ep(1, 1), Instant::now()).unwrap_err();
        assert!(matches!(err, DiscoveryError::PortNotFound(e) if e == ep(1, 1)));
        assert!(!schedule.mark_received(&ep(1, 1)));
        assert!(!schedule.move_to_front(&ep(1, 1)));
        assert!(!schedule.set_down(&ep(1, 1), true));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_move_to_front_clears_timestamp() {
        let now = Instant::now();
        let mut schedule = PortSchedule::new();
        schedule.add_port(ep(1, 1), false, payload());
        schedule.add_port(ep(2, 1), false, payload());
        schedule.mark_sent(&ep(2, 1), now).unwrap();
        schedule.mark_sent(&ep(1, 1), now).unwrap();
        assert_eq!(order(&schedule), vec![ep(2, 1), ep(1, 1)]);

        assert!(schedule.move_to_front(&ep(1, 1)));
        assert_eq!(order(&schedule), vec![ep(1, 1), ep(2, 1)]);
        assert_eq!(schedule.get(&ep(1, 1)).unwrap().last_sent_at, None);
        assert_eq!(schedule.next_wake(PERIOD), NextWake::Immediate);
    }

    #[test]
    fn test_set_down_keeps_never_sent_first() {
        let now = Instant::now();
        let mut schedule = PortSchedule::new();
        for port in 1..=3 {
            schedule.add_port(ep(1, port), false, payload());
        }
        for port in 1..=3 {
            schedule.mark_sent(&ep(1, port), now).unwrap();
        }

        assert!(schedule.set_down(&ep(1, 2), true));
        assert_eq!(order(&schedule)[0], ep(1, 2));
        assert_send_order(&schedule);

        assert!(schedule.set_down(&ep(1, 3), false));
        assert_eq!(order(&schedule)[0], ep(1, 3));
        assert!(!schedule.get(&ep(1, 3)).unwrap().is_down);
        assert_send_order(&schedule);
    }

    #[test]
    fn test_plan_sends_stops_at_first_not_due() {
        let t0 = Instant::now();
        let mut schedule = PortSchedule::new();
        for port in 1..=4 {
            schedule.add_port(ep(1, port), false, payload());
        }
        // 1 and 2 sent at t0, 3 at t0+500ms, 4 never sent
        schedule.mark_sent(&ep(1, 1), t0).unwrap();
        schedule.mark_sent(&ep(1, 2), t0).unwrap();
        schedule.mark_sent(&ep(1, 3), t0 + Duration::from_millis(500)).unwrap();

        let plan = schedule.plan_sends(t0 + Duration::from_millis(1000), PERIOD);
        assert_eq!(plan.immediate, vec![ep(1, 4)]);
        assert_eq!(plan.due, vec![ep(1, 1), ep(1, 2)]);
        assert_eq!(plan.next_expiry, Some(t0 + Duration::from_millis(1400)));

        let plan = schedule.plan_sends(t0 + Duration::from_millis(100), PERIOD);
        assert!(plan.due.is_empty());
        assert_eq!(plan.next_expiry, Some(t0 + PERIOD));
    }

    #[test]
    fn test_next_wake() {
        let t0 = Instant::now();
        let mut schedule = PortSchedule::new();
        assert_eq!(schedule.next_wake(PERIOD), NextWake::Idle);

        schedule.add_port(ep(1, 1), false, payload());
        assert_eq!(schedule.next_wake(PERIOD), NextWake::Immediate);

        schedule.mark_sent(&ep(1, 1), t0).unwrap();
        assert_eq!(schedule.next_wake(PERIOD), NextWake::At(t0 + PERIOD));
    }

    #[test]
    fn test_ports_of() {
        let mut schedule = PortSchedule::new();
        schedule.add_port(ep(1, 1), false, payload());
        schedule.add_port(ep(2, 1), false, payload());
        schedule.add_port(ep(1, 7), false, payload());
        let mut ports = schedule.ports_of(1);
        ports.sort();
        assert_eq!(ports, vec![1, 7]);
        assert!(schedule.ports_of(3).is_empty());
    }

    #[test]
    fn test_order_invariant_under_random_operations() {
        let mut now = Instant::now();
        let mut schedule = PortSchedule::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let target = ep(seed % 3 + 1, (seed >> 8) as u32 % 8 + 1);
            now += Duration::from_millis(seed % 50);

            match (seed >> 32) % 6 {
                0 => schedule.add_port(target, seed & 1 == 0, payload()),
                1 | 2 => {
                    let _ = schedule.mark_sent(&target, now);
                }
                3 => {
                    schedule.set_down(&target, seed & 2 == 0);
                }
                4 => {
                    schedule.move_to_front(&target);
                }
                _ => {
                    if seed & 4 == 0 {
                        schedule.remove(&target);
                    } else {
                        schedule.mark_received(&target);
                    }
                }
            }
            assert_send_order(&schedule);
        }
    }
}
