//! Directional link table
//!
//! A physical link is tracked as two independent records, one per
//! direction. Each record carries the time its direction was last
//! confirmed by a received probe.

use crate::error::{DiscoveryError, Result};
use crate::types::{dpid_to_str, Dpid, Endpoint, Link};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Links removed by [`LinkTable::port_deleted`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDeleted {
    /// The endpoint the deleted port was linked to
    pub peer: Endpoint,
    /// Removed records: the forward link, then the reverse one if it existed
    pub removed: Vec<Link>,
}

/// One row of the link listing
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    pub src: Endpoint,
    pub dst: Endpoint,
    /// Seconds since this direction was last confirmed
    pub age_secs: f64,
}

impl Serialize for LinkInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("LinkInfo", 5)?;
        s.serialize_field("dp1", &dpid_to_str(self.src.dpid))?;
        s.serialize_field("port1", &self.src.port_no)?;
        s.serialize_field("dp2", &dpid_to_str(self.dst.dpid))?;
        s.serialize_field("port2", &self.dst.port_no)?;
        s.serialize_field("age_secs", &self.age_secs)?;
        s.end()
    }
}

/// Link -> last confirmation time
#[derive(Debug, Default)]
pub struct LinkTable {
    links: HashMap<Link, Instant>,
    // src -> dst of the most recently confirmed outgoing link
    peers: HashMap<Endpoint, Endpoint>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, link: &Link) -> bool {
        self.links.contains_key(link)
    }

    /// Last confirmation time of a directional link
    pub fn confirmed_at(&self, link: &Link) -> Option<Instant> {
        self.links.get(link).copied()
    }

    /// Create or refresh `link`. Returns true if the reverse direction is
    /// also present, i.e. the link is confirmed both ways.
    pub fn update(&mut self, link: Link, now: Instant) -> bool {
        self.links.insert(link, now);
        self.peers.insert(link.src, link.dst);
        self.links.contains_key(&link.reverse())
    }

    /// Delete exactly this directional record
    pub fn remove(&mut self, link: &Link) -> Result<()> {
        if self.links.remove(link).is_none() {
            return Err(DiscoveryError::LinkNotFound(*link));
        }
        if self.peers.get(&link.src) == Some(&link.dst) {
            self.peers.remove(&link.src);
        }
        Ok(())
    }

    /// Drop both directions of the link attached to `ep`.
    ///
    /// Fails with [`DiscoveryError::PortNotFound`] if `ep` has no outgoing
    /// link. Both records go in the same call, so a reader holding the
    /// table never sees one direction without the other.
    pub fn port_deleted(&mut self, ep: &Endpoint) -> Result<PortDeleted> {
        let peer = self
            .peers
            .remove(ep)
            .ok_or(DiscoveryError::PortNotFound(*ep))?;

        let link = Link::new(*ep, peer);
        let mut removed = Vec::with_capacity(2);
        if self.links.remove(&link).is_some() {
            removed.push(link);
        }

        // reverse link might not exist
        let rev_link = link.reverse();
        if self.links.remove(&rev_link).is_some() {
            removed.push(rev_link);
        }
        if self.peers.get(&peer) == Some(ep) {
            self.peers.remove(&peer);
        }

        Ok(PortDeleted { peer, removed })
    }

    /// Delete `link` only if it is still older than `timeout` at `now`.
    ///
    /// Returns false when a probe refreshed the record after the caller
    /// collected it as expired.
    pub fn remove_if_stale(&mut self, link: &Link, now: Instant, timeout: Duration) -> Result<bool> {
        match self.links.get(link) {
            None => Err(DiscoveryError::LinkNotFound(*link)),
            Some(ts) if *ts + timeout < now => {
                self.remove(link)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Overwrite the confirmation time of `rev_link` if present.
    /// Returns false when the record does not exist.
    pub fn adjust_reverse_timestamp(&mut self, rev_link: &Link, timestamp: Instant) -> bool {
        match self.links.get_mut(rev_link) {
            Some(ts) => {
                *ts = timestamp;
                true
            }
            None => false,
        }
    }

    /// Records, optionally restricted to links touching a switch
    pub fn items(&self, dpid: Option<Dpid>) -> Vec<(Link, Instant)> {
        self.links
            .iter()
            .filter(|(link, _)| match dpid {
                None => true,
                Some(id) => link.src.dpid == id || link.dst.dpid == id,
            })
            .map(|(link, ts)| (*link, *ts))
            .collect()
    }

    /// Records whose confirmation is older than `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<Link> {
        self.links
            .iter()
            .filter(|(_, ts)| **ts + timeout < now)
            .map(|(link, _)| *link)
            .collect()
    }

    /// Listing with ages relative to `now`, sorted by endpoints
    pub fn list(&self, now: Instant, dpid: Option<Dpid>) -> Vec<LinkInfo> {
        let mut items: Vec<LinkInfo> = self
            .items(dpid)
            .into_iter()
            .map(|(link, ts)| LinkInfo {
                src: link.src,
                dst: link.dst,
                age_secs: now.saturating_duration_since(ts).as_secs_f64(),
            })
            .collect();
        items.sort_by(|a, b| (a.src, a.dst).cmp(&(b.src, b.dst)));
        items
    }
}
