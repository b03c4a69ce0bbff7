//! Host table
//!
//! Every way this node knows to reach another identity is one [`RouteEntry`].
//! Entries are kept in insertion order in a flat vector and scanned linearly;
//! tables on these nodes hold tens of entries, not thousands.
//!
//! Invariants upheld by [`HostTable::upsert`]:
//! - at most one entry per `(id, nexthop)`
//! - no entry for the node's own identity or for a sentinel id
//! - once a direct entry for an id exists, no new relayed entry for that id
//!   is created (relayed entries that predate it are left alone)

use crate::clock::elapsed_ms;
use crate::link::LinkId;
use crate::packet::{HwAddr, NodeId};
use tracing::trace;

/// One known way to reach a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination identity
    pub id: NodeId,
    /// [`NodeId::DIRECT`] or the relaying neighbour
    pub nexthop: NodeId,
    /// Link traffic for this entry leaves on
    pub link: LinkId,
    /// Hop cost, 1 for direct neighbours
    pub cost: u8,
    /// Neighbour hardware address, only for direct entries
    pub hwaddr: Option<HwAddr>,
    /// Timestamp of the last refresh
    pub last_seen: u32,
}

impl RouteEntry {
    pub fn is_direct(&self) -> bool {
        self.nexthop.is_direct()
    }

    /// Milliseconds since the entry was last refreshed
    pub fn age_ms(&self, now: u32) -> u32 {
        elapsed_ms(now, self.last_seen)
    }
}

/// Evidence for a route, as learned from IAM/ICAN or added by hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub id: NodeId,
    pub nexthop: NodeId,
    pub cost: u8,
    pub link: LinkId,
    pub hwaddr: Option<HwAddr>,
}

impl Upsert {
    /// A neighbour heard directly on `link`
    pub fn direct(id: NodeId, link: LinkId, hwaddr: HwAddr) -> Self {
        Self {
            id,
            nexthop: NodeId::DIRECT,
            cost: 1,
            link,
            hwaddr: Some(hwaddr),
        }
    }

    /// A destination reachable through neighbour `via`
    pub fn relayed(id: NodeId, via: NodeId, cost: u8, link: LinkId) -> Self {
        Self {
            id,
            nexthop: via,
            cost,
            link,
            hwaddr: None,
        }
    }
}

/// Why an upsert did not touch the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Route to ourselves
    SelfRoute,
    /// Destination or relay is a sentinel id
    ReservedId,
    /// A direct entry already exists for this destination
    ShadowedByDirect,
    /// Capacity reached and nothing could be evicted
    TableFull,
}

/// Result of [`HostTable::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Refreshed,
    Rejected(RejectReason),
}

/// Table of known routes
#[derive(Debug)]
pub struct HostTable {
    entries: Vec<RouteEntry>,
    capacity: usize,
}

impl HostTable {
    /// Create a table holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Exact match on `(id, nexthop)`
    pub fn lookup(&self, id: NodeId, nexthop: NodeId) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id && e.nexthop == nexthop)
    }

    /// Insert a new entry or refresh the matching one
    pub fn upsert(&mut self, update: Upsert, own: Option<NodeId>, now: u32) -> UpsertOutcome {
        if update.id.is_reserved() || update.nexthop.is_broadcast() {
            return UpsertOutcome::Rejected(RejectReason::ReservedId);
        }
        if own == Some(update.id) {
            return UpsertOutcome::Rejected(RejectReason::SelfRoute);
        }

        let direct = update.nexthop.is_direct();
        if !direct && self.lookup(update.id, NodeId::DIRECT).is_some() {
            return UpsertOutcome::Rejected(RejectReason::ShadowedByDirect);
        }

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.id == update.id && e.nexthop == update.nexthop)
        {
            if direct {
                entry.hwaddr = update.hwaddr;
            }
            entry.link = update.link;
            entry.cost = update.cost;
            entry.last_seen = now;
            return UpsertOutcome::Refreshed;
        }

        if self.entries.len() >= self.capacity {
            // Direct neighbours outrank relayed routes; make room by dropping
            // the stalest relayed entry, otherwise refuse.
            if !direct || self.evict_stalest_relayed(now).is_none() {
                trace!(id = %update.id, nexthop = %update.nexthop, "Host table full");
                return UpsertOutcome::Rejected(RejectReason::TableFull);
            }
        }

        self.entries.push(RouteEntry {
            id: update.id,
            nexthop: update.nexthop,
            link: update.link,
            cost: update.cost,
            hwaddr: if direct { update.hwaddr } else { None },
            last_seen: now,
        });
        UpsertOutcome::Inserted
    }

    /// Remove the `(id, nexthop)` entry
    pub fn remove(&mut self, id: NodeId, nexthop: NodeId) -> Option<RouteEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id && e.nexthop == nexthop)?;
        Some(self.entries.remove(index))
    }

    /// Remove the first entry silent for longer than `window_ms`
    ///
    /// At most one entry goes per call so a housekeeping tick stays cheap;
    /// further stale entries are picked up on later ticks.
    pub fn expire_stale(&mut self, now: u32, window_ms: u32) -> Option<RouteEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.age_ms(now) > window_ms)?;
        Some(self.entries.remove(index))
    }

    /// Drop every entry that departs over `link`
    pub fn purge_link(&mut self, link: LinkId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.link != link);
        before - self.entries.len()
    }

    /// Drop every entry whose destination is `id`
    pub fn purge_id(&mut self, id: NodeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before - self.entries.len()
    }

    /// True if any entry targets `id`
    pub fn contains_id(&self, id: NodeId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// All entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    /// Direct-neighbour entries
    pub fn direct(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter().filter(|e| e.is_direct())
    }

    /// Relayed entries
    pub fn remote(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter().filter(|e| !e.is_direct())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_stalest_relayed(&mut self, now: u32) -> Option<RouteEntry> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_direct())
            .max_by_key(|(_, e)| e.age_ms(now))
            .map(|(i, _)| i)?;
        let evicted = self.entries.remove(index);
        trace!(id = %evicted.id, nexthop = %evicted.nexthop, "Evicted relayed route");
        Some(evicted)
    }
}
