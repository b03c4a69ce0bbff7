//! Mesh node
//!
//! [`Node`] is the public face of the routing engine: register links, pick an
//! identity, send and receive application frames, and call
//! [`Node::process`] often. All work happens synchronously inside those calls.

use crate::clock::{Clock, SystemClock};
use crate::config::MeshConfig;
use crate::host_table::{HostTable, RouteEntry, Upsert, UpsertOutcome};
use crate::link::{Link, LinkId};
use crate::packet::{NodeId, Packet, PacketType, RESERVED_TYPE_START};
use crate::route::resolve;
use crate::stats::NodeStats;
use crate::{MeshError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Application delivery hook: `(sender, packet type, payload)`
pub type DeliveryCallback = Box<dyn FnMut(NodeId, u8, &[u8]) + Send>;

/// A mesh routing node
pub struct Node {
    pub(crate) config: MeshConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) id: Option<NodeId>,
    pub(crate) links: Vec<(LinkId, Arc<dyn Link>)>,
    next_link_id: u32,
    pub(crate) hosts: HostTable,
    pub(crate) last_mgmt: u32,
    pub(crate) unicast_cb: Option<DeliveryCallback>,
    pub(crate) broadcast_cb: Option<DeliveryCallback>,
    pub(crate) stats: NodeStats,
}

impl Node {
    /// Create a node driven by the system clock
    pub fn new(config: MeshConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a node with an explicit time source
    pub fn with_clock(config: MeshConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let last_mgmt = clock.now_ms();
        Ok(Self {
            hosts: HostTable::new(config.max_hosts),
            config,
            clock,
            id: None,
            links: Vec::new(),
            next_link_id: 0,
            last_mgmt,
            unicast_cb: None,
            broadcast_cb: None,
            stats: NodeStats::default(),
        })
    }

    /// Register a link; registering the same instance again is a no-op
    pub fn add_link(&mut self, link: Arc<dyn Link>) -> LinkId {
        if let Some((id, _)) = self
            .links
            .iter()
            .find(|(_, l)| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(&link)))
        {
            return *id;
        }

        let id = LinkId(self.next_link_id);
        self.next_link_id += 1;
        info!(
            link = %id,
            name = link.name(),
            hwaddr = %link.hardware_address(),
            "Link registered"
        );
        self.links.push((id, link));
        id
    }

    /// Detach a link and forget every route that used it
    pub fn remove_link(&mut self, id: LinkId) -> bool {
        let Some(index) = self.links.iter().position(|(l, _)| *l == id) else {
            return false;
        };
        self.links.remove(index);
        let purged = self.hosts.purge_link(id);
        info!(link = %id, purged, "Link removed");
        true
    }

    /// Look up a registered link
    pub fn link(&self, id: LinkId) -> Option<&Arc<dyn Link>> {
        self.links.iter().find(|(l, _)| *l == id).map(|(_, l)| l)
    }

    /// Registered links in registration order
    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Arc<dyn Link>)> {
        self.links.iter().map(|(id, l)| (*id, l))
    }

    /// Assign this node's identity and announce it on every link
    pub fn set_identity(&mut self, id: NodeId) -> Result<()> {
        if id.is_reserved() {
            return Err(MeshError::ReservedIdentity(id));
        }
        self.id = Some(id);
        let purged = self.hosts.purge_id(id);
        info!(id = %id, purged, "Identity set");
        self.announce();
        Ok(())
    }

    /// This node's identity, `None` until configured
    pub fn identity(&self) -> Option<NodeId> {
        self.id
    }

    /// Send an application frame to `destination`
    ///
    /// Fails with [`MeshError::NoRoute`] without transmitting anything when
    /// the destination does not resolve. Payloads longer than the MTU are
    /// truncated.
    pub fn send(&mut self, destination: NodeId, kind: u8, payload: &[u8]) -> Result<()> {
        let own = self.id.ok_or(MeshError::Unconfigured)?;
        if kind >= RESERVED_TYPE_START {
            return Err(MeshError::ReservedType(kind));
        }

        let Some(route) = resolve(&self.hosts, destination) else {
            self.stats.no_route += 1;
            debug!(destination = %destination, "Send failed: no route");
            return Err(MeshError::NoRoute(destination));
        };

        let packet = Packet::new(
            own,
            destination,
            PacketType::from_u8(kind),
            self.config.unicast_ttl,
            payload,
        );
        debug!(
            destination = %destination,
            via = %route.via,
            link = %route.link,
            len = packet.payload().len(),
            "Sending unicast"
        );
        self.transmit_unicast(&route, &packet.encode())
    }

    /// Broadcast an application frame to every direct neighbour
    pub fn broadcast(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        let own = self.id.ok_or(MeshError::Unconfigured)?;
        if kind >= RESERVED_TYPE_START {
            return Err(MeshError::ReservedType(kind));
        }

        let frame = Packet::new(own, NodeId::BROADCAST, PacketType::from_u8(kind), 1, payload)
            .encode();
        self.broadcast_frame(&frame)
    }

    /// True if any route to `id` is known
    pub fn knows_host(&self, id: NodeId) -> bool {
        !id.is_reserved() && self.hosts.contains_id(id)
    }

    /// Add or refresh a route by hand
    pub fn add_route(&mut self, update: Upsert) -> UpsertOutcome {
        let now = self.clock.now_ms();
        self.hosts.upsert(update, self.id, now)
    }

    /// Remove a route by hand
    pub fn remove_route(&mut self, id: NodeId, nexthop: NodeId) -> Option<RouteEntry> {
        self.hosts.remove(id, nexthop)
    }

    /// Install the hook for unicast frames addressed to this node
    pub fn on_unicast<F>(&mut self, callback: F)
    where
        F: FnMut(NodeId, u8, &[u8]) + Send + 'static,
    {
        self.unicast_cb = Some(Box::new(callback));
    }

    /// Install the hook for application broadcasts
    pub fn on_broadcast<F>(&mut self, callback: F)
    where
        F: FnMut(NodeId, u8, &[u8]) + Send + 'static,
    {
        self.broadcast_cb = Some(Box::new(callback));
    }

    /// Run one tick: expiry, receive, scheduled advertisement
    pub fn process(&mut self) {
        self.housekeeping();
        self.receive_frames();
        self.send_management();
    }

    /// Known routes in insertion order
    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.hosts.iter()
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("links", &self.links.len())
            .field("hosts", &self.hosts.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => writeln!(f, "My host ID: {}", id)?,
            None => writeln!(f, "My host ID: unconfigured")?,
        }

        writeln!(f, "Links:")?;
        for (id, link) in &self.links {
            writeln!(f, "    {} {} {}", id, link.name(), link.hardware_address())?;
        }

        writeln!(f, "Directly connected hosts:")?;
        for entry in self.hosts.direct() {
            let hwaddr = entry.hwaddr.map(|h| h.to_string()).unwrap_or_default();
            let local = self
                .link(entry.link)
                .map(|l| l.hardware_address().to_string())
                .unwrap_or_default();
            writeln!(f, "    {} on {} via {}", entry.id, hwaddr, local)?;
        }

        writeln!(f, "Known remote hosts:")?;
        for entry in self.hosts.remote() {
            writeln!(
                f,
                "    {} via {} (cost {})",
                entry.id, entry.nexthop, entry.cost
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::link::MockLink;
    use crate::packet::HwAddr;

    fn node() -> (Node, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let node = Node::with_clock(MeshConfig::default(), clock.clone()).unwrap();
        (node, clock)
    }

    fn mock(name: &str, addr: &[u8]) -> Arc<MockLink> {
        Arc::new(MockLink::new(name, HwAddr::from_slice(addr).unwrap()))
    }

    #[test]
    fn test_add_link_is_idempotent() {
        let (mut node, _) = node();
        let link = mock("radio0", &[1, 2, 3, 4, 5]);

        let first = node.add_link(link.clone());
        let second = node.add_link(link.clone());
        let other = node.add_link(mock("radio1", &[6]));

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(node.links().count(), 2);
    }

    #[test]
    fn test_set_identity_rejects_sentinels() {
        let (mut node, _) = node();
        assert!(matches!(
            node.set_identity(NodeId::BROADCAST),
            Err(MeshError::ReservedIdentity(_))
        ));
        assert!(matches!(
            node.set_identity(NodeId::DIRECT),
            Err(MeshError::ReservedIdentity(_))
        ));
        assert_eq!(node.identity(), None);
    }

    #[test]
    fn test_set_identity_announces() {
        let (mut node, _) = node();
        let link = mock("radio0", &[1, 2, 3, 4, 5]);
        node.add_link(link.clone());

        node.set_identity(NodeId(10)).unwrap();

        let sent = link.take_sent();
        assert_eq!(sent.len(), 1);
        let packet = sent[0].packet().unwrap();
        assert_eq!(packet.packet_type, PacketType::Iam);
        assert_eq!(packet.sender, NodeId(10));
        assert_eq!(packet.receiver, NodeId::BROADCAST);
        assert_eq!(packet.ttl, 1);
        assert_eq!(packet.payload(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_set_identity_drops_routes_to_itself() {
        let (mut node, _) = node();
        node.set_identity(NodeId(10)).unwrap();
        let link = node.add_link(mock("radio0", &[1]));
        node.add_route(Upsert::direct(NodeId(20), link, HwAddr::from_slice(&[2]).unwrap()));
        node.add_route(Upsert::relayed(NodeId(30), NodeId(20), 2, link));

        node.set_identity(NodeId(20)).unwrap();

        assert!(!node.knows_host(NodeId(20)));
        assert!(node.routes().all(|r| r.id != NodeId(20)));
        assert!(node.knows_host(NodeId(30)));
    }

    #[test]
    fn test_send_requires_identity() {
        let (mut node, _) = node();
        assert!(matches!(
            node.send(NodeId(20), 1, b"x"),
            Err(MeshError::Unconfigured)
        ));
    }

    #[test]
    fn test_send_rejects_reserved_type() {
        let (mut node, _) = node();
        node.set_identity(NodeId(10)).unwrap();
        assert!(matches!(
            node.send(NodeId(20), 0xF0, b"x"),
            Err(MeshError::ReservedType(0xF0))
        ));
    }

    #[test]
    fn test_knows_host() {
        let (mut node, _) = node();
        node.set_identity(NodeId(10)).unwrap();
        let link = node.add_link(mock("radio0", &[1]));
        node.add_route(Upsert::direct(NodeId(20), link, HwAddr::from_slice(&[2]).unwrap()));

        assert!(node.knows_host(NodeId(20)));
        assert!(!node.knows_host(NodeId(21)));
        assert!(!node.knows_host(NodeId::BROADCAST));
        assert!(!node.knows_host(NodeId::DIRECT));
    }

    #[test]
    fn test_remove_link_purges_routes() {
        let (mut node, _) = node();
        node.set_identity(NodeId(10)).unwrap();
        let a = node.add_link(mock("radio0", &[1]));
        let b = node.add_link(mock("radio1", &[2]));
        node.add_route(Upsert::direct(NodeId(20), a, HwAddr::from_slice(&[3]).unwrap()));
        node.add_route(Upsert::direct(NodeId(21), b, HwAddr::from_slice(&[4]).unwrap()));

        assert!(node.remove_link(a));
        assert!(!node.remove_link(a));
        assert!(!node.knows_host(NodeId(20)));
        assert!(node.knows_host(NodeId(21)));
        assert!(node.link(a).is_none());
    }

    #[test]
    fn test_display_dump() {
        let (mut node, _) = node();
        node.set_identity(NodeId(10)).unwrap();
        let link = node.add_link(mock("radio0", &[0x01, 0x02]));
        node.add_route(Upsert::direct(NodeId(20), link, HwAddr::from_slice(&[0xAA, 0xBB]).unwrap()));
        node.add_route(Upsert::relayed(NodeId(30), NodeId(20), 2, link));

        let dump = node.to_string();
        assert!(dump.contains("My host ID: 10"));
        assert!(dump.contains("link#0 radio0 01:02"));
        assert!(dump.contains("20 on AA:BB via 01:02"));
        assert!(dump.contains("30 via 20 (cost 2)"));
    }
}
