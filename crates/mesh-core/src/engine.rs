//! Protocol engine
//!
//! Neighbour announcement (IAM), route advertisement (ICAN), the per-frame
//! dispatch rules and the management timer. The only state is the host table
//! and the timestamp of the last IAM/ICAN round, both owned by [`Node`].

use crate::clock::elapsed_ms;
use crate::host_table::Upsert;
use crate::link::{Link, LinkId};
use crate::node::Node;
use crate::packet::{
    Advertisement, HwAddr, Packet, PacketType, RawFrame, ADVERTISEMENTS_PER_FRAME,
};
use crate::route::{resolve, Route};
use crate::stats::NodeStats;
use crate::{MeshError, Result};
use std::sync::Arc;
use tracing::{debug, trace, warn};

fn broadcast_on(link: &dyn Link, frame: &RawFrame, stats: &mut NodeStats) -> Result<()> {
    match link.broadcast(frame) {
        Ok(()) => {
            stats.frames_tx += 1;
            Ok(())
        }
        Err(e) => {
            stats.link_errors += 1;
            warn!(link = link.name(), "Broadcast failed: {}", e);
            Err(e)
        }
    }
}

impl Node {
    /// Expire at most one stale route
    pub(crate) fn housekeeping(&mut self) {
        let now = self.clock.now_ms();
        if let Some(expired) = self.hosts.expire_stale(now, self.config.host_expiry_ms) {
            self.stats.routes_expired += 1;
            debug!(
                id = %expired.id,
                nexthop = %expired.nexthop,
                age_ms = expired.age_ms(now),
                "Route expired"
            );
        }
    }

    /// Broadcast an IAM on every link carrying that link's hardware address
    pub(crate) fn announce(&mut self) {
        let Some(own) = self.id else {
            return;
        };
        for (_, link) in &self.links {
            let frame = Packet::iam(own, &link.hardware_address()).encode();
            // failures are counted and logged inside
            let _ = broadcast_on(link.as_ref(), &frame, &mut self.stats);
        }
    }

    /// Broadcast every known destination, batched into ICAN frames
    pub(crate) fn advertise(&mut self) {
        let Some(own) = self.id else {
            return;
        };
        let adverts: Vec<Advertisement> = self
            .hosts
            .iter()
            .map(|e| Advertisement {
                id: e.id,
                cost: e.cost.saturating_add(1),
            })
            .collect();
        if adverts.is_empty() {
            return;
        }

        for (_, link) in &self.links {
            for batch in adverts.chunks(ADVERTISEMENTS_PER_FRAME) {
                let frame = Packet::ican(own, batch).encode();
                let _ = broadcast_on(link.as_ref(), &frame, &mut self.stats);
            }
        }
    }

    /// Emit IAM + ICAN once the management interval has elapsed
    pub(crate) fn send_management(&mut self) {
        let now = self.clock.now_ms();
        if elapsed_ms(now, self.last_mgmt) < self.config.advertise_interval_ms {
            return;
        }
        self.last_mgmt = now;
        if self.id.is_some() {
            trace!(routes = self.hosts.len(), "Management round");
            self.announce();
            self.advertise();
        }
    }

    /// Read at most one frame from each link and dispatch the valid ones
    pub(crate) fn receive_frames(&mut self) {
        for index in 0..self.links.len() {
            let (link_id, link) = (self.links[index].0, Arc::clone(&self.links[index].1));
            if link.available() == 0 {
                continue;
            }

            let frame = match link.receive() {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.link_errors += 1;
                    warn!(link = %link_id, "Error receiving frame: {}", e);
                    continue;
                }
            };
            self.stats.frames_rx += 1;

            match Packet::decode(&frame) {
                Ok(packet) => self.dispatch(packet, link_id),
                Err(e) => {
                    self.stats.dropped_corrupt += 1;
                    debug!(link = %link_id, frame = %hex::encode(frame), "Dropped frame: {}", e);
                }
            }
        }
    }

    /// Apply the dispatch rules to one verified frame
    pub(crate) fn dispatch(&mut self, packet: Packet, link: LinkId) {
        trace!(
            sender = %packet.sender,
            receiver = %packet.receiver,
            kind = packet.packet_type.as_u8(),
            ttl = packet.ttl,
            link = %link,
            "Dispatching frame"
        );

        if packet.is_broadcast() {
            match packet.packet_type {
                PacketType::Iam => self.learn_neighbour(&packet, link),
                PacketType::Ican => self.learn_routes(&packet, link),
                _ => self.deliver_broadcast(&packet),
            }
        } else if Some(packet.receiver) == self.id {
            self.deliver_unicast(&packet);
        } else {
            self.forward(packet);
        }
    }

    fn learn_neighbour(&mut self, packet: &Packet, link: LinkId) {
        if packet.sender.is_reserved() {
            return;
        }
        let Some(hwaddr) = HwAddr::from_slice(packet.payload()) else {
            debug!(sender = %packet.sender, len = packet.payload().len(), "IAM address too long");
            return;
        };

        let now = self.clock.now_ms();
        let outcome = self
            .hosts
            .upsert(Upsert::direct(packet.sender, link, hwaddr), self.id, now);
        self.stats.control_rx += 1;
        debug!(
            sender = %packet.sender,
            hwaddr = %hex::encode(hwaddr.as_bytes()),
            link = %link,
            ?outcome,
            "IAM"
        );
    }

    fn learn_routes(&mut self, packet: &Packet, link: LinkId) {
        if packet.sender.is_reserved() {
            return;
        }

        let now = self.clock.now_ms();
        for advert in Advertisement::parse_all(packet.payload()) {
            let outcome = self.hosts.upsert(
                Upsert::relayed(advert.id, packet.sender, advert.cost, link),
                self.id,
                now,
            );
            trace!(id = %advert.id, via = %packet.sender, cost = advert.cost, ?outcome, "ICAN entry");
        }
        self.stats.control_rx += 1;
    }

    fn deliver_broadcast(&mut self, packet: &Packet) {
        if let Some(callback) = self.broadcast_cb.as_mut() {
            callback(packet.sender, packet.packet_type.as_u8(), packet.payload());
            self.stats.delivered += 1;
        }
    }

    fn deliver_unicast(&mut self, packet: &Packet) {
        if let Some(callback) = self.unicast_cb.as_mut() {
            callback(packet.sender, packet.packet_type.as_u8(), packet.payload());
            self.stats.delivered += 1;
        }
    }

    /// Relay a frame addressed elsewhere; drops silently on TTL or route loss
    fn forward(&mut self, mut packet: Packet) {
        let Some(ttl) = packet.ttl.checked_sub(1).filter(|t| *t > 0) else {
            self.stats.ttl_expired += 1;
            trace!(sender = %packet.sender, receiver = %packet.receiver, "TTL exhausted");
            return;
        };

        let Some(route) = resolve(&self.hosts, packet.receiver) else {
            self.stats.no_route += 1;
            trace!(receiver = %packet.receiver, "No route for relayed frame");
            return;
        };

        packet.ttl = ttl;
        // encode recomputes the checksum over the new TTL
        let frame = packet.encode();
        if self.transmit_unicast(&route, &frame).is_ok() {
            self.stats.forwarded += 1;
            debug!(
                sender = %packet.sender,
                receiver = %packet.receiver,
                via = %route.via,
                ttl,
                "Forwarded"
            );
        }
    }

    pub(crate) fn transmit_unicast(&mut self, route: &Route, frame: &RawFrame) -> Result<()> {
        let Some((_, link)) = self.links.iter().find(|(id, _)| *id == route.link) else {
            self.stats.link_errors += 1;
            return Err(MeshError::Link(format!("{} is not registered", route.link)));
        };

        match link.unicast(&route.hwaddr, frame) {
            Ok(()) => {
                self.stats.frames_tx += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.link_errors += 1;
                warn!(link = %route.link, hwaddr = %route.hwaddr, "Unicast failed: {}", e);
                Err(e)
            }
        }
    }

    /// Broadcast a ready frame on every link; reports the first failure
    pub(crate) fn broadcast_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let mut first_error = None;
        for (_, link) in &self.links {
            if let Err(e) = broadcast_on(link.as_ref(), frame, &mut self.stats) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MeshConfig;
    use crate::link::MockLink;
    use crate::packet::NodeId;

    /// Claims a frame is waiting but fails every read
    struct FailingLink;

    impl Link for FailingLink {
        fn unicast(&self, _: &HwAddr, _: &RawFrame) -> Result<()> {
            Ok(())
        }

        fn broadcast(&self, _: &RawFrame) -> Result<()> {
            Ok(())
        }

        fn available(&self) -> usize {
            1
        }

        fn receive(&self) -> Result<RawFrame> {
            Err(MeshError::Link("rx fault".to_string()))
        }

        fn hardware_address(&self) -> HwAddr {
            HwAddr::from_slice(&[0xEE]).unwrap()
        }

        fn name(&self) -> &str {
            "faulty"
        }
    }

    fn setup() -> (Node, Arc<MockLink>, LinkId, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let mut node = Node::with_clock(MeshConfig::default(), clock.clone()).unwrap();
        let link = Arc::new(MockLink::new("radio0", HwAddr::from_slice(&[1, 1, 1, 1, 1]).unwrap()));
        let id = node.add_link(link.clone());
        node.set_identity(NodeId(10)).unwrap();
        link.take_sent();
        (node, link, id, clock)
    }

    #[test]
    fn test_advertise_batches_eight_per_frame() {
        let (mut node, link, id, _) = setup();
        for n in 0..10u16 {
            node.add_route(Upsert::relayed(NodeId(100 + n), NodeId(20), 2, id));
        }

        node.advertise();

        let frames: Vec<_> = link.take_sent().iter().map(|t| t.packet().unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload().len(), 24);
        assert_eq!(frames[1].payload().len(), 6);
        assert!(frames.iter().all(|p| p.ttl == 1 && p.packet_type == PacketType::Ican));

        let first: Vec<_> = Advertisement::parse_all(frames[0].payload()).collect();
        assert_eq!(first[0], Advertisement { id: NodeId(100), cost: 3 });
    }

    #[test]
    fn test_advertise_empty_table_sends_nothing() {
        let (mut node, link, _, _) = setup();
        node.advertise();
        assert!(link.take_sent().is_empty());
    }

    #[test]
    fn test_advertised_cost_saturates() {
        let (mut node, link, id, _) = setup();
        node.add_route(Upsert::relayed(NodeId(50), NodeId(20), 255, id));
        node.advertise();

        let packet = link.take_sent()[0].packet().unwrap();
        let adverts: Vec<_> = Advertisement::parse_all(packet.payload()).collect();
        assert_eq!(adverts[0].cost, 255);
    }

    #[test]
    fn test_management_interval() {
        let (mut node, link, _, clock) = setup();

        clock.set(4_999);
        node.send_management();
        assert!(link.take_sent().is_empty());

        clock.set(5_000);
        node.send_management();
        let sent = link.take_sent();
        assert_eq!(sent.len(), 1); // IAM only, table is empty
        assert_eq!(sent[0].packet().unwrap().packet_type, PacketType::Iam);

        clock.set(6_000);
        node.send_management();
        assert!(link.take_sent().is_empty());
    }

    #[test]
    fn test_management_skipped_when_unconfigured() {
        let clock = Arc::new(ManualClock::new(0));
        let mut node = Node::with_clock(MeshConfig::default(), clock.clone()).unwrap();
        let link = Arc::new(MockLink::new("radio0", HwAddr::from_slice(&[1]).unwrap()));
        node.add_link(link.clone());

        clock.set(10_000);
        node.send_management();
        assert!(link.take_sent().is_empty());
    }

    #[test]
    fn test_iam_with_oversized_address_ignored() {
        let (mut node, _, id, _) = setup();
        let packet = Packet::new(NodeId(20), NodeId::BROADCAST, PacketType::Iam, 1, &[7u8; 9]);
        node.dispatch(packet, id);
        assert!(!node.knows_host(NodeId(20)));
    }

    #[test]
    fn test_control_from_sentinel_sender_ignored() {
        let (mut node, _, id, _) = setup();
        let ican = Packet::ican(NodeId::DIRECT, &[Advertisement { id: NodeId(30), cost: 1 }]);
        node.dispatch(ican, id);
        assert!(node.hosts().is_empty());
    }

    #[test]
    fn test_link_error_counted() {
        let (mut node, link, _, _) = setup();
        link.set_fail_sends(true);
        assert!(node.broadcast(1, b"hi").is_err());
        assert_eq!(node.stats().link_errors, 1);
    }

    #[test]
    fn test_receive_error_counted() {
        let (mut node, _, _, _) = setup();
        node.add_link(Arc::new(FailingLink));

        node.receive_frames();

        assert_eq!(node.stats().link_errors, 1);
        assert_eq!(node.stats().frames_rx, 0);
    }
}
