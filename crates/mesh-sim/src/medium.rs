//! Shared radio medium
//!
//! Moves frames between [`MockLink`]s that can hear each other. Broadcasts
//! reach every neighbour of the transmitting port, unicasts only the
//! neighbour whose hardware address matches.

use mesh_core::{Link, MockLink, RawFrame, Transmission, FRAME_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A link on a simulated node: `(node index, link index)`
pub type Port = (usize, usize);

/// Medium counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediumStats {
    /// Transmissions taken from links
    pub transmitted: u64,
    /// Frames placed into a receiving link
    pub delivered: u64,
    /// Delivered frames that had a bit flipped
    pub corrupted: u64,
    /// Unicasts with no neighbour owning the destination address
    pub unheard: u64,
}

impl fmt::Display for MediumStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transmitted={} delivered={} corrupted={} unheard={}",
            self.transmitted, self.delivered, self.corrupted, self.unheard
        )
    }
}

/// Radio medium connecting simulated links
pub struct Medium {
    ports: BTreeMap<Port, Arc<MockLink>>,
    neighbours: BTreeMap<Port, Vec<Port>>,
    loss: f64,
    rng: StdRng,
    stats: MediumStats,
}

impl Medium {
    /// Create an empty medium; `loss` must lie within `0.0..=1.0`
    pub fn new(loss: f64, seed: u64) -> Self {
        Self {
            ports: BTreeMap::new(),
            neighbours: BTreeMap::new(),
            loss: loss.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            stats: MediumStats::default(),
        }
    }

    /// Attach a link at `port`
    pub fn attach(&mut self, port: Port, link: Arc<MockLink>) {
        self.ports.insert(port, link);
        self.neighbours.entry(port).or_default();
    }

    /// Let two ports hear each other
    pub fn connect(&mut self, a: Port, b: Port) {
        if a == b {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            let list = self.neighbours.entry(from).or_default();
            if !list.contains(&to) {
                list.push(to);
            }
        }
    }

    /// Ports that hear `port`
    pub fn neighbours(&self, port: Port) -> &[Port] {
        self.neighbours.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Move everything transmitted since the last call; returns frames delivered
    pub fn deliver(&mut self) -> usize {
        let mut delivered = 0;
        let ports: Vec<Port> = self.ports.keys().copied().collect();

        for port in ports {
            let Some(link) = self.ports.get(&port).cloned() else {
                continue;
            };
            for tx in link.take_sent() {
                self.stats.transmitted += 1;
                let targets = self.targets(port, &tx);
                if targets.is_empty() {
                    if matches!(tx, Transmission::Unicast { .. }) {
                        self.stats.unheard += 1;
                    }
                    continue;
                }
                for target in targets {
                    let frame = self.impair(*tx.frame());
                    if let Some(receiver) = self.ports.get(&target) {
                        trace!(from = ?port, to = ?target, frame = %hex::encode(frame), "Frame delivered");
                        receiver.inject(frame);
                        self.stats.delivered += 1;
                        delivered += 1;
                    }
                }
            }
        }

        delivered
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    fn targets(&self, port: Port, tx: &Transmission) -> Vec<Port> {
        let neighbours = self.neighbours(port);
        match tx {
            Transmission::Broadcast(_) => neighbours.to_vec(),
            Transmission::Unicast { to, .. } => neighbours
                .iter()
                .copied()
                .filter(|n| {
                    self.ports
                        .get(n)
                        .is_some_and(|l| l.hardware_address() == *to)
                })
                .collect(),
        }
    }

    fn impair(&mut self, mut frame: RawFrame) -> RawFrame {
        if self.loss > 0.0 && self.rng.gen_bool(self.loss) {
            let bit = self.rng.gen_range(0..FRAME_SIZE * 8);
            frame[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
        }
        frame
    }
}

impl fmt::Debug for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Medium")
            .field("ports", &self.ports.len())
            .field("loss", &self.loss)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{HwAddr, NodeId, Packet, PacketType};

    fn link(addr: u8) -> Arc<MockLink> {
        Arc::new(MockLink::new(
            format!("radio{}", addr),
            HwAddr::from_slice(&[addr]).unwrap(),
        ))
    }

    fn frame() -> RawFrame {
        Packet::new(NodeId(1), NodeId(2), PacketType::Application(1), 4, b"hi").encode()
    }

    #[test]
    fn test_broadcast_reaches_neighbours_only() {
        let (a, b, c) = (link(1), link(2), link(3));
        let mut medium = Medium::new(0.0, 1);
        medium.attach((0, 0), a.clone());
        medium.attach((1, 0), b.clone());
        medium.attach((2, 0), c.clone());
        medium.connect((0, 0), (1, 0));
        medium.connect((1, 0), (2, 0));

        a.broadcast(&frame()).unwrap();
        assert_eq!(medium.deliver(), 1);

        assert_eq!(b.available(), 1);
        assert_eq!(c.available(), 0);
        assert_eq!(b.receive().unwrap(), frame());
    }

    #[test]
    fn test_unicast_matches_hardware_address() {
        let (a, b, c) = (link(1), link(2), link(3));
        let mut medium = Medium::new(0.0, 1);
        medium.attach((0, 0), a.clone());
        medium.attach((1, 0), b.clone());
        medium.attach((2, 0), c.clone());
        medium.connect((0, 0), (1, 0));
        medium.connect((0, 0), (2, 0));

        a.unicast(&HwAddr::from_slice(&[3]).unwrap(), &frame()).unwrap();
        a.unicast(&HwAddr::from_slice(&[9]).unwrap(), &frame()).unwrap();
        assert_eq!(medium.deliver(), 1);

        assert_eq!(b.available(), 0);
        assert_eq!(c.available(), 1);
        assert_eq!(medium.stats().transmitted, 2);
        assert_eq!(medium.stats().unheard, 1);
    }

    #[test]
    fn test_full_loss_corrupts_every_frame() {
        let (a, b) = (link(1), link(2));
        let mut medium = Medium::new(1.0, 42);
        medium.attach((0, 0), a.clone());
        medium.attach((1, 0), b.clone());
        medium.connect((0, 0), (1, 0));

        a.broadcast(&frame()).unwrap();
        medium.deliver();

        let received = b.receive().unwrap();
        assert_ne!(received, frame());
        assert!(Packet::decode(&received).is_err());
        assert_eq!(medium.stats().corrupted, 1);
    }

    #[test]
    fn test_connect_is_symmetric_and_deduplicated() {
        let mut medium = Medium::new(0.0, 1);
        medium.connect((0, 0), (1, 0));
        medium.connect((1, 0), (0, 0));
        medium.connect((0, 0), (0, 0));

        assert_eq!(medium.neighbours((0, 0)), &[(1, 0)]);
        assert_eq!(medium.neighbours((1, 0)), &[(0, 0)]);
        assert!(medium.neighbours((5, 0)).is_empty());
    }
}
