//! Simulation driver
//!
//! Builds one [`Node`] per configured host on a shared [`ManualClock`], wires
//! their links into a [`Medium`] and steps everything in lock-step ticks.

use crate::config::{parse_hwaddr, SimConfig};
use crate::medium::{Medium, MediumStats};
use crate::{Result, SimError};
use mesh_core::{Clock, ManualClock, MockLink, Node, NodeId};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};

/// Ticks run after the probe so it can cross the mesh
pub const SETTLE_TICKS: u64 = 16;

/// An application frame handed to a node's callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Simulated time of delivery
    pub at_ms: u32,
    /// Node that received the frame
    pub node: NodeId,
    /// Originating node
    pub from: NodeId,
    pub kind: u8,
    pub payload: Vec<u8>,
    pub broadcast: bool,
}

type DeliveryLog = Arc<Mutex<Vec<Delivery>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running mesh simulation
pub struct Simulation {
    config: SimConfig,
    clock: Arc<ManualClock>,
    nodes: Vec<Node>,
    index: HashMap<u16, usize>,
    medium: Medium,
    deliveries: DeliveryLog,
    ticks: u64,
}

impl Simulation {
    /// Build the mesh described by `config`
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let clock = Arc::new(ManualClock::new(0));
        let deliveries: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
        let mut medium = Medium::new(config.loss, config.seed);
        let mut nodes = Vec::with_capacity(config.nodes.len());
        let mut index = HashMap::new();

        for (i, spec) in config.nodes.iter().enumerate() {
            let id = NodeId::new(spec.id);
            let mut node = Node::with_clock(config.mesh.clone(), clock.clone())?;

            for (j, text) in spec.links.iter().enumerate() {
                let hwaddr = parse_hwaddr(text)?;
                let link = Arc::new(MockLink::new(format!("n{}.radio{}", spec.id, j), hwaddr));
                medium.attach((i, j), link.clone());
                node.add_link(link);
            }

            node.on_unicast(recorder(id, false, clock.clone(), deliveries.clone()));
            node.on_broadcast(recorder(id, true, clock.clone(), deliveries.clone()));
            node.set_identity(id)?;

            index.insert(spec.id, i);
            nodes.push(node);
        }

        for edge in &config.edges {
            let port = |node: u16, link: usize| -> Result<(usize, usize)> {
                index
                    .get(&node)
                    .map(|i| (*i, link))
                    .ok_or_else(|| SimError::Config(format!("Unknown node {}", node)))
            };
            medium.connect(port(edge.a.node, edge.a.link)?, port(edge.b.node, edge.b.link)?);
        }

        info!(
            nodes = nodes.len(),
            edges = config.edges.len(),
            loss = config.loss,
            "Simulation built"
        );

        Ok(Self {
            config,
            clock,
            nodes,
            index,
            medium,
            deliveries,
            ticks: 0,
        })
    }

    /// Advance the clock one tick, let every node process, then move frames
    pub fn step(&mut self) {
        self.clock.advance(self.config.tick_ms);
        for node in &mut self.nodes {
            node.process();
        }
        let moved = self.medium.deliver();
        self.ticks += 1;
        debug!(tick = self.ticks, now = self.clock.now_ms(), moved, "Tick");
    }

    /// Run `ticks` ticks, paced by `pace_ms` when non-zero
    ///
    /// Returns the number of ticks actually run; a paced run stops early on
    /// Ctrl-C.
    pub async fn run(&mut self, ticks: u64) -> Result<u64> {
        if self.config.pace_ms == 0 {
            for _ in 0..ticks {
                self.step();
            }
            return Ok(ticks);
        }

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.pace_ms));
        let shutdown = signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut done = 0;
        while done < ticks {
            tokio::select! {
                _ = interval.tick() => {
                    self.step();
                    done += 1;
                }
                result = &mut shutdown => {
                    result?;
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(done)
    }

    /// True once every node has a route to every other node
    pub fn converged(&self) -> bool {
        self.nodes.iter().all(|node| {
            self.config
                .nodes
                .iter()
                .map(|spec| NodeId::new(spec.id))
                .filter(|id| node.identity() != Some(*id))
                .all(|id| node.knows_host(id))
        })
    }

    /// Send the configured probe, if any
    pub fn send_probe(&mut self) -> Result<bool> {
        let Some(probe) = self.config.probe.clone() else {
            return Ok(false);
        };
        self.send(probe.from, probe.to, probe.kind, probe.message.as_bytes())?;
        Ok(true)
    }

    /// Send an application frame from one simulated node to another
    pub fn send(&mut self, from: u16, to: u16, kind: u8, payload: &[u8]) -> Result<()> {
        let node = self.node_mut(from)?;
        node.send(NodeId::new(to), kind, payload)?;
        info!(from, to, kind, len = payload.len(), "Frame sent");
        Ok(())
    }

    /// True if the configured probe has reached its destination
    pub fn probe_delivered(&self) -> bool {
        let Some(probe) = &self.config.probe else {
            return false;
        };
        lock(&self.deliveries).iter().any(|d| {
            !d.broadcast
                && d.node == NodeId::new(probe.to)
                && d.from == NodeId::new(probe.from)
                && d.payload.starts_with(probe.message.as_bytes())
        })
    }

    /// Everything delivered to application callbacks so far
    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    pub fn node(&self, id: u16) -> Option<&Node> {
        self.index.get(&id).map(|i| &self.nodes[*i])
    }

    fn node_mut(&mut self, id: u16) -> Result<&mut Node> {
        let i = *self
            .index
            .get(&id)
            .ok_or_else(|| SimError::Config(format!("Unknown node {}", id)))?;
        Ok(&mut self.nodes[i])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn medium_stats(&self) -> &MediumStats {
        self.medium.stats()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Host table dump and counters for every node
    pub fn report(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let _ = write!(out, "{}", node);
            let _ = writeln!(out, "Stats: {}", node.stats());
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "Medium: {}", self.medium.stats());
        out
    }
}

fn recorder(
    node: NodeId,
    broadcast: bool,
    clock: Arc<ManualClock>,
    log: DeliveryLog,
) -> impl FnMut(NodeId, u8, &[u8]) + Send + 'static {
    move |from, kind, payload| {
        info!(node = %node, from = %from, kind, broadcast, payload = %hex::encode(payload), "Delivered");
        lock(&log).push(Delivery {
            at_ms: clock.now_ms(),
            node,
            from,
            kind,
            payload: payload.to_vec(),
            broadcast,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_announces_identities() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        assert!(!sim.converged());

        // IAMs queued at construction reach neighbours on the first delivery
        sim.step();
        sim.step();

        // one frame per link per tick: the middle node has read one IAM so far
        let middle = sim.node(2).unwrap();
        let known = [NodeId(1), NodeId(3)]
            .into_iter()
            .filter(|id| middle.knows_host(*id))
            .count();
        assert_eq!(known, 1);

        sim.step();

        let middle = sim.node(2).unwrap();
        assert!(middle.knows_host(NodeId(1)));
        assert!(middle.knows_host(NodeId(3)));
        assert!(!sim.node(1).unwrap().knows_host(NodeId(3)));
    }

    #[test]
    fn test_send_from_unknown_node() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        assert!(matches!(sim.send(99, 1, 1, b"x"), Err(SimError::Config(_))));
    }

    #[test]
    fn test_send_without_route() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        assert!(matches!(
            sim.send(1, 3, 1, b"x"),
            Err(SimError::Mesh(mesh_core::MeshError::NoRoute(_)))
        ));
    }
}
