//! Simulator configuration

use crate::{Result, SimError};
use mesh_core::{HwAddr, MeshConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Simulated milliseconds per tick
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,

    /// Number of ticks to run before the probe
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Wall-clock delay between ticks in milliseconds (0 = run flat out)
    #[serde(default)]
    pub pace_ms: u64,

    /// Probability that a delivered frame gets one bit flipped
    #[serde(default)]
    pub loss: f64,

    /// Seed for the loss generator
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Routing engine settings shared by every node
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Nodes in the mesh
    pub nodes: Vec<NodeSpec>,

    /// Radio adjacency between node links
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,

    /// Message sent once the mesh has converged
    #[serde(default)]
    pub probe: Option<ProbeSpec>,
}

/// One simulated node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identity
    pub id: u16,

    /// Hardware address of each link, hex encoded
    pub links: Vec<String>,
}

/// A link on a node, by node id and link index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: u16,
    #[serde(default)]
    pub link: usize,
}

/// Two links that hear each other
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub a: PortRef,
    pub b: PortRef,
}

/// Probe message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub from: u16,
    pub to: u16,
    #[serde(default = "default_probe_kind")]
    pub kind: u8,
    #[serde(default = "default_probe_message")]
    pub message: String,
}

fn default_tick_ms() -> u32 {
    100
}

fn default_ticks() -> u64 {
    200
}

fn default_seed() -> u64 {
    0x5EED
}

fn default_probe_kind() -> u8 {
    1
}

fn default_probe_message() -> String {
    "ping".to_string()
}

impl Default for SimConfig {
    /// Three nodes in a line: 1 and 3 only hear 2
    fn default() -> Self {
        let node = |id: u16, hwaddr: &str| NodeSpec {
            id,
            links: vec![hwaddr.to_string()],
        };
        let edge = |a: u16, b: u16| EdgeSpec {
            a: PortRef { node: a, link: 0 },
            b: PortRef { node: b, link: 0 },
        };

        Self {
            mesh: MeshConfig::default(),
            tick_ms: default_tick_ms(),
            ticks: default_ticks(),
            pace_ms: 0,
            loss: 0.0,
            seed: default_seed(),
            nodes: vec![
                node(1, "0a0a0a0a01"),
                node(2, "0a0a0a0a02"),
                node(3, "0a0a0a0a03"),
            ],
            edges: vec![edge(1, 2), edge(2, 3)],
            probe: Some(ProbeSpec {
                from: 1,
                to: 3,
                kind: default_probe_kind(),
                message: default_probe_message(),
            }),
        }
    }
}

/// Decode a hex hardware address
pub fn parse_hwaddr(text: &str) -> Result<HwAddr> {
    let bytes = hex::decode(text)
        .map_err(|e| SimError::Config(format!("Invalid hardware address {:?}: {}", text, e)))?;
    HwAddr::from_slice(&bytes)
        .ok_or_else(|| SimError::Config(format!("Hardware address {:?} is too long", text)))
}

impl SimConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)
            .map_err(|e| SimError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| SimError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Check topology consistency
    pub fn validate(&self) -> Result<()> {
        self.mesh.validate()?;

        if !(0.0..=1.0).contains(&self.loss) {
            return Err(SimError::Config(format!(
                "loss must be within 0.0..=1.0, got {}",
                self.loss
            )));
        }
        if self.tick_ms == 0 {
            return Err(SimError::Config("tick_ms must be at least 1".to_string()));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if NodeId::new(node.id).is_reserved() {
                return Err(SimError::Config(format!("Node id {} is reserved", node.id)));
            }
            if !ids.insert(node.id) {
                return Err(SimError::Config(format!("Duplicate node id {}", node.id)));
            }
            for hwaddr in &node.links {
                parse_hwaddr(hwaddr)?;
            }
        }

        for edge in &self.edges {
            for port in [edge.a, edge.b] {
                if !self.has_port(port) {
                    return Err(SimError::Config(format!(
                        "Edge references unknown link {} of node {}",
                        port.link, port.node
                    )));
                }
            }
        }

        if let Some(probe) = &self.probe {
            for id in [probe.from, probe.to] {
                if !ids.contains(&id) {
                    return Err(SimError::Config(format!("Probe references unknown node {}", id)));
                }
            }
        }

        Ok(())
    }

    fn has_port(&self, port: PortRef) -> bool {
        self.nodes
            .iter()
            .any(|n| n.id == port.node && port.link < n.links.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nodes.len(), 3);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: SimConfig = toml::from_str(
            r#"
            [[nodes]]
            id = 7
            links = ["aabb"]

            [[nodes]]
            id = 8
            links = ["aacc"]

            [[edges]]
            a = { node = 7 }
            b = { node = 8 }
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.tick_ms, 100);
        assert_eq!(config.mesh.host_expiry_ms, 30_000);
        assert_eq!(config.edges[0].b, PortRef { node: 8, link: 0 });
        assert!(config.probe.is_none());
    }

    #[test]
    fn test_rejects_unknown_edge_port() {
        let mut config = SimConfig::default();
        config.edges.push(EdgeSpec {
            a: PortRef { node: 1, link: 3 },
            b: PortRef { node: 2, link: 0 },
        });
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_rejects_reserved_and_duplicate_ids() {
        let mut config = SimConfig::default();
        config.nodes[0].id = 0xFFFF;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.nodes[1].id = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_hwaddr() {
        assert!(parse_hwaddr("zz").is_err());
        assert!(parse_hwaddr("000102030405060708").is_err());
        assert_eq!(parse_hwaddr("aabb").unwrap().as_bytes(), &[0xAA, 0xBB]);
    }
}
