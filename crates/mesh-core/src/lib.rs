//! Mesh Core - Layer-3 mesh routing for small radio nodes
//!
//! Every node runs the same engine on top of one or more link-layer
//! transports. Nodes announce themselves to direct neighbours (IAM),
//! advertise the destinations they can reach with a hop cost (ICAN), and
//! relay unicast frames along the cheapest known route until the TTL runs
//! out.
//!
//! ```rust,no_run
//! use mesh_core::{MeshConfig, MockLink, Node, NodeId, HwAddr};
//! use std::sync::Arc;
//!
//! let mut node = Node::new(MeshConfig::default())?;
//! let radio = Arc::new(MockLink::new("radio0", HwAddr::from_slice(&[1, 2, 3, 4, 5]).unwrap()));
//! node.add_link(radio);
//! node.set_identity(NodeId::new(10))?;
//! node.on_unicast(|from, kind, payload| println!("{} sent {:#04x}: {:?}", from, kind, payload));
//!
//! loop {
//!     node.process();
//! }
//! # Ok::<(), mesh_core::MeshError>(())
//! ```

pub mod clock;
pub mod config;
mod engine;
pub mod error;
pub mod host_table;
pub mod link;
pub mod node;
pub mod packet;
pub mod route;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use host_table::{HostTable, RejectReason, RouteEntry, Upsert, UpsertOutcome};
pub use link::{Link, LinkId, MockLink, Transmission};
pub use node::{DeliveryCallback, Node};
pub use packet::{
    compute_checksum, verify_checksum, Advertisement, HwAddr, NodeId, Packet, PacketType,
    RawFrame, FRAME_SIZE, IAM, ICAN, MTU,
};
pub use route::{resolve, Route};
pub use stats::NodeStats;
