//! Node counters

use std::fmt;

/// Statistics for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Frames read from links
    pub frames_rx: u64,
    /// Frames handed to links
    pub frames_tx: u64,
    /// Frames dropped for a bad checksum or length
    pub dropped_corrupt: u64,
    /// Frames relayed for other nodes
    pub forwarded: u64,
    /// Relayed frames dropped because the TTL ran out
    pub ttl_expired: u64,
    /// Frames (relayed or local) dropped for lack of a route
    pub no_route: u64,
    /// Frames handed to the application callbacks
    pub delivered: u64,
    /// IAM/ICAN frames accepted
    pub control_rx: u64,
    /// Routes removed by expiry
    pub routes_expired: u64,
    /// Transmit failures reported by links
    pub link_errors: u64,
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} tx={} corrupt={} fwd={} ttl_expired={} no_route={} delivered={} control={} expired={} link_errors={}",
            self.frames_rx,
            self.frames_tx,
            self.dropped_corrupt,
            self.forwarded,
            self.ttl_expired,
            self.no_route,
            self.delivered,
            self.control_rx,
            self.routes_expired,
            self.link_errors
        )
    }
}
