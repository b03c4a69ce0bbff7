//! Least-cost route resolution

use crate::host_table::{HostTable, RouteEntry};
use crate::link::LinkId;
use crate::packet::{HwAddr, NodeId};

/// Cost at or above which an entry is never chosen
pub const UNREACHABLE_COST: u8 = 255;

/// Where a frame for some destination physically goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Link to transmit on
    pub link: LinkId,
    /// Hardware address of the direct neighbour receiving the frame
    pub hwaddr: HwAddr,
    /// Identity of that neighbour
    pub via: NodeId,
    /// Cost of the selected entry
    pub cost: u8,
}

/// Cheapest entry for `destination`; the first inserted wins ties
pub fn least_cost(table: &HostTable, destination: NodeId) -> Option<&RouteEntry> {
    table
        .iter()
        .filter(|e| e.id == destination && e.cost < UNREACHABLE_COST)
        .fold(None, |best: Option<&RouteEntry>, e| match best {
            Some(b) if b.cost <= e.cost => Some(b),
            _ => Some(e),
        })
}

/// Resolve `destination` to a link and neighbour hardware address
///
/// Follows at most one relay: a relayed entry resolves only when the relay
/// itself is a direct neighbour. Returns `None` when nothing matches or the
/// relay's direct entry is missing.
pub fn resolve(table: &HostTable, destination: NodeId) -> Option<Route> {
    let best = least_cost(table, destination)?;

    let hop = if best.is_direct() {
        best
    } else {
        table.lookup(best.nexthop, NodeId::DIRECT)?
    };

    Some(Route {
        link: hop.link,
        hwaddr: hop.hwaddr?,
        via: hop.id,
        cost: best.cost,
    })
}
