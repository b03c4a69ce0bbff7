//! Link-layer abstraction
//!
//! The routing engine only ever talks to a transport through [`Link`].
//! Radio drivers, serial bridges and the in-memory [`MockLink`] all plug in
//! here. Any interrupt-side synchronisation belongs to the implementation.

use crate::packet::{HwAddr, Packet, RawFrame};
use crate::{MeshError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Link-layer transport trait
///
/// All calls are made synchronously from the node's polling thread and are
/// expected to return promptly.
pub trait Link: Send + Sync {
    /// Send a frame to one directly reachable station
    fn unicast(&self, hwaddr: &HwAddr, frame: &RawFrame) -> Result<()>;

    /// Send a frame to every directly reachable station
    fn broadcast(&self, frame: &RawFrame) -> Result<()>;

    /// Number of frames waiting to be read
    fn available(&self) -> usize;

    /// Read one frame; only called after `available()` returned non-zero
    fn receive(&self) -> Result<RawFrame>;

    /// This link's own hardware address
    fn hardware_address(&self) -> HwAddr;

    /// Get the link name
    fn name(&self) -> &str;
}

/// Handle to a link registered with a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A frame handed to a [`MockLink`] for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Unicast { to: HwAddr, frame: RawFrame },
    Broadcast(RawFrame),
}

impl Transmission {
    pub fn frame(&self) -> &RawFrame {
        match self {
            Transmission::Unicast { frame, .. } => frame,
            Transmission::Broadcast(frame) => frame,
        }
    }

    /// Decode the transmitted frame
    pub fn packet(&self) -> Result<Packet> {
        Packet::decode(self.frame())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory link for tests and simulation
///
/// Frames pushed with [`MockLink::inject`] are returned by `receive`;
/// everything the node transmits is captured until [`MockLink::take_sent`].
pub struct MockLink {
    name: String,
    hwaddr: HwAddr,
    inbox: Mutex<VecDeque<RawFrame>>,
    sent: Mutex<Vec<Transmission>>,
    fail_sends: AtomicBool,
}

impl MockLink {
    pub fn new(name: impl Into<String>, hwaddr: HwAddr) -> Self {
        Self {
            name: name.into(),
            hwaddr,
            inbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Queue a frame as if it had arrived over the air
    pub fn inject(&self, frame: RawFrame) {
        lock(&self.inbox).push_back(frame);
    }

    /// Drain everything transmitted so far
    pub fn take_sent(&self) -> Vec<Transmission> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Make subsequent sends fail with a link error
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn record(&self, tx: Transmission) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MeshError::Link(format!("{}: transmit failed", self.name)));
        }
        lock(&self.sent).push(tx);
        Ok(())
    }
}

impl fmt::Debug for MockLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("hwaddr", &self.hwaddr)
            .finish()
    }
}

impl Link for MockLink {
    fn unicast(&self, hwaddr: &HwAddr, frame: &RawFrame) -> Result<()> {
        self.record(Transmission::Unicast {
            to: *hwaddr,
            frame: *frame,
        })
    }

    fn broadcast(&self, frame: &RawFrame) -> Result<()> {
        self.record(Transmission::Broadcast(*frame))
    }

    fn available(&self) -> usize {
        lock(&self.inbox).len()
    }

    fn receive(&self) -> Result<RawFrame> {
        lock(&self.inbox)
            .pop_front()
            .ok_or_else(|| MeshError::Link(format!("{}: no frame available", self.name)))
    }

    fn hardware_address(&self) -> HwAddr {
        self.hwaddr
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{NodeId, PacketType};

    fn addr(bytes: &[u8]) -> HwAddr {
        HwAddr::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_mock_link_receive_order() {
        let link = MockLink::new("mock0", addr(&[1, 2, 3]));
        assert_eq!(link.available(), 0);
        assert!(link.receive().is_err());

        let a = Packet::new(NodeId(1), NodeId(2), PacketType::Application(1), 1, b"a").encode();
        let b = Packet::new(NodeId(1), NodeId(2), PacketType::Application(1), 1, b"b").encode();
        link.inject(a);
        link.inject(b);

        assert_eq!(link.available(), 2);
        assert_eq!(link.receive().unwrap(), a);
        assert_eq!(link.receive().unwrap(), b);
    }

    #[test]
    fn test_mock_link_captures_sends() {
        let link = MockLink::new("mock0", addr(&[1, 2, 3]));
        let frame = [0u8; 32];
        let dest = addr(&[9, 9]);

        link.unicast(&dest, &frame).unwrap();
        link.broadcast(&frame).unwrap();

        let sent = link.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Transmission::Unicast { to: dest, frame });
        assert!(link.take_sent().is_empty());
    }

    #[test]
    fn test_mock_link_send_failure() {
        let link = MockLink::new("mock0", addr(&[1]));
        link.set_fail_sends(true);
        assert!(matches!(
            link.broadcast(&[0u8; 32]),
            Err(MeshError::Link(_))
        ));
        assert!(link.take_sent().is_empty());
    }
}
