//! Mesh frame structures
//!
//! Every frame on the air is exactly [`FRAME_SIZE`] bytes:
//!
//! ```text
//! [ 2 bytes: sender id (u16, little-endian) ]
//! [ 2 bytes: receiver id (u16, little-endian) ]
//! [ 1 byte:  packet type ]
//! [ 1 byte:  time to live ]
//! [ 1 byte:  payload length (0..=24) ]
//! [ 24 bytes: payload, zero padded ]
//! [ 1 byte:  checksum ]
//! ```
//!
//! The checksum byte is chosen so that the sum of all 32 bytes is 0 mod 256.
//! Any single flipped bit changes the sum by a power of two below 256 and is
//! therefore always caught. Multi-byte errors whose deltas cancel are not,
//! and an all-zero buffer is checksum-valid.

use crate::{MeshError, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Total frame size in bytes
pub const FRAME_SIZE: usize = 32;

/// Payload capacity per frame
pub const MTU: usize = 24;

/// Neighbour identity announcement ("I am this id")
pub const IAM: u8 = 0xF0;

/// Route advertisement ("I can reach these ids")
pub const ICAN: u8 = 0xF1;

/// First packet type reserved for protocol control
pub const RESERVED_TYPE_START: u8 = 0xF0;

/// Largest link-layer address stored for a direct neighbour
pub const MAX_HWADDR_LEN: usize = 8;

/// Bytes per `(id, cost)` advertisement inside an ICAN payload
pub const ADVERTISEMENT_SIZE: usize = 3;

/// Advertisements that fit into one ICAN frame
pub const ADVERTISEMENTS_PER_FRAME: usize = MTU / ADVERTISEMENT_SIZE;

const CHECKSUM_OFFSET: usize = FRAME_SIZE - 1;

/// A raw on-air frame
pub type RawFrame = [u8; FRAME_SIZE];

/// 16-bit node identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Broadcast receiver address
    pub const BROADCAST: NodeId = NodeId(0xFFFF);

    /// "Next hop is the link itself"; never a valid identity
    pub const DIRECT: NodeId = NodeId(0x0000);

    pub const fn new(value: u16) -> Self {
        NodeId(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_direct(&self) -> bool {
        *self == Self::DIRECT
    }

    /// True for either sentinel
    pub fn is_reserved(&self) -> bool {
        self.is_broadcast() || self.is_direct()
    }
}

impl From<u16> for NodeId {
    fn from(value: u16) -> Self {
        NodeId(value)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BROADCAST => write!(f, "NodeId(Broadcast)"),
            Self::DIRECT => write!(f, "NodeId(Direct)"),
            NodeId(v) => write!(f, "NodeId({})", v),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packet type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Neighbour announcement
    Iam,

    /// Route advertisement
    Ican,

    /// Protocol-reserved type with no defined meaning yet
    Reserved(u8),

    /// Application type (0x00..=0xEF)
    Application(u8),
}

impl PacketType {
    /// Convert from byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            IAM => PacketType::Iam,
            ICAN => PacketType::Ican,
            v if v >= RESERVED_TYPE_START => PacketType::Reserved(v),
            v => PacketType::Application(v),
        }
    }

    /// Convert to byte
    pub fn as_u8(&self) -> u8 {
        match *self {
            PacketType::Iam => IAM,
            PacketType::Ican => ICAN,
            PacketType::Reserved(v) | PacketType::Application(v) => v,
        }
    }

    pub fn is_protocol(&self) -> bool {
        self.as_u8() >= RESERVED_TYPE_START
    }
}

/// Link-layer address held inline
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HwAddr {
    bytes: [u8; MAX_HWADDR_LEN],
    len: u8,
}

impl HwAddr {
    /// Copy an address; `None` if it is longer than [`MAX_HWADDR_LEN`]
    pub fn from_slice(addr: &[u8]) -> Option<Self> {
        if addr.len() > MAX_HWADDR_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_HWADDR_LEN];
        bytes[..addr.len()].copy_from_slice(addr);
        Some(Self {
            bytes,
            len: addr.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({})", self)
    }
}

/// One `(id, cost)` pair carried in an ICAN payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub id: NodeId,
    pub cost: u8,
}

impl Advertisement {
    /// Parse all complete triples from an ICAN payload; a trailing partial
    /// triple is ignored
    pub fn parse_all(payload: &[u8]) -> impl Iterator<Item = Advertisement> + '_ {
        payload.chunks_exact(ADVERTISEMENT_SIZE).map(|mut chunk| Advertisement {
            // ids inside ICAN payloads are high byte first
            id: NodeId(chunk.get_u16()),
            cost: chunk.get_u8(),
        })
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.id.0);
        buf.put_u8(self.cost);
    }
}

/// A decoded mesh frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub packet_type: PacketType,
    pub ttl: u8,
    payload: [u8; MTU],
    len: u8,
}

impl Packet {
    /// Create a packet; payloads longer than [`MTU`] are truncated
    pub fn new(
        sender: NodeId,
        receiver: NodeId,
        packet_type: PacketType,
        ttl: u8,
        payload: &[u8],
    ) -> Self {
        let len = payload.len().min(MTU);
        let mut buf = [0u8; MTU];
        buf[..len].copy_from_slice(&payload[..len]);
        Self {
            sender,
            receiver,
            packet_type,
            ttl,
            payload: buf,
            len: len as u8,
        }
    }

    /// Broadcast IAM carrying a link's hardware address
    pub fn iam(sender: NodeId, hwaddr: &HwAddr) -> Self {
        Self::new(
            sender,
            NodeId::BROADCAST,
            PacketType::Iam,
            1,
            hwaddr.as_bytes(),
        )
    }

    /// Broadcast ICAN carrying up to [`ADVERTISEMENTS_PER_FRAME`] routes
    pub fn ican(sender: NodeId, adverts: &[Advertisement]) -> Self {
        let mut payload = Vec::with_capacity(MTU);
        for advert in adverts.iter().take(ADVERTISEMENTS_PER_FRAME) {
            advert.write_to(&mut payload);
        }
        Self::new(sender, NodeId::BROADCAST, PacketType::Ican, 1, &payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_broadcast()
    }

    /// Encode to an on-air frame with a fresh checksum
    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_SIZE];
        {
            let mut buf = &mut frame[..];
            buf.put_u16_le(self.sender.0);
            buf.put_u16_le(self.receiver.0);
            buf.put_u8(self.packet_type.as_u8());
            buf.put_u8(self.ttl);
            buf.put_u8(self.len);
            buf.put_slice(&self.payload);
        }
        compute_checksum(&mut frame);
        frame
    }

    /// Decode and verify an on-air frame
    pub fn decode(frame: &RawFrame) -> Result<Self> {
        if !verify_checksum(frame) {
            return Err(MeshError::Checksum);
        }

        let mut buf = &frame[..];
        let sender = NodeId(buf.get_u16_le());
        let receiver = NodeId(buf.get_u16_le());
        let packet_type = PacketType::from_u8(buf.get_u8());
        let ttl = buf.get_u8();
        let len = buf.get_u8();

        if len as usize > MTU {
            return Err(MeshError::Malformed(format!(
                "payload length {} exceeds MTU {}",
                len, MTU
            )));
        }

        let mut payload = [0u8; MTU];
        payload[..len as usize].copy_from_slice(&buf[..len as usize]);

        Ok(Self {
            sender,
            receiver,
            packet_type,
            ttl,
            payload,
            len,
        })
    }
}

fn frame_sum(frame: &RawFrame) -> u8 {
    frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Set the checksum byte so the whole frame sums to 0 mod 256
pub fn compute_checksum(frame: &mut RawFrame) {
    frame[CHECKSUM_OFFSET] = 0;
    let sum = frame_sum(frame);
    frame[CHECKSUM_OFFSET] = sum.wrapping_neg();
}

/// True iff all 32 bytes sum to 0 mod 256
pub fn verify_checksum(frame: &RawFrame) -> bool {
    frame_sum(frame) == 0
}
