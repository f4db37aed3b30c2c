//! Ethernet frame parsing and construction

use super::{ethertype, MacAddr, VlanTag};
use crate::{Error, Result};

/// Ethernet II header length (no tag)
pub const HEADER_SIZE: usize = 14;
/// Header length with one 802.1Q tag
pub const TAGGED_HEADER_SIZE: usize = 18;
/// Minimum frame size enforced at ingress when hardware simulation is on
pub const MIN_FRAME_SIZE: usize = 60;
/// Maximum frame size the switch will carry (jumbo)
pub const MAX_FRAME_SIZE: usize = 9216;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
    vlan_tag: Option<VlanTag>,
    payload_offset: usize,
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame from a buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }

        let tpid = u16::from_be_bytes([buffer[12], buffer[13]]);
        let (vlan_tag, payload_offset) = if tpid == ethertype::VLAN {
            if buffer.len() < TAGGED_HEADER_SIZE {
                return Err(Error::Parse("VLAN frame too short".into()));
            }
            let tag = VlanTag::from_bytes([buffer[14], buffer[15]]);
            (Some(tag), TAGGED_HEADER_SIZE)
        } else {
            (None, HEADER_SIZE)
        };

        Ok(Self {
            buffer,
            vlan_tag,
            payload_offset,
        })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr::from_bytes(&self.buffer[0..6])
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr::from_bytes(&self.buffer[6..12])
    }

    /// The effective EtherType, i.e. the inner one for tagged frames.
    pub fn ethertype(&self) -> u16 {
        let offset = if self.vlan_tag.is_some() { 16 } else { 12 };
        u16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]])
    }

    pub fn vlan_tag(&self) -> Option<VlanTag> {
        self.vlan_tag
    }

    pub fn is_tagged(&self) -> bool {
        self.vlan_tag.is_some()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.payload_offset..]
    }

    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(128),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn vlan_tag(mut self, tag: VlanTag) -> Self {
        self.buffer.extend_from_slice(&ethertype::VLAN.to_be_bytes());
        self.buffer.extend_from_slice(&tag.to_bytes());
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    /// Pad to the classic 60-byte minimum (FCS excluded).
    pub fn pad_to_min(mut self) -> Self {
        if self.buffer.len() < MIN_FRAME_SIZE {
            self.buffer.resize(MIN_FRAME_SIZE, 0);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
