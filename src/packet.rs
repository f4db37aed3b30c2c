//! Packet buffer and metadata
//!
//! Owns the raw bytes of one frame plus the metadata the pipeline stamps and
//! consumes. The buffer keeps `len <= capacity <= MAX_PACKET_SIZE` at all
//! times; every accessor is bounds-checked against `len`.

use crate::port::{PortId, PORT_ID_INVALID};
use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Largest frame the switch will buffer (jumbo)
pub const MAX_PACKET_SIZE: usize = 9216;

/// Where a packet is in its lifecycle relative to the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Rx,
    Tx,
    Internal,
    #[default]
    Invalid,
}

/// Metadata stamped at ingress and mutated by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub port: PortId,
    pub direction: Direction,
    pub vlan: u16,
    pub priority: u8,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub ethertype: u16,
    pub is_tagged: bool,
    pub is_dropped: bool,
    pub timestamp_us: u64,
}

impl Default for PacketMetadata {
    fn default() -> Self {
        Self {
            port: PORT_ID_INVALID,
            direction: Direction::Invalid,
            vlan: 0,
            priority: 0,
            src_mac: MacAddr::ZERO,
            dst_mac: MacAddr::ZERO,
            ethertype: 0,
            is_tagged: false,
            is_dropped: false,
            timestamp_us: 0,
        }
    }
}

/// A bounded, owned packet buffer
#[derive(Debug)]
pub struct PacketBuffer {
    data: Vec<u8>,
    len: usize,
    pub metadata: PacketMetadata,
    /// Opaque application tag; never copied by `clone_buffer`
    pub user_data: Option<u64>,
}

impl PacketBuffer {
    /// Allocate a zero-initialized buffer of the given capacity.
    pub fn alloc(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_PACKET_SIZE {
            return Err(Error::InvalidArgument(format!(
                "packet capacity {} outside 1..={}",
                capacity, MAX_PACKET_SIZE
            )));
        }
        Ok(Self {
            data: vec![0u8; capacity],
            len: 0,
            metadata: PacketMetadata::default(),
            user_data: None,
        })
    }

    /// Build a buffer holding a copy of `frame`.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let mut buffer = Self::alloc(frame.len().max(1))?;
        buffer.append(frame)?;
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Clear contents and restore default metadata; capacity is untouched.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.len = 0;
        self.metadata = PacketMetadata::default();
        self.user_data = None;
    }

    /// Append bytes to the end of the packet.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.len + bytes.len() > self.capacity() {
            return Err(Error::Overflow {
                needed: self.len + bytes.len(),
                available: self.capacity(),
            });
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Read one byte at `offset`.
    pub fn peek_byte(&self, offset: usize) -> Result<u8> {
        if offset >= self.len {
            return Err(Error::OutOfBounds {
                offset,
                len: 1,
                limit: self.len,
            });
        }
        Ok(self.data[offset])
    }

    /// Borrow `len` bytes starting at `offset`. Zero-length reads succeed.
    pub fn peek(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if offset + len > self.len {
            return Err(Error::OutOfBounds {
                offset,
                len,
                limit: self.len,
            });
        }
        Ok(&self.data[offset..offset + len])
    }

    /// Copy bytes out of the packet into `dst`.
    pub fn copy_to(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let src = self.peek(offset, dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Overwrite bytes in place; the range must already be within `len`.
    pub fn update(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if offset + src.len() > self.len {
            return Err(Error::OutOfBounds {
                offset,
                len: src.len(),
                limit: self.len,
            });
        }
        self.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Independent copy with the same bytes and metadata; user data is not
    /// carried over.
    pub fn clone_buffer(&self) -> Result<Self> {
        let mut clone = Self::alloc(self.capacity())?;
        clone.data[..self.len].copy_from_slice(&self.data[..self.len]);
        clone.len = self.len;
        clone.metadata = self.metadata.clone();
        Ok(clone)
    }

    /// Set the packet length. Within capacity this only moves `len`; growing
    /// past capacity reallocates. On failure the buffer is unchanged.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if new_len == 0 {
            return Err(Error::InvalidArgument("cannot resize packet to zero".into()));
        }
        if new_len <= self.capacity() {
            self.len = new_len;
            return Ok(());
        }
        if new_len > MAX_PACKET_SIZE {
            return Err(Error::Overflow {
                needed: new_len,
                available: MAX_PACKET_SIZE,
            });
        }
        self.data.resize(new_len, 0);
        self.len = new_len;
        Ok(())
    }

    /// Insert bytes at `offset`, shifting the tail; grows via `resize` when
    /// the new length exceeds capacity.
    pub fn insert(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Err(Error::InvalidArgument("insert of zero bytes".into()));
        }
        if offset > self.len {
            return Err(Error::OutOfBounds {
                offset,
                len: src.len(),
                limit: self.len,
            });
        }
        let old_len = self.len;
        let new_len = old_len + src.len();
        if new_len > self.capacity() {
            self.resize(new_len)?;
        }
        self.data.copy_within(offset..old_len, offset + src.len());
        self.data[offset..offset + src.len()].copy_from_slice(src);
        self.len = new_len;
        Ok(())
    }

    /// Remove `len` bytes at `offset`, closing the gap.
    pub fn remove(&mut self, offset: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::InvalidArgument("remove of zero bytes".into()));
        }
        if offset + len > self.len {
            return Err(Error::OutOfBounds {
                offset,
                len,
                limit: self.len,
            });
        }
        self.data.copy_within(offset + len..self.len, offset);
        self.len -= len;
        Ok(())
    }
}
