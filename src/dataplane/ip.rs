//! IP ingress pipeline
//!
//! IPv4 and IPv6 header validation, option / extension-header handling, TTL
//! and hop-limit enforcement, local delivery, and fragmentation with
//! reassembly. The pipeline works on raw datagram bytes (the Ethernet layer
//! already stripped) and returns an action for the caller to route, deliver
//! or drop; it never transmits by itself.

use crate::port::PortId;
use crate::protocol::{ipv4, ipv6};
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Fragment offsets a single datagram may occupy
pub const MAX_FRAGMENTS: usize = 64;
/// Reassembly contexts alive at once
pub const MAX_FRAGMENT_CONTEXTS: usize = 64;
/// Partial datagrams are dropped after this long
pub const FRAGMENT_TIMEOUT_SEC: u64 = 30;
/// Packets at or below this TTL after decrement are expired
pub const TTL_THRESHOLD: u8 = 1;
pub const DEFAULT_MTU: u16 = 1500;
pub const MAX_MTU: u16 = 9216;
/// Fragment offsets count in units of 8 bytes
const FRAGMENT_UNIT: usize = 8;

/// Why the pipeline refused a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    HeaderError,
    ChecksumError,
    TtlExceeded,
    FragmentationNeeded,
    ReassemblyTimeout,
}

/// What to do with a processed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpAction {
    /// Destination is one of our addresses; demux on `protocol`
    Deliver { protocol: u8, packet: Vec<u8> },
    /// TTL already decremented and checksum rewritten; route on `dst`
    Forward { packet: Vec<u8>, dst: IpAddr },
    /// Fragment absorbed; the datagram is not complete yet
    Held,
    Drop(DropReason),
}

/// Pipeline counters, mirrored out through `get_stats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpStats {
    pub packets_processed: u64,
    pub bytes_processed: u64,
    pub ipv4_packets: u64,
    pub ipv6_packets: u64,
    pub fragmented_packets: u64,
    pub reassembled_packets: u64,
    pub ttl_exceeded: u64,
    pub header_errors: u64,
    pub unsupported_options: u64,
    pub forwarded_packets: u64,
    pub local_delivered: u64,
    pub dropped_packets: u64,
    pub reassembly_timeouts: u64,
}

/// Reassembly flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FragKey {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        ident: u16,
        protocol: u8,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        ident: u32,
    },
}

/// One in-progress reassembly
struct FragmentContext {
    arrival_ts: u64,
    /// Known once the final (MF=0) fragment arrives
    total_length: Option<usize>,
    fragments_received: usize,
    /// Presence per 8-byte offset unit
    units: Vec<bool>,
    payload: Vec<u8>,
    /// Header of the offset-zero fragment, reused for the reassembled packet
    first_header: Option<Vec<u8>>,
    /// Upper-layer protocol (IPv6 keeps it outside the base header)
    protocol: u8,
}

impl FragmentContext {
    fn new(now: u64) -> Self {
        Self {
            arrival_ts: now,
            total_length: None,
            fragments_received: 0,
            units: Vec::new(),
            payload: Vec::new(),
            first_header: None,
            protocol: 0,
        }
    }

    fn absorb(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        if self.payload.len() < end {
            self.payload.resize(end, 0);
        }
        self.payload[offset..end].copy_from_slice(data);

        let first_unit = offset / FRAGMENT_UNIT;
        let unit_count = data.len().div_ceil(FRAGMENT_UNIT);
        if self.units.len() < first_unit + unit_count {
            self.units.resize(first_unit + unit_count, false);
        }
        for unit in first_unit..first_unit + unit_count {
            self.units[unit] = true;
        }
        self.fragments_received += 1;
    }

    fn is_complete(&self) -> bool {
        let total = match self.total_length {
            Some(total) => total,
            None => return false,
        };
        if self.payload.len() < total {
            return false;
        }
        let needed = total.div_ceil(FRAGMENT_UNIT);
        self.units.len() >= needed && self.units[..needed].iter().all(|&u| u)
    }
}

/// The IP pipeline
pub struct IpPipeline {
    stats: IpStats,
    port_mtu: Vec<u16>,
    /// Interface addresses owned by the switch
    local_addrs: Vec<IpAddr>,
    fragments: HashMap<FragKey, FragmentContext>,
    ipv6_enabled: bool,
}

impl IpPipeline {
    pub fn new(num_ports: u32, ipv6_enabled: bool) -> Self {
        Self {
            stats: IpStats::default(),
            port_mtu: vec![DEFAULT_MTU; num_ports as usize],
            local_addrs: Vec::new(),
            fragments: HashMap::new(),
            ipv6_enabled,
        }
    }

    // ========================================
    // Addresses and MTU
    // ========================================

    pub fn add_local_address(&mut self, addr: IpAddr) {
        if !self.local_addrs.contains(&addr) {
            self.local_addrs.push(addr);
        }
    }

    pub fn remove_local_address(&mut self, addr: IpAddr) {
        self.local_addrs.retain(|a| *a != addr);
    }

    pub fn is_local(&self, addr: IpAddr) -> bool {
        self.local_addrs.contains(&addr)
    }

    pub fn set_port_mtu(&mut self, port: PortId, mtu: u16) -> Result<()> {
        if !(68..=MAX_MTU).contains(&mtu) {
            return Err(Error::InvalidArgument(format!("MTU {} out of range", mtu)));
        }
        let slot = self
            .port_mtu
            .get_mut(port as usize)
            .ok_or(Error::InvalidArgument(format!("invalid port {}", port)))?;
        *slot = mtu;
        Ok(())
    }

    pub fn get_port_mtu(&self, port: PortId) -> Result<u16> {
        self.port_mtu
            .get(port as usize)
            .copied()
            .ok_or(Error::InvalidArgument(format!("invalid port {}", port)))
    }

    pub fn get_stats(&self) -> IpStats {
        self.stats.clone()
    }

    // ========================================
    // IPv4 ingress
    // ========================================

    /// Run one received IPv4 datagram through validation, reassembly, local
    /// delivery and TTL handling.
    pub fn process_ipv4(&mut self, packet: &[u8], now: u64) -> IpAction {
        self.stats.packets_processed += 1;
        self.stats.bytes_processed += packet.len() as u64;
        self.stats.ipv4_packets += 1;

        let header = match ipv4::Ipv4Header::parse(packet) {
            Ok(h) => h,
            Err(_) => return self.drop_header_error(),
        };

        let total_length = header.total_length() as usize;
        if total_length < header.header_len() || total_length > packet.len() {
            return self.drop_header_error();
        }
        if !ipv4::verify_checksum(&packet[..header.header_len()]) {
            self.stats.header_errors += 1;
            self.stats.dropped_packets += 1;
            return IpAction::Drop(DropReason::ChecksumError);
        }

        self.count_ipv4_options(header.options());

        // Frame padding below the IP layer is not part of the datagram
        let datagram = &packet[..total_length];

        if header.is_fragment() {
            return match self.reassemble_ipv4(datagram, now) {
                Some(reassembled) => self.finish_ipv4(&reassembled),
                None => IpAction::Held,
            };
        }

        self.finish_ipv4(datagram)
    }

    /// Local-delivery and TTL stage for a whole (possibly reassembled) datagram.
    fn finish_ipv4(&mut self, datagram: &[u8]) -> IpAction {
        let header = match ipv4::Ipv4Header::parse(datagram) {
            Ok(h) => h,
            Err(_) => return self.drop_header_error(),
        };

        if self.is_local(IpAddr::V4(header.dst_addr())) {
            self.stats.local_delivered += 1;
            return IpAction::Deliver {
                protocol: header.protocol(),
                packet: datagram.to_vec(),
            };
        }

        if header.ttl() <= TTL_THRESHOLD {
            self.stats.ttl_exceeded += 1;
            self.stats.dropped_packets += 1;
            debug!(dst = %header.dst_addr(), "TTL expired");
            return IpAction::Drop(DropReason::TtlExceeded);
        }

        let dst = IpAddr::V4(header.dst_addr());
        let mut out = datagram.to_vec();
        out[8] -= 1;
        ipv4::write_checksum(&mut out);
        self.stats.forwarded_packets += 1;
        IpAction::Forward { packet: out, dst }
    }

    fn drop_header_error(&mut self) -> IpAction {
        self.stats.header_errors += 1;
        self.stats.dropped_packets += 1;
        IpAction::Drop(DropReason::HeaderError)
    }

    /// Unsupported options are counted and passed through; only the
    /// well-known ones are recognized at all.
    fn count_ipv4_options(&mut self, mut options: &[u8]) {
        while let Some(&kind) = options.first() {
            match kind {
                0 => break, // end of options
                1 => {
                    // no-op
                    options = &options[1..];
                }
                7 | 68 | 131 | 137 => {
                    // record route, timestamp, loose/strict source route
                    let len = options.get(1).copied().unwrap_or(0) as usize;
                    if len < 2 || len > options.len() {
                        break;
                    }
                    options = &options[len..];
                }
                _ => {
                    self.stats.unsupported_options += 1;
                    let len = options.get(1).copied().unwrap_or(0) as usize;
                    if len < 2 || len > options.len() {
                        break;
                    }
                    options = &options[len..];
                }
            }
        }
    }

    // ========================================
    // IPv4 reassembly
    // ========================================

    fn reassemble_ipv4(&mut self, datagram: &[u8], now: u64) -> Option<Vec<u8>> {
        let header = ipv4::Ipv4Header::parse(datagram).ok()?;
        let key = FragKey::V4 {
            src: header.src_addr(),
            dst: header.dst_addr(),
            ident: header.identification(),
            protocol: header.protocol(),
        };

        if !self.fragments.contains_key(&key) && self.fragments.len() >= MAX_FRAGMENT_CONTEXTS {
            warn!("fragment context table full, dropping fragment");
            self.stats.dropped_packets += 1;
            return None;
        }

        let offset = header.fragment_offset() as usize * FRAGMENT_UNIT;
        let more = header.more_fragments();
        let header_len = header.header_len();
        let payload = &datagram[header_len..];

        let ctx = self
            .fragments
            .entry(key)
            .or_insert_with(|| FragmentContext::new(now));

        if ctx.fragments_received >= MAX_FRAGMENTS {
            // Over-long fragment trains are left to time out
            return None;
        }

        ctx.absorb(offset, payload);
        if offset == 0 {
            ctx.first_header = Some(datagram[..header_len].to_vec());
        }
        if !more {
            ctx.total_length = Some(offset + payload.len());
        }

        if !ctx.is_complete() || ctx.first_header.is_none() {
            return None;
        }

        let ctx = self.fragments.remove(&key)?;
        let total = ctx.total_length?;
        let mut first_header = ctx.first_header?;
        let header_len = first_header.len();

        // Whole datagram: first header with fragmentation cleared
        let new_total = (header_len + total) as u16;
        first_header[2..4].copy_from_slice(&new_total.to_be_bytes());
        first_header[6] = 0;
        first_header[7] = 0;
        let mut out = first_header;
        out.extend_from_slice(&ctx.payload[..total]);
        ipv4::write_checksum(&mut out);

        self.stats.reassembled_packets += 1;
        debug!(bytes = out.len(), "reassembled IPv4 datagram");
        Some(out)
    }

    // ========================================
    // IPv4 fragmentation
    // ========================================

    /// Split a datagram to fit `mtu`. A packet that already fits is passed
    /// through untouched; the DF bit refuses fragmentation.
    pub fn fragment_ipv4(&mut self, packet: &[u8], mtu: u16) -> Result<Vec<Vec<u8>>> {
        let header = ipv4::Ipv4Header::parse(packet)
            .map_err(|_| Error::HeaderError("unparseable packet for fragmentation".into()))?;

        if packet.len() <= mtu as usize {
            return Ok(vec![packet.to_vec()]);
        }
        if header.dont_fragment() {
            self.stats.dropped_packets += 1;
            return Err(Error::FragmentationNeeded);
        }

        let header_len = header.header_len();
        let payload = &packet[header_len..];
        // Per-fragment payload, rounded down to the 8-byte unit
        let chunk = ((mtu as usize - header_len) / FRAGMENT_UNIT) * FRAGMENT_UNIT;
        if chunk == 0 {
            return Err(Error::InvalidArgument(format!("MTU {} too small", mtu)));
        }

        let base_offset = header.fragment_offset() as usize;
        let original_more = header.more_fragments();
        let mut fragments = Vec::new();
        let mut consumed = 0usize;

        while consumed < payload.len() {
            let take = chunk.min(payload.len() - consumed);
            let last = consumed + take >= payload.len();

            let mut frag = packet[..header_len].to_vec();
            frag.extend_from_slice(&payload[consumed..consumed + take]);

            let total = (header_len + take) as u16;
            frag[2..4].copy_from_slice(&total.to_be_bytes());

            let offset = base_offset + consumed / FRAGMENT_UNIT;
            let more = !last || original_more;
            let frag_field =
                ((offset as u16) & 0x1FFF) | if more { (ipv4::FLAG_MF as u16) << 13 } else { 0 };
            frag[6..8].copy_from_slice(&frag_field.to_be_bytes());
            ipv4::write_checksum(&mut frag);

            fragments.push(frag);
            consumed += take;
        }

        self.stats.fragmented_packets += 1;
        Ok(fragments)
    }

    // ========================================
    // IPv6 ingress
    // ========================================

    pub fn process_ipv6(&mut self, packet: &[u8], now: u64) -> IpAction {
        self.stats.packets_processed += 1;
        self.stats.bytes_processed += packet.len() as u64;

        if !self.ipv6_enabled {
            self.stats.dropped_packets += 1;
            return IpAction::Drop(DropReason::HeaderError);
        }
        self.stats.ipv6_packets += 1;

        let header = match ipv6::Ipv6Header::parse(packet) {
            Ok(h) => h,
            Err(_) => return self.drop_header_error(),
        };

        let datagram_len = ipv6::HEADER_SIZE + header.payload_length() as usize;
        if datagram_len > packet.len() {
            return self.drop_header_error();
        }
        let datagram = &packet[..datagram_len];

        let walk = match ipv6::walk_extension_headers(datagram) {
            Ok(walk) => walk,
            Err(_) => return self.drop_header_error(),
        };

        if let Some(frag) = walk.fragment {
            let src = header.src_addr();
            let dst = header.dst_addr();
            return match self.reassemble_ipv6(
                datagram,
                src,
                dst,
                frag,
                walk.upper_protocol,
                walk.payload_offset,
                now,
            ) {
                Some(reassembled) => self.finish_ipv6(&reassembled, walk.upper_protocol),
                None => IpAction::Held,
            };
        }

        self.finish_ipv6(datagram, walk.upper_protocol)
    }

    fn finish_ipv6(&mut self, datagram: &[u8], upper_protocol: u8) -> IpAction {
        let header = match ipv6::Ipv6Header::parse(datagram) {
            Ok(h) => h,
            Err(_) => return self.drop_header_error(),
        };

        if self.is_local(IpAddr::V6(header.dst_addr())) {
            self.stats.local_delivered += 1;
            return IpAction::Deliver {
                protocol: upper_protocol,
                packet: datagram.to_vec(),
            };
        }

        if header.hop_limit() <= TTL_THRESHOLD {
            self.stats.ttl_exceeded += 1;
            self.stats.dropped_packets += 1;
            return IpAction::Drop(DropReason::TtlExceeded);
        }

        let dst = IpAddr::V6(header.dst_addr());
        let mut out = datagram.to_vec();
        out[7] -= 1;
        self.stats.forwarded_packets += 1;
        IpAction::Forward { packet: out, dst }
    }

    #[allow(clippy::too_many_arguments)]
    fn reassemble_ipv6(
        &mut self,
        datagram: &[u8],
        src: Ipv6Addr,
        dst: Ipv6Addr,
        frag: ipv6::FragmentHeader,
        upper_protocol: u8,
        payload_offset: usize,
        now: u64,
    ) -> Option<Vec<u8>> {
        let key = FragKey::V6 {
            src,
            dst,
            ident: frag.ident,
        };

        if !self.fragments.contains_key(&key) && self.fragments.len() >= MAX_FRAGMENT_CONTEXTS {
            warn!("fragment context table full, dropping fragment");
            self.stats.dropped_packets += 1;
            return None;
        }

        let offset = frag.offset as usize * FRAGMENT_UNIT;
        let payload = &datagram[payload_offset..];

        let ctx = self
            .fragments
            .entry(key)
            .or_insert_with(|| FragmentContext::new(now));

        if ctx.fragments_received >= MAX_FRAGMENTS {
            return None;
        }

        ctx.absorb(offset, payload);
        if offset == 0 {
            // Keep the base header only; extension headers before the
            // fragment header do not survive reassembly here.
            ctx.first_header = Some(datagram[..ipv6::HEADER_SIZE].to_vec());
            ctx.protocol = upper_protocol;
        }
        if !frag.more_fragments {
            ctx.total_length = Some(offset + payload.len());
        }

        if !ctx.is_complete() || ctx.first_header.is_none() {
            return None;
        }

        let ctx = self.fragments.remove(&key)?;
        let total = ctx.total_length?;
        let mut out = ctx.first_header?;
        out[4..6].copy_from_slice(&(total as u16).to_be_bytes());
        out[6] = ctx.protocol;
        out.extend_from_slice(&ctx.payload[..total]);

        self.stats.reassembled_packets += 1;
        Some(out)
    }

    // ========================================
    // Fragment context sweep
    // ========================================

    /// Expire reassembly contexts past the timeout. Returns the number of
    /// partial datagrams dropped.
    pub fn sweep_fragments(&mut self, now: u64) -> usize {
        let before = self.fragments.len();
        self.fragments
            .retain(|_, ctx| now.saturating_sub(ctx.arrival_ts) <= FRAGMENT_TIMEOUT_SEC);
        let expired = before - self.fragments.len();
        if expired > 0 {
            warn!(count = expired, "fragment reassembly timed out");
            self.stats.reassembly_timeouts += expired as u64;
            self.stats.dropped_packets += expired as u64;
            self.stats.header_errors += expired as u64;
        }
        expired
    }

    #[cfg(test)]
    fn pending_contexts(&self) -> usize {
        self.fragments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ipv4::protocol;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);

    fn datagram(ttl: u8, payload_len: usize) -> Vec<u8> {
        build_fragment(0x0100, 0, false, ttl, payload_len, 0xAB)
    }

    /// Build an IPv4 packet; `offset` is in bytes.
    fn build_fragment(
        ident: u16,
        offset: usize,
        more: bool,
        ttl: u8,
        payload_len: usize,
        fill: u8,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; 20 + payload_len];
        packet[0] = 0x45;
        let total = (20 + payload_len) as u16;
        packet[2..4].copy_from_slice(&total.to_be_bytes());
        packet[4..6].copy_from_slice(&ident.to_be_bytes());
        let frag_field = ((offset / 8) as u16) | if more { 0x2000 } else { 0 };
        packet[6..8].copy_from_slice(&frag_field.to_be_bytes());
        packet[8] = ttl;
        packet[9] = protocol::UDP;
        packet[12..16].copy_from_slice(&SRC.octets());
        packet[16..20].copy_from_slice(&DST.octets());
        for b in &mut packet[20..] {
            *b = fill;
        }
        ipv4::write_checksum(&mut packet);
        packet
    }

    // ========================================
    // Validation
    // ========================================

    #[test]
    fn test_forward_decrements_ttl() {
        let mut pipeline = IpPipeline::new(4, false);
        let packet = datagram(64, 100);

        match pipeline.process_ipv4(&packet, 0) {
            IpAction::Forward { packet: out, dst } => {
                assert_eq!(dst, IpAddr::V4(DST));
                let header = ipv4::Ipv4Header::parse(&out).unwrap();
                assert_eq!(header.ttl(), 63);
                // Checksum recomputes to valid after the rewrite
                assert!(ipv4::verify_checksum(&out[..20]));
            }
            other => panic!("expected forward, got {:?}", other),
        }
        assert_eq!(pipeline.get_stats().forwarded_packets, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut pipeline = IpPipeline::new(4, false);
        let packet = datagram(1, 100);

        assert_eq!(
            pipeline.process_ipv4(&packet, 0),
            IpAction::Drop(DropReason::TtlExceeded)
        );
        let stats = pipeline.get_stats();
        assert_eq!(stats.ttl_exceeded, 1);
        assert_eq!(stats.dropped_packets, 1);
        assert_eq!(stats.forwarded_packets, 0);
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let mut pipeline = IpPipeline::new(4, false);
        let mut packet = datagram(64, 100);
        packet[10] ^= 0xFF;

        assert_eq!(
            pipeline.process_ipv4(&packet, 0),
            IpAction::Drop(DropReason::ChecksumError)
        );
        assert_eq!(pipeline.get_stats().header_errors, 1);
    }

    #[test]
    fn test_bad_version_and_truncation() {
        let mut pipeline = IpPipeline::new(4, false);

        let mut bad_version = datagram(64, 20);
        bad_version[0] = 0x65;
        assert_eq!(
            pipeline.process_ipv4(&bad_version, 0),
            IpAction::Drop(DropReason::HeaderError)
        );

        // total_length larger than the actual frame
        let mut truncated = datagram(64, 20);
        truncated[2..4].copy_from_slice(&9999u16.to_be_bytes());
        ipv4::write_checksum(&mut truncated);
        assert_eq!(
            pipeline.process_ipv4(&truncated, 0),
            IpAction::Drop(DropReason::HeaderError)
        );
    }

    #[test]
    fn test_local_delivery() {
        let mut pipeline = IpPipeline::new(4, false);
        pipeline.add_local_address(IpAddr::V4(DST));
        let packet = datagram(64, 50);

        match pipeline.process_ipv4(&packet, 0) {
            IpAction::Deliver { protocol: proto, .. } => {
                assert_eq!(proto, protocol::UDP)
            }
            other => panic!("expected deliver, got {:?}", other),
        }
        assert_eq!(pipeline.get_stats().local_delivered, 1);
    }

    #[test]
    fn test_local_delivery_ignores_ttl() {
        let mut pipeline = IpPipeline::new(4, false);
        pipeline.add_local_address(IpAddr::V4(DST));
        let packet = datagram(1, 50);
        assert!(matches!(
            pipeline.process_ipv4(&packet, 0),
            IpAction::Deliver { .. }
        ));
    }

    #[test]
    fn test_frame_padding_tolerated() {
        let mut pipeline = IpPipeline::new(4, false);
        let mut packet = datagram(64, 10);
        // Ethernet-style trailing padding
        packet.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            pipeline.process_ipv4(&packet, 0),
            IpAction::Forward { .. }
        ));
    }

    // ========================================
    // Reassembly
    // ========================================

    #[test]
    fn test_two_fragment_reassembly() {
        let mut pipeline = IpPipeline::new(4, false);

        let first = build_fragment(0x1234, 0, true, 64, 1480, 0x11);
        let second = build_fragment(0x1234, 1480, false, 64, 500, 0x22);

        assert_eq!(pipeline.process_ipv4(&first, 0), IpAction::Held);
        match pipeline.process_ipv4(&second, 1) {
            IpAction::Forward { packet, .. } => {
                // 20-byte header + 1980 payload
                assert_eq!(packet.len(), 2000);
                let header = ipv4::Ipv4Header::parse(&packet).unwrap();
                assert!(!header.is_fragment());
                assert!(ipv4::verify_checksum(&packet[..20]));
                assert_eq!(packet[20], 0x11);
                assert_eq!(packet[20 + 1480], 0x22);
            }
            other => panic!("expected forward of reassembled packet, got {:?}", other),
        }
        assert_eq!(pipeline.get_stats().reassembled_packets, 1);
        assert_eq!(pipeline.pending_contexts(), 0);
    }

    #[test]
    fn test_out_of_order_fragments() {
        let mut pipeline = IpPipeline::new(4, false);
        let first = build_fragment(0x42, 0, true, 64, 64, 1);
        let second = build_fragment(0x42, 64, false, 64, 32, 2);

        assert_eq!(pipeline.process_ipv4(&second, 0), IpAction::Held);
        assert!(matches!(
            pipeline.process_ipv4(&first, 0),
            IpAction::Forward { .. }
        ));
    }

    #[test]
    fn test_distinct_flows_not_mixed() {
        let mut pipeline = IpPipeline::new(4, false);
        let a = build_fragment(0x0001, 0, true, 64, 64, 1);
        let b = build_fragment(0x0002, 64, false, 64, 32, 2);

        assert_eq!(pipeline.process_ipv4(&a, 0), IpAction::Held);
        assert_eq!(pipeline.process_ipv4(&b, 0), IpAction::Held);
        assert_eq!(pipeline.pending_contexts(), 2);
    }

    #[test]
    fn test_fragment_timeout() {
        let mut pipeline = IpPipeline::new(4, false);
        let lone = build_fragment(0x77, 0, true, 64, 64, 1);
        assert_eq!(pipeline.process_ipv4(&lone, 100), IpAction::Held);

        assert_eq!(pipeline.sweep_fragments(100 + FRAGMENT_TIMEOUT_SEC), 0);
        assert_eq!(pipeline.sweep_fragments(101 + FRAGMENT_TIMEOUT_SEC), 1);

        let stats = pipeline.get_stats();
        assert_eq!(stats.reassembly_timeouts, 1);
        assert_eq!(stats.dropped_packets, 1);
        assert_eq!(stats.header_errors, 1);
        assert_eq!(pipeline.pending_contexts(), 0);
    }

    #[test]
    fn test_max_fragments_reassembles() {
        let mut pipeline = IpPipeline::new(4, false);
        // MAX_FRAGMENTS fragments of 8 bytes each
        for i in 0..MAX_FRAGMENTS {
            let last = i == MAX_FRAGMENTS - 1;
            let frag = build_fragment(0x99, i * 8, !last, 64, 8, i as u8);
            let action = pipeline.process_ipv4(&frag, 0);
            if last {
                assert!(matches!(action, IpAction::Forward { .. }));
            } else {
                assert_eq!(action, IpAction::Held);
            }
        }
        assert_eq!(pipeline.get_stats().reassembled_packets, 1);
    }

    // ========================================
    // Fragmentation
    // ========================================

    #[test]
    fn test_fragmentation_on_small_mtu() {
        let mut pipeline = IpPipeline::new(4, false);
        let packet = datagram(64, 2980); // 3000 bytes total

        let fragments = pipeline.fragment_ipv4(&packet, 1500).unwrap();
        assert!(fragments.len() >= 2);

        // Every fragment fits, has a valid checksum, MF on all but the last
        let mut reassembled = vec![0u8; 2980];
        for (i, frag) in fragments.iter().enumerate() {
            assert!(frag.len() <= 1500);
            let header = ipv4::Ipv4Header::parse(frag).unwrap();
            assert!(ipv4::verify_checksum(&frag[..header.header_len()]));
            assert_eq!(header.more_fragments(), i != fragments.len() - 1);

            let offset = header.fragment_offset() as usize * 8;
            let payload = &frag[header.header_len()..];
            reassembled[offset..offset + payload.len()].copy_from_slice(payload);
            // Offsets are 8-byte aligned
            if header.more_fragments() {
                assert_eq!(payload.len() % 8, 0);
            }
        }
        assert!(reassembled.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_df_refuses_fragmentation() {
        let mut pipeline = IpPipeline::new(4, false);
        let mut packet = datagram(64, 2980);
        packet[6] |= 0x40; // DF
        ipv4::write_checksum(&mut packet);

        assert!(matches!(
            pipeline.fragment_ipv4(&packet, 1500),
            Err(Error::FragmentationNeeded)
        ));
    }

    #[test]
    fn test_fitting_packet_not_fragmented() {
        let mut pipeline = IpPipeline::new(4, false);
        let packet = datagram(64, 100);
        let fragments = pipeline.fragment_ipv4(&packet, 1500).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0], packet);
        assert_eq!(pipeline.get_stats().fragmented_packets, 0);
    }

    // ========================================
    // MTU configuration
    // ========================================

    #[test]
    fn test_port_mtu() {
        let mut pipeline = IpPipeline::new(4, false);
        assert_eq!(pipeline.get_port_mtu(0).unwrap(), DEFAULT_MTU);

        pipeline.set_port_mtu(0, 9000).unwrap();
        assert_eq!(pipeline.get_port_mtu(0).unwrap(), 9000);

        assert!(pipeline.set_port_mtu(0, 10).is_err());
        assert!(pipeline.set_port_mtu(0, MAX_MTU + 1).is_err());
        assert!(pipeline.set_port_mtu(99, 1500).is_err());
    }

    // ========================================
    // IPv6
    // ========================================

    fn v6_datagram(hop_limit: u8, next: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 40];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        packet[6] = next;
        packet[7] = hop_limit;
        packet[8..24]
            .copy_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        packet[24..40]
            .copy_from_slice(&"2001:db8::2".parse::<Ipv6Addr>().unwrap().octets());
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_ipv6_forward_decrements_hop_limit() {
        let mut pipeline = IpPipeline::new(4, true);
        let packet = v6_datagram(64, ipv6::next_header::UDP, &[0u8; 16]);

        match pipeline.process_ipv6(&packet, 0) {
            IpAction::Forward { packet: out, dst } => {
                assert_eq!(out[7], 63);
                assert_eq!(dst, IpAddr::V6("2001:db8::2".parse().unwrap()));
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_ipv6_hop_limit_expiry() {
        let mut pipeline = IpPipeline::new(4, true);
        let packet = v6_datagram(1, ipv6::next_header::UDP, &[0u8; 16]);
        assert_eq!(
            pipeline.process_ipv6(&packet, 0),
            IpAction::Drop(DropReason::TtlExceeded)
        );
    }

    #[test]
    fn test_ipv6_disabled_drops() {
        let mut pipeline = IpPipeline::new(4, false);
        let packet = v6_datagram(64, ipv6::next_header::UDP, &[0u8; 16]);
        assert!(matches!(pipeline.process_ipv6(&packet, 0), IpAction::Drop(_)));
        assert_eq!(pipeline.get_stats().ipv6_packets, 0);
    }

    #[test]
    fn test_ipv6_local_delivery() {
        let mut pipeline = IpPipeline::new(4, true);
        pipeline.add_local_address(IpAddr::V6("2001:db8::2".parse().unwrap()));
        let packet = v6_datagram(64, ipv6::next_header::TCP, &[0u8; 8]);

        match pipeline.process_ipv6(&packet, 0) {
            IpAction::Deliver { protocol: proto, .. } => {
                assert_eq!(proto, ipv6::next_header::TCP)
            }
            other => panic!("expected deliver, got {:?}", other),
        }
    }

    #[test]
    fn test_ipv6_fragment_reassembly() {
        let mut pipeline = IpPipeline::new(4, true);

        // Fragment 1: offset 0, MF, 16 bytes of UDP payload
        let mut ext1 = vec![ipv6::next_header::UDP, 0, 0, 0, 0, 0, 0, 0x55];
        ext1[2..4].copy_from_slice(&1u16.to_be_bytes()); // offset 0, MF
        ext1[4..8].copy_from_slice(&0x55u32.to_be_bytes());
        ext1.extend_from_slice(&[0x11; 16]);
        let frag1 = v6_datagram(64, ipv6::next_header::FRAGMENT, &ext1);

        // Fragment 2: offset 2 units (16 bytes), last
        let mut ext2 = vec![ipv6::next_header::UDP, 0, 0, 0, 0, 0, 0, 0];
        ext2[2..4].copy_from_slice(&((2u16 << 3) | 0).to_be_bytes());
        ext2[4..8].copy_from_slice(&0x55u32.to_be_bytes());
        ext2.extend_from_slice(&[0x22; 8]);
        let frag2 = v6_datagram(64, ipv6::next_header::FRAGMENT, &ext2);

        assert_eq!(pipeline.process_ipv6(&frag1, 0), IpAction::Held);
        match pipeline.process_ipv6(&frag2, 1) {
            IpAction::Forward { packet, .. } => {
                // Base header + 24 payload bytes, fragment header gone
                assert_eq!(packet.len(), 40 + 24);
                assert_eq!(packet[6], ipv6::next_header::UDP);
                assert_eq!(packet[40], 0x11);
                assert_eq!(packet[40 + 16], 0x22);
            }
            other => panic!("expected forward, got {:?}", other),
        }
        assert_eq!(pipeline.get_stats().reassembled_packets, 1);
    }
}
