//! ARP cache
//!
//! IPv4 to MAC resolution with a per-entry state machine
//! (Incomplete -> Reachable -> Stale -> Delay -> Probe -> Reachable/Failed),
//! request retries on a one-second cadence, and aging against the cache
//! timeout. The cache owns the entries; the MAC table only ever sees plain
//! (mac, vlan, port) inserts. Resolution never blocks: packets waiting on a
//! next-hop are queued here and handed back once the reply arrives.

use crate::dataplane::mac_table::{MacTable, DEFAULT_VLAN};
use crate::packet::MAX_PACKET_SIZE;
use crate::port::PortId;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::{ethertype, MacAddr};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Cache capacity
pub const DEFAULT_MAX_ENTRIES: usize = 8192;
/// Reachable entries older than this are evicted (20 minutes)
pub const ARP_CACHE_TIMEOUT_SEC: u64 = 1200;
/// Reachable entries unconfirmed for this long turn Stale
pub const ARP_REACHABLE_TIME_SEC: u64 = 600;
/// Retries for an unanswered request
pub const ARP_REQUEST_RETRY_COUNT: u8 = 3;
/// Seconds between retries
pub const ARP_REQUEST_RETRY_INTERVAL_SEC: u64 = 1;
/// Queued packets per unresolved next-hop
const PENDING_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    /// Resolution in progress
    Incomplete,
    /// Confirmed reachability
    Reachable,
    /// Reachability needs confirmation
    Stale,
    /// Waiting before probing
    Delay,
    /// Actively probing
    Probe,
    /// Resolution failed
    Failed,
}

/// One cache entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    /// Meaningless while Incomplete or Failed
    pub mac: MacAddr,
    pub state: ArpState,
    pub port_index: PortId,
    pub created_ts: u64,
    pub updated_ts: u64,
    pub retry_count: u8,
    /// Interface addressing used for (re)sending requests
    src_ip: Ipv4Addr,
    src_mac: MacAddr,
}

/// Outcome of a resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolve {
    /// Destination MAC known
    Ready { mac: MacAddr, port: PortId },
    /// Resolution running; `request` carries the broadcast frame to send on
    /// a fresh miss
    Pending { request: Option<Vec<u8>> },
    /// Resolution exhausted its retries
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArpStats {
    pub requests_sent: u64,
    pub requests_received: u64,
    pub replies_sent: u64,
    pub replies_received: u64,
    pub cache_hits: u64,
    pub invalid_packets: u64,
    pub entries_added: u64,
    pub entries_removed: u64,
    pub entries_aged: u64,
    pub cache_flushes: u64,
    pub current_entries: u64,
}

/// The ARP cache
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    /// Packets parked until their next-hop resolves
    pending: HashMap<Ipv4Addr, VecDeque<Vec<u8>>>,
    max_entries: usize,
    timeout: u64,
    reachable_time: u64,
    stats: ArpStats,
}

fn build_request_frame(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(src_mac)
        .ethertype(ethertype::ARP)
        .payload(&ArpPacket::request(src_mac, src_ip, target_ip).to_bytes())
        .pad_to_min()
        .build()
}

impl ArpCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            max_entries: if max_entries == 0 {
                DEFAULT_MAX_ENTRIES
            } else {
                max_entries
            },
            timeout: ARP_CACHE_TIMEOUT_SEC,
            reachable_time: ARP_REACHABLE_TIME_SEC,
            stats: ArpStats::default(),
        }
    }

    pub fn set_timeout(&mut self, timeout_seconds: u64) {
        self.timeout = timeout_seconds;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recycle the least-recently-updated entry to make room.
    fn make_room(&mut self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if let Some(ip) = self
            .entries
            .values()
            .min_by_key(|e| e.updated_ts)
            .map(|e| e.ip)
        {
            debug!(%ip, "recycling oldest ARP entry");
            self.entries.remove(&ip);
            self.pending.remove(&ip);
            self.stats.entries_removed += 1;
        }
    }

    // ========================================
    // Lookup / resolution
    // ========================================

    /// Passive lookup; never starts resolution.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<(MacAddr, PortId, ArpState)> {
        self.entries.get(&ip).map(|e| (e.mac, e.port_index, e.state))
    }

    /// Resolve `ip` for transmission out of `port`. A miss inserts an
    /// Incomplete entry and returns the ARP request frame to broadcast,
    /// sourced from the egress interface's address pair.
    pub fn resolve(
        &mut self,
        ip: Ipv4Addr,
        port: PortId,
        src_ip: Ipv4Addr,
        src_mac: MacAddr,
        now: u64,
    ) -> Resolve {
        if let Some(entry) = self.entries.get_mut(&ip) {
            match entry.state {
                ArpState::Reachable => {
                    self.stats.cache_hits += 1;
                    Resolve::Ready {
                        mac: entry.mac,
                        port: entry.port_index,
                    }
                }
                ArpState::Stale => {
                    // Usable, but schedule a confirmation probe
                    entry.state = ArpState::Delay;
                    entry.updated_ts = now;
                    entry.retry_count = 0;
                    entry.src_ip = src_ip;
                    entry.src_mac = src_mac;
                    self.stats.cache_hits += 1;
                    Resolve::Ready {
                        mac: entry.mac,
                        port: entry.port_index,
                    }
                }
                ArpState::Delay | ArpState::Probe => {
                    self.stats.cache_hits += 1;
                    Resolve::Ready {
                        mac: entry.mac,
                        port: entry.port_index,
                    }
                }
                ArpState::Incomplete => Resolve::Pending { request: None },
                ArpState::Failed => Resolve::Failed,
            }
        } else {
            self.make_room();
            self.entries.insert(
                ip,
                ArpEntry {
                    ip,
                    mac: MacAddr::ZERO,
                    state: ArpState::Incomplete,
                    port_index: port,
                    created_ts: now,
                    updated_ts: now,
                    retry_count: 0,
                    src_ip,
                    src_mac,
                },
            );
            self.stats.entries_added += 1;
            self.stats.requests_sent += 1;
            debug!(%ip, port, "starting ARP resolution");
            Resolve::Pending {
                request: Some(build_request_frame(src_mac, src_ip, ip)),
            }
        }
    }

    /// Park a frame until `ip` resolves. Returns false when the queue for
    /// this next-hop is full and the frame must be dropped.
    pub fn enqueue_pending(&mut self, ip: Ipv4Addr, frame: Vec<u8>) -> bool {
        if frame.len() > MAX_PACKET_SIZE {
            return false;
        }
        let queue = self.pending.entry(ip).or_default();
        if queue.len() >= PENDING_QUEUE_DEPTH {
            return false;
        }
        queue.push_back(frame);
        true
    }

    /// Frames whose next-hop just resolved.
    pub fn take_pending(&mut self, ip: Ipv4Addr) -> Vec<Vec<u8>> {
        self.pending
            .remove(&ip)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    // ========================================
    // Updates from received traffic
    // ========================================

    /// Install or refresh a binding; the MAC table learns the station at the
    /// same time so L2 forwarding stays consistent.
    pub fn add_or_update(
        &mut self,
        ip: Ipv4Addr,
        mac: MacAddr,
        port: PortId,
        now: u64,
        mac_table: &mut MacTable,
    ) {
        match self.entries.get_mut(&ip) {
            Some(entry) => {
                entry.mac = mac;
                entry.port_index = port;
                entry.state = ArpState::Reachable;
                entry.updated_ts = now;
                entry.retry_count = 0;
            }
            None => {
                self.make_room();
                self.entries.insert(
                    ip,
                    ArpEntry {
                        ip,
                        mac,
                        state: ArpState::Reachable,
                        port_index: port,
                        created_ts: now,
                        updated_ts: now,
                        retry_count: 0,
                        src_ip: Ipv4Addr::UNSPECIFIED,
                        src_mac: MacAddr::ZERO,
                    },
                );
                self.stats.entries_added += 1;
            }
        }
        let _ = mac_table.learn(mac, DEFAULT_VLAN, port, now);
    }

    /// Process a received ARP frame (full Ethernet frame). Learns the
    /// sender, and answers requests that target `our_ip` with a reply frame.
    pub fn handle_frame(
        &mut self,
        frame: &[u8],
        port: PortId,
        our_ip: Option<Ipv4Addr>,
        our_mac: MacAddr,
        now: u64,
        mac_table: &mut MacTable,
    ) -> Result<Option<Vec<u8>>> {
        let payload = frame
            .get(crate::protocol::ethernet::HEADER_SIZE..)
            .ok_or_else(|| {
                self.stats.invalid_packets += 1;
                Error::InvalidPacket("ARP frame shorter than Ethernet header".into())
            })?;

        let packet = match ArpPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.invalid_packets += 1;
                return Err(e);
            }
        };

        // Learn the sender regardless of operation
        if !packet.sender_mac.is_zero() && !packet.sender_ip.is_unspecified() {
            self.add_or_update(packet.sender_ip, packet.sender_mac, port, now, mac_table);
        }

        match packet.operation {
            ArpOp::Request => {
                self.stats.requests_received += 1;
                if our_ip == Some(packet.target_ip) {
                    self.stats.replies_sent += 1;
                    let reply = ArpPacket::reply(
                        our_mac,
                        packet.target_ip,
                        packet.sender_mac,
                        packet.sender_ip,
                    );
                    let frame = FrameBuilder::new()
                        .dst_mac(packet.sender_mac)
                        .src_mac(our_mac)
                        .ethertype(ethertype::ARP)
                        .payload(&reply.to_bytes())
                        .pad_to_min()
                        .build();
                    return Ok(Some(frame));
                }
                Ok(None)
            }
            ArpOp::Reply => {
                self.stats.replies_received += 1;
                // The learn step above already moved the entry to Reachable
                Ok(None)
            }
        }
    }

    // ========================================
    // Aging and retries
    // ========================================

    /// Advance entry lifecycles. Returns request frames to (re)transmit as
    /// (port, frame) pairs.
    pub fn age_entries(&mut self, now: u64) -> Vec<(PortId, Vec<u8>)> {
        let mut to_send = Vec::new();
        let mut evicted = Vec::new();

        for entry in self.entries.values_mut() {
            match entry.state {
                ArpState::Reachable => {
                    if now.saturating_sub(entry.updated_ts) > self.timeout {
                        evicted.push(entry.ip);
                    } else if now.saturating_sub(entry.updated_ts) > self.reachable_time {
                        entry.state = ArpState::Stale;
                    }
                }
                ArpState::Incomplete | ArpState::Probe => {
                    if now.saturating_sub(entry.updated_ts) >= ARP_REQUEST_RETRY_INTERVAL_SEC {
                        if entry.retry_count < ARP_REQUEST_RETRY_COUNT {
                            entry.retry_count += 1;
                            entry.updated_ts = now;
                            self.stats.requests_sent += 1;
                            to_send.push((
                                entry.port_index,
                                build_request_frame(entry.src_mac, entry.src_ip, entry.ip),
                            ));
                        } else {
                            warn!(ip = %entry.ip, "ARP resolution failed after retries");
                            entry.state = ArpState::Failed;
                            entry.updated_ts = now;
                        }
                    }
                }
                ArpState::Delay => {
                    // One aging pass later, start probing the cached binding
                    entry.state = ArpState::Probe;
                    entry.updated_ts = now;
                    entry.retry_count = 0;
                }
                ArpState::Stale | ArpState::Failed => {
                    if now.saturating_sub(entry.updated_ts) > self.timeout {
                        evicted.push(entry.ip);
                    }
                }
            }
        }

        for ip in evicted {
            self.entries.remove(&ip);
            self.pending.remove(&ip);
            self.stats.entries_aged += 1;
            self.stats.entries_removed += 1;
        }

        to_send
    }

    // ========================================
    // Management
    // ========================================

    pub fn remove(&mut self, ip: Ipv4Addr) -> Result<()> {
        self.entries.remove(&ip).ok_or(Error::NotFound)?;
        self.pending.remove(&ip);
        self.stats.entries_removed += 1;
        Ok(())
    }

    pub fn flush(&mut self) {
        let count = self.entries.len() as u64;
        self.entries.clear();
        self.pending.clear();
        self.stats.entries_removed += count;
        self.stats.cache_flushes += 1;
    }

    pub fn get_all(&self, max: usize) -> Vec<ArpEntry> {
        let mut entries: Vec<ArpEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.ip);
        entries.truncate(max);
        entries
    }

    pub fn stats(&self) -> ArpStats {
        let mut stats = self.stats.clone();
        stats.current_entries = self.entries.len() as u64;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUR_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
    const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn mac_table() -> MacTable {
        MacTable::new(1024, 300)
    }

    // ========================================
    // Resolution lifecycle
    // ========================================

    #[test]
    fn test_miss_starts_resolution() {
        let mut cache = ArpCache::new(64);
        match cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 100) {
            Resolve::Pending { request: Some(frame) } => {
                // Broadcast Ethernet frame carrying a who-has for the peer
                assert_eq!(&frame[0..6], &MacAddr::BROADCAST.0);
                assert_eq!(&frame[6..12], &OUR_MAC.0);
                assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), 0x0806);
                let arp = ArpPacket::parse(&frame[14..]).unwrap();
                assert_eq!(arp.operation, ArpOp::Request);
                assert_eq!(arp.sender_ip, OUR_IP);
                assert_eq!(arp.target_ip, PEER_IP);
            }
            other => panic!("expected pending with request, got {:?}", other),
        }

        // Entry exists as Incomplete; further resolves stay pending without
        // emitting another request
        assert_eq!(
            cache.lookup(PEER_IP).unwrap().2,
            ArpState::Incomplete
        );
        assert_eq!(
            cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 100),
            Resolve::Pending { request: None }
        );
    }

    #[test]
    fn test_reply_completes_resolution() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 100);
        cache.add_or_update(PEER_IP, PEER_MAC, 4, 101, &mut macs);

        assert_eq!(
            cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 102),
            Resolve::Ready {
                mac: PEER_MAC,
                port: 4
            }
        );
        // The MAC table learned the station too
        assert_eq!(macs.lookup(PEER_MAC, DEFAULT_VLAN).unwrap().port, 4);
    }

    #[test]
    fn test_retry_then_failed() {
        let mut cache = ArpCache::new(64);
        cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 100);

        // Three retries on the one-second cadence
        assert_eq!(cache.age_entries(101).len(), 1);
        assert_eq!(cache.age_entries(102).len(), 1);
        assert_eq!(cache.age_entries(103).len(), 1);
        // Exhausted
        assert!(cache.age_entries(104).is_empty());
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Failed);
        assert_eq!(
            cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 105),
            Resolve::Failed
        );
        assert_eq!(cache.stats().requests_sent, 4);
    }

    #[test]
    fn test_retry_frames_carry_source() {
        let mut cache = ArpCache::new(64);
        cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, 100);
        let frames = cache.age_entries(101);
        let (port, frame) = &frames[0];
        assert_eq!(*port, 4);
        let arp = ArpPacket::parse(&frame[14..]).unwrap();
        assert_eq!(arp.sender_ip, OUR_IP);
        assert_eq!(arp.sender_mac, OUR_MAC);
    }

    // ========================================
    // State machine
    // ========================================

    #[test]
    fn test_reachable_goes_stale_then_probe() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        cache.add_or_update(PEER_IP, PEER_MAC, 4, 0, &mut macs);

        // Past the reachable window
        cache.age_entries(ARP_REACHABLE_TIME_SEC + 1);
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Stale);

        // Using a stale entry still succeeds but arms a probe
        let now = ARP_REACHABLE_TIME_SEC + 2;
        assert!(matches!(
            cache.resolve(PEER_IP, 4, OUR_IP, OUR_MAC, now),
            Resolve::Ready { .. }
        ));
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Delay);

        cache.age_entries(now + 1);
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Probe);

        // A confirmation flips it back to Reachable
        cache.add_or_update(PEER_IP, PEER_MAC, 4, now + 2, &mut macs);
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Reachable);
    }

    #[test]
    fn test_reachable_eviction_after_timeout() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        cache.add_or_update(PEER_IP, PEER_MAC, 4, 0, &mut macs);

        cache.age_entries(ARP_CACHE_TIMEOUT_SEC + 1);
        assert!(cache.lookup(PEER_IP).is_none());
        assert_eq!(cache.stats().entries_aged, 1);
    }

    // ========================================
    // Frame handling
    // ========================================

    fn request_frame_for(target: Ipv4Addr) -> Vec<u8> {
        FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(PEER_MAC)
            .ethertype(ethertype::ARP)
            .payload(&ArpPacket::request(PEER_MAC, PEER_IP, target).to_bytes())
            .pad_to_min()
            .build()
    }

    #[test]
    fn test_handle_request_for_us_replies() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        let frame = request_frame_for(OUR_IP);

        let reply = cache
            .handle_frame(&frame, 2, Some(OUR_IP), OUR_MAC, 100, &mut macs)
            .unwrap()
            .expect("should answer a who-has for our address");

        // Unicast back to the asker
        assert_eq!(&reply[0..6], &PEER_MAC.0);
        let arp = ArpPacket::parse(&reply[14..]).unwrap();
        assert_eq!(arp.operation, ArpOp::Reply);
        assert_eq!(arp.sender_ip, OUR_IP);
        assert_eq!(arp.sender_mac, OUR_MAC);
        assert_eq!(arp.target_ip, PEER_IP);

        // Sender was learned
        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Reachable);
        assert_eq!(cache.stats().replies_sent, 1);
    }

    #[test]
    fn test_handle_request_not_for_us() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        let frame = request_frame_for(Ipv4Addr::new(10, 0, 0, 99));

        let reply = cache
            .handle_frame(&frame, 2, Some(OUR_IP), OUR_MAC, 100, &mut macs)
            .unwrap();
        assert!(reply.is_none());
        // Sender still learned
        assert!(cache.lookup(PEER_IP).is_some());
    }

    #[test]
    fn test_handle_reply_learns() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        cache.resolve(PEER_IP, 2, OUR_IP, OUR_MAC, 100);

        let frame = FrameBuilder::new()
            .dst_mac(OUR_MAC)
            .src_mac(PEER_MAC)
            .ethertype(ethertype::ARP)
            .payload(&ArpPacket::reply(PEER_MAC, PEER_IP, OUR_MAC, OUR_IP).to_bytes())
            .pad_to_min()
            .build();
        cache
            .handle_frame(&frame, 2, Some(OUR_IP), OUR_MAC, 101, &mut macs)
            .unwrap();

        assert_eq!(cache.lookup(PEER_IP).unwrap().2, ArpState::Reachable);
        assert_eq!(cache.stats().replies_received, 1);
    }

    #[test]
    fn test_handle_malformed_counts_invalid() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        let mut frame = request_frame_for(OUR_IP);
        frame[14] = 0xFF; // wreck the hardware type

        assert!(cache
            .handle_frame(&frame, 2, Some(OUR_IP), OUR_MAC, 100, &mut macs)
            .is_err());
        assert_eq!(cache.stats().invalid_packets, 1);
    }

    // ========================================
    // Pending queue
    // ========================================

    #[test]
    fn test_pending_queue_roundtrip() {
        let mut cache = ArpCache::new(64);
        assert!(cache.enqueue_pending(PEER_IP, vec![1, 2, 3]));
        assert!(cache.enqueue_pending(PEER_IP, vec![4, 5, 6]));

        let frames = cache.take_pending(PEER_IP);
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert!(cache.take_pending(PEER_IP).is_empty());
    }

    #[test]
    fn test_pending_queue_bounded() {
        let mut cache = ArpCache::new(64);
        for i in 0..PENDING_QUEUE_DEPTH {
            assert!(cache.enqueue_pending(PEER_IP, vec![i as u8]));
        }
        assert!(!cache.enqueue_pending(PEER_IP, vec![0xFF]));
    }

    // ========================================
    // Capacity and management
    // ========================================

    #[test]
    fn test_full_cache_recycles_oldest() {
        let mut cache = ArpCache::new(2);
        let mut macs = mac_table();
        cache.add_or_update(Ipv4Addr::new(10, 0, 0, 10), PEER_MAC, 1, 100, &mut macs);
        cache.add_or_update(Ipv4Addr::new(10, 0, 0, 11), PEER_MAC, 1, 200, &mut macs);
        cache.add_or_update(Ipv4Addr::new(10, 0, 0, 12), PEER_MAC, 1, 300, &mut macs);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(Ipv4Addr::new(10, 0, 0, 10)).is_none());
        assert!(cache.lookup(Ipv4Addr::new(10, 0, 0, 12)).is_some());
    }

    #[test]
    fn test_flush_and_remove() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        cache.add_or_update(PEER_IP, PEER_MAC, 1, 100, &mut macs);

        cache.remove(PEER_IP).unwrap();
        assert!(matches!(cache.remove(PEER_IP), Err(Error::NotFound)));

        cache.add_or_update(PEER_IP, PEER_MAC, 1, 100, &mut macs);
        cache.flush();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().cache_flushes, 1);
    }

    #[test]
    fn test_get_all_sorted_and_bounded() {
        let mut cache = ArpCache::new(64);
        let mut macs = mac_table();
        for i in [5u8, 1, 3] {
            cache.add_or_update(Ipv4Addr::new(10, 0, 0, i), PEER_MAC, 1, 100, &mut macs);
        }
        let all = cache.get_all(10);
        let ips: Vec<Ipv4Addr> = all.iter().map(|e| e.ip).collect();
        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 3),
                Ipv4Addr::new(10, 0, 0, 5)
            ]
        );
        assert_eq!(cache.get_all(2).len(), 2);
    }
}
