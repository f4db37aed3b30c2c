//! MAC address table
//!
//! Provides L2 switching state:
//! - MAC address learning from received frames, keyed by (MAC, VLAN)
//! - Static entries that dynamic learning cannot displace
//! - Aging driven by an external clock
//! - Station-move detection
//! - Change events delivered to a registered callback

use crate::port::PortId;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// VLAN identifier
pub type VlanId = u16;

/// Default VLAN ID for untagged frames
pub const DEFAULT_VLAN: VlanId = 1;

/// Default aging time in seconds (5 minutes, per IEEE 802.1D)
pub const DEFAULT_AGING_TIME_SECS: u64 = 300;

/// Default capacity
pub const DEFAULT_MAX_ENTRIES: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacEntryKind {
    /// Learned from traffic, subject to aging
    Dynamic,
    /// Configured, permanent
    Static,
    /// Switch-owned (e.g. the CPU port MAC)
    Management,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgingState {
    Active,
    Disabled,
}

/// One table entry
#[derive(Debug, Clone)]
pub struct MacEntry {
    pub mac: MacAddr,
    pub vlan: VlanId,
    pub port: PortId,
    pub kind: MacEntryKind,
    pub aging: AgingState,
    pub hit_count: u64,
    pub created_ts: u64,
    pub last_used_ts: u64,
}

/// Callback invoked on table changes: `added` is true for insert/update,
/// false for removal.
pub type MacEventCallback = Box<dyn Fn(&MacEntry, bool) + Send>;

/// Result of a L2 forwarding decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L2ForwardAction {
    /// Forward to a specific port (unicast hit)
    Forward { port: PortId },
    /// Flood to all VLAN members except the ingress port
    Flood,
    /// Drop the frame (destination lives on the ingress port)
    Filter,
}

/// The MAC address table
pub struct MacTable {
    entries: HashMap<(MacAddr, VlanId), MacEntry>,
    max_entries: usize,
    /// Power-of-two hash size reported in stats
    table_size: usize,
    /// Aging time in seconds; 0 disables aging
    aging_time: u64,
    /// Ports with learning turned off
    learning_disabled: Vec<PortId>,
    event_callback: Option<MacEventCallback>,
    move_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacTableStats {
    pub total_entries: usize,
    pub static_entries: usize,
    pub dynamic_entries: usize,
    pub table_size: usize,
    pub aging_time: u64,
    pub move_count: u64,
}

impl MacTable {
    pub fn new(max_entries: usize, aging_time: u64) -> Self {
        let max_entries = if max_entries == 0 {
            DEFAULT_MAX_ENTRIES
        } else {
            max_entries
        };
        Self {
            entries: HashMap::new(),
            max_entries,
            table_size: max_entries.next_power_of_two(),
            aging_time,
            learning_disabled: Vec::new(),
            event_callback: None,
            move_count: 0,
        }
    }

    pub fn set_event_callback(&mut self, callback: MacEventCallback) {
        self.event_callback = Some(callback);
    }

    pub fn clear_event_callback(&mut self) {
        self.event_callback = None;
    }

    fn notify(&self, entry: &MacEntry, added: bool) {
        if let Some(cb) = &self.event_callback {
            cb(entry, added);
        }
    }

    // ========================================
    // Insertion and learning
    // ========================================

    /// Add an entry. A static add replaces an existing dynamic entry for the
    /// same key; a dynamic add against an existing static entry is refused.
    pub fn add(
        &mut self,
        mac: MacAddr,
        vlan: VlanId,
        port: PortId,
        kind: MacEntryKind,
        now: u64,
    ) -> Result<()> {
        if mac.is_broadcast() || mac.is_multicast() {
            return Err(Error::InvalidArgument(
                "cannot add broadcast/multicast MAC".into(),
            ));
        }

        let key = (mac, vlan);
        if let Some(existing) = self.entries.get_mut(&key) {
            if existing.kind != MacEntryKind::Dynamic && kind == MacEntryKind::Dynamic {
                // Dynamic learning never displaces a configured entry
                return Err(Error::AlreadyExists);
            }
            existing.port = port;
            existing.kind = kind;
            existing.aging = if kind == MacEntryKind::Dynamic {
                AgingState::Active
            } else {
                AgingState::Disabled
            };
            existing.last_used_ts = now;
            let snapshot = existing.clone();
            self.notify(&snapshot, true);
            return Ok(());
        }

        if self.entries.len() >= self.max_entries {
            self.evict_lru_dynamic()?;
        }

        let entry = MacEntry {
            mac,
            vlan,
            port,
            kind,
            aging: if kind == MacEntryKind::Dynamic {
                AgingState::Active
            } else {
                AgingState::Disabled
            },
            hit_count: 0,
            created_ts: now,
            last_used_ts: now,
        };
        self.notify(&entry, true);
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Remove the least-recently-used dynamic entry to make room.
    fn evict_lru_dynamic(&mut self) -> Result<()> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind == MacEntryKind::Dynamic)
            .min_by_key(|(_, e)| e.last_used_ts)
            .map(|(key, _)| *key);

        match victim {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    debug!(mac = %entry.mac, vlan = entry.vlan, "evicted LRU MAC entry");
                    self.notify(&entry, false);
                }
                Ok(())
            }
            None => Err(Error::TableFull),
        }
    }

    /// Learn the source MAC of a received frame. Broadcast and multicast
    /// sources are never learned; ports with learning disabled are skipped.
    /// A learned MAC arriving on a different port is a station move.
    pub fn learn(&mut self, src_mac: MacAddr, vlan: VlanId, port: PortId, now: u64) -> Result<()> {
        if src_mac.is_broadcast() || src_mac.is_multicast() {
            return Ok(());
        }
        if self.learning_disabled.contains(&port) {
            return Ok(());
        }

        if let Some(existing) = self.entries.get(&(src_mac, vlan)) {
            if existing.kind == MacEntryKind::Dynamic && existing.port != port {
                self.move_count += 1;
                warn!(
                    mac = %src_mac,
                    vlan,
                    from = existing.port,
                    to = port,
                    "MAC station move"
                );
            }
        }

        match self.add(src_mac, vlan, port, MacEntryKind::Dynamic, now) {
            // A static entry for this key wins silently
            Err(Error::AlreadyExists) => Ok(()),
            other => other,
        }
    }

    // ========================================
    // Lookup and forwarding
    // ========================================

    pub fn lookup(&self, mac: MacAddr, vlan: VlanId) -> Option<&MacEntry> {
        self.entries.get(&(mac, vlan))
    }

    /// Destination lookup for forwarding; refreshes usage on hit.
    pub fn get_port(&mut self, dst_mac: MacAddr, vlan: VlanId, now: u64) -> Option<PortId> {
        let entry = self.entries.get_mut(&(dst_mac, vlan))?;
        entry.hit_count += 1;
        entry.last_used_ts = now;
        Some(entry.port)
    }

    /// Make a forwarding decision for a frame.
    pub fn forward(
        &mut self,
        dst_mac: MacAddr,
        vlan: VlanId,
        ingress_port: PortId,
        now: u64,
    ) -> L2ForwardAction {
        if dst_mac.is_broadcast() || dst_mac.is_multicast() {
            return L2ForwardAction::Flood;
        }
        match self.get_port(dst_mac, vlan, now) {
            Some(port) if port == ingress_port => L2ForwardAction::Filter,
            Some(port) => L2ForwardAction::Forward { port },
            None => L2ForwardAction::Flood,
        }
    }

    // ========================================
    // Removal, flushing, aging
    // ========================================

    pub fn delete(&mut self, mac: MacAddr, vlan: VlanId) -> Result<()> {
        match self.entries.remove(&(mac, vlan)) {
            Some(entry) => {
                self.notify(&entry, false);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Flush entries matching the given VLAN and/or port. Static entries are
    /// kept unless `include_static` is set. Returns the number removed.
    pub fn flush(
        &mut self,
        vlan: Option<VlanId>,
        port: Option<PortId>,
        include_static: bool,
    ) -> usize {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            let vlan_match = vlan.map_or(true, |v| entry.vlan == v);
            let port_match = port.map_or(true, |p| entry.port == p);
            let kind_match = include_static || entry.kind == MacEntryKind::Dynamic;
            if vlan_match && port_match && kind_match {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });
        for entry in &removed {
            self.notify(entry, false);
        }
        removed.len()
    }

    /// Remove dynamic entries not used within the aging time. A zero aging
    /// time disables aging entirely. Returns the number evicted.
    pub fn process_aging(&mut self, now: u64) -> usize {
        if self.aging_time == 0 {
            return 0;
        }
        let aging_time = self.aging_time;
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            let expired = entry.kind == MacEntryKind::Dynamic
                && entry.aging == AgingState::Active
                && now.saturating_sub(entry.last_used_ts) > aging_time;
            if expired {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });
        for entry in &removed {
            self.notify(entry, false);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "aged out MAC entries");
        }
        removed.len()
    }

    // ========================================
    // Configuration and inspection
    // ========================================

    pub fn set_port_learning(&mut self, port: PortId, enable: bool) {
        if enable {
            self.learning_disabled.retain(|&p| p != port);
        } else if !self.learning_disabled.contains(&port) {
            self.learning_disabled.push(port);
        }
    }

    pub fn aging_time(&self) -> u64 {
        self.aging_time
    }

    pub fn set_aging_time(&mut self, aging_time: u64) {
        self.aging_time = aging_time;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iterate<F>(&self, mut callback: F)
    where
        F: FnMut(&MacEntry) -> bool,
    {
        for entry in self.entries.values() {
            if !callback(entry) {
                break;
            }
        }
    }

    pub fn stats(&self) -> MacTableStats {
        let static_entries = self
            .entries
            .values()
            .filter(|e| e.kind != MacEntryKind::Dynamic)
            .count();
        MacTableStats {
            total_entries: self.entries.len(),
            static_entries,
            dynamic_entries: self.entries.len() - static_entries,
            table_size: self.table_size,
            aging_time: self.aging_time,
            move_count: self.move_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const MAC1: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const MAC2: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x56]);

    // ========================================
    // Learning and lookup
    // ========================================

    #[test]
    fn test_learn_and_lookup() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 1, 0, 100).unwrap();

        assert_eq!(table.lookup(MAC1, 1).unwrap().port, 0);
        // VLAN separation: same MAC in a different VLAN is a miss
        assert!(table.lookup(MAC1, 2).is_none());
    }

    #[test]
    fn test_no_learn_broadcast_or_multicast() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MacAddr::BROADCAST, 1, 0, 100).unwrap();
        table
            .learn(MacAddr([0x01, 0x00, 0x5e, 0, 0, 1]), 1, 0, 100)
            .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_mac_move_detection() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 1, 0, 100).unwrap();
        table.learn(MAC1, 1, 2, 101).unwrap();

        assert_eq!(table.lookup(MAC1, 1).unwrap().port, 2);
        assert_eq!(table.stats().move_count, 1);
    }

    #[test]
    fn test_learning_disabled_port() {
        let mut table = MacTable::new(1024, 300);
        table.set_port_learning(3, false);
        table.learn(MAC1, 1, 3, 100).unwrap();
        assert!(table.lookup(MAC1, 1).is_none());

        table.set_port_learning(3, true);
        table.learn(MAC1, 1, 3, 101).unwrap();
        assert_eq!(table.lookup(MAC1, 1).unwrap().port, 3);
    }

    // ========================================
    // Static vs dynamic precedence
    // ========================================

    #[test]
    fn test_static_overrides_dynamic() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 1, 0, 100).unwrap();
        table.add(MAC1, 1, 5, MacEntryKind::Static, 101).unwrap();

        let entry = table.lookup(MAC1, 1).unwrap();
        assert_eq!(entry.kind, MacEntryKind::Static);
        assert_eq!(entry.port, 5);
        assert_eq!(entry.aging, AgingState::Disabled);
    }

    #[test]
    fn test_dynamic_cannot_displace_static() {
        let mut table = MacTable::new(1024, 300);
        table.add(MAC1, 1, 5, MacEntryKind::Static, 100).unwrap();

        // Direct dynamic add is refused
        assert!(matches!(
            table.add(MAC1, 1, 0, MacEntryKind::Dynamic, 101),
            Err(Error::AlreadyExists)
        ));
        // Learning is a silent no-op
        table.learn(MAC1, 1, 0, 102).unwrap();
        assert_eq!(table.lookup(MAC1, 1).unwrap().port, 5);
    }

    #[test]
    fn test_static_ignores_aging() {
        let mut table = MacTable::new(1024, 10);
        table.add(MAC1, 1, 0, MacEntryKind::Static, 0).unwrap();
        table.learn(MAC2, 1, 1, 0).unwrap();

        let removed = table.process_aging(1000);
        assert_eq!(removed, 1);
        assert!(table.lookup(MAC1, 1).is_some());
        assert!(table.lookup(MAC2, 1).is_none());
    }

    // ========================================
    // Forwarding decisions
    // ========================================

    #[test]
    fn test_forward_known_unicast() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC2, 10, 1, 100).unwrap();
        assert_eq!(
            table.forward(MAC2, 10, 0, 101),
            L2ForwardAction::Forward { port: 1 }
        );
    }

    #[test]
    fn test_forward_unknown_floods() {
        let mut table = MacTable::new(1024, 300);
        assert_eq!(table.forward(MAC2, 10, 0, 100), L2ForwardAction::Flood);
    }

    #[test]
    fn test_forward_broadcast_floods() {
        let mut table = MacTable::new(1024, 300);
        assert_eq!(
            table.forward(MacAddr::BROADCAST, 10, 0, 100),
            L2ForwardAction::Flood
        );
    }

    #[test]
    fn test_forward_same_port_filters() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 10, 0, 100).unwrap();
        assert_eq!(table.forward(MAC1, 10, 0, 101), L2ForwardAction::Filter);
    }

    #[test]
    fn test_hit_count_and_refresh() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 1, 0, 100).unwrap();
        table.get_port(MAC1, 1, 150).unwrap();
        table.get_port(MAC1, 1, 200).unwrap();

        let entry = table.lookup(MAC1, 1).unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.last_used_ts, 200);
    }

    // ========================================
    // Aging and eviction
    // ========================================

    #[test]
    fn test_aging_respects_refresh() {
        let mut table = MacTable::new(1024, 100);
        table.learn(MAC1, 1, 0, 0).unwrap();
        table.learn(MAC2, 1, 1, 0).unwrap();

        // Refresh MAC1 only
        table.get_port(MAC1, 1, 90).unwrap();

        let removed = table.process_aging(150);
        assert_eq!(removed, 1);
        assert!(table.lookup(MAC1, 1).is_some());
        assert!(table.lookup(MAC2, 1).is_none());
    }

    #[test]
    fn test_zero_aging_time_disables_aging() {
        let mut table = MacTable::new(1024, 0);
        table.learn(MAC1, 1, 0, 0).unwrap();
        assert_eq!(table.process_aging(u64::MAX), 0);
        assert!(table.lookup(MAC1, 1).is_some());
    }

    #[test]
    fn test_full_table_evicts_lru_dynamic() {
        let mut table = MacTable::new(2, 300);
        table.learn(MAC1, 1, 0, 100).unwrap();
        table.learn(MAC2, 1, 1, 200).unwrap();

        // MAC1 is least recently used and gets recycled
        let mac3 = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x57]);
        table.learn(mac3, 1, 2, 300).unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.lookup(MAC1, 1).is_none());
        assert!(table.lookup(MAC2, 1).is_some());
        assert!(table.lookup(mac3, 1).is_some());
    }

    #[test]
    fn test_full_table_of_statics_is_table_full() {
        let mut table = MacTable::new(1, 300);
        table.add(MAC1, 1, 0, MacEntryKind::Static, 100).unwrap();
        assert!(matches!(
            table.add(MAC2, 1, 1, MacEntryKind::Dynamic, 101),
            Err(Error::TableFull)
        ));
    }

    // ========================================
    // Flush
    // ========================================

    #[test]
    fn test_flush_by_vlan_and_port() {
        let mut table = MacTable::new(1024, 300);
        table.learn(MAC1, 10, 0, 100).unwrap();
        table.learn(MAC2, 10, 1, 100).unwrap();
        table.learn(MAC1, 20, 0, 100).unwrap();

        assert_eq!(table.flush(Some(10), Some(0), false), 1);
        assert!(table.lookup(MAC1, 10).is_none());
        assert!(table.lookup(MAC2, 10).is_some());
        assert!(table.lookup(MAC1, 20).is_some());

        assert_eq!(table.flush(None, Some(0), false), 1);
        assert!(table.lookup(MAC1, 20).is_none());
    }

    #[test]
    fn test_flush_static_requires_flag() {
        let mut table = MacTable::new(1024, 300);
        table.add(MAC1, 1, 0, MacEntryKind::Static, 100).unwrap();
        table.learn(MAC2, 1, 1, 100).unwrap();

        assert_eq!(table.flush(None, None, false), 1);
        assert_eq!(table.len(), 1);

        assert_eq!(table.flush(None, None, true), 1);
        assert!(table.is_empty());
    }

    // ========================================
    // Events and stats
    // ========================================

    #[test]
    fn test_event_callback_add_and_delete() {
        let mut table = MacTable::new(1024, 300);
        let adds = Arc::new(AtomicUsize::new(0));
        let dels = Arc::new(AtomicUsize::new(0));
        let (adds_cb, dels_cb) = (Arc::clone(&adds), Arc::clone(&dels));

        table.set_event_callback(Box::new(move |_entry, added| {
            if added {
                adds_cb.fetch_add(1, Ordering::SeqCst);
            } else {
                dels_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));

        table.learn(MAC1, 1, 0, 100).unwrap();
        table.learn(MAC1, 1, 0, 101).unwrap(); // refresh fires as add/update
        table.delete(MAC1, 1).unwrap();

        assert_eq!(adds.load(Ordering::SeqCst), 2);
        assert_eq!(dels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats() {
        let mut table = MacTable::new(1000, 300);
        table.add(MAC1, 1, 0, MacEntryKind::Static, 100).unwrap();
        table.learn(MAC2, 1, 1, 100).unwrap();

        let stats = table.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.static_entries, 1);
        assert_eq!(stats.dynamic_entries, 1);
        assert_eq!(stats.table_size, 1024);
        assert_eq!(stats.aging_time, 300);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let mut table = MacTable::new(1024, 300);
        assert!(matches!(table.delete(MAC1, 1), Err(Error::NotFound)));
    }
}
