//! Routing table
//!
//! Dual structure per address family: an exact-match map keyed by the masked
//! prefix for add/delete/update, and a binary trie for longest-prefix-match
//! lookups. Trie nodes live in an arena and link by index, so there are no
//! ownership cycles. Duplicate destinations are resolved by administrative
//! distance, then metric, then age.

use crate::protocol::{ipv4, ipv6};
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Default capacity
pub const DEFAULT_MAX_ROUTES: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Connected,
    Static,
    Rip,
    Ospf,
    Bgp,
}

impl RouteKind {
    /// Conventional administrative distances
    pub fn default_admin_distance(self) -> u8 {
        match self {
            RouteKind::Connected => 0,
            RouteKind::Static => 1,
            RouteKind::Bgp => 20,
            RouteKind::Ospf => 110,
            RouteKind::Rip => 120,
        }
    }
}

/// A destination prefix, stored masked to its length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpPrefix {
    V4 { addr: Ipv4Addr, prefix_len: u8 },
    V6 { addr: Ipv6Addr, prefix_len: u8 },
}

impl IpPrefix {
    pub fn v4(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidArgument(format!(
                "IPv4 prefix length {} > 32",
                prefix_len
            )));
        }
        Ok(Self::V4 {
            addr: ipv4::network_address(addr, prefix_len),
            prefix_len,
        })
    }

    pub fn v6(addr: Ipv6Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 128 {
            return Err(Error::InvalidArgument(format!(
                "IPv6 prefix length {} > 128",
                prefix_len
            )));
        }
        Ok(Self::V6 {
            addr: ipv6::network_address(addr, prefix_len),
            prefix_len,
        })
    }

    pub fn family(&self) -> Family {
        match self {
            IpPrefix::V4 { .. } => Family::V4,
            IpPrefix::V6 { .. } => Family::V6,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            IpPrefix::V4 { prefix_len, .. } | IpPrefix::V6 { prefix_len, .. } => *prefix_len,
        }
    }

    /// Address bytes, masked; IPv4 occupies the first four bytes.
    fn bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        match self {
            IpPrefix::V4 { addr, .. } => bytes[..4].copy_from_slice(&addr.octets()),
            IpPrefix::V6 { addr, .. } => bytes.copy_from_slice(&addr.octets()),
        }
        bytes
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (IpPrefix::V4 { addr: net, prefix_len }, IpAddr::V4(a)) => {
                ipv4::network_address(a, *prefix_len) == *net
            }
            (IpPrefix::V6 { addr: net, prefix_len }, IpAddr::V6(a)) => {
                ipv6::network_address(a, *prefix_len) == *net
            }
            _ => false,
        }
    }
}

/// One route
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub prefix: IpPrefix,
    /// None for directly connected networks
    pub next_hop: Option<IpAddr>,
    pub iface_index: u16,
    pub iface_name: String,
    pub kind: RouteKind,
    pub admin_distance: u8,
    pub metric: u16,
    pub active: bool,
    /// Installation time, seconds
    pub timestamp: u64,
}

impl RouteEntry {
    pub fn new(
        prefix: IpPrefix,
        next_hop: Option<IpAddr>,
        iface_index: u16,
        kind: RouteKind,
    ) -> Self {
        Self {
            prefix,
            next_hop,
            iface_index,
            iface_name: String::new(),
            kind,
            admin_distance: kind.default_admin_distance(),
            metric: 0,
            active: true,
            timestamp: 0,
        }
    }

    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    /// Preference key; lower wins, older routes win ties.
    fn preference(&self) -> (u8, u16, u64) {
        (self.admin_distance, self.metric, self.timestamp)
    }
}

/// Hardware-sync operations emitted when sync is enabled
#[derive(Debug, Clone)]
pub enum HwOp {
    Add(RouteEntry),
    Remove(RouteEntry),
    Update(RouteEntry),
}

pub type HwSyncCallback = Box<dyn Fn(&HwOp) + Send>;

type RouteKey = ([u8; 16], u8, Family);

fn key_of(prefix: &IpPrefix) -> RouteKey {
    (prefix.bytes(), prefix.prefix_len(), prefix.family())
}

#[derive(Debug, Clone, Copy, Default)]
struct TrieNode {
    left: Option<u32>,
    right: Option<u32>,
    /// Index into the route arena
    route: Option<u32>,
}

/// Per-family binary trie over prefix bits
struct Trie {
    nodes: Vec<TrieNode>,
}

impl Trie {
    fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    fn bit(bytes: &[u8; 16], index: u8) -> bool {
        bytes[(index / 8) as usize] & (0x80 >> (index % 8)) != 0
    }

    fn insert(&mut self, bytes: &[u8; 16], prefix_len: u8, route: u32) {
        let mut node = 0usize;
        for depth in 0..prefix_len {
            let go_right = Self::bit(bytes, depth);
            let child = if go_right {
                self.nodes[node].right
            } else {
                self.nodes[node].left
            };
            let next = match child {
                Some(index) => index as usize,
                None => {
                    self.nodes.push(TrieNode::default());
                    let index = (self.nodes.len() - 1) as u32;
                    if go_right {
                        self.nodes[node].right = Some(index);
                    } else {
                        self.nodes[node].left = Some(index);
                    }
                    index as usize
                }
            };
            node = next;
        }
        self.nodes[node].route = Some(route);
    }

    fn remove(&mut self, bytes: &[u8; 16], prefix_len: u8) {
        let mut node = 0usize;
        for depth in 0..prefix_len {
            let child = if Self::bit(bytes, depth) {
                self.nodes[node].right
            } else {
                self.nodes[node].left
            };
            match child {
                Some(index) => node = index as usize,
                None => return,
            }
        }
        self.nodes[node].route = None;
    }

    /// Walk the address bits, remembering the deepest node holding a route.
    fn lookup(&self, bytes: &[u8; 16], max_depth: u8) -> Option<u32> {
        let mut node = 0usize;
        let mut best = self.nodes[0].route;
        for depth in 0..max_depth {
            let child = if Self::bit(bytes, depth) {
                self.nodes[node].right
            } else {
                self.nodes[node].left
            };
            match child {
                Some(index) => {
                    node = index as usize;
                    if let Some(route) = self.nodes[node].route {
                        best = Some(route);
                    }
                }
                None => break,
            }
        }
        best
    }
}

/// The routing table
pub struct RoutingTable {
    /// Route arena; freed slots are reused
    routes: Vec<Option<RouteEntry>>,
    free_slots: Vec<u32>,
    /// Exact-match index over masked prefixes
    exact: HashMap<RouteKey, u32>,
    /// Displaced same-protocol candidates, inactive
    shadow: HashMap<RouteKey, RouteEntry>,
    trie_v4: Trie,
    trie_v6: Trie,
    max_routes: usize,
    hw_sync: bool,
    hw_sync_callback: Option<HwSyncCallback>,
}

impl RoutingTable {
    pub fn new(max_routes: usize) -> Self {
        Self {
            routes: Vec::new(),
            free_slots: Vec::new(),
            exact: HashMap::new(),
            shadow: HashMap::new(),
            trie_v4: Trie::new(),
            trie_v6: Trie::new(),
            max_routes: if max_routes == 0 {
                DEFAULT_MAX_ROUTES
            } else {
                max_routes
            },
            hw_sync: false,
            hw_sync_callback: None,
        }
    }

    pub fn set_hw_sync(&mut self, enabled: bool) {
        self.hw_sync = enabled;
    }

    pub fn set_hw_sync_callback(&mut self, callback: HwSyncCallback) {
        self.hw_sync_callback = Some(callback);
    }

    fn emit(&self, op: HwOp) {
        if self.hw_sync {
            if let Some(cb) = &self.hw_sync_callback {
                cb(&op);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    fn trie_for(&mut self, family: Family) -> &mut Trie {
        match family {
            Family::V4 => &mut self.trie_v4,
            Family::V6 => &mut self.trie_v6,
        }
    }

    fn alloc_slot(&mut self, entry: RouteEntry) -> u32 {
        match self.free_slots.pop() {
            Some(slot) => {
                self.routes[slot as usize] = Some(entry);
                slot
            }
            None => {
                self.routes.push(Some(entry));
                (self.routes.len() - 1) as u32
            }
        }
    }

    // ========================================
    // Mutation
    // ========================================

    /// Install a route. An existing route to the same destination is
    /// compared by administrative distance, then metric, then install time;
    /// the winner stays active. A displaced route of the same protocol is
    /// retained as an inactive candidate and re-installed if the winner is
    /// later deleted.
    pub fn add(&mut self, mut entry: RouteEntry) -> Result<()> {
        let key = key_of(&entry.prefix);

        if let Some(&slot) = self.exact.get(&key) {
            let existing = self.routes[slot as usize]
                .as_ref()
                .ok_or_else(|| Error::Internal("route arena slot empty".into()))?
                .clone();

            if entry.preference() < existing.preference() {
                // New route wins; keep the loser as a shadow candidate when
                // protocols match.
                entry.active = true;
                if existing.kind == entry.kind {
                    let mut loser = existing;
                    loser.active = false;
                    self.shadow.insert(key, loser);
                } else {
                    self.shadow.remove(&key);
                }
                self.routes[slot as usize] = Some(entry.clone());
                self.emit(HwOp::Update(entry));
            } else {
                // Existing route wins; remember the newcomer if same protocol
                if existing.kind == entry.kind {
                    entry.active = false;
                    self.shadow.insert(key, entry);
                }
            }
            return Ok(());
        }

        if self.exact.len() >= self.max_routes {
            return Err(Error::TableFull);
        }

        entry.active = true;
        let bytes = entry.prefix.bytes();
        let prefix_len = entry.prefix.prefix_len();
        let family = entry.prefix.family();

        let slot = self.alloc_slot(entry.clone());
        self.exact.insert(key, slot);
        self.trie_for(family).insert(&bytes, prefix_len, slot);
        debug!(prefix = ?entry.prefix, "route added");
        self.emit(HwOp::Add(entry));
        Ok(())
    }

    /// Remove a route; a shadowed same-protocol candidate takes its place.
    pub fn delete(&mut self, prefix: &IpPrefix) -> Result<()> {
        let key = key_of(prefix);
        let slot = self.exact.remove(&key).ok_or(Error::NotFound)?;
        let removed = self.routes[slot as usize]
            .take()
            .ok_or_else(|| Error::Internal("route arena slot empty".into()))?;
        self.free_slots.push(slot);
        self.trie_for(prefix.family())
            .remove(&prefix.bytes(), prefix.prefix_len());
        self.emit(HwOp::Remove(removed));

        if let Some(mut candidate) = self.shadow.remove(&key) {
            candidate.active = true;
            self.add(candidate)?;
        }
        Ok(())
    }

    /// Overwrite the attributes of an existing route.
    pub fn update(&mut self, entry: RouteEntry) -> Result<()> {
        let key = key_of(&entry.prefix);
        let slot = *self.exact.get(&key).ok_or(Error::NotFound)?;
        self.routes[slot as usize] = Some(entry.clone());
        self.emit(HwOp::Update(entry));
        Ok(())
    }

    /// Drop every route of the given protocol. Returns the number removed.
    pub fn clear_by_kind(&mut self, kind: RouteKind) -> usize {
        let prefixes: Vec<IpPrefix> = self
            .exact
            .values()
            .filter_map(|&slot| self.routes[slot as usize].as_ref())
            .filter(|r| r.kind == kind)
            .map(|r| r.prefix)
            .collect();
        self.shadow.retain(|_, r| r.kind != kind);
        for prefix in &prefixes {
            let _ = self.delete(prefix);
        }
        prefixes.len()
    }

    // ========================================
    // Lookup
    // ========================================

    /// Longest-prefix-match lookup among active routes.
    pub fn lookup(&self, addr: IpAddr) -> Option<&RouteEntry> {
        let slot = match addr {
            IpAddr::V4(a) => {
                let mut bytes = [0u8; 16];
                bytes[..4].copy_from_slice(&a.octets());
                self.trie_v4.lookup(&bytes, 32)
            }
            IpAddr::V6(a) => self.trie_v6.lookup(&a.octets(), 128),
        }?;
        self.routes[slot as usize].as_ref().filter(|r| r.active)
    }

    /// Exact lookup by destination prefix.
    pub fn get(&self, prefix: &IpPrefix) -> Option<&RouteEntry> {
        let slot = *self.exact.get(&key_of(prefix))?;
        self.routes[slot as usize].as_ref()
    }

    /// Copy out up to `max` routes, most specific first.
    pub fn get_all_routes(&self, max: usize) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self
            .exact
            .values()
            .filter_map(|&slot| self.routes[slot as usize].as_ref())
            .cloned()
            .collect();
        routes.sort_by_key(|r| {
            (
                r.prefix.family() == Family::V6,
                std::cmp::Reverse(r.prefix.prefix_len()),
            )
        });
        routes.truncate(max);
        routes
    }

    #[cfg(test)]
    fn occupied_slots(&self) -> usize {
        self.routes.iter().filter(|r| r.is_some()).count()
    }
}
