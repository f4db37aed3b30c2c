//! Metrics collection for switch statistics.
//!
//! Thread-safe counters for per-port traffic and the per-engine events the
//! management surface exposes.

use crate::port::PortId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-port statistics.
#[derive(Debug, Default)]
pub struct PortStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    pub rx_drops: Counter,
    pub rx_errors: Counter,
    pub tx_errors: Counter,
}

impl PortStats {
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    pub fn record_rx_drop(&self) {
        self.rx_drops.inc();
    }

    pub fn record_rx_error(&self) {
        self.rx_errors.inc();
    }

    pub fn record_tx_error(&self) {
        self.tx_errors.inc();
    }
}

/// Global metrics registry for the switch.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Per-port statistics, keyed by port id.
    ports: RwLock<HashMap<PortId, PortStats>>,

    // L2 forwarding
    pub frames_forwarded: Counter,
    pub frames_flooded: Counter,
    pub frames_filtered: Counter,
    pub frames_dropped: Counter,
    pub stp_discards: Counter,

    // Control plane
    pub bpdus_received: Counter,
    pub bpdus_sent: Counter,
    pub topology_changes: Counter,
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,

    // L3
    pub packets_routed: Counter,
    pub ttl_exceeded: Counter,
    pub header_errors: Counter,
    pub reassembled_packets: Counter,
    pub no_route_drops: Counter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the stats of one port, creating them on first use.
    pub fn with_port<F, R>(&self, port: PortId, f: F) -> R
    where
        F: FnOnce(&PortStats) -> R,
    {
        {
            let ports = self.ports.read().unwrap();
            if let Some(stats) = ports.get(&port) {
                return f(stats);
            }
        }
        let mut ports = self.ports.write().unwrap();
        f(ports.entry(port).or_default())
    }

    /// Snapshot of one port's counters as (rx_packets, tx_packets, rx_drops).
    pub fn port_summary(&self, port: PortId) -> (u64, u64, u64) {
        self.with_port(port, |stats| {
            (
                stats.rx_packets.get(),
                stats.tx_packets.get(),
                stats.rx_drops.get(),
            )
        })
    }
}
