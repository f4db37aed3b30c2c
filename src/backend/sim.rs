//! In-memory hardware simulation
//!
//! A backplane with per-port injectable receive queues, a transmit capture
//! log, scriptable link events and a manually advanced clock. Tests and the
//! demo binary drive time explicitly, which keeps aging and timer behavior
//! deterministic.

use super::PortBackend;
use crate::port::PortId;
use crate::{Error, Result};
use std::collections::VecDeque;

/// The simulated backplane
pub struct SimBackend {
    port_count: u32,
    rx_queue: VecDeque<(PortId, Vec<u8>)>,
    tx_log: Vec<(PortId, Vec<u8>)>,
    link_events: VecDeque<(PortId, bool)>,
    clock_us: u64,
}

impl SimBackend {
    pub fn new(port_count: u32) -> Self {
        Self {
            port_count,
            rx_queue: VecDeque::new(),
            tx_log: Vec::new(),
            link_events: VecDeque::new(),
            clock_us: 0,
        }
    }

    /// Queue a frame as if it arrived on `port`.
    pub fn inject_frame(&mut self, port: PortId, frame: Vec<u8>) {
        self.rx_queue.push_back((port, frame));
    }

    /// Script a link transition for the core to pick up.
    pub fn set_link(&mut self, port: PortId, up: bool) {
        self.link_events.push_back((port, up));
    }

    pub fn advance_us(&mut self, us: u64) {
        self.clock_us += us;
    }

    pub fn advance_seconds(&mut self, seconds: u64) {
        self.clock_us += seconds * 1_000_000;
    }

    /// Drain everything the switch transmitted so far.
    pub fn take_transmitted(&mut self) -> Vec<(PortId, Vec<u8>)> {
        std::mem::take(&mut self.tx_log)
    }

    /// Peek at captured transmissions without draining.
    pub fn transmitted(&self) -> &[(PortId, Vec<u8>)] {
        &self.tx_log
    }
}

impl PortBackend for SimBackend {
    fn declared_port_count(&self) -> u32 {
        self.port_count
    }

    fn transmit(&mut self, port: PortId, frame: &[u8]) -> Result<()> {
        if (port as u32) >= self.port_count {
            return Err(Error::Backend(format!("transmit on unknown port {}", port)));
        }
        self.tx_log.push((port, frame.to_vec()));
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<(PortId, Vec<u8>)> {
        self.rx_queue.pop_front()
    }

    fn poll_link_event(&mut self) -> Option<(PortId, bool)> {
        self.link_events.pop_front()
    }

    fn now_us(&self) -> u64 {
        self.clock_us
    }
}
