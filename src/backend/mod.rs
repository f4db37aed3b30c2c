//! Port backend boundary
//!
//! The core talks to "hardware" exclusively through the `PortBackend`
//! capability: frame transmit/receive, link events, and the clock the
//! engines tick against. The in-memory simulation lives in `sim`.

mod sim;

pub use sim::SimBackend;

use crate::port::PortId;
use crate::Result;

/// Boundary to the simulated hardware
pub trait PortBackend: Send {
    /// Number of physical ports the board exposes
    fn declared_port_count(&self) -> u32;

    /// Queue one frame for transmission on a port. Fire-and-forget at the
    /// core level; errors are counted, never retried.
    fn transmit(&mut self, port: PortId, frame: &[u8]) -> Result<()>;

    /// Next received frame, if any
    fn poll_receive(&mut self) -> Option<(PortId, Vec<u8>)>;

    /// Next link state change, if any
    fn poll_link_event(&mut self) -> Option<(PortId, bool)>;

    /// Monotonic clock, microseconds
    fn now_us(&self) -> u64;

    /// Monotonic clock, whole seconds
    fn now_seconds(&self) -> u64 {
        self.now_us() / 1_000_000
    }
}
