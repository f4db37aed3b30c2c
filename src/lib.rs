//! swsim - Software Network Switch Simulator
//!
//! A single-process model of a multi-port L2/L3 Ethernet switch: MAC
//! learning and flooding, VLANs, spanning tree, IPv4/IPv6 forwarding with
//! fragmentation, longest-prefix-match routing, and ARP resolution, driven
//! through a simulated hardware backend.

pub mod backend;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod packet;
pub mod pipeline;
pub mod port;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
