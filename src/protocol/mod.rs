//! Wire-format parsing and construction for the protocols the switch speaks.

pub mod arp;
pub mod bpdu;
pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod types;

pub use types::*;
