//! Switching and routing engines.

pub mod arp_cache;
pub mod ip;
pub mod mac_table;
pub mod routing;
pub mod stp;
pub mod switch;
pub mod vlan;

pub use arp_cache::{ArpCache, ArpState, Resolve};
pub use ip::{IpAction, IpPipeline};
pub use mac_table::{L2ForwardAction, MacEntryKind, MacTable, VlanId};
pub use routing::{IpPrefix, RouteEntry, RouteKind, RoutingTable};
pub use stp::{StpBridge, StpPortState};
pub use switch::SwitchCore;
pub use vlan::{VlanEngine, VlanMemberType, VlanPortConfig, VlanPortMode};
