//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard limits and defaults for the switch data structures.
pub mod limits {
    /// Largest frame carried anywhere in the system
    pub const MAX_PACKET_SIZE: usize = 9216;
    /// Physical ports the simulator supports
    pub const MAX_PORTS: u32 = 64;
    /// Ports created when the backend declares none
    pub const DEFAULT_PORT_COUNT: u32 = 128;
    pub const MAX_VLANS: usize = 4094;
    pub const DEFAULT_VLAN_ID: u16 = 1;
    pub const MAX_MAC_TABLE_ENTRIES: usize = 65536;
    /// Seconds; 0 disables aging
    pub const DEFAULT_MAC_AGING_TIME: u64 = 300;
    pub const MAX_ROUTING_ENTRIES: usize = 16384;
    pub const MAX_ARP_ENTRIES: usize = 8192;
    pub const DEFAULT_ARP_AGING_TIME: u64 = 1200;
    pub const MAX_MTU: u16 = 9216;
    pub const DEFAULT_MTU: u16 = 1500;
    pub const MAX_IP_FRAGMENTS: usize = 64;
    /// Seconds
    pub const IP_FRAGMENT_TIMEOUT: u64 = 30;
}

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub switch: SwitchSettings,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub stp: StpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceConfig>,
    #[serde(default)]
    pub vlans: Vec<VlanDefinition>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchSettings {
    #[serde(default = "default_port_count")]
    pub port_count: u32,
    #[serde(default = "default_mac_table_size")]
    pub mac_table_size: usize,
    #[serde(default = "default_mac_aging")]
    pub mac_aging_time: u64,
    #[serde(default = "default_arp_entries")]
    pub arp_cache_size: usize,
    #[serde(default = "default_arp_aging")]
    pub arp_aging_time: u64,
    #[serde(default = "default_routing_entries")]
    pub routing_table_size: usize,
    #[serde(default = "default_mtu")]
    pub default_mtu: u16,
}

fn default_port_count() -> u32 {
    limits::DEFAULT_PORT_COUNT.min(limits::MAX_PORTS)
}
fn default_mac_table_size() -> usize {
    limits::MAX_MAC_TABLE_ENTRIES
}
fn default_mac_aging() -> u64 {
    limits::DEFAULT_MAC_AGING_TIME
}
fn default_arp_entries() -> usize {
    limits::MAX_ARP_ENTRIES
}
fn default_arp_aging() -> u64 {
    limits::DEFAULT_ARP_AGING_TIME
}
fn default_routing_entries() -> usize {
    limits::MAX_ROUTING_ENTRIES
}
fn default_mtu() -> u16 {
    limits::DEFAULT_MTU
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            port_count: default_port_count(),
            mac_table_size: default_mac_table_size(),
            mac_aging_time: default_mac_aging(),
            arp_cache_size: default_arp_entries(),
            arp_aging_time: default_arp_aging(),
            routing_table_size: default_routing_entries(),
            default_mtu: default_mtu(),
        }
    }
}

/// Feature switches; routing-protocol flags are accepted but inert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "yes")]
    pub ipv6: bool,
    #[serde(default)]
    pub ospf: bool,
    #[serde(default)]
    pub rip: bool,
    #[serde(default = "yes")]
    pub stp: bool,
    #[serde(default)]
    pub qos: bool,
    #[serde(default = "yes")]
    pub hardware_simulation: bool,
}

fn yes() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ipv6: true,
            ospf: false,
            rip: false,
            stp: true,
            qos: false,
            hardware_simulation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StpSettings {
    #[serde(default = "default_bridge_priority")]
    pub bridge_priority: u16,
    #[serde(default = "default_hello_time")]
    pub hello_time: u16,
    #[serde(default = "default_max_age")]
    pub max_age: u16,
    #[serde(default = "default_forward_delay")]
    pub forward_delay: u16,
}

fn default_bridge_priority() -> u16 {
    32768
}
fn default_hello_time() -> u16 {
    2
}
fn default_max_age() -> u16 {
    20
}
fn default_forward_delay() -> u16 {
    15
}

impl Default for StpSettings {
    fn default() -> Self {
        Self {
            bridge_priority: default_bridge_priority(),
            hello_time: default_hello_time(),
            max_age: default_max_age(),
            forward_delay: default_forward_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanMode {
    Access,
    Trunk,
    Hybrid,
}

/// Per-port settings, keyed in the config by names like "port0".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// CIDR address for routed interfaces, e.g. "10.0.0.1/24"
    pub address: Option<String>,
    pub mtu: Option<u16>,
    pub vlan_mode: Option<VlanMode>,
    pub pvid: Option<u16>,
    #[serde(default = "yes")]
    pub admin_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanDefinition {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tagged_ports: Vec<u16>,
    #[serde(default)]
    pub untagged_ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRoute {
    /// Destination CIDR, e.g. "0.0.0.0/0"
    pub destination: String,
    /// Next-hop address, or "direct" for connected routes
    pub gateway: String,
    #[serde(default)]
    pub interface: Option<String>,
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub source_hash: String,
    pub switch: SwitchSettings,
    pub features: FeatureFlags,
    pub stp: StpSettings,
    pub logging: LoggingSettings,
    pub interfaces: HashMap<String, InterfaceConfig>,
    pub vlans: Vec<VlanDefinition>,
    pub routing: RoutingConfig,
}

impl ConfigLock {
    pub fn from_config(config: &Config, source_hash: String) -> Self {
        let generated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default();
        Self {
            generated_at,
            source_hash,
            switch: config.switch.clone(),
            features: config.features.clone(),
            stp: config.stp.clone(),
            logging: config.logging.clone(),
            interfaces: config.interfaces.clone(),
            vlans: config.vlans.clone(),
            routing: config.routing.clone(),
        }
    }
}
