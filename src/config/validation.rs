//! Configuration validation

use super::types::{limits, Config};
use std::net::Ipv4Addr;

/// Collected diagnostics from a validation pass
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN]  {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Validate a parsed configuration.
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::default();

    let port_count = config.switch.port_count;
    if port_count == 0 || port_count > limits::MAX_PORTS {
        result.error(format!(
            "switch.port_count {} outside 1..={}",
            port_count,
            limits::MAX_PORTS
        ));
    }
    if config.switch.mac_table_size > limits::MAX_MAC_TABLE_ENTRIES {
        result.error(format!(
            "switch.mac_table_size {} exceeds {}",
            config.switch.mac_table_size,
            limits::MAX_MAC_TABLE_ENTRIES
        ));
    }
    if config.switch.arp_cache_size > limits::MAX_ARP_ENTRIES {
        result.error(format!(
            "switch.arp_cache_size {} exceeds {}",
            config.switch.arp_cache_size,
            limits::MAX_ARP_ENTRIES
        ));
    }
    if config.switch.routing_table_size > limits::MAX_ROUTING_ENTRIES {
        result.error(format!(
            "switch.routing_table_size {} exceeds {}",
            config.switch.routing_table_size,
            limits::MAX_ROUTING_ENTRIES
        ));
    }
    if !(68..=limits::MAX_MTU).contains(&config.switch.default_mtu) {
        result.error(format!(
            "switch.default_mtu {} outside 68..={}",
            config.switch.default_mtu,
            limits::MAX_MTU
        ));
    }

    // 802.1D timer relationships
    let stp = &config.stp;
    if stp.hello_time == 0 || stp.forward_delay == 0 || stp.max_age == 0 {
        result.error("stp timers must be non-zero");
    } else {
        if stp.max_age < 2 * (stp.hello_time + 1) {
            result.error(format!(
                "stp.max_age {} must be at least 2 * (hello_time + 1)",
                stp.max_age
            ));
        }
        if 2 * (stp.forward_delay.saturating_sub(1)) < stp.max_age {
            result.error(format!(
                "stp.forward_delay {} too small for max_age {}",
                stp.forward_delay, stp.max_age
            ));
        }
    }

    for (name, iface) in &config.interfaces {
        let Some(port) = parse_port_name(name) else {
            result.error(format!("interface name '{}' is not portN", name));
            continue;
        };
        if u32::from(port) >= port_count {
            result.error(format!(
                "interface '{}' beyond port_count {}",
                name, port_count
            ));
        }
        if let Some(ref address) = iface.address {
            if parse_cidr(address).is_none() {
                result.error(format!("interface '{}': bad CIDR '{}'", name, address));
            }
        }
        if let Some(mtu) = iface.mtu {
            if !(68..=limits::MAX_MTU).contains(&mtu) {
                result.error(format!("interface '{}': MTU {} out of range", name, mtu));
            }
        }
        if let Some(pvid) = iface.pvid {
            if !(1..=4094).contains(&pvid) {
                result.error(format!("interface '{}': PVID {} out of range", name, pvid));
            }
        }
    }

    for vlan in &config.vlans {
        if !(1..=4094).contains(&vlan.id) {
            result.error(format!("VLAN id {} outside 1..=4094", vlan.id));
        }
        for port in vlan.tagged_ports.iter().chain(&vlan.untagged_ports) {
            if u32::from(*port) >= port_count {
                result.error(format!(
                    "VLAN {}: port {} beyond port_count {}",
                    vlan.id, port, port_count
                ));
            }
        }
        let double: Vec<u16> = vlan
            .untagged_ports
            .iter()
            .filter(|p| vlan.tagged_ports.contains(p))
            .copied()
            .collect();
        if !double.is_empty() {
            result.warn(format!(
                "VLAN {}: ports {:?} listed both tagged and untagged; untagged wins",
                vlan.id, double
            ));
        }
    }

    for route in &config.routing.static_routes {
        if parse_cidr(&route.destination).is_none() {
            result.error(format!("route destination '{}' is not CIDR", route.destination));
        }
        if route.gateway != "direct" && route.gateway.parse::<Ipv4Addr>().is_err() {
            result.error(format!("route gateway '{}' is not an address", route.gateway));
        }
    }

    result
}

/// Parse an interface key like "port3".
pub fn parse_port_name(name: &str) -> Option<u16> {
    name.strip_prefix("port")?.parse().ok()
}

/// Parse CIDR notation, e.g. "10.0.0.1/24".
pub fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix_len) = cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix_len: u8 = prefix_len.parse().ok()?;
    if prefix_len > 32 {
        return None;
    }
    Some((addr, prefix_len))
}
