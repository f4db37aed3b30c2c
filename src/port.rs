//! Port registry
//!
//! Enumerates the physical ports declared by the backend plus one CPU port,
//! and tracks per-port configuration, MAC address and administrative /
//! operational state.

use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Port identifier
pub type PortId = u16;

/// Flood / all-ports sentinel
pub const PORT_ID_BROADCAST: PortId = 0xFFFF;
/// CPU / internal port sentinel
pub const PORT_ID_INTERNAL: PortId = 0xFFFE;
/// Invalid port sentinel
pub const PORT_ID_INVALID: PortId = 0xFFFD;

/// Default number of physical ports when the backend declares none
pub const DEFAULT_PORT_COUNT: u32 = 128;
/// Hard cap on physical ports
pub const MAX_PORTS: u32 = 64;

/// Base MAC from which per-port defaults are derived
pub const BASE_MAC: MacAddr = MacAddr([0x02, 0x53, 0x57, 0x00, 0x00, 0x00]);
/// Fixed MAC of the CPU port
pub const CPU_PORT_MAC: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Physical,
    Lag,
    Loopback,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpeed {
    Mbps10,
    Mbps100,
    Gbps1,
    Gbps10,
    Gbps25,
    Gbps40,
    Gbps100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Operational state; the STP states appear here because hardware reflects
/// the spanning-tree gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Down,
    Up,
    Learning,
    Forwarding,
    Blocking,
    Testing,
}

/// Mutable per-port configuration
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub admin_up: bool,
    pub speed: PortSpeed,
    pub duplex: Duplex,
    pub mtu: u16,
    pub pvid: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            admin_up: true,
            speed: PortSpeed::Gbps1,
            duplex: Duplex::Full,
            mtu: 1500,
            pvid: 1,
        }
    }
}

/// One registered port
#[derive(Debug, Clone)]
pub struct PortEntry {
    pub id: PortId,
    pub kind: PortKind,
    pub name: String,
    pub config: PortConfig,
    pub oper_state: OperState,
    pub mac: MacAddr,
}

/// Registry of all ports, CPU port last
#[derive(Debug)]
pub struct PortRegistry {
    ports: Vec<PortEntry>,
    phys_count: u32,
}

impl PortRegistry {
    /// Build the registry for `phys_count` physical ports plus the CPU port.
    /// Physical ports start Down until the backend reports link.
    pub fn new(phys_count: u32) -> Result<Self> {
        if phys_count == 0 || phys_count > MAX_PORTS {
            return Err(Error::InvalidArgument(format!(
                "port count {} outside 1..={}",
                phys_count, MAX_PORTS
            )));
        }

        let mut ports = Vec::with_capacity(phys_count as usize + 1);
        for id in 0..phys_count as PortId {
            ports.push(PortEntry {
                id,
                kind: PortKind::Physical,
                name: format!("port{}", id),
                config: PortConfig::default(),
                oper_state: OperState::Down,
                mac: Self::default_mac(id),
            });
        }
        ports.push(PortEntry {
            id: phys_count as PortId,
            kind: PortKind::Cpu,
            name: "cpu".to_string(),
            config: PortConfig::default(),
            oper_state: OperState::Up,
            mac: CPU_PORT_MAC,
        });

        Ok(Self { ports, phys_count })
    }

    /// Default MAC: BASE_MAC with the last two bytes XOR'd by the port id.
    fn default_mac(id: PortId) -> MacAddr {
        let mut mac = BASE_MAC;
        mac.0[4] ^= (id >> 8) as u8;
        mac.0[5] ^= (id & 0xFF) as u8;
        mac
    }

    /// Number of physical ports
    pub fn count(&self) -> u32 {
        self.phys_count
    }

    /// Physical ports plus the CPU port
    pub fn total_count(&self) -> u32 {
        self.phys_count + 1
    }

    pub fn cpu_port(&self) -> PortId {
        self.phys_count as PortId
    }

    pub fn is_valid(&self, id: PortId) -> bool {
        (id as usize) < self.ports.len()
    }

    pub fn is_physical(&self, id: PortId) -> bool {
        (id as u32) < self.phys_count
    }

    pub fn get_info(&self, id: PortId) -> Result<&PortEntry> {
        self.ports
            .get(id as usize)
            .ok_or(Error::InvalidArgument(format!("invalid port {}", id)))
    }

    pub fn get_config(&self, id: PortId) -> Result<PortConfig> {
        Ok(self.get_info(id)?.config.clone())
    }

    pub fn set_config(&mut self, id: PortId, config: PortConfig) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.config = config;
        Ok(())
    }

    pub fn get_admin_state(&self, id: PortId) -> Result<bool> {
        Ok(self.get_info(id)?.config.admin_up)
    }

    /// Administratively enable or disable a port. Taking a port down also
    /// takes its operational state down.
    pub fn set_admin_state(&mut self, id: PortId, up: bool) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if entry.kind == PortKind::Cpu && !up {
            return Err(Error::InvalidState("CPU port cannot be disabled".into()));
        }
        entry.config.admin_up = up;
        if !up {
            entry.oper_state = OperState::Down;
        }
        Ok(())
    }

    pub fn state_of(&self, id: PortId) -> Result<OperState> {
        Ok(self.get_info(id)?.oper_state)
    }

    pub fn set_oper_state(&mut self, id: PortId, state: OperState) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.oper_state = state;
        Ok(())
    }

    /// Apply a link event from the backend. A link-up on an admin-down port
    /// is ignored.
    pub fn link_event(&mut self, id: PortId, up: bool) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.oper_state = if up && entry.config.admin_up {
            OperState::Up
        } else {
            OperState::Down
        };
        Ok(())
    }

    pub fn get_mac(&self, id: PortId) -> Result<MacAddr> {
        Ok(self.get_info(id)?.mac)
    }

    pub fn set_mac(&mut self, id: PortId, mac: MacAddr) -> Result<()> {
        if mac.is_zero() {
            return Err(Error::InvalidArgument("zero MAC not allowed".into()));
        }
        if mac.is_multicast() {
            return Err(Error::InvalidArgument("multicast MAC not allowed".into()));
        }
        let entry = self.entry_mut(id)?;
        entry.mac = mac;
        Ok(())
    }

    pub fn get_all_macs(&self) -> Vec<(PortId, MacAddr)> {
        self.ports.iter().map(|p| (p.id, p.mac)).collect()
    }

    /// Iterate over physical port ids
    pub fn physical_ports(&self) -> std::ops::Range<PortId> {
        0..self.phys_count as PortId
    }

    fn entry_mut(&mut self, id: PortId) -> Result<&mut PortEntry> {
        self.ports
            .get_mut(id as usize)
            .ok_or(Error::InvalidArgument(format!("invalid port {}", id)))
    }
}
