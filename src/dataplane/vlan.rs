//! VLAN engine
//!
//! Tracks VLAN entries (membership and untagged sets as port bitmaps) and
//! per-port VLAN configuration, and applies the 802.1Q ingress and egress
//! transforms to packets. Membership is limited to physical ports, so a
//! 64-bit bitset covers the port range.

use crate::dataplane::mac_table::VlanId;
use crate::packet::PacketBuffer;
use crate::port::PortId;
use crate::protocol::ethernet;
use crate::protocol::{ethertype, VlanTag};
use crate::{Error, Result};
use tracing::debug;

pub const VLAN_ID_MIN: VlanId = 1;
pub const VLAN_ID_MAX: VlanId = 4094;
pub const DEFAULT_VLAN_ID: VlanId = 1;
pub const VLAN_NAME_MAX_LEN: usize = 32;

/// Byte offset of the TPID within an Ethernet frame
const TAG_OFFSET: usize = 12;
/// 802.1Q tag length on the wire (TPID + TCI)
const TAG_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanPortMode {
    /// Untagged for exactly one VLAN (the PVID)
    Access,
    /// Tagged for multiple VLANs, untagged only for the native VLAN
    Trunk,
    /// Mixed tagged and untagged membership
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanMemberType {
    Tagged,
    Untagged,
}

/// One VLAN
#[derive(Debug, Clone)]
pub struct VlanEntry {
    pub vlan_id: VlanId,
    pub name: String,
    pub active: bool,
    /// Bitset of member ports (tagged and untagged)
    pub member_ports: u64,
    /// Bitset of untagged members; always a subset of `member_ports`
    pub untagged_ports: u64,
    pub learning_enabled: bool,
    pub stp_enabled: bool,
}

impl VlanEntry {
    pub fn is_member(&self, port: PortId) -> bool {
        port < 64 && self.member_ports & (1u64 << port) != 0
    }

    pub fn is_untagged_member(&self, port: PortId) -> bool {
        port < 64 && self.untagged_ports & (1u64 << port) != 0
    }

    pub fn member_list(&self) -> Vec<PortId> {
        (0..64)
            .filter(|&p| self.member_ports & (1u64 << p) != 0)
            .map(|p| p as PortId)
            .collect()
    }
}

/// Per-port VLAN configuration
#[derive(Debug, Clone)]
pub struct VlanPortConfig {
    pub mode: VlanPortMode,
    pub pvid: VlanId,
    pub native_vlan: VlanId,
    pub accept_untagged: bool,
    pub accept_tagged: bool,
    pub ingress_filter: bool,
}

impl Default for VlanPortConfig {
    fn default() -> Self {
        Self {
            mode: VlanPortMode::Access,
            pvid: DEFAULT_VLAN_ID,
            native_vlan: DEFAULT_VLAN_ID,
            accept_untagged: true,
            accept_tagged: true,
            ingress_filter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanEvent {
    Create,
    Delete,
    PortAdded,
    PortRemoved,
    ConfigChange,
}

/// Event callback; the port argument is set for port events.
pub type VlanEventCallback = Box<dyn Fn(VlanId, VlanEvent, Option<PortId>) + Send>;

/// Verdict of the ingress transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressVerdict {
    /// Classified into the VLAN stamped in the packet metadata
    Accept,
    /// Frame refused by filtering or accept flags
    Drop,
}

/// The VLAN engine
pub struct VlanEngine {
    vlans: std::collections::HashMap<VlanId, VlanEntry>,
    port_configs: Vec<VlanPortConfig>,
    max_vlans: usize,
    callback: Option<VlanEventCallback>,
}

impl VlanEngine {
    /// Create the engine with the default VLAN present and every physical
    /// port an untagged member of it.
    pub fn new(num_ports: u32, max_vlans: usize) -> Self {
        let mut engine = Self {
            vlans: std::collections::HashMap::new(),
            port_configs: vec![VlanPortConfig::default(); num_ports as usize],
            max_vlans,
            callback: None,
        };

        let mut default_vlan = VlanEntry {
            vlan_id: DEFAULT_VLAN_ID,
            name: "default".to_string(),
            active: true,
            member_ports: 0,
            untagged_ports: 0,
            learning_enabled: true,
            stp_enabled: true,
        };
        for port in 0..num_ports.min(64) {
            default_vlan.member_ports |= 1u64 << port;
            default_vlan.untagged_ports |= 1u64 << port;
        }
        engine.vlans.insert(DEFAULT_VLAN_ID, default_vlan);
        engine
    }

    pub fn set_event_callback(&mut self, callback: VlanEventCallback) {
        self.callback = Some(callback);
    }

    fn notify(&self, vlan_id: VlanId, event: VlanEvent, port: Option<PortId>) {
        if let Some(cb) = &self.callback {
            cb(vlan_id, event, port);
        }
    }

    fn validate_vlan_id(vlan_id: VlanId) -> Result<()> {
        if !(VLAN_ID_MIN..=VLAN_ID_MAX).contains(&vlan_id) {
            return Err(Error::InvalidArgument(format!(
                "VLAN id {} outside {}..={}",
                vlan_id, VLAN_ID_MIN, VLAN_ID_MAX
            )));
        }
        Ok(())
    }

    // ========================================
    // VLAN management
    // ========================================

    pub fn create(&mut self, vlan_id: VlanId, name: &str) -> Result<()> {
        Self::validate_vlan_id(vlan_id)?;
        if self.vlans.contains_key(&vlan_id) {
            return Err(Error::AlreadyExists);
        }
        if self.vlans.len() >= self.max_vlans {
            return Err(Error::ResourceExhausted("VLAN table full".into()));
        }

        let mut name = name.to_string();
        name.truncate(VLAN_NAME_MAX_LEN);
        self.vlans.insert(
            vlan_id,
            VlanEntry {
                vlan_id,
                name,
                active: true,
                member_ports: 0,
                untagged_ports: 0,
                learning_enabled: true,
                stp_enabled: true,
            },
        );
        debug!(vlan_id, "VLAN created");
        self.notify(vlan_id, VlanEvent::Create, None);
        Ok(())
    }

    pub fn delete(&mut self, vlan_id: VlanId) -> Result<()> {
        if vlan_id == DEFAULT_VLAN_ID {
            return Err(Error::InvalidArgument("cannot delete the default VLAN".into()));
        }
        if self.vlans.remove(&vlan_id).is_none() {
            return Err(Error::NotFound);
        }
        self.notify(vlan_id, VlanEvent::Delete, None);
        Ok(())
    }

    pub fn get(&self, vlan_id: VlanId) -> Result<&VlanEntry> {
        self.vlans.get(&vlan_id).ok_or(Error::NotFound)
    }

    pub fn set_name(&mut self, vlan_id: VlanId, name: &str) -> Result<()> {
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        entry.name = name.to_string();
        entry.name.truncate(VLAN_NAME_MAX_LEN);
        self.notify(vlan_id, VlanEvent::ConfigChange, None);
        Ok(())
    }

    pub fn set_active(&mut self, vlan_id: VlanId, active: bool) -> Result<()> {
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        entry.active = active;
        self.notify(vlan_id, VlanEvent::ConfigChange, None);
        Ok(())
    }

    pub fn set_learning(&mut self, vlan_id: VlanId, enable: bool) -> Result<()> {
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        entry.learning_enabled = enable;
        self.notify(vlan_id, VlanEvent::ConfigChange, None);
        Ok(())
    }

    pub fn set_stp(&mut self, vlan_id: VlanId, enable: bool) -> Result<()> {
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        entry.stp_enabled = enable;
        self.notify(vlan_id, VlanEvent::ConfigChange, None);
        Ok(())
    }

    pub fn get_all(&self) -> Vec<&VlanEntry> {
        let mut entries: Vec<&VlanEntry> = self.vlans.values().collect();
        entries.sort_by_key(|e| e.vlan_id);
        entries
    }

    pub fn get_by_port(&self, port: PortId) -> Vec<VlanId> {
        let mut ids: Vec<VlanId> = self
            .vlans
            .values()
            .filter(|e| e.is_member(port))
            .map(|e| e.vlan_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    // ========================================
    // Membership
    // ========================================

    pub fn add_port(
        &mut self,
        vlan_id: VlanId,
        port: PortId,
        member_type: VlanMemberType,
    ) -> Result<()> {
        if port >= 64 {
            return Err(Error::InvalidArgument(format!(
                "port {} outside VLAN bitmap range",
                port
            )));
        }
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        let bit = 1u64 << port;
        entry.member_ports |= bit;
        match member_type {
            VlanMemberType::Untagged => entry.untagged_ports |= bit,
            VlanMemberType::Tagged => entry.untagged_ports &= !bit,
        }
        self.notify(vlan_id, VlanEvent::PortAdded, Some(port));
        Ok(())
    }

    pub fn remove_port(&mut self, vlan_id: VlanId, port: PortId) -> Result<()> {
        let entry = self.vlans.get_mut(&vlan_id).ok_or(Error::NotFound)?;
        let bit = 1u64 << port.min(63);
        if entry.member_ports & bit == 0 {
            return Err(Error::NotFound);
        }
        entry.member_ports &= !bit;
        entry.untagged_ports &= !bit;
        self.notify(vlan_id, VlanEvent::PortRemoved, Some(port));
        Ok(())
    }

    /// Member ports of a VLAN excluding the ingress port, for flooding.
    pub fn flood_ports(&self, vlan_id: VlanId, ingress_port: PortId) -> Vec<PortId> {
        match self.vlans.get(&vlan_id) {
            Some(entry) if entry.active => entry
                .member_list()
                .into_iter()
                .filter(|&p| p != ingress_port)
                .collect(),
            _ => Vec::new(),
        }
    }

    // ========================================
    // Port configuration
    // ========================================

    pub fn get_port_config(&self, port: PortId) -> Result<&VlanPortConfig> {
        self.port_configs
            .get(port as usize)
            .ok_or(Error::InvalidArgument(format!("invalid port {}", port)))
    }

    /// Replace a port's VLAN configuration. For access ports the untagged
    /// membership follows the PVID: exactly one untagged VLAN.
    pub fn set_port_config(&mut self, port: PortId, config: VlanPortConfig) -> Result<()> {
        Self::validate_vlan_id(config.pvid)?;
        let slot = self
            .port_configs
            .get_mut(port as usize)
            .ok_or(Error::InvalidArgument(format!("invalid port {}", port)))?;
        *slot = config.clone();

        if config.mode == VlanPortMode::Access && port < 64 {
            let bit = 1u64 << port;
            for entry in self.vlans.values_mut() {
                if entry.vlan_id == config.pvid {
                    entry.member_ports |= bit;
                    entry.untagged_ports |= bit;
                } else {
                    entry.member_ports &= !bit;
                    entry.untagged_ports &= !bit;
                }
            }
        }
        self.notify(config.pvid, VlanEvent::ConfigChange, Some(port));
        Ok(())
    }

    // ========================================
    // Ingress / egress transforms
    // ========================================

    /// Classify a received frame into a VLAN and stamp the packet metadata.
    pub fn ingress(&self, packet: &mut PacketBuffer, in_port: PortId) -> Result<IngressVerdict> {
        let frame = ethernet::Frame::parse(packet.as_slice())?;
        let config = self.get_port_config(in_port)?;

        let tag = frame.vlan_tag();
        let vlan = match tag {
            Some(tag) if tag.vid != 0 => tag.vid,
            _ => config.pvid,
        };

        if tag.is_some() && !config.accept_tagged {
            return Ok(IngressVerdict::Drop);
        }
        if tag.is_none() && !config.accept_untagged {
            return Ok(IngressVerdict::Drop);
        }

        if config.ingress_filter {
            match self.vlans.get(&vlan) {
                Some(entry) if entry.is_member(in_port) => {}
                _ => return Ok(IngressVerdict::Drop),
            }
        }

        let src_mac = frame.src_mac();
        let dst_mac = frame.dst_mac();
        let ethertype = frame.ethertype();
        packet.metadata.src_mac = src_mac;
        packet.metadata.dst_mac = dst_mac;
        packet.metadata.ethertype = ethertype;
        packet.metadata.vlan = vlan;
        packet.metadata.is_tagged = tag.is_some();
        if let Some(tag) = tag {
            packet.metadata.priority = tag.pcp;
        }
        Ok(IngressVerdict::Accept)
    }

    /// Apply the egress tagging discipline for `out_port` carrying `vlan`.
    pub fn egress(&self, packet: &mut PacketBuffer, out_port: PortId, vlan: VlanId) -> Result<()> {
        let config = self.get_port_config(out_port)?.clone();

        let send_untagged = match config.mode {
            VlanPortMode::Access => true,
            VlanPortMode::Trunk => vlan == config.native_vlan,
            VlanPortMode::Hybrid => self
                .vlans
                .get(&vlan)
                .map(|e| e.is_untagged_member(out_port))
                .unwrap_or(false),
        };

        if send_untagged {
            Self::remove_tag(packet)?;
        } else {
            Self::ensure_tag(packet, VlanTag::new(vlan))?;
        }
        Ok(())
    }

    // ========================================
    // Tag manipulation
    // ========================================

    fn has_tag(packet: &PacketBuffer) -> bool {
        packet.len() >= TAG_OFFSET + 2
            && u16::from_be_bytes([
                packet.as_slice()[TAG_OFFSET],
                packet.as_slice()[TAG_OFFSET + 1],
            ]) == ethertype::VLAN
    }

    /// Insert an 802.1Q tag after the source MAC.
    pub fn add_tag(packet: &mut PacketBuffer, tag: VlanTag) -> Result<()> {
        if packet.len() < ethernet::HEADER_SIZE {
            return Err(Error::InvalidPacket("frame too short to tag".into()));
        }
        let mut bytes = [0u8; TAG_LEN];
        bytes[0..2].copy_from_slice(&ethertype::VLAN.to_be_bytes());
        bytes[2..4].copy_from_slice(&tag.to_bytes());
        packet.insert(TAG_OFFSET, &bytes)?;
        packet.metadata.is_tagged = true;
        Ok(())
    }

    /// Strip the 802.1Q tag if one is present.
    pub fn remove_tag(packet: &mut PacketBuffer) -> Result<()> {
        if !Self::has_tag(packet) {
            return Ok(());
        }
        packet.remove(TAG_OFFSET, TAG_LEN)?;
        packet.metadata.is_tagged = false;
        Ok(())
    }

    /// Rewrite the VID of an existing tag, or add one.
    pub fn replace_tag(packet: &mut PacketBuffer, tag: VlanTag) -> Result<()> {
        if Self::has_tag(packet) {
            packet.update(TAG_OFFSET + 2, &tag.to_bytes())?;
            Ok(())
        } else {
            Self::add_tag(packet, tag)
        }
    }

    /// Make sure the frame carries a tag with the given VID.
    fn ensure_tag(packet: &mut PacketBuffer, tag: VlanTag) -> Result<()> {
        Self::replace_tag(packet, tag)
    }
}
