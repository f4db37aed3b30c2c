//! Spanning Tree Protocol engine
//!
//! One bridge instance owning per-port state machines. BPDU processing and
//! topology reconvergence follow IEEE 802.1D: the bridge with the smallest
//! id is elected root, every other bridge picks one root port, and ports
//! walk Blocking -> Listening -> Learning -> Forwarding on the forward-delay
//! timer. Timers tick against a caller-supplied monotonic clock; `update`
//! returns the BPDUs to transmit instead of calling into the backend.

use crate::dataplane::mac_table::VlanId;
use crate::port::PortId;
use crate::protocol::bpdu::{Bpdu, ConfigBpdu};
use crate::protocol::{BridgeId, MacAddr};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};

pub const DEFAULT_BRIDGE_PRIORITY: u16 = 32768;
pub const DEFAULT_PORT_PRIORITY: u8 = 128;
/// Default path cost for a 100 Mbps link
pub const DEFAULT_PATH_COST: u32 = 19;
pub const DEFAULT_HELLO_TIME: u16 = 2;
pub const DEFAULT_MAX_AGE: u16 = 20;
pub const DEFAULT_FORWARD_DELAY: u16 = 15;
/// Interval between TCN retransmissions
const TCN_INTERVAL: u64 = 1;

/// Pad an outgoing BPDU to the Ethernet minimum frame size.
fn pad_frame(mut frame: Vec<u8>) -> Vec<u8> {
    if frame.len() < crate::protocol::ethernet::MIN_FRAME_SIZE {
        frame.resize(crate::protocol::ethernet::MIN_FRAME_SIZE, 0);
    }
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StpPortState {
    Disabled,
    Blocking,
    Listening,
    Learning,
    Forwarding,
}

/// Priority vector used for all BPDU comparisons; lower wins on every
/// component, compared lexicographically.
type PriorityVector = (BridgeId, u32, BridgeId, u16);

/// Per-port spanning-tree state
#[derive(Debug, Clone)]
pub struct StpPort {
    pub port_id: PortId,
    pub state: StpPortState,
    pub priority: u8,
    pub path_cost: u32,
    /// Best root id heard on this port's segment
    pub designated_root: BridgeId,
    /// Root path cost advertised by the segment's designated bridge
    pub root_path_cost: u32,
    pub designated_bridge: BridgeId,
    pub designated_port: u16,
    pub message_age: u16,
    pub topology_change_ack: bool,
    pub bpdu_received: bool,
    /// Seconds remaining; 0 = not running
    timer_forward_delay: u64,
    timer_message_age: u64,
    timer_tcn: u64,
    /// Per-VLAN state overrides; ports fall back to `state`
    vlan_states: HashMap<VlanId, StpPortState>,
}

impl StpPort {
    fn new(port_id: PortId, bridge_id: BridgeId) -> Self {
        Self {
            port_id,
            state: StpPortState::Blocking,
            priority: DEFAULT_PORT_PRIORITY,
            path_cost: DEFAULT_PATH_COST,
            designated_root: bridge_id,
            root_path_cost: 0,
            designated_bridge: bridge_id,
            designated_port: port_id,
            message_age: 0,
            topology_change_ack: false,
            bpdu_received: false,
            timer_forward_delay: 0,
            timer_message_age: 0,
            timer_tcn: 0,
            vlan_states: HashMap::new(),
        }
    }

    fn port_id_field(&self) -> u16 {
        ((self.priority as u16) << 8) | (self.port_id & 0xFF)
    }

    /// The claim currently standing on this port's segment.
    fn segment_claim(&self) -> PriorityVector {
        (
            self.designated_root,
            self.root_path_cost,
            self.designated_bridge,
            self.designated_port,
        )
    }

    fn reset_segment_claim(&mut self, bridge_id: BridgeId) {
        self.designated_root = bridge_id;
        self.root_path_cost = 0;
        self.designated_bridge = bridge_id;
        self.designated_port = self.port_id;
        self.message_age = 0;
        self.bpdu_received = false;
    }
}

/// Bridge-level summary handed out to management
#[derive(Debug, Clone)]
pub struct StpBridgeInfo {
    pub enabled: bool,
    pub bridge_id: BridgeId,
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub root_port: Option<PortId>,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
    pub topology_change: bool,
}

/// The spanning-tree bridge
pub struct StpBridge {
    enabled: bool,
    bridge_id: BridgeId,
    root_id: BridgeId,
    root_path_cost: u32,
    root_port: Option<PortId>,
    max_age: u16,
    hello_time: u16,
    forward_delay: u16,
    topology_change: bool,
    /// Seconds remaining of the topology-change window
    tc_time_remaining: u64,
    /// Count of topology changes observed, for stats
    tc_events: u64,
    timer_hello: u64,
    last_tick: Option<u64>,
    ports: Vec<StpPort>,
}

impl StpBridge {
    pub fn new(num_ports: u32, bridge_mac: MacAddr, priority: u16) -> Self {
        let bridge_id = BridgeId::new(priority, bridge_mac);
        let ports = (0..num_ports as PortId)
            .map(|id| StpPort::new(id, bridge_id))
            .collect();
        info!(bridge = ?bridge_id, ports = num_ports, "STP bridge initialized");
        Self {
            enabled: true,
            bridge_id,
            // Until a superior BPDU arrives we are the root
            root_id: bridge_id,
            root_path_cost: 0,
            root_port: None,
            max_age: DEFAULT_MAX_AGE,
            hello_time: DEFAULT_HELLO_TIME,
            forward_delay: DEFAULT_FORWARD_DELAY,
            topology_change: false,
            tc_time_remaining: 0,
            tc_events: 0,
            timer_hello: DEFAULT_HELLO_TIME as u64,
            last_tick: None,
            ports,
        }
    }

    fn port(&self, port: PortId) -> Result<&StpPort> {
        self.ports
            .get(port as usize)
            .ok_or(Error::InvalidArgument(format!("invalid STP port {}", port)))
    }

    fn port_mut(&mut self, port: PortId) -> Result<&mut StpPort> {
        self.ports
            .get_mut(port as usize)
            .ok_or(Error::InvalidArgument(format!("invalid STP port {}", port)))
    }

    pub fn is_root(&self) -> bool {
        self.root_id == self.bridge_id
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    // ========================================
    // Administrative operations
    // ========================================

    /// Enable or disable the protocol. Disabling forces every non-Disabled
    /// port straight to Forwarding; re-enabling restarts them in Blocking.
    pub fn set_enabled(&mut self, enable: bool) {
        if enable && !self.enabled {
            for port in &mut self.ports {
                if port.state != StpPortState::Disabled {
                    port.state = StpPortState::Blocking;
                }
            }
            self.timer_hello = 0;
            info!("STP enabled");
        } else if !enable && self.enabled {
            for port in &mut self.ports {
                if port.state != StpPortState::Disabled {
                    port.state = StpPortState::Forwarding;
                }
            }
            info!("STP disabled, all ports forwarding");
        }
        self.enabled = enable;
    }

    pub fn set_bridge_priority(&mut self, priority: u16) {
        let old_id = self.bridge_id;
        self.bridge_id.priority = priority;
        // Segments where our own claim stood inherit the new id
        for port in &mut self.ports {
            if !port.bpdu_received {
                if port.designated_root == old_id {
                    port.designated_root = self.bridge_id;
                }
                if port.designated_bridge == old_id {
                    port.designated_bridge = self.bridge_id;
                }
            }
        }
        self.recompute_roles();
        info!(priority, "bridge priority set");
    }

    pub fn set_port_priority(&mut self, port: PortId, priority: u8) -> Result<()> {
        self.port_mut(port)?.priority = priority;
        self.recompute_roles();
        Ok(())
    }

    pub fn set_port_path_cost(&mut self, port: PortId, path_cost: u32) -> Result<()> {
        self.port_mut(port)?.path_cost = path_cost;
        if self.root_port == Some(port) {
            // Push the change out with the next hello
            self.timer_hello = 0;
        }
        self.recompute_roles();
        Ok(())
    }

    pub fn set_port_enabled(&mut self, port: PortId, enable: bool) -> Result<()> {
        let bridge_id = self.bridge_id;
        let was_root_port = self.root_port == Some(port);
        let entry = self.port_mut(port)?;
        if enable && entry.state == StpPortState::Disabled {
            entry.state = StpPortState::Blocking;
            entry.timer_message_age = 0;
            entry.timer_forward_delay = 0;
            entry.reset_segment_claim(bridge_id);
            info!(port, "STP enabled on port, starting in blocking");
        } else if !enable && entry.state != StpPortState::Disabled {
            entry.state = StpPortState::Disabled;
            entry.reset_segment_claim(bridge_id);
            info!(port, "STP disabled on port");
            if was_root_port {
                // The path to the root is gone; elect again
                self.recompute_roles();
            }
        }
        Ok(())
    }

    /// React to a link event from the port layer.
    pub fn link_change(&mut self, port: PortId, up: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let bridge_id = self.bridge_id;
        let was_root_port = self.root_port == Some(port);
        let entry = self.port_mut(port)?;
        if up {
            if entry.state == StpPortState::Disabled {
                entry.state = StpPortState::Blocking;
                entry.reset_segment_claim(bridge_id);
                info!(port, "link up, port blocking");
            }
        } else if entry.state != StpPortState::Disabled {
            entry.state = StpPortState::Disabled;
            entry.reset_segment_claim(bridge_id);
            info!(port, "link down, port disabled");
            if was_root_port {
                self.recompute_roles();
            }
        }
        Ok(())
    }

    // ========================================
    // State queries
    // ========================================

    pub fn port_state(&self, port: PortId) -> Result<StpPortState> {
        Ok(self.port(port)?.state)
    }

    /// Per-VLAN state, falling back to the port state when no override is set.
    pub fn port_vlan_state(&self, port: PortId, vlan: VlanId) -> Result<StpPortState> {
        let entry = self.port(port)?;
        Ok(entry.vlan_states.get(&vlan).copied().unwrap_or(entry.state))
    }

    pub fn set_port_vlan_state(
        &mut self,
        port: PortId,
        vlan: VlanId,
        state: StpPortState,
    ) -> Result<()> {
        self.port_mut(port)?.vlan_states.insert(vlan, state);
        Ok(())
    }

    /// Whether data frames may be forwarded through this port. With the
    /// protocol disabled every port forwards.
    pub fn can_forward(&self, port: PortId) -> bool {
        if !self.enabled {
            return true;
        }
        matches!(
            self.port(port).map(|p| p.state),
            Ok(StpPortState::Forwarding)
        )
    }

    /// Whether source addresses arriving on this port may be learned.
    pub fn can_learn(&self, port: PortId) -> bool {
        if !self.enabled {
            return true;
        }
        matches!(
            self.port(port).map(|p| p.state),
            Ok(StpPortState::Learning) | Ok(StpPortState::Forwarding)
        )
    }

    pub fn bridge_info(&self) -> StpBridgeInfo {
        StpBridgeInfo {
            enabled: self.enabled,
            bridge_id: self.bridge_id,
            root_id: self.root_id,
            root_path_cost: self.root_path_cost,
            root_port: self.root_port,
            max_age: self.max_age,
            hello_time: self.hello_time,
            forward_delay: self.forward_delay,
            topology_change: self.topology_change,
        }
    }

    pub fn port_info(&self, port: PortId) -> Result<StpPort> {
        Ok(self.port(port)?.clone())
    }

    pub fn topology_change_active(&self) -> bool {
        self.topology_change
    }

    pub fn tc_events(&self) -> u64 {
        self.tc_events
    }

    // ========================================
    // Topology computation
    // ========================================

    /// Recompute the root bridge, the root port, and every port role from
    /// the per-port segment claims, then apply state transitions.
    fn recompute_roles(&mut self) {
        // Root port selection: the best root reachable through any port
        let mut best: Option<(PriorityVector, u16, PortId)> = None;
        for port in &self.ports {
            if port.state == StpPortState::Disabled || !port.bpdu_received {
                continue;
            }
            let candidate = (
                (
                    port.designated_root,
                    port.root_path_cost.saturating_add(port.path_cost),
                    port.designated_bridge,
                    port.designated_port,
                ),
                port.port_id_field(),
                port.port_id,
            );
            if best.map_or(true, |b| (candidate.0, candidate.1) < (b.0, b.1)) {
                best = Some(candidate);
            }
        }

        let was_root = self.is_root();
        match best {
            Some(((root, cost, _, _), _, port)) if root < self.bridge_id => {
                self.root_id = root;
                self.root_path_cost = cost;
                self.root_port = Some(port);
            }
            _ => {
                self.root_id = self.bridge_id;
                self.root_path_cost = 0;
                self.root_port = None;
                if !was_root {
                    info!(bridge = ?self.bridge_id, "electing self as root bridge");
                }
            }
        }

        // Port roles
        let root_port = self.root_port;
        let our_claim_base = (self.root_id, self.root_path_cost, self.bridge_id);
        let forward_delay = self.forward_delay as u64;

        for port in &mut self.ports {
            if port.state == StpPortState::Disabled {
                continue;
            }

            if Some(port.port_id) == root_port {
                if port.state == StpPortState::Blocking {
                    port.state = StpPortState::Listening;
                    port.timer_forward_delay = forward_delay;
                    info!(port = port.port_id, "root port blocking -> listening");
                }
                continue;
            }

            // Designated when our claim beats everything heard on the segment
            let our_claim: PriorityVector = (
                our_claim_base.0,
                our_claim_base.1,
                our_claim_base.2,
                port.port_id_field(),
            );
            let is_designated = !port.bpdu_received || our_claim < port.segment_claim();

            if is_designated {
                if port.state == StpPortState::Blocking {
                    port.state = StpPortState::Listening;
                    port.timer_forward_delay = forward_delay;
                    info!(port = port.port_id, "designated port blocking -> listening");
                }
            } else if port.state != StpPortState::Blocking {
                port.state = StpPortState::Blocking;
                port.timer_forward_delay = 0;
                info!(port = port.port_id, "port moved to blocking");
            }
        }
    }

    fn start_topology_change(&mut self) {
        self.topology_change = true;
        self.tc_time_remaining = 2 * self.forward_delay as u64;
        self.tc_events += 1;
        if !self.is_root() {
            // Notify the root through our root port
            if let Some(root_port) = self.root_port {
                if let Ok(port) = self.port_mut(root_port) {
                    if port.timer_tcn == 0 {
                        port.timer_tcn = TCN_INTERVAL;
                    }
                }
            }
        }
    }

    // ========================================
    // BPDU processing
    // ========================================

    /// Process a BPDU frame received on `port`.
    pub fn receive_bpdu(&mut self, port: PortId, frame: &[u8]) -> Result<()> {
        if !self.enabled {
            return Err(Error::NotInitialized);
        }
        if self.port(port)?.state == StpPortState::Disabled {
            return Err(Error::PortDown(port));
        }

        match Bpdu::parse_frame(frame)? {
            Bpdu::Config(config) => self.process_config_bpdu(port, &config),
            Bpdu::TopologyChangeNotification => {
                debug!(port, "TCN BPDU received");
                self.start_topology_change();
                self.port_mut(port)?.topology_change_ack = true;
                Ok(())
            }
        }
    }

    fn process_config_bpdu(&mut self, port_id: PortId, config: &ConfigBpdu) -> Result<()> {
        let received: PriorityVector = (
            config.root_id,
            config.root_path_cost,
            config.bridge_id,
            config.port_id,
        );

        let max_age = self.max_age as u64;
        {
            let port = self.port_mut(port_id)?;
            if !port.bpdu_received || received <= port.segment_claim() {
                // The segment's standing claim: record it and arm the
                // message-age watchdog.
                port.designated_root = config.root_id;
                port.root_path_cost = config.root_path_cost;
                port.designated_bridge = config.bridge_id;
                port.designated_port = config.port_id;
                port.message_age = config.message_age;
                port.timer_message_age = max_age;
                port.bpdu_received = true;
                debug!(port = port_id, root = ?config.root_id, "segment claim updated");
            }
        }

        if config.topology_change {
            self.topology_change = true;
            self.tc_time_remaining = 2 * self.forward_delay as u64;
        }

        let old_root = self.root_id;
        self.recompute_roles();

        if self.root_port == Some(port_id) {
            // Adopt timer values from our path to the root
            self.max_age = config.max_age;
            self.hello_time = config.hello_time;
            self.forward_delay = config.forward_delay;
            if config.topology_change_ack {
                self.port_mut(port_id)?.timer_tcn = 0;
            }
        }

        if self.root_id != old_root {
            info!(
                port = port_id,
                root = ?self.root_id,
                cost = self.root_path_cost,
                "root bridge changed"
            );
        }
        Ok(())
    }

    fn build_config_bpdu(&self, port: &StpPort) -> Bpdu {
        Bpdu::Config(ConfigBpdu {
            topology_change: self.topology_change,
            topology_change_ack: port.topology_change_ack,
            root_id: self.root_id,
            root_path_cost: self.root_path_cost,
            bridge_id: self.bridge_id,
            port_id: port.port_id_field(),
            message_age: if self.is_root() { 0 } else { port.message_age + 1 },
            max_age: self.max_age,
            hello_time: self.hello_time,
            forward_delay: self.forward_delay,
        })
    }

    // ========================================
    // Timer tick
    // ========================================

    /// Advance all timers to `now` (monotonic seconds) and return the BPDU
    /// frames to transmit, as (port, frame) pairs.
    pub fn update(&mut self, now: u64) -> Vec<(PortId, Vec<u8>)> {
        if !self.enabled {
            return Vec::new();
        }

        let elapsed = match self.last_tick {
            Some(last) if now > last => now - last,
            Some(_) => return Vec::new(),
            None => {
                self.last_tick = Some(now);
                0
            }
        };
        self.last_tick = Some(now);

        let mut to_send = Vec::new();
        let bridge_mac = self.bridge_id.mac;

        // Hello timer: the root emits config BPDUs on every enabled port
        if self.timer_hello <= elapsed {
            self.timer_hello = self.hello_time as u64;
            if self.is_root() {
                for i in 0..self.ports.len() {
                    if self.ports[i].state != StpPortState::Disabled {
                        let bpdu = self.build_config_bpdu(&self.ports[i]);
                        to_send
                            .push((self.ports[i].port_id, pad_frame(bpdu.encode_frame(bridge_mac))));
                        self.ports[i].topology_change_ack = false;
                    }
                }
            }
        } else {
            self.timer_hello -= elapsed;
        }

        // Topology-change window
        if self.tc_time_remaining > 0 {
            if self.tc_time_remaining <= elapsed {
                self.tc_time_remaining = 0;
                self.topology_change = false;
                info!("topology change period ended");
            } else {
                self.tc_time_remaining -= elapsed;
            }
        }

        let bridge_id = self.bridge_id;
        let mut claims_expired = false;
        let mut entered_forwarding = false;

        for i in 0..self.ports.len() {
            if self.ports[i].state == StpPortState::Disabled {
                continue;
            }

            // Message-age watchdog: expiry wipes the segment claim. On the
            // root port that means the root is gone.
            if self.ports[i].timer_message_age > 0 {
                if self.ports[i].timer_message_age <= elapsed {
                    self.ports[i].timer_message_age = 0;
                    info!(port = self.ports[i].port_id, "message age expired");
                    self.ports[i].reset_segment_claim(bridge_id);
                    claims_expired = true;
                } else {
                    self.ports[i].timer_message_age -= elapsed;
                }
            }

            // TCN retransmission on the root port
            if self.ports[i].timer_tcn > 0 {
                if self.ports[i].timer_tcn <= elapsed {
                    self.ports[i].timer_tcn = TCN_INTERVAL;
                    if Some(self.ports[i].port_id) == self.root_port {
                        let frame =
                            pad_frame(Bpdu::TopologyChangeNotification.encode_frame(bridge_mac));
                        to_send.push((self.ports[i].port_id, frame));
                        debug!(port = self.ports[i].port_id, "sent TCN on root port");
                    }
                } else {
                    self.ports[i].timer_tcn -= elapsed;
                }
            }

            // Forward-delay driven transitions
            if self.ports[i].timer_forward_delay > 0 {
                if self.ports[i].timer_forward_delay <= elapsed {
                    self.ports[i].timer_forward_delay = 0;
                    match self.ports[i].state {
                        StpPortState::Listening => {
                            self.ports[i].state = StpPortState::Learning;
                            self.ports[i].timer_forward_delay = self.forward_delay as u64;
                            info!(port = self.ports[i].port_id, "listening -> learning");
                        }
                        StpPortState::Learning => {
                            self.ports[i].state = StpPortState::Forwarding;
                            info!(port = self.ports[i].port_id, "learning -> forwarding");
                            entered_forwarding = true;
                        }
                        _ => {}
                    }
                } else {
                    self.ports[i].timer_forward_delay -= elapsed;
                }
            }
        }

        if claims_expired {
            self.recompute_roles();
        }
        if entered_forwarding {
            self.start_topology_change();
        }

        to_send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x01]);
    const MAC_B: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x02]);

    fn root_config_frame(bridge: &StpBridge, port: PortId) -> Vec<u8> {
        let info = bridge.bridge_info();
        Bpdu::Config(ConfigBpdu {
            topology_change: false,
            topology_change_ack: false,
            root_id: info.root_id,
            root_path_cost: info.root_path_cost,
            bridge_id: info.bridge_id,
            port_id: (128 << 8) | port,
            message_age: 0,
            max_age: info.max_age,
            hello_time: info.hello_time,
            forward_delay: info.forward_delay,
        })
        .encode_frame(info.bridge_id.mac)
    }

    // ========================================
    // Initial state and administrative control
    // ========================================

    #[test]
    fn test_initial_state() {
        let bridge = StpBridge::new(4, MAC_A, DEFAULT_BRIDGE_PRIORITY);
        assert!(bridge.is_root());
        for port in 0..4 {
            assert_eq!(bridge.port_state(port).unwrap(), StpPortState::Blocking);
            assert!(!bridge.can_forward(port));
            assert!(!bridge.can_learn(port));
        }
    }

    #[test]
    fn test_disable_forces_forwarding() {
        let mut bridge = StpBridge::new(4, MAC_A, DEFAULT_BRIDGE_PRIORITY);
        bridge.link_change(0, false).unwrap();
        bridge.set_enabled(false);

        // Non-disabled ports forward, the link-down port stays disabled
        assert_eq!(bridge.port_state(1).unwrap(), StpPortState::Forwarding);
        assert_eq!(bridge.port_state(0).unwrap(), StpPortState::Disabled);
        assert!(bridge.can_forward(1));
        // Disabled protocol gates nothing
        assert!(bridge.can_forward(0));
    }

    #[test]
    fn test_reenable_restarts_blocking() {
        let mut bridge = StpBridge::new(2, MAC_A, DEFAULT_BRIDGE_PRIORITY);
        bridge.set_enabled(false);
        bridge.set_enabled(true);
        assert_eq!(bridge.port_state(0).unwrap(), StpPortState::Blocking);
    }

    #[test]
    fn test_link_events() {
        let mut bridge = StpBridge::new(2, MAC_A, DEFAULT_BRIDGE_PRIORITY);
        bridge.link_change(0, false).unwrap();
        assert_eq!(bridge.port_state(0).unwrap(), StpPortState::Disabled);

        bridge.link_change(0, true).unwrap();
        assert_eq!(bridge.port_state(0).unwrap(), StpPortState::Blocking);
    }

    // ========================================
    // Root election and port roles
    // ========================================

    #[test]
    fn test_superior_bpdu_elects_root() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 4096);

        // Same priority: A's lower MAC wins
        let frame = root_config_frame(&bridge_a, 0);
        bridge_b.receive_bpdu(0, &frame).unwrap();

        assert!(!bridge_b.is_root());
        let info = bridge_b.bridge_info();
        assert_eq!(info.root_id, BridgeId::new(4096, MAC_A));
        assert_eq!(info.root_port, Some(0));
        assert_eq!(info.root_path_cost, DEFAULT_PATH_COST);
        // Root port starts its way toward forwarding
        assert_eq!(bridge_b.port_state(0).unwrap(), StpPortState::Listening);
    }

    #[test]
    fn test_inferior_bpdu_ignored_for_root() {
        let mut bridge_a = StpBridge::new(2, MAC_A, 4096);
        let bridge_b = StpBridge::new(2, MAC_B, 32768);

        let frame = root_config_frame(&bridge_b, 0);
        bridge_a.receive_bpdu(0, &frame).unwrap();
        assert!(bridge_a.is_root());
    }

    #[test]
    fn test_lowest_sender_port_wins_root_port() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(4, MAC_B, 4096);

        // The same root heard over two ports at equal cost: the sender's
        // lower port id breaks the tie.
        bridge_b.receive_bpdu(2, &root_config_frame(&bridge_a, 1)).unwrap();
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        assert_eq!(bridge_b.bridge_info().root_port, Some(0));
        assert_eq!(bridge_b.port_state(0).unwrap(), StpPortState::Listening);
        // The other port heard a better claim than its own: blocked
        assert_eq!(bridge_b.port_state(2).unwrap(), StpPortState::Blocking);
    }

    #[test]
    fn test_ports_without_bpdus_are_designated() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(3, MAC_B, 4096);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        // Ports 1 and 2 heard nothing: we are designated there
        assert_eq!(bridge_b.port_state(1).unwrap(), StpPortState::Listening);
        assert_eq!(bridge_b.port_state(2).unwrap(), StpPortState::Listening);
    }

    #[test]
    fn test_forward_delay_progression() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 4096);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        bridge_b.update(0);
        assert_eq!(bridge_b.port_state(0).unwrap(), StpPortState::Listening);
        assert!(!bridge_b.can_learn(0));

        bridge_b.update(15);
        assert_eq!(bridge_b.port_state(0).unwrap(), StpPortState::Learning);
        assert!(bridge_b.can_learn(0));
        assert!(!bridge_b.can_forward(0));

        bridge_b.update(19);
        // Keep the root fresh so the claim does not expire mid-test
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        bridge_b.update(30);
        assert_eq!(bridge_b.port_state(0).unwrap(), StpPortState::Forwarding);
        assert!(bridge_b.can_forward(0));
    }

    #[test]
    fn test_root_emits_hellos() {
        let mut bridge = StpBridge::new(3, MAC_A, 4096);
        bridge.link_change(2, false).unwrap();

        bridge.update(0);
        let frames = bridge.update(2);
        // Hello fired: one config BPDU per non-disabled port
        assert_eq!(frames.len(), 2);
        for (port, frame) in &frames {
            assert_ne!(*port, 2);
            match Bpdu::parse_frame(frame).unwrap() {
                Bpdu::Config(config) => {
                    assert_eq!(config.root_id, BridgeId::new(4096, MAC_A));
                    assert_eq!(config.message_age, 0);
                }
                other => panic!("expected config BPDU, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_non_root_does_not_emit_hellos() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 32768);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        bridge_b.update(0);
        let frames = bridge_b.update(2);
        assert!(frames.iter().all(|(_, f)| {
            !matches!(Bpdu::parse_frame(f), Ok(Bpdu::Config(_)))
        }));
    }

    // ========================================
    // Failure and reconvergence
    // ========================================

    #[test]
    fn test_message_age_expiry_reelects_root() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 4096);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();
        assert!(!bridge_b.is_root());

        bridge_b.update(0);
        // No refreshing BPDUs for longer than max_age
        bridge_b.update(25);
        assert!(bridge_b.is_root());
        assert_eq!(bridge_b.bridge_info().root_port, None);
    }

    #[test]
    fn test_root_port_loss_on_link_down() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 4096);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        bridge_b.link_change(0, false).unwrap();
        assert!(bridge_b.is_root());
    }

    #[test]
    fn test_priority_change_can_reclaim_root() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 32768);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();
        assert!(!bridge_b.is_root());

        bridge_b.set_bridge_priority(0);
        assert!(bridge_b.is_root());
    }

    // ========================================
    // Topology change machinery
    // ========================================

    #[test]
    fn test_tcn_sets_tc_and_ack() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        let tcn = Bpdu::TopologyChangeNotification.encode_frame(MAC_B);
        bridge.receive_bpdu(1, &tcn).unwrap();

        assert!(bridge.topology_change_active());
        assert!(bridge.port_info(1).unwrap().topology_change_ack);
        assert_eq!(bridge.tc_events(), 1);
    }

    #[test]
    fn test_tc_window_expires() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        let tcn = Bpdu::TopologyChangeNotification.encode_frame(MAC_B);
        bridge.receive_bpdu(1, &tcn).unwrap();

        bridge.update(0);
        // Window is 2 * forward_delay = 30 s
        bridge.update(29);
        assert!(bridge.topology_change_active());
        bridge.update(31);
        assert!(!bridge.topology_change_active());
    }

    #[test]
    fn test_tc_flag_carried_in_hello() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        let tcn = Bpdu::TopologyChangeNotification.encode_frame(MAC_B);
        bridge.receive_bpdu(1, &tcn).unwrap();

        bridge.update(0);
        let frames = bridge.update(2);
        let config = frames
            .iter()
            .find_map(|(_, f)| match Bpdu::parse_frame(f) {
                Ok(Bpdu::Config(c)) => Some(c),
                _ => None,
            })
            .expect("root should emit config BPDUs");
        assert!(config.topology_change);
    }

    #[test]
    fn test_non_root_sends_tcn_after_port_forwards() {
        let bridge_a = StpBridge::new(2, MAC_A, 4096);
        let mut bridge_b = StpBridge::new(2, MAC_B, 4096);
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();

        bridge_b.update(0);
        bridge_b.update(15);
        // Keep the root fresh so message age does not expire
        bridge_b.receive_bpdu(0, &root_config_frame(&bridge_a, 0)).unwrap();
        bridge_b.update(30);
        // Root port reached forwarding -> topology change -> TCN out the root port
        let frames = bridge_b.update(31);
        assert!(frames.iter().any(|(port, f)| {
            *port == 0 && matches!(Bpdu::parse_frame(f), Ok(Bpdu::TopologyChangeNotification))
        }));
    }

    // ========================================
    // Misc
    // ========================================

    #[test]
    fn test_receive_on_disabled_port_fails() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        bridge.link_change(0, false).unwrap();
        let tcn = Bpdu::TopologyChangeNotification.encode_frame(MAC_B);
        assert!(bridge.receive_bpdu(0, &tcn).is_err());
    }

    #[test]
    fn test_receive_when_disabled_fails() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        bridge.set_enabled(false);
        let tcn = Bpdu::TopologyChangeNotification.encode_frame(MAC_B);
        assert!(matches!(
            bridge.receive_bpdu(0, &tcn),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_per_vlan_state_override() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        assert_eq!(
            bridge.port_vlan_state(0, 10).unwrap(),
            StpPortState::Blocking
        );
        bridge
            .set_port_vlan_state(0, 10, StpPortState::Forwarding)
            .unwrap();
        assert_eq!(
            bridge.port_vlan_state(0, 10).unwrap(),
            StpPortState::Forwarding
        );
        // Other VLANs still track the port state
        assert_eq!(
            bridge.port_vlan_state(0, 20).unwrap(),
            StpPortState::Blocking
        );
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut bridge = StpBridge::new(2, MAC_A, 4096);
        assert!(bridge.port_state(9).is_err());
        assert!(bridge.set_port_priority(9, 1).is_err());
    }
}
