//! Switch core
//!
//! Owns every engine behind its own mutex and wires them into the processor
//! pipeline: VLAN ingress classification, the STP gate (which also consumes
//! BPDUs), ARP handling, and MAC learning run per packet in that order;
//! the forwarding decision and the L3 path run after the pipeline returns.
//!
//! Lock order, top-down: ports, vlans, mac table, stp, ip, routes, arp.
//! Locks are taken in that order and held one scope at a time.

use crate::backend::PortBackend;
use crate::config::ConfigLock;
use crate::dataplane::arp_cache::{ArpCache, Resolve};
use crate::dataplane::ip::{IpAction, IpPipeline};
use crate::dataplane::mac_table::{L2ForwardAction, MacTable, VlanId};
use crate::dataplane::routing::{IpPrefix, RouteEntry, RouteKind, RoutingTable};
use crate::dataplane::stp::StpBridge;
use crate::dataplane::vlan::{IngressVerdict, VlanEngine};
use crate::packet::{Direction, PacketBuffer};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::port::{OperState, PortId, PortRegistry};
use crate::protocol::bpdu::is_bpdu_frame;
use crate::protocol::ethernet::{self, FrameBuilder};
use crate::protocol::{ethertype, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A routed interface bound to a port
#[derive(Debug, Clone, Copy)]
pub struct InterfaceAddr {
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
}

/// The assembled switch
pub struct SwitchCore<B: PortBackend> {
    backend: B,
    pipeline: Pipeline,
    ports: Arc<Mutex<PortRegistry>>,
    vlans: Arc<Mutex<VlanEngine>>,
    mac_table: Arc<Mutex<MacTable>>,
    stp: Arc<Mutex<StpBridge>>,
    ip: Arc<Mutex<IpPipeline>>,
    routes: Arc<Mutex<RoutingTable>>,
    arp: Arc<Mutex<ArpCache>>,
    interfaces: Arc<Mutex<HashMap<PortId, InterfaceAddr>>>,
    metrics: Arc<MetricsRegistry>,
    /// Frames produced by processors mid-traversal, sent after the pipeline
    pending_tx: Arc<Mutex<Vec<(PortId, Vec<u8>)>>>,
    /// Coarse clock shared with the processors, seconds
    clock: Arc<AtomicU64>,
    hardware_simulation: bool,
}

impl<B: PortBackend> SwitchCore<B> {
    pub fn new(backend: B, lock: &ConfigLock) -> Result<Self> {
        let declared = backend.declared_port_count();
        let port_count = if declared > 0 {
            declared
        } else {
            lock.switch.port_count
        };

        let ports = PortRegistry::new(port_count)?;
        let bridge_mac = ports.get_mac(0)?;

        let mut stp = StpBridge::new(port_count, bridge_mac, lock.stp.bridge_priority);
        stp.set_enabled(lock.features.stp);

        let core = Self {
            backend,
            pipeline: Pipeline::new(),
            ports: Arc::new(Mutex::new(ports)),
            vlans: Arc::new(Mutex::new(VlanEngine::new(
                port_count,
                crate::config::limits::MAX_VLANS,
            ))),
            mac_table: Arc::new(Mutex::new(MacTable::new(
                lock.switch.mac_table_size,
                lock.switch.mac_aging_time,
            ))),
            stp: Arc::new(Mutex::new(stp)),
            ip: Arc::new(Mutex::new(IpPipeline::new(port_count, lock.features.ipv6))),
            routes: Arc::new(Mutex::new(RoutingTable::new(lock.switch.routing_table_size))),
            arp: Arc::new(Mutex::new(ArpCache::new(lock.switch.arp_cache_size))),
            interfaces: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(MetricsRegistry::new()),
            pending_tx: Arc::new(Mutex::new(Vec::new())),
            clock: Arc::new(AtomicU64::new(0)),
            hardware_simulation: lock.features.hardware_simulation,
        };

        core.register_processors()?;
        info!(ports = port_count, "switch core initialized");
        Ok(core)
    }

    /// Standard processors, ascending priority.
    fn register_processors(&self) -> Result<()> {
        // VLAN ingress classification
        let vlans = Arc::clone(&self.vlans);
        self.pipeline.register(
            "vlan-ingress",
            10,
            Arc::new(move |packet: &mut PacketBuffer| {
                let port = packet.metadata.port;
                let vlans = vlans.lock().unwrap();
                match vlans.ingress(packet, port) {
                    Ok(IngressVerdict::Accept) => PipelineResult::Forward,
                    Ok(IngressVerdict::Drop) => PipelineResult::Drop,
                    Err(_) => PipelineResult::Drop,
                }
            }),
        )?;

        // STP: consume BPDUs, gate data frames on port state
        let stp = Arc::clone(&self.stp);
        let metrics = Arc::clone(&self.metrics);
        self.pipeline.register(
            "stp-gate",
            20,
            Arc::new(move |packet: &mut PacketBuffer| {
                let port = packet.metadata.port;
                let mut stp = stp.lock().unwrap();
                if is_bpdu_frame(packet.as_slice()) {
                    metrics.bpdus_received.inc();
                    if let Err(e) = stp.receive_bpdu(port, packet.as_slice()) {
                        debug!(port, error = %e, "BPDU rejected");
                    }
                    return PipelineResult::Consume;
                }
                if !stp.can_learn(port) {
                    metrics.stp_discards.inc();
                    return PipelineResult::Drop;
                }
                PipelineResult::Forward
            }),
        )?;

        // ARP: answer requests, learn bindings, release parked frames
        let arp = Arc::clone(&self.arp);
        let mac_table = Arc::clone(&self.mac_table);
        let interfaces = Arc::clone(&self.interfaces);
        let ports = Arc::clone(&self.ports);
        let pending_tx = Arc::clone(&self.pending_tx);
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        self.pipeline.register(
            "arp",
            30,
            Arc::new(move |packet: &mut PacketBuffer| {
                if packet.metadata.ethertype != ethertype::ARP {
                    return PipelineResult::Forward;
                }
                let port = packet.metadata.port;
                let now = clock.load(Ordering::Relaxed);

                let our_mac = match ports.lock().unwrap().get_mac(port) {
                    Ok(mac) => mac,
                    Err(_) => return PipelineResult::Drop,
                };
                let our_ip = interfaces.lock().unwrap().get(&port).map(|i| i.ip);

                let mut mac_table = mac_table.lock().unwrap();
                let mut arp = arp.lock().unwrap();
                let sender = crate::protocol::arp::ArpPacket::parse(
                    &packet.as_slice()[ethernet::HEADER_SIZE.min(packet.len())..],
                )
                .ok()
                .map(|p| (p.sender_ip, p.sender_mac));

                match arp.handle_frame(packet.as_slice(), port, our_ip, our_mac, now, &mut mac_table)
                {
                    Ok(Some(reply)) => {
                        metrics.arp_replies_sent.inc();
                        pending_tx.lock().unwrap().push((port, reply));
                    }
                    Ok(None) => {}
                    Err(_) => return PipelineResult::Drop,
                }

                // A learned binding may release parked packets
                if let Some((sender_ip, sender_mac)) = sender {
                    for mut frame in arp.take_pending(sender_ip) {
                        frame[0..6].copy_from_slice(&sender_mac.0);
                        pending_tx.lock().unwrap().push((port, frame));
                    }
                }
                PipelineResult::Consume
            }),
        )?;

        // Source MAC learning
        let mac_table = Arc::clone(&self.mac_table);
        let vlans = Arc::clone(&self.vlans);
        let clock = Arc::clone(&self.clock);
        self.pipeline.register(
            "mac-learn",
            40,
            Arc::new(move |packet: &mut PacketBuffer| {
                let vlan = packet.metadata.vlan;
                let learning = vlans
                    .lock()
                    .unwrap()
                    .get(vlan)
                    .map(|v| v.learning_enabled)
                    .unwrap_or(true);
                if learning {
                    let now = clock.load(Ordering::Relaxed);
                    let _ = mac_table.lock().unwrap().learn(
                        packet.metadata.src_mac,
                        vlan,
                        packet.metadata.port,
                        now,
                    );
                }
                PipelineResult::Forward
            }),
        )?;

        Ok(())
    }

    // ========================================
    // Engine access (management surface)
    // ========================================

    pub fn ports(&self) -> &Arc<Mutex<PortRegistry>> {
        &self.ports
    }

    pub fn vlans(&self) -> &Arc<Mutex<VlanEngine>> {
        &self.vlans
    }

    pub fn mac_table(&self) -> &Arc<Mutex<MacTable>> {
        &self.mac_table
    }

    pub fn stp(&self) -> &Arc<Mutex<StpBridge>> {
        &self.stp
    }

    pub fn ip(&self) -> &Arc<Mutex<IpPipeline>> {
        &self.ip
    }

    pub fn routes(&self) -> &Arc<Mutex<RoutingTable>> {
        &self.routes
    }

    pub fn arp(&self) -> &Arc<Mutex<ArpCache>> {
        &self.arp
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Replace the spanning-tree bridge identity (priority and MAC).
    pub fn configure_bridge(&self, mac: MacAddr, priority: u16) {
        let port_count = self.ports.lock().unwrap().count();
        let enabled = self.stp.lock().unwrap().enabled();
        let mut bridge = StpBridge::new(port_count, mac, priority);
        bridge.set_enabled(enabled);
        *self.stp.lock().unwrap() = bridge;
    }

    /// Bind a routed IPv4 interface to a port: the address becomes local and
    /// a connected route covers the attached network.
    pub fn add_interface(&self, port: PortId, ip: Ipv4Addr, prefix_len: u8) -> Result<()> {
        if !self.ports.lock().unwrap().is_valid(port) {
            return Err(Error::InvalidArgument(format!("invalid port {}", port)));
        }
        self.interfaces
            .lock()
            .unwrap()
            .insert(port, InterfaceAddr { ip, prefix_len });
        self.ip.lock().unwrap().add_local_address(IpAddr::V4(ip));

        let prefix = IpPrefix::v4(ip, prefix_len)?;
        let mut route = RouteEntry::new(prefix, None, port, RouteKind::Connected);
        route.iface_name = format!("port{}", port);
        route.timestamp = self.backend.now_seconds();
        self.routes.lock().unwrap().add(route)?;
        info!(port, %ip, prefix_len, "interface configured");
        Ok(())
    }

    /// Install a static IPv4 route.
    pub fn add_static_route(
        &self,
        destination: Ipv4Addr,
        prefix_len: u8,
        gateway: Option<Ipv4Addr>,
        port: PortId,
    ) -> Result<()> {
        let prefix = IpPrefix::v4(destination, prefix_len)?;
        let mut route = RouteEntry::new(
            prefix,
            gateway.map(IpAddr::V4),
            port,
            RouteKind::Static,
        );
        route.iface_name = format!("port{}", port);
        route.timestamp = self.backend.now_seconds();
        self.routes.lock().unwrap().add(route)
    }

    // ========================================
    // Event and timer driving
    // ========================================

    /// Drain link events from the backend into the port registry, the STP
    /// bridge, and the MAC table (a downed port forgets its stations).
    pub fn poll_link_events(&mut self) {
        while let Some((port, up)) = self.backend.poll_link_event() {
            info!(port, up, "link event");
            let _ = self.ports.lock().unwrap().link_event(port, up);
            if !up {
                self.mac_table.lock().unwrap().flush(None, Some(port), false);
            }
            let _ = self.stp.lock().unwrap().link_change(port, up);
        }
    }

    /// One cooperative timer tick: STP, ARP, MAC aging, fragment sweep.
    pub fn tick(&mut self) {
        let now = self.backend.now_seconds();
        self.clock.store(now, Ordering::Relaxed);

        let bpdus = self.stp.lock().unwrap().update(now);
        for (port, frame) in bpdus {
            self.metrics.bpdus_sent.inc();
            self.transmit(port, &frame);
        }

        let retries = self.arp.lock().unwrap().age_entries(now);
        for (port, frame) in retries {
            self.metrics.arp_requests_sent.inc();
            self.transmit(port, &frame);
        }

        self.mac_table.lock().unwrap().process_aging(now);
        self.ip.lock().unwrap().sweep_fragments(now);
    }

    /// Receive and process everything the backend has queued.
    pub fn poll_rx(&mut self) {
        self.poll_link_events();
        while let Some((port, frame)) = self.backend.poll_receive() {
            self.handle_rx(port, &frame);
        }
    }

    fn transmit(&mut self, port: PortId, frame: &[u8]) {
        {
            let ports = self.ports.lock().unwrap();
            match ports.get_info(port) {
                Ok(info) if info.config.admin_up && info.oper_state != OperState::Down => {}
                _ => {
                    self.metrics.with_port(port, |s| s.record_tx_error());
                    return;
                }
            }
        }
        match self.backend.transmit(port, frame) {
            Ok(()) => self.metrics.with_port(port, |s| s.record_tx(frame.len())),
            Err(e) => {
                warn!(port, error = %e, "transmit failed");
                self.metrics.with_port(port, |s| s.record_tx_error());
            }
        }
    }

    fn flush_pending_tx(&mut self) {
        let frames: Vec<(PortId, Vec<u8>)> =
            std::mem::take(&mut *self.pending_tx.lock().unwrap());
        for (port, frame) in frames {
            self.transmit(port, &frame);
        }
    }

    // ========================================
    // Per-packet path
    // ========================================

    /// Process one received frame end to end.
    pub fn handle_rx(&mut self, port: PortId, frame: &[u8]) {
        self.clock
            .store(self.backend.now_seconds(), Ordering::Relaxed);
        self.metrics.with_port(port, |s| s.record_rx(frame.len()));

        {
            let ports = self.ports.lock().unwrap();
            match ports.get_info(port) {
                Ok(info) if info.config.admin_up && info.oper_state != OperState::Down => {}
                _ => {
                    self.metrics.with_port(port, |s| s.record_rx_drop());
                    return;
                }
            }
        }

        if self.hardware_simulation && frame.len() < ethernet::MIN_FRAME_SIZE {
            debug!(port, len = frame.len(), "runt frame rejected");
            self.metrics.with_port(port, |s| s.record_rx_error());
            return;
        }
        if frame.len() > crate::packet::MAX_PACKET_SIZE {
            self.metrics.with_port(port, |s| s.record_rx_error());
            return;
        }

        let mut packet = match PacketBuffer::from_frame(frame) {
            Ok(packet) => packet,
            Err(_) => {
                self.metrics.with_port(port, |s| s.record_rx_error());
                return;
            }
        };
        packet.metadata.port = port;
        packet.metadata.direction = Direction::Rx;
        packet.metadata.timestamp_us = self.backend.now_us();

        match self.pipeline.process(&mut packet) {
            PipelineResult::Forward => {
                self.forward(packet);
                self.flush_pending_tx();
            }
            PipelineResult::Consume => {
                self.flush_pending_tx();
            }
            PipelineResult::Drop | PipelineResult::Recirculate => {
                self.metrics.frames_dropped.inc();
                self.metrics.with_port(port, |s| s.record_rx_drop());
            }
        }
    }

    /// Forwarding decision once the pipeline let the packet through.
    fn forward(&mut self, packet: PacketBuffer) {
        let in_port = packet.metadata.port;
        let dst_mac = packet.metadata.dst_mac;

        // Frames addressed to one of our own MACs enter the routed path
        let routed = {
            let ports = self.ports.lock().unwrap();
            ports.get_mac(in_port).map(|m| m == dst_mac).unwrap_or(false)
                || dst_mac == ports.get_mac(ports.cpu_port()).unwrap_or(MacAddr::ZERO)
        };
        if routed {
            match packet.metadata.ethertype {
                t if t == ethertype::IPV4 || t == ethertype::IPV6 => {
                    self.route_packet(packet);
                }
                _ => {
                    // Addressed to us but not routable traffic
                    self.metrics.frames_dropped.inc();
                }
            }
            return;
        }

        // Data frames only leave through forwarding ports
        if !self.stp.lock().unwrap().can_forward(in_port) {
            self.metrics.stp_discards.inc();
            return;
        }

        let vlan = packet.metadata.vlan;
        let now = self.clock.load(Ordering::Relaxed);
        let action = self
            .mac_table
            .lock()
            .unwrap()
            .forward(dst_mac, vlan, in_port, now);

        match action {
            L2ForwardAction::Forward { port } => {
                self.metrics.frames_forwarded.inc();
                self.egress_l2(packet, vlan, &[port]);
            }
            L2ForwardAction::Flood => {
                self.metrics.frames_flooded.inc();
                let flood_ports = self.vlans.lock().unwrap().flood_ports(vlan, in_port);
                self.egress_l2(packet, vlan, &flood_ports);
            }
            L2ForwardAction::Filter => {
                self.metrics.frames_filtered.inc();
            }
        }
    }

    /// Apply the egress VLAN transform and transmit to each eligible port.
    fn egress_l2(&mut self, packet: PacketBuffer, vlan: VlanId, out_ports: &[PortId]) {
        for &out_port in out_ports {
            if out_port == packet.metadata.port {
                continue;
            }

            let eligible = {
                let ports = self.ports.lock().unwrap();
                matches!(
                    ports.get_info(out_port),
                    Ok(info) if info.config.admin_up && info.oper_state != OperState::Down
                )
            };
            if !eligible || !self.stp.lock().unwrap().can_forward(out_port) {
                continue;
            }

            // Per-port MTU applies to the L2 payload
            let payload_len = packet.len().saturating_sub(if packet.metadata.is_tagged {
                ethernet::TAGGED_HEADER_SIZE
            } else {
                ethernet::HEADER_SIZE
            });
            let mtu = self
                .ports
                .lock()
                .unwrap()
                .get_config(out_port)
                .map(|c| c.mtu as usize)
                .unwrap_or(1500);
            if payload_len > mtu {
                self.metrics.with_port(out_port, |s| s.record_tx_error());
                continue;
            }

            let mut out = match packet.clone_buffer() {
                Ok(out) => out,
                Err(_) => continue,
            };
            if self
                .vlans
                .lock()
                .unwrap()
                .egress(&mut out, out_port, vlan)
                .is_err()
            {
                continue;
            }
            out.metadata.direction = Direction::Tx;
            let bytes = out.as_slice().to_vec();
            self.transmit(out_port, &bytes);
        }
    }

    // ========================================
    // Routed path
    // ========================================

    fn route_packet(&mut self, packet: PacketBuffer) {
        let now = self.clock.load(Ordering::Relaxed);
        let payload_offset = if packet.metadata.is_tagged {
            ethernet::TAGGED_HEADER_SIZE
        } else {
            ethernet::HEADER_SIZE
        };
        let datagram = &packet.as_slice()[payload_offset.min(packet.len())..];

        let action = {
            let mut ip = self.ip.lock().unwrap();
            if packet.metadata.ethertype == ethertype::IPV4 {
                ip.process_ipv4(datagram, now)
            } else {
                ip.process_ipv6(datagram, now)
            }
        };

        match action {
            IpAction::Deliver { protocol, .. } => {
                debug!(protocol, "delivered to local stack");
            }
            IpAction::Held | IpAction::Drop(_) => {}
            IpAction::Forward { packet: datagram, dst } => {
                self.metrics.packets_routed.inc();
                self.forward_routed(datagram, dst);
            }
        }
    }

    fn forward_routed(&mut self, datagram: Vec<u8>, dst: IpAddr) {
        let route = match self.routes.lock().unwrap().lookup(dst) {
            Some(route) => route.clone(),
            None => {
                self.metrics.no_route_drops.inc();
                debug!(%dst, "no route to destination");
                return;
            }
        };
        let egress_port = route.iface_index;

        // Only the IPv4 leg resolves through ARP
        let (dst_v4, next_hop_v4) = match (dst, route.next_hop) {
            (IpAddr::V4(d), Some(IpAddr::V4(nh))) => (d, nh),
            (IpAddr::V4(d), None) => (d, d),
            _ => {
                self.metrics.no_route_drops.inc();
                return;
            }
        };

        let mtu = self
            .ip
            .lock()
            .unwrap()
            .get_port_mtu(egress_port)
            .unwrap_or(1500);
        let fragments = if datagram.len() > mtu as usize {
            match self.ip.lock().unwrap().fragment_ipv4(&datagram, mtu) {
                Ok(fragments) => fragments,
                Err(_) => return,
            }
        } else {
            vec![datagram]
        };

        let (src_mac, src_ip) = {
            let ports = self.ports.lock().unwrap();
            let mac = ports.get_mac(egress_port).unwrap_or(MacAddr::ZERO);
            let ip = self
                .interfaces
                .lock()
                .unwrap()
                .get(&egress_port)
                .map(|i| i.ip)
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            (mac, ip)
        };

        let now = self.clock.load(Ordering::Relaxed);
        let resolution =
            self.arp
                .lock()
                .unwrap()
                .resolve(next_hop_v4, egress_port, src_ip, src_mac, now);

        match resolution {
            Resolve::Ready { mac, port } => {
                for fragment in fragments {
                    let frame = FrameBuilder::new()
                        .dst_mac(mac)
                        .src_mac(src_mac)
                        .ethertype(ethertype::IPV4)
                        .payload(&fragment)
                        .pad_to_min()
                        .build();
                    self.transmit(port, &frame);
                }
            }
            Resolve::Pending { request } => {
                // Park the frames with a placeholder destination; the ARP
                // processor patches and releases them on resolution.
                let mut arp = self.arp.lock().unwrap();
                for fragment in fragments {
                    let frame = FrameBuilder::new()
                        .dst_mac(MacAddr::ZERO)
                        .src_mac(src_mac)
                        .ethertype(ethertype::IPV4)
                        .payload(&fragment)
                        .pad_to_min()
                        .build();
                    if !arp.enqueue_pending(next_hop_v4, frame) {
                        self.metrics.frames_dropped.inc();
                    }
                }
                drop(arp);
                if let Some(request) = request {
                    self.metrics.arp_requests_sent.inc();
                    self.transmit(egress_port, &request);
                }
                debug!(%dst_v4, next_hop = %next_hop_v4, "awaiting ARP resolution");
            }
            Resolve::Failed => {
                self.metrics.frames_dropped.inc();
            }
        }
    }
}
