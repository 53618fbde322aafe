use super::clock::{ManualWallClock, SpeedMode, SystemWallClock, WallClock};
use super::network::Network;
use super::rng::DeterministicRng;
use super::scheduler::{self, ClockSubscription, Scheduler, SchedulerContext};
use super::time::{Duration, VirtualTime};
use crate::config::SimulationConfig;
use crate::datalink::{StpService, SwitchingService};
use crate::device::{
    Action, DeviceType, Duplex, DuplexSetting, Interface, InterfaceId, Link, LinkId, Node,
    NodeContext, NodeId, PendingAction, PortRef, VlanMode,
};
use crate::error::SimError;
use crate::events::{EngineEvent, EngineEventKind, EventSink};
use crate::handler::{LifecycleEvent, Listener, ListenerId, ListenerRegistry};
use crate::message::{BridgeId, Frame, Ipv4Interface, MacAddress, Packet};
use crate::network::{ArpService, EchoOutcome, HsrpService, IcmpService, OspfService, RoutingTable};
use futures::channel::oneshot;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The simulated world: devices, links, the clock, and the event channel.
pub struct Simulation {
    pub(super) config: SimulationConfig,
    pub(super) scheduler: Scheduler<Simulation>,
    pub(super) nodes: BTreeMap<NodeId, Node>,
    pub(super) network: Network,
    pub(super) rng: DeterministicRng,
    pub(super) events: EventSink,
    pub(super) outbox: VecDeque<PendingAction>,
    next_node_id: u32,
    stepped: bool,
}

impl SchedulerContext for Simulation {
    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }
}

impl Simulation {
    /// Simulation driven by the real monotonic clock.
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_wall_clock(config, Arc::new(SystemWallClock::new()))
    }

    /// Simulation whose virtual time only moves through `advance` and
    /// `run_until`. Used by tests, benches and the topology importer.
    pub fn stepped(config: SimulationConfig) -> Self {
        let mut sim = Self::with_wall_clock(config, Arc::new(ManualWallClock::new()));
        sim.stepped = true;
        sim
    }

    pub fn with_wall_clock(config: SimulationConfig, wall: Arc<dyn WallClock>) -> Self {
        let scheduler = Scheduler::new(wall, config.scheduler.profiles, config.scheduler.initial_speed);
        Simulation {
            rng: DeterministicRng::new(config.seed),
            events: EventSink::new(config.event_capacity),
            scheduler,
            nodes: BTreeMap::new(),
            network: Network::new(),
            outbox: VecDeque::new(),
            next_node_id: 0,
            stepped: false,
            config,
        }
    }

    /// True when only `advance` and `run_until` move virtual time, so a
    /// caller waiting on the network must step the clock itself.
    pub fn is_stepped(&self) -> bool {
        self.stepped
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Split out a node's context and its listeners as disjoint borrows.
    pub(super) fn context(&mut self, node: NodeId) -> Option<(NodeContext<'_>, &mut ListenerRegistry)> {
        let Simulation {
            config,
            scheduler,
            nodes,
            rng,
            events,
            outbox,
            ..
        } = self;
        let node = nodes.get_mut(&node)?;
        let ctx = NodeContext::new(
            node.id,
            node.device_type,
            &mut node.interfaces,
            &node.routing,
            scheduler,
            outbox,
            events,
            config,
            rng,
        );
        Some((ctx, &mut node.listeners))
    }

    pub(super) fn emit(&self, node: Option<NodeId>, kind: EngineEventKind) {
        self.events.emit(self.scheduler.now(), node, kind);
    }

    // Clock

    pub fn now(&self) -> VirtualTime {
        self.scheduler.now()
    }

    pub fn elapsed_virtual_time(&self) -> u64 {
        self.scheduler.elapsed_virtual_time()
    }

    pub fn clock(&self) -> &Scheduler<Simulation> {
        &self.scheduler
    }

    pub fn speed(&self) -> SpeedMode {
        self.scheduler.speed()
    }

    pub fn set_speed(&mut self, mode: SpeedMode) {
        if mode == self.scheduler.speed() {
            return;
        }
        self.scheduler.set_speed(mode);
        info!(%mode, "simulation speed changed");
        self.emit(None, EngineEventKind::SpeedChanged { mode });
    }

    /// Skip virtual time forward, firing everything due on the way.
    /// Does nothing while paused.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.flush();
        let fired = scheduler::advance(self, by);
        self.flush();
        fired
    }

    pub fn run_until(&mut self, target: VirtualTime) -> usize {
        self.flush();
        let fired = scheduler::run_until(self, target);
        self.flush();
        fired
    }

    /// Fire whatever the wall clock says is due.
    pub fn poll(&mut self) -> usize {
        self.flush();
        let fired = scheduler::poll(self);
        self.flush();
        fired
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_to_clock<F>(&mut self, callback: F) -> ClockSubscription
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.scheduler.subscribe_to_clock(callback)
    }

    pub fn unsubscribe_from_clock(&mut self, subscription: ClockSubscription) {
        self.scheduler.unsubscribe_from_clock(subscription);
    }

    /// Push the current clock string to clock subscribers.
    pub fn notify_clock(&mut self) {
        self.scheduler.notify_clock();
    }

    /// Wall time until the next timer is due; `None` when nothing is armed
    /// or the simulation is paused.
    pub fn next_wall_wait(&mut self) -> Option<std::time::Duration> {
        self.scheduler.next_wall_wait()
    }

    // Nodes

    fn random_mac(&mut self) -> MacAddress {
        let mut bytes = [0u8; 5];
        self.rng.fill_bytes(&mut bytes);
        MacAddress::local(bytes)
    }

    pub fn add_node(&mut self, name: &str, device_type: DeviceType) -> Result<NodeId, SimError> {
        self.add_node_with_ports(name, device_type, device_type.default_interface_count())
    }

    /// Create a device with `ports` generated interfaces and its default
    /// services: ARP and ICMP on hosts, plus HSRP and OSPF on routers,
    /// spanning tree ahead of switching on switches.
    pub fn add_node_with_ports(
        &mut self,
        name: &str,
        device_type: DeviceType,
        ports: usize,
    ) -> Result<NodeId, SimError> {
        if name.trim().is_empty() || self.node_by_name(name).is_some() {
            return Err(SimError::DuplicateNode(name.to_string()));
        }
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let base_mac = self.random_mac();
        self.nodes
            .insert(id, Node::new(id, name.to_string(), device_type, base_mac));
        debug!(node = name, %device_type, "node added");
        self.emit(
            Some(id),
            EngineEventKind::NodeAdded {
                name: name.to_string(),
            },
        );

        let services: Vec<Box<dyn Listener>> = match device_type {
            DeviceType::Host => vec![
                Box::new(ArpService::new(&self.config.arp)),
                Box::new(IcmpService::new(&self.config.icmp)),
            ],
            DeviceType::Router => vec![
                Box::new(ArpService::new(&self.config.arp)),
                Box::new(IcmpService::new(&self.config.icmp)),
                Box::new(HsrpService::new(&self.config.hsrp)),
                Box::new(OspfService::new(&self.config.ospf)),
            ],
            DeviceType::Switch => {
                let bridge = BridgeId {
                    priority: self.config.stp.bridge_priority,
                    mac: base_mac,
                };
                vec![
                    Box::new(StpService::new(bridge, &self.config.stp)),
                    Box::new(SwitchingService::new(&self.config.switching)),
                ]
            }
        };
        for service in services {
            self.register_listener(id, service, None)?;
        }
        for _ in 0..ports {
            self.add_interface(id, None)?;
        }
        Ok(id)
    }

    /// Remove a device, its links, and every timer its services own.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), SimError> {
        if !self.nodes.contains_key(&id) {
            return Err(SimError::UnknownNode(id));
        }
        for link in self.network.touching(id) {
            self.disconnect(link)?;
        }
        if let Some(mut node) = self.nodes.remove(&id) {
            node.listeners.clear();
            debug!(node = %node.name, "node removed");
        }
        self.outbox.retain(|pending| pending.node != id);
        self.emit(Some(id), EngineEventKind::NodeRemoved);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, SimError> {
        self.nodes.get(&id).ok_or(SimError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SimError> {
        self.nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.name.eq_ignore_ascii_case(name))
            .map(|n| n.id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn rename_node(&mut self, id: NodeId, name: &str) -> Result<(), SimError> {
        if let Some(other) = self.node_by_name(name) {
            if other != id {
                return Err(SimError::DuplicateNode(name.to_string()));
            }
        }
        self.node_mut(id)?.name = name.to_string();
        self.emit(
            Some(id),
            EngineEventKind::NodeRenamed {
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn interface(&self, port: PortRef) -> Result<&Interface, SimError> {
        self.node(port.node)?.interface(port.iface)
    }

    fn interface_mut(&mut self, port: PortRef) -> Result<&mut Interface, SimError> {
        self.node_mut(port.node)?
            .interfaces
            .get_mut(port.iface)
            .ok_or(SimError::UnknownInterface {
                node: port.node,
                iface: port.iface,
            })
    }

    /// Look up `node` and `iface` by name, e.g. `("R1", "gig0/0")`.
    pub fn port(&self, node: &str, iface: &str) -> Result<PortRef, SimError> {
        let id = self
            .node_by_name(node)
            .ok_or_else(|| SimError::UnknownNodeName(node.to_string()))?;
        let iface = self.node(id)?.resolve_interface(iface)?;
        Ok(PortRef::new(id, iface))
    }

    // Interfaces

    /// Add an interface, generating the next free name when `name` is `None`.
    pub fn add_interface(&mut self, node: NodeId, name: Option<&str>) -> Result<InterfaceId, SimError> {
        let mac = self.random_mac();
        let n = self.node_mut(node)?;
        let name = name.map_or_else(|| n.next_interface_name(), str::to_string);
        let iface = n
            .interfaces
            .add(Node::build_interface(n.device_type, name.clone(), mac))?;
        self.emit(Some(node), EngineEventKind::InterfaceAdded { iface, name });
        self.dispatch_lifecycle(node, LifecycleEvent::InterfaceAdded(iface));
        self.flush();
        Ok(iface)
    }

    pub fn remove_interface(&mut self, node: NodeId, iface: InterfaceId) -> Result<(), SimError> {
        let port = PortRef::new(node, iface);
        if let Some(link) = self.interface(port)?.link() {
            self.disconnect(link)?;
        }
        self.dispatch_lifecycle(node, LifecycleEvent::InterfaceRemoved(iface));
        self.node_mut(node)?.interfaces.remove(iface);
        self.emit(Some(node), EngineEventKind::InterfaceRemoved { iface });
        self.flush();
        Ok(())
    }

    /// Administratively enable or shut down an interface.
    pub fn set_interface_up(&mut self, node: NodeId, iface: InterfaceId, up: bool) -> Result<(), SimError> {
        let hardware = self.interface_mut(PortRef::new(node, iface))?.hardware_mut();
        if hardware.admin_up == up {
            return Ok(());
        }
        hardware.admin_up = up;
        debug!(node = node.0, iface = %hardware.name, up, "interface state changed");
        let event = if up {
            LifecycleEvent::InterfaceUp(iface)
        } else {
            LifecycleEvent::InterfaceDown(iface)
        };
        self.dispatch_lifecycle(node, event);
        self.emit(Some(node), EngineEventKind::InterfaceStateChanged { iface, up });
        self.flush();
        Ok(())
    }

    /// Set or clear an interface's IPv4 address. Overlapping another
    /// interface's subnet on the same device is rejected.
    pub fn set_interface_address(
        &mut self,
        node: NodeId,
        iface: InterfaceId,
        address: Option<Ipv4Interface>,
    ) -> Result<(), SimError> {
        let n = self.node(node)?;
        n.interface(iface)?
            .network()
            .ok_or(SimError::ServiceUnavailable("IP addressing"))?;
        if let Some(address) = address {
            if address.prefix_len < 31
                && (address.address == address.network() || address.address == address.broadcast())
            {
                return Err(SimError::InvalidAddress(address.to_string()));
            }
            let overlap = n.interfaces.iter().find(|(id, other)| {
                *id != iface
                    && other
                        .address()
                        .map_or(false, |a| a.contains(address.address) || address.contains(a.address))
            });
            if let Some((_, other)) = overlap {
                return Err(SimError::InvalidAddress(format!(
                    "{} overlaps with {}",
                    address,
                    other.name()
                )));
            }
        }
        if let Some(network) = self.interface_mut(PortRef::new(node, iface))?.network_mut() {
            network.address = address;
        }
        self.dispatch_lifecycle(node, LifecycleEvent::AddressChanged(iface));
        self.emit(Some(node), EngineEventKind::AddressChanged { iface, address });
        self.flush();
        Ok(())
    }

    pub fn set_interface_speed(&mut self, node: NodeId, iface: InterfaceId, speed_mbps: u32) -> Result<(), SimError> {
        if speed_mbps == 0 {
            return Err(SimError::InvalidSetting("speed must be positive".to_string()));
        }
        self.interface_mut(PortRef::new(node, iface))?
            .hardware_mut()
            .speed_mbps = speed_mbps;
        Ok(())
    }

    pub fn set_interface_duplex(
        &mut self,
        node: NodeId,
        iface: InterfaceId,
        duplex: DuplexSetting,
    ) -> Result<(), SimError> {
        self.interface_mut(PortRef::new(node, iface))?
            .hardware_mut()
            .duplex = duplex;
        Ok(())
    }

    /// Change a switch port's access/trunk mode.
    pub fn set_vlan_mode(&mut self, node: NodeId, iface: InterfaceId, mode: VlanMode) -> Result<(), SimError> {
        if self.node(node)?.device_type != DeviceType::Switch {
            return Err(SimError::ServiceUnavailable("switchport"));
        }
        self.interface_mut(PortRef::new(node, iface))?.datalink_mut().vlan = mode;
        Ok(())
    }

    pub fn routing_mut(&mut self, node: NodeId) -> Result<&mut RoutingTable, SimError> {
        Ok(&mut self.node_mut(node)?.routing)
    }

    // Links

    /// Cable two interfaces together.
    pub fn connect(&mut self, a: PortRef, b: PortRef, length_m: f64) -> Result<LinkId, SimError> {
        for end in [a, b] {
            let iface = self.interface(end)?;
            if iface.link().is_some() {
                return Err(SimError::AlreadyLinked(iface.name().to_string()));
            }
        }
        if a == b {
            return Err(SimError::AlreadyLinked(self.interface(a)?.name().to_string()));
        }
        let link = self.network.insert(a, b, length_m)?;
        for end in [a, b] {
            self.interface_mut(end)?.hardware_mut().link = Some(link);
        }
        debug!(link = link.0, "link added");
        self.emit(None, EngineEventKind::LinkAdded { link, a, b });
        for end in [a, b] {
            self.dispatch_lifecycle(end.node, LifecycleEvent::LinkAttached(end.iface));
        }
        self.flush();
        Ok(link)
    }

    /// Cable two interfaces named as `(device, interface)` pairs.
    pub fn connect_by_name(
        &mut self,
        a: (&str, &str),
        b: (&str, &str),
        length_m: f64,
    ) -> Result<LinkId, SimError> {
        let a = self.port(a.0, a.1)?;
        let b = self.port(b.0, b.1)?;
        self.connect(a, b, length_m)
    }

    /// Remove a link; frames still on it are never delivered.
    pub fn disconnect(&mut self, id: LinkId) -> Result<(), SimError> {
        let link = self.network.remove(id)?;
        for end in link.ends() {
            if let Ok(iface) = self.interface_mut(end) {
                iface.hardware_mut().link = None;
                self.dispatch_lifecycle(end.node, LifecycleEvent::LinkDetached(end.iface));
            }
        }
        debug!(link = id.0, "link removed");
        self.emit(None, EngineEventKind::LinkRemoved { link: id });
        self.flush();
        Ok(())
    }

    pub fn link(&self, id: LinkId) -> Result<&Link, SimError> {
        self.network.get(id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.network.iter()
    }

    /// Cap a link's rate below its interfaces' rates, or lift the cap.
    pub fn set_link_speed(&mut self, id: LinkId, speed_mbps: Option<u32>) -> Result<(), SimError> {
        if speed_mbps == Some(0) {
            return Err(SimError::InvalidSetting("link speed must be positive".to_string()));
        }
        self.network.get_mut(id)?.set_speed_mbps(speed_mbps);
        Ok(())
    }

    /// Negotiated duplex of a link; both ends must still exist.
    pub fn link_duplex(&self, id: LinkId) -> Result<Duplex, SimError> {
        let link = self.network.get(id)?;
        let [a, b] = link.ends();
        let a = self.interface(a).map_err(|_| SimError::DanglingLink(id))?;
        let b = self.interface(b).map_err(|_| SimError::DanglingLink(id))?;
        Ok(Link::negotiate_duplex(a.hardware().duplex, b.hardware().duplex))
    }

    // Listeners and services

    pub fn register_listener(
        &mut self,
        node: NodeId,
        listener: Box<dyn Listener>,
        scope: Option<InterfaceId>,
    ) -> Result<ListenerId, SimError> {
        let (mut ctx, listeners) = self.context(node).ok_or(SimError::UnknownNode(node))?;
        let id = listeners.register(listener, scope);
        if let Some(listener) = listeners.get_mut(id) {
            ctx.set_listener(id);
            listener.on_attach(&mut ctx);
        }
        self.flush();
        Ok(id)
    }

    /// Remove a listener after letting it cancel its timers.
    pub fn deregister_listener(&mut self, node: NodeId, id: ListenerId) -> Result<(), SimError> {
        self.node_mut(node)?
            .listeners
            .deregister(id)
            .map(|_| ())
            .ok_or(SimError::ServiceUnavailable("listener"))
    }

    pub fn service<T: Listener>(&self, node: NodeId) -> Result<&T, SimError> {
        self.node(node)?
            .service::<T>()
            .ok_or(SimError::ServiceUnavailable(service_name::<T>()))
    }

    /// Run `f` against a node's service of type `T`, then carry out
    /// whatever it queued.
    pub fn with_service<T, R, F>(&mut self, node: NodeId, f: F) -> Result<R, SimError>
    where
        T: Listener,
        F: FnOnce(&mut T, &mut NodeContext<'_>) -> R,
    {
        let (mut ctx, listeners) = self.context(node).ok_or(SimError::UnknownNode(node))?;
        let (id, service) = listeners
            .find_mut::<T>()
            .ok_or(SimError::ServiceUnavailable(service_name::<T>()))?;
        ctx.set_listener(id);
        let result = f(service, &mut ctx);
        self.flush();
        Ok(result)
    }

    /// Send one ICMP echo request. The receiver resolves with the reply or
    /// with `Unreachable` after the configured timeout.
    pub fn ping(&mut self, node: NodeId, dst: Ipv4Addr) -> Result<oneshot::Receiver<EchoOutcome>, SimError> {
        let timeout = self.config.icmp.timeout();
        self.with_service::<IcmpService, _, _>(node, |icmp, ctx| icmp.send_echo_request(ctx, dst, timeout))
    }

    /// Inject a packet into a node's send path.
    pub fn send_packet(&mut self, node: NodeId, packet: Packet) -> Result<(), SimError> {
        self.node(node)?;
        self.outbox.push_back(PendingAction {
            node,
            origin: None,
            action: Action::SendPacket {
                packet,
                via: None,
                src_mac: None,
            },
        });
        self.flush();
        Ok(())
    }

    /// Inject a frame into a node's send path on `iface`.
    pub fn send_frame(&mut self, node: NodeId, iface: InterfaceId, frame: Frame) -> Result<(), SimError> {
        self.interface(PortRef::new(node, iface))?;
        self.outbox.push_back(PendingAction {
            node,
            origin: None,
            action: Action::SendFrame { iface, frame },
        });
        self.flush();
        Ok(())
    }
}

fn service_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.scheduler.now())
            .field("speed", &self.scheduler.speed())
            .field("nodes", &self.nodes.len())
            .field("links", &self.network.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> Simulation {
        Simulation::stepped(SimulationConfig::test())
    }

    #[test]
    fn test_default_services_per_device_type() {
        let mut sim = sim();
        let host = sim.add_node("PC1", DeviceType::Host).unwrap();
        let router = sim.add_node("R1", DeviceType::Router).unwrap();
        let switch = sim.add_node("S1", DeviceType::Switch).unwrap();
        assert_eq!(sim.node(host).unwrap().listener_names(), vec!["arp", "icmp"]);
        assert_eq!(
            sim.node(router).unwrap().listener_names(),
            vec!["arp", "icmp", "hsrp", "ospf"]
        );
        assert_eq!(sim.node(switch).unwrap().listener_names(), vec!["stp", "switching"]);
        assert_eq!(sim.node(switch).unwrap().interfaces().len(), 8);
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut sim = sim();
        sim.add_node("R1", DeviceType::Router).unwrap();
        assert!(matches!(
            sim.add_node("r1", DeviceType::Host),
            Err(SimError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_connect_rejects_second_link_on_interface() {
        let mut sim = sim();
        sim.add_node("A", DeviceType::Host).unwrap();
        sim.add_node("B", DeviceType::Host).unwrap();
        sim.add_node("C", DeviceType::Host).unwrap();
        sim.connect_by_name(("A", "eth0"), ("B", "eth0"), 10.0).unwrap();
        let err = sim.connect_by_name(("A", "eth0"), ("C", "eth0"), 10.0).unwrap_err();
        assert!(matches!(err, SimError::AlreadyLinked(_)));
    }

    #[test]
    fn test_remove_node_drops_links() {
        let mut sim = sim();
        let a = sim.add_node("A", DeviceType::Host).unwrap();
        sim.add_node("B", DeviceType::Host).unwrap();
        let link = sim.connect_by_name(("A", "eth0"), ("B", "eth0"), 10.0).unwrap();
        sim.remove_node(a).unwrap();
        assert!(sim.link(link).is_err());
        let b = sim.port("B", "eth0").unwrap();
        assert!(sim.interface(b).unwrap().link().is_none());
        assert!(sim.remove_node(a).is_err());
    }

    #[test]
    fn test_overlapping_address_rejected() {
        let mut sim = sim();
        let r = sim.add_node("R1", DeviceType::Router).unwrap();
        let addr = |a, b, c, d, p| Ipv4Interface::new(Ipv4Addr::new(a, b, c, d), p).unwrap();
        sim.set_interface_address(r, InterfaceId(0), Some(addr(10, 0, 0, 1, 24)))
            .unwrap();
        let err = sim
            .set_interface_address(r, InterfaceId(1), Some(addr(10, 0, 0, 2, 16)))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidAddress(_)));
        assert!(sim.interface(PortRef::new(r, InterfaceId(1))).unwrap().address().is_none());
    }

    #[test]
    fn test_switch_rejects_ip_address() {
        let mut sim = sim();
        let s = sim.add_node("S1", DeviceType::Switch).unwrap();
        let addr = Ipv4Interface::new(Ipv4Addr::new(10, 0, 0, 1), 24).unwrap();
        assert!(matches!(
            sim.set_interface_address(s, InterfaceId(0), Some(addr)),
            Err(SimError::ServiceUnavailable(_))
        ));
    }
}
