//! 802.1D-style spanning tree.
//!
//! Port roles follow from the priority vectors heard on each port: the port
//! with the best (root, cost to root, designated bridge, designated port, own
//! port id) becomes the root port, ports where this bridge advertises the best
//! vector are designated, and everything else blocks. Forwarding ports are
//! reached via Blocking, Listening and Learning, gated by max-age and then
//! forward-delay twice. Port state is written through to the interface so the
//! switching service can gate on it.

use crate::config::StpConfig;
use crate::device::{InterfaceId, NodeContext, PortState};
use crate::events::EngineEventKind;
use crate::handler::{
    Direction, FrameEvent, FrameListener, LifecycleEvent, LifecycleListener, Listener, Outcome, TimerKind,
};
use crate::message::{Bpdu, BridgeId, Frame, FramePayload, MacAddress, PortId};
use crate::simulator::{Duration, TimerHandle};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

pub const PORT_PRIORITY: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Disabled,
    Root,
    Designated,
    Alternate,
    Backup,
}

impl PortRole {
    fn forwards(&self) -> bool {
        matches!(self, PortRole::Root | PortRole::Designated)
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortRole::Disabled => "Disb",
            PortRole::Root => "Root",
            PortRole::Designated => "Desg",
            PortRole::Alternate => "Altn",
            PortRole::Backup => "Back",
        };
        f.write_str(name)
    }
}

/// Default path cost for a link speed.
pub fn path_cost(speed_mbps: u32) -> u32 {
    match speed_mbps {
        s if s >= 10_000 => 2,
        s if s >= 1_000 => 4,
        s if s >= 100 => 19,
        _ => 100,
    }
}

#[derive(Debug)]
struct StpPort {
    id: PortId,
    role: PortRole,
    state: PortState,
    cost: u32,
    cost_override: Option<u32>,
    /// Best configuration heard on this port and its expiry timer.
    received: Option<(Bpdu, TimerHandle)>,
    transition: Option<TimerHandle>,
}

impl StpPort {
    fn new(iface: InterfaceId) -> Self {
        StpPort {
            id: PortId::new(PORT_PRIORITY, iface.0 as u16 + 1),
            role: PortRole::Disabled,
            state: PortState::Disabled,
            cost: path_cost(100),
            cost_override: None,
            received: None,
            transition: None,
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.transition.take() {
            handle.cancel();
        }
        if let Some((_, handle)) = self.received.take() {
            handle.cancel();
        }
    }
}

/// Read-only view of one port for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSummary {
    pub iface: InterfaceId,
    pub id: PortId,
    pub role: PortRole,
    pub state: PortState,
    pub cost: u32,
}

pub struct StpService {
    enabled: bool,
    bridge: BridgeId,
    hello_secs: u16,
    max_age_secs: u16,
    forward_delay_secs: u16,
    root: BridgeId,
    root_cost: u32,
    root_port: Option<InterfaceId>,
    ports: BTreeMap<InterfaceId, StpPort>,
    hello_timer: Option<TimerHandle>,
}

impl StpService {
    pub fn new(bridge: BridgeId, config: &StpConfig) -> Self {
        StpService {
            enabled: config.enabled_by_default,
            bridge,
            hello_secs: config.hello_secs,
            max_age_secs: config.max_age_secs,
            forward_delay_secs: config.forward_delay_secs,
            root: bridge,
            root_cost: 0,
            root_port: None,
            ports: BTreeMap::new(),
            hello_timer: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.bridge
    }

    pub fn root_id(&self) -> BridgeId {
        self.root
    }

    pub fn root_cost(&self) -> u32 {
        self.root_cost
    }

    pub fn root_port(&self) -> Option<InterfaceId> {
        self.root_port
    }

    pub fn is_root(&self) -> bool {
        self.root == self.bridge
    }

    pub fn timers(&self) -> (u16, u16, u16) {
        (self.hello_secs, self.max_age_secs, self.forward_delay_secs)
    }

    pub fn port_role(&self, iface: InterfaceId) -> Option<PortRole> {
        self.ports.get(&iface).map(|p| p.role)
    }

    pub fn port_state(&self, iface: InterfaceId) -> Option<PortState> {
        self.ports.get(&iface).map(|p| p.state)
    }

    pub fn port_cost_override(&self, iface: InterfaceId) -> Option<u32> {
        self.ports.get(&iface).and_then(|p| p.cost_override)
    }

    /// Active ports, in interface order.
    pub fn ports(&self) -> Vec<PortSummary> {
        self.ports
            .iter()
            .filter(|(_, p)| p.role != PortRole::Disabled)
            .map(|(iface, p)| PortSummary {
                iface: *iface,
                id: p.id,
                role: p.role,
                state: p.state,
                cost: p.cost,
            })
            .collect()
    }

    pub fn set_enabled(&mut self, ctx: &mut NodeContext<'_>, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        info!(node = ctx.node().0, enabled, "spanning tree toggled");
        let ifaces: Vec<InterfaceId> = self.ports.keys().copied().collect();
        for iface in ifaces {
            self.disable_port(ctx, iface);
            if Self::operational(ctx, iface) {
                self.enable_port(ctx, iface);
            }
        }
        self.recompute(ctx);
    }

    pub fn set_priority(&mut self, ctx: &mut NodeContext<'_>, priority: u16) {
        let was_root = self.is_root();
        self.bridge.priority = priority;
        if was_root {
            self.root = self.bridge;
        }
        self.recompute(ctx);
    }

    pub fn set_port_cost(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, cost: Option<u32>) {
        if let Some(port) = self.ports.get_mut(&iface) {
            port.cost_override = cost;
        }
        self.recompute(ctx);
    }

    fn operational(ctx: &NodeContext<'_>, iface: InterfaceId) -> bool {
        ctx.interfaces()
            .get(iface)
            .map_or(false, |i| i.is_up() && i.link().is_some())
    }

    fn set_state(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, state: PortState) {
        let Some(port) = self.ports.get_mut(&iface) else {
            return;
        };
        if let Ok(interface) = ctx.interface_mut(iface) {
            interface.datalink_mut().stp_state = state;
        }
        if port.state == state {
            return;
        }
        port.state = state;
        debug!(node = ctx.node().0, iface = iface.0, ?state, "port state changed");
        ctx.emit(EngineEventKind::PortStateChanged { iface, state });
    }

    fn enable_port(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId) {
        let Some(port) = self.ports.get_mut(&iface) else {
            return;
        };
        port.role = PortRole::Designated;
        if self.enabled {
            self.set_state(ctx, iface, PortState::Blocking);
            self.start_transition(ctx, iface);
        } else {
            self.set_state(ctx, iface, PortState::Forwarding);
        }
    }

    fn disable_port(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId) {
        let Some(port) = self.ports.get_mut(&iface) else {
            return;
        };
        port.cancel_timers();
        port.role = PortRole::Disabled;
        let state = if self.enabled {
            PortState::Disabled
        } else {
            PortState::Forwarding
        };
        self.set_state(ctx, iface, state);
    }

    /// Begin the Blocking to Forwarding walk unless one is already running.
    fn start_transition(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId) {
        let delay = Duration::from_secs(self.max_age_secs as u64);
        if let Some(port) = self.ports.get_mut(&iface) {
            if port.transition.as_ref().map_or(false, TimerHandle::is_active) {
                return;
            }
            port.transition = Some(ctx.schedule(delay, TimerKind::PortTransition(iface)));
        }
    }

    fn advance_port(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId) {
        let Some(port) = self.ports.get_mut(&iface) else {
            return;
        };
        port.transition = None;
        if !port.role.forwards() {
            return;
        }
        let next = match port.state {
            PortState::Blocking => PortState::Listening,
            PortState::Listening => PortState::Learning,
            PortState::Learning => PortState::Forwarding,
            PortState::Forwarding | PortState::Disabled => return,
        };
        if next != PortState::Forwarding {
            let delay = Duration::from_secs(self.forward_delay_secs as u64);
            port.transition = Some(ctx.schedule(delay, TimerKind::PortTransition(iface)));
        }
        self.set_state(ctx, iface, next);
    }

    fn our_vector(&self, port: &StpPort) -> (BridgeId, u32, BridgeId, PortId) {
        (self.root, self.root_cost, self.bridge, port.id)
    }

    /// Re-derive root, root port and every port role from stored vectors.
    fn recompute(&mut self, ctx: &mut NodeContext<'_>) {
        if !self.enabled {
            self.root = self.bridge;
            self.root_cost = 0;
            self.root_port = None;
            return;
        }
        for (iface, port) in self.ports.iter_mut() {
            let speed = ctx
                .interfaces()
                .get(*iface)
                .map_or(100, |i| i.hardware().speed_mbps);
            port.cost = port.cost_override.unwrap_or_else(|| path_cost(speed));
        }

        let best = self
            .ports
            .iter()
            .filter(|(_, p)| p.role != PortRole::Disabled)
            .filter_map(|(iface, p)| {
                let (bpdu, _) = p.received.as_ref()?;
                let key = (bpdu.root, bpdu.root_path_cost + p.cost, bpdu.bridge, bpdu.port, p.id);
                Some((key, *iface))
            })
            .min();

        let old_root = self.root;
        match best {
            Some(((root, cost, ..), iface)) if root < self.bridge => {
                self.root = root;
                self.root_cost = cost;
                self.root_port = Some(iface);
            }
            _ => {
                self.root = self.bridge;
                self.root_cost = 0;
                self.root_port = None;
            }
        }
        let root_changed = old_root != self.root;
        if root_changed {
            info!(node = ctx.node().0, root = %self.root, cost = self.root_cost, "spanning tree root changed");
        }

        let roles: Vec<(InterfaceId, PortRole)> = self
            .ports
            .iter()
            .filter(|(_, p)| p.role != PortRole::Disabled)
            .map(|(iface, p)| {
                let role = if Some(*iface) == self.root_port {
                    PortRole::Root
                } else {
                    match &p.received {
                        None => PortRole::Designated,
                        Some((bpdu, _)) if self.our_vector(p) < bpdu.vector() => PortRole::Designated,
                        Some((bpdu, _)) if bpdu.bridge == self.bridge => PortRole::Backup,
                        Some(_) => PortRole::Alternate,
                    }
                };
                (*iface, role)
            })
            .collect();

        for (iface, role) in roles {
            let Some(port) = self.ports.get_mut(&iface) else {
                continue;
            };
            let old_role = port.role;
            port.role = role;
            if role != old_role {
                debug!(node = ctx.node().0, iface = iface.0, %role, "port role changed");
            }
            if role.forwards() {
                let restart = root_changed && port.state != PortState::Forwarding;
                if restart {
                    if let Some(handle) = port.transition.take() {
                        handle.cancel();
                    }
                    self.set_state(ctx, iface, PortState::Blocking);
                }
                if self.port_state(iface) == Some(PortState::Blocking) {
                    self.start_transition(ctx, iface);
                }
            } else {
                if let Some(handle) = port.transition.take() {
                    handle.cancel();
                }
                self.set_state(ctx, iface, PortState::Blocking);
            }
        }
    }

    fn bpdu_for(&self, port: &StpPort, message_age: u16) -> Bpdu {
        Bpdu {
            root: self.root,
            root_path_cost: self.root_cost,
            bridge: self.bridge,
            port: port.id,
            message_age,
            max_age: self.max_age_secs,
            hello_time: self.hello_secs,
            forward_delay: self.forward_delay_secs,
        }
    }

    fn send_bpdu(&self, ctx: &mut NodeContext<'_>, iface: InterfaceId, message_age: u16) {
        let Some(port) = self.ports.get(&iface) else {
            return;
        };
        let Ok(mac) = ctx.interface(iface).map(|i| i.mac()) else {
            return;
        };
        let frame = Frame::new(
            mac,
            MacAddress::STP_MULTICAST,
            FramePayload::Bpdu(self.bpdu_for(port, message_age)),
        );
        ctx.send_frame(iface, frame);
    }

    fn send_on_designated(&self, ctx: &mut NodeContext<'_>, message_age: u16) {
        let designated: Vec<InterfaceId> = self
            .ports
            .iter()
            .filter(|(_, p)| p.role == PortRole::Designated)
            .map(|(iface, _)| *iface)
            .collect();
        for iface in designated {
            self.send_bpdu(ctx, iface, message_age);
        }
    }

    fn receive_bpdu(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, bpdu: Bpdu) {
        if bpdu.message_age >= bpdu.max_age {
            return;
        }
        let expiry = Duration::from_secs((bpdu.max_age - bpdu.message_age) as u64);
        let Some(port) = self.ports.get_mut(&iface) else {
            return;
        };
        if port.role == PortRole::Disabled {
            return;
        }
        let accept = match &port.received {
            None => true,
            Some((stored, _)) => {
                bpdu.vector() <= stored.vector() || (stored.bridge == bpdu.bridge && stored.port == bpdu.port)
            }
        };
        if accept {
            if let Some((_, handle)) = port.received.take() {
                handle.cancel();
            }
            let handle = ctx.schedule(expiry, TimerKind::PortInfoExpiry(iface));
            port.received = Some((bpdu.clone(), handle));
        }
        self.recompute(ctx);

        if Some(iface) == self.root_port {
            self.send_on_designated(ctx, bpdu.message_age.saturating_add(1));
        } else if self.port_role(iface) == Some(PortRole::Designated) {
            // The sender advertised something worse than we do here.
            let age = if self.is_root() { 0 } else { bpdu.message_age.saturating_add(1) };
            self.send_bpdu(ctx, iface, age);
        }
    }

    fn add_port(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId) {
        self.ports.entry(iface).or_insert_with(|| StpPort::new(iface));
        if Self::operational(ctx, iface) {
            self.enable_port(ctx, iface);
            self.recompute(ctx);
        } else {
            self.disable_port(ctx, iface);
        }
    }
}

impl FrameListener for StpService {
    fn on_frame(&mut self, ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive || !self.enabled {
            return Outcome::Continue;
        }
        if let FramePayload::Bpdu(bpdu) = event.frame.payload() {
            self.receive_bpdu(ctx, event.iface, bpdu.clone());
            return Outcome::Stop;
        }
        match self.port_state(event.iface) {
            Some(PortState::Blocking | PortState::Listening | PortState::Disabled) => Outcome::Stop,
            _ => Outcome::Continue,
        }
    }
}

impl LifecycleListener for StpService {
    fn on_lifecycle(&mut self, ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome {
        match event {
            LifecycleEvent::InterfaceAdded(iface) => self.add_port(ctx, iface),
            LifecycleEvent::LinkAttached(iface) | LifecycleEvent::InterfaceUp(iface) => {
                if Self::operational(ctx, iface) {
                    self.enable_port(ctx, iface);
                    self.recompute(ctx);
                    if self.is_root() && self.port_role(iface) == Some(PortRole::Designated) {
                        self.send_bpdu(ctx, iface, 0);
                    }
                }
            }
            LifecycleEvent::LinkDetached(iface) | LifecycleEvent::InterfaceDown(iface) => {
                self.disable_port(ctx, iface);
                self.recompute(ctx);
            }
            LifecycleEvent::InterfaceRemoved(iface) => {
                self.disable_port(ctx, iface);
                self.ports.remove(&iface);
                self.recompute(ctx);
            }
            LifecycleEvent::AddressChanged(_) => {}
        }
        Outcome::Continue
    }
}

impl Listener for StpService {
    fn name(&self) -> &'static str {
        "stp"
    }

    fn as_frames(&mut self) -> Option<&mut dyn FrameListener> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn LifecycleListener> {
        Some(self)
    }

    fn on_attach(&mut self, ctx: &mut NodeContext<'_>) {
        let hello = Duration::from_secs(self.hello_secs as u64);
        self.hello_timer = Some(ctx.repeat(hello, TimerKind::Hello, None));
        for iface in ctx.interfaces().ids() {
            self.add_port(ctx, iface);
        }
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerKind) {
        match timer {
            TimerKind::Hello => {
                if self.enabled && self.is_root() {
                    self.send_on_designated(ctx, 0);
                }
            }
            TimerKind::PortTransition(iface) => {
                if self.enabled {
                    self.advance_port(ctx, iface);
                }
            }
            TimerKind::PortInfoExpiry(iface) => {
                if let Some(port) = self.ports.get_mut(&iface) {
                    port.received = None;
                    debug!(node = ctx.node().0, iface = iface.0, "stored BPDU info aged out");
                }
                self.recompute(ctx);
            }
            _ => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.hello_timer.take() {
            handle.cancel();
        }
        for port in self.ports.values_mut() {
            port.cancel_timers();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_cost_by_speed() {
        assert_eq!(path_cost(10), 100);
        assert_eq!(path_cost(100), 19);
        assert_eq!(path_cost(1_000), 4);
        assert_eq!(path_cost(10_000), 2);
    }

    #[test]
    fn test_bridge_id_orders_priority_then_mac() {
        let low_mac = MacAddress::local([0, 0, 0, 0, 1]);
        let high_mac = MacAddress::local([0, 0, 0, 0, 2]);
        let a = BridgeId { priority: 32768, mac: high_mac };
        let b = BridgeId { priority: 32768, mac: low_mac };
        let c = BridgeId { priority: 4096, mac: high_mac };
        assert!(b < a);
        assert!(c < b);
    }

    #[test]
    fn test_new_service_believes_itself_root() {
        let bridge = BridgeId {
            priority: 32768,
            mac: MacAddress::local([1, 2, 3, 4, 5]),
        };
        let stp = StpService::new(bridge, &StpConfig::default());
        assert!(stp.is_root());
        assert_eq!(stp.root_cost(), 0);
        assert!(stp.ports().is_empty());
    }
}
