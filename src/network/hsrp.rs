//! Hot Standby Router Protocol (version 1 behaviour).
//!
//! Each group walks Initial, Learn or Listen, Speak, Standby and Active. A
//! router in Listen that hears no Active for a hold time starts speaking;
//! after a hold time of speaking, every speaker runs the same election over
//! the speakers it has heard, ranked by (priority, address), so routers that
//! start together reach the same answer whatever order their hellos landed
//! in. The Active answers for the virtual IP with the group's virtual MAC.
//!
//! Preemption: the Active yields to a superior router when either side has
//! `preempt` set. A superior router with preempt sends a Coup; an Active with
//! preempt that hears a superior peer sends a Resign.

use crate::config::HsrpConfig;
use crate::device::{InterfaceId, NodeContext, VirtualAddress};
use crate::events::EngineEventKind;
use crate::handler::{
    Direction, LifecycleEvent, LifecycleListener, Listener, Outcome, PacketEvent, PacketListener, TimerKind,
};
use crate::message::{
    ArpMessage, Frame, FramePayload, HsrpMessage, HsrpOp, HsrpState, MacAddress, Packet, PacketPayload,
};
use crate::simulator::{Duration, TimerHandle, VirtualTime};
use std::any::Any;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// All-routers group that hellos are sent to.
pub const HSRP_GROUP_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

type GroupKey = (InterfaceId, u8);

#[derive(Debug, Clone, Copy)]
struct Peer {
    priority: u8,
    state: HsrpState,
    last_heard: VirtualTime,
}

#[derive(Debug)]
struct HsrpGroup {
    vip: Option<Ipv4Addr>,
    priority: u8,
    preempt: bool,
    hello_secs: u8,
    hold_secs: u8,
    state: HsrpState,
    peers: BTreeMap<Ipv4Addr, Peer>,
    hello_timer: Option<TimerHandle>,
    active_timer: Option<TimerHandle>,
    standby_timer: Option<TimerHandle>,
}

impl HsrpGroup {
    fn new(config: &HsrpConfig) -> Self {
        HsrpGroup {
            vip: None,
            priority: config.priority,
            preempt: false,
            hello_secs: config.hello_secs,
            hold_secs: config.hold_secs,
            state: HsrpState::Initial,
            peers: BTreeMap::new(),
            hello_timer: None,
            active_timer: None,
            standby_timer: None,
        }
    }

    fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs as u64)
    }

    fn fresh_peers(&self, now: VirtualTime) -> impl Iterator<Item = (Ipv4Addr, &Peer)> + '_ {
        let hold = self.hold();
        self.peers
            .iter()
            .filter(move |(_, p)| now.since(p.last_heard) < hold)
            .map(|(ip, p)| (*ip, p))
    }

    fn fresh_in(&self, now: VirtualTime, state: HsrpState) -> Option<Ipv4Addr> {
        self.fresh_peers(now)
            .filter(|(_, p)| p.state == state)
            .max_by_key(|(ip, p)| (p.priority, *ip))
            .map(|(ip, _)| ip)
    }

    fn cancel(slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            handle.cancel();
        }
    }

    fn cancel_all(&mut self) {
        Self::cancel(&mut self.hello_timer);
        Self::cancel(&mut self.active_timer);
        Self::cancel(&mut self.standby_timer);
    }
}

/// Snapshot of one group for `show standby`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsrpGroupStatus {
    pub iface: InterfaceId,
    pub group: u8,
    pub vip: Option<Ipv4Addr>,
    pub virtual_mac: MacAddress,
    pub local_ip: Option<Ipv4Addr>,
    pub priority: u8,
    pub preempt: bool,
    pub hello_secs: u8,
    pub hold_secs: u8,
    pub state: HsrpState,
    /// `None` when unknown; the local address when this router holds the role.
    pub active: Option<Ipv4Addr>,
    pub standby: Option<Ipv4Addr>,
}

pub struct HsrpService {
    defaults: HsrpConfig,
    groups: BTreeMap<GroupKey, HsrpGroup>,
}

impl HsrpService {
    pub fn new(config: &HsrpConfig) -> Self {
        HsrpService {
            defaults: config.clone(),
            groups: BTreeMap::new(),
        }
    }

    pub fn state(&self, iface: InterfaceId, group: u8) -> Option<HsrpState> {
        self.groups.get(&(iface, group)).map(|g| g.state)
    }

    pub fn groups(&self, ctx_now: VirtualTime, local_ip: impl Fn(InterfaceId) -> Option<Ipv4Addr>) -> Vec<HsrpGroupStatus> {
        self.groups
            .iter()
            .map(|(&(iface, number), g)| {
                let local = local_ip(iface);
                let role = |state| {
                    if g.state == state {
                        local
                    } else {
                        g.fresh_in(ctx_now, state)
                    }
                };
                HsrpGroupStatus {
                    iface,
                    group: number,
                    vip: g.vip,
                    virtual_mac: MacAddress::hsrp_virtual(number),
                    local_ip: local,
                    priority: g.priority,
                    preempt: g.preempt,
                    hello_secs: g.hello_secs,
                    hold_secs: g.hold_secs,
                    state: g.state,
                    active: role(HsrpState::Active),
                    standby: role(HsrpState::Standby),
                }
            })
            .collect()
    }

    fn group_mut(&mut self, iface: InterfaceId, group: u8) -> &mut HsrpGroup {
        let defaults = &self.defaults;
        self.groups
            .entry((iface, group))
            .or_insert_with(|| HsrpGroup::new(defaults))
    }

    /// `standby <g> ip <vip>`; `None` clears the address and stops the group.
    pub fn set_virtual_ip(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, group: u8, vip: Option<Ipv4Addr>) {
        self.stop(ctx, (iface, group));
        self.group_mut(iface, group).vip = vip;
        self.start(ctx, (iface, group));
    }

    pub fn set_priority(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, group: u8, priority: u8) {
        self.group_mut(iface, group).priority = priority;
        match self.state(iface, group) {
            Some(HsrpState::Initial) => self.start(ctx, (iface, group)),
            Some(HsrpState::Speak | HsrpState::Standby | HsrpState::Active) => {
                self.send(ctx, (iface, group), HsrpOp::Hello)
            }
            _ => {}
        }
    }

    pub fn set_preempt(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, group: u8, preempt: bool) {
        self.group_mut(iface, group).preempt = preempt;
        self.start(ctx, (iface, group));
    }

    pub fn set_timers(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, group: u8, hello_secs: u8, hold_secs: u8) {
        let key = (iface, group);
        let g = self.group_mut(iface, group);
        g.hello_secs = hello_secs.max(1);
        g.hold_secs = hold_secs.max(g.hello_secs + 1);
        if g.hello_timer.is_some() {
            HsrpGroup::cancel(&mut g.hello_timer);
            let period = Duration::from_secs(g.hello_secs as u64);
            g.hello_timer = Some(ctx.repeat(period, TimerKind::HsrpHello(iface, group), None));
        }
        self.start(ctx, key);
    }

    /// `no standby <g>`: resign if Active and forget the group.
    pub fn remove_group(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, group: u8) -> bool {
        self.stop(ctx, (iface, group));
        self.groups.remove(&(iface, group)).is_some()
    }

    fn local_ip(ctx: &NodeContext<'_>, iface: InterfaceId) -> Option<Ipv4Addr> {
        ctx.interfaces()
            .get(iface)
            .filter(|i| i.is_up())
            .and_then(|i| i.address())
            .map(|a| a.address)
    }

    /// Leave Initial once the interface is up and addressed.
    fn start(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey) {
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        if g.state != HsrpState::Initial || Self::local_ip(ctx, key.0).is_none() {
            return;
        }
        let period = Duration::from_secs(g.hello_secs as u64);
        g.hello_timer = Some(ctx.repeat(period, TimerKind::HsrpHello(key.0, key.1), None));
        let next = if g.vip.is_some() {
            HsrpState::Listen
        } else {
            HsrpState::Learn
        };
        self.transition(ctx, key, next);
    }

    /// Back to Initial, resigning first when Active and still able to send.
    fn stop(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey) {
        let Some(state) = self.state(key.0, key.1) else {
            return;
        };
        if state == HsrpState::Active {
            self.send(ctx, key, HsrpOp::Resign);
        }
        if let Some(g) = self.groups.get_mut(&key) {
            g.cancel_all();
            g.peers.clear();
        }
        self.transition(ctx, key, HsrpState::Initial);
    }

    fn transition(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey, next: HsrpState) {
        let (iface, number) = key;
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        let previous = g.state;
        g.state = next;
        let hold = g.hold();
        match next {
            HsrpState::Initial | HsrpState::Learn => {
                HsrpGroup::cancel(&mut g.active_timer);
                HsrpGroup::cancel(&mut g.standby_timer);
            }
            HsrpState::Listen => {
                HsrpGroup::cancel(&mut g.active_timer);
                HsrpGroup::cancel(&mut g.standby_timer);
                g.active_timer = Some(ctx.schedule(hold, TimerKind::HsrpActive(iface, number)));
                g.standby_timer = Some(ctx.schedule(hold, TimerKind::HsrpStandby(iface, number)));
            }
            HsrpState::Speak => {
                HsrpGroup::cancel(&mut g.active_timer);
                HsrpGroup::cancel(&mut g.standby_timer);
                g.standby_timer = Some(ctx.schedule(hold, TimerKind::HsrpStandby(iface, number)));
            }
            HsrpState::Standby => {
                HsrpGroup::cancel(&mut g.active_timer);
                HsrpGroup::cancel(&mut g.standby_timer);
                g.active_timer = Some(ctx.schedule(hold, TimerKind::HsrpActive(iface, number)));
            }
            HsrpState::Active => {
                HsrpGroup::cancel(&mut g.active_timer);
                HsrpGroup::cancel(&mut g.standby_timer);
            }
        }
        let vip = g.vip;

        if previous == HsrpState::Active && next != HsrpState::Active {
            if let Some(network) = ctx.interface_mut(iface).ok().and_then(|i| i.network_mut()) {
                network.virtual_addresses.retain(|v| v.group != number);
            }
        }
        if next == HsrpState::Active && previous != HsrpState::Active {
            if let Some(vip) = vip {
                let mac = MacAddress::hsrp_virtual(number);
                if let Some(network) = ctx.interface_mut(iface).ok().and_then(|i| i.network_mut()) {
                    network.virtual_addresses.retain(|v| v.group != number);
                    network.virtual_addresses.push(VirtualAddress { ip: vip, mac, group: number });
                }
                let arp = ArpMessage::gratuitous(mac, vip);
                ctx.send_frame(iface, Frame::new(mac, MacAddress::BROADCAST, FramePayload::Arp(arp)));
            }
        }
        if previous != next {
            info!(node = ctx.node().0, iface = iface.0, group = number, from = %previous, to = %next, "HSRP state change");
            ctx.emit(EngineEventKind::HsrpStateChanged {
                iface,
                group: number,
                state: next,
            });
        }
        if matches!(next, HsrpState::Speak | HsrpState::Standby | HsrpState::Active) && previous != next {
            self.send(ctx, key, HsrpOp::Hello);
        }
    }

    fn send(&self, ctx: &mut NodeContext<'_>, key: GroupKey, op: HsrpOp) {
        let (iface, number) = key;
        let Some(g) = self.groups.get(&key) else {
            return;
        };
        let Some(source) = Self::local_ip(ctx, iface) else {
            return;
        };
        let message = HsrpMessage {
            op,
            state: g.state,
            hello_secs: g.hello_secs,
            hold_secs: g.hold_secs,
            priority: g.priority,
            group: number,
            virtual_ip: g.vip,
        };
        let packet = Packet::new(source, HSRP_GROUP_ADDRESS, PacketPayload::Hsrp(message)).with_ttl(1);
        let src_mac = (g.state == HsrpState::Active).then(|| MacAddress::hsrp_virtual(number));
        ctx.send_packet_via(packet, iface, src_mac);
    }

    /// Election run when a speak window closes.
    fn elect(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey) {
        let Some(local) = Self::local_ip(ctx, key.0) else {
            return;
        };
        let now = ctx.now();
        let Some(g) = self.groups.get(&key) else {
            return;
        };
        let active_present = g.fresh_in(now, HsrpState::Active).is_some();
        let mut ranks: Vec<(u8, Ipv4Addr)> = g
            .fresh_peers(now)
            .filter(|(_, p)| matches!(p.state, HsrpState::Speak | HsrpState::Standby))
            .map(|(ip, p)| (p.priority, ip))
            .collect();
        ranks.push((g.priority, local));
        ranks.sort_unstable_by(|a, b| b.cmp(a));
        let position = ranks.iter().position(|r| *r == (g.priority, local)).unwrap_or(usize::MAX);
        let next = match (active_present, position) {
            (false, 0) => HsrpState::Active,
            (false, 1) | (true, 0) => HsrpState::Standby,
            _ => HsrpState::Listen,
        };
        debug!(node = ctx.node().0, group = key.1, candidates = ranks.len(), ?next, "HSRP election");
        self.transition(ctx, key, next);
    }

    fn receive(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, from: Ipv4Addr, message: &HsrpMessage) {
        let key = (iface, message.group);
        let Some(local) = Self::local_ip(ctx, iface) else {
            return;
        };
        if from == local {
            return;
        }
        let now = ctx.now();
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        if g.state == HsrpState::Initial {
            return;
        }
        g.peers.insert(
            from,
            Peer {
                priority: message.priority,
                state: message.state,
                last_heard: now,
            },
        );
        if g.vip.is_none() {
            if let Some(vip) = message.virtual_ip {
                g.vip = Some(vip);
                if g.state == HsrpState::Learn {
                    self.transition(ctx, key, HsrpState::Listen);
                }
            }
        }
        let Some(g) = self.groups.get_mut(&key) else {
            return;
        };
        let superior = (message.priority, from) > (g.priority, local);
        let (state, preempt, hold) = (g.state, g.preempt, g.hold());

        match message.op {
            HsrpOp::Coup => {
                if state == HsrpState::Active && superior {
                    self.transition(ctx, key, HsrpState::Speak);
                }
            }
            HsrpOp::Resign => {
                if let Some(peer) = g.peers.get_mut(&from) {
                    peer.state = HsrpState::Speak;
                }
                if state == HsrpState::Standby {
                    self.transition(ctx, key, HsrpState::Active);
                }
            }
            HsrpOp::Hello => match message.state {
                HsrpState::Active => {
                    if state == HsrpState::Active {
                        if superior {
                            self.transition(ctx, key, HsrpState::Speak);
                        } else {
                            self.send(ctx, key, HsrpOp::Hello);
                        }
                    } else if !superior && preempt && matches!(state, HsrpState::Listen | HsrpState::Speak | HsrpState::Standby) {
                        self.send(ctx, key, HsrpOp::Coup);
                        self.transition(ctx, key, HsrpState::Active);
                    } else if matches!(state, HsrpState::Listen | HsrpState::Standby) {
                        HsrpGroup::cancel(&mut g.active_timer);
                        g.active_timer = Some(ctx.schedule(hold, TimerKind::HsrpActive(iface, message.group)));
                    }
                }
                HsrpState::Standby | HsrpState::Speak => {
                    if state == HsrpState::Active && superior && preempt {
                        self.send(ctx, key, HsrpOp::Resign);
                        self.transition(ctx, key, HsrpState::Speak);
                    } else if state == HsrpState::Standby && superior && message.state == HsrpState::Standby {
                        self.transition(ctx, key, HsrpState::Listen);
                    } else if state == HsrpState::Listen && message.state == HsrpState::Standby {
                        if !superior && preempt {
                            self.transition(ctx, key, HsrpState::Speak);
                        } else {
                            HsrpGroup::cancel(&mut g.standby_timer);
                            g.standby_timer = Some(ctx.schedule(hold, TimerKind::HsrpStandby(iface, message.group)));
                        }
                    }
                }
                _ => {}
            },
        }
    }

    fn on_active_timer(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey) {
        match self.state(key.0, key.1) {
            Some(HsrpState::Listen) => self.transition(ctx, key, HsrpState::Speak),
            Some(HsrpState::Standby) => self.transition(ctx, key, HsrpState::Active),
            _ => {}
        }
    }

    fn on_standby_timer(&mut self, ctx: &mut NodeContext<'_>, key: GroupKey) {
        let now = ctx.now();
        match self.state(key.0, key.1) {
            Some(HsrpState::Speak) => self.elect(ctx, key),
            Some(HsrpState::Listen) => {
                let Some(g) = self.groups.get_mut(&key) else {
                    return;
                };
                if g.fresh_in(now, HsrpState::Standby).is_none() {
                    self.transition(ctx, key, HsrpState::Speak);
                } else {
                    let hold = g.hold();
                    g.standby_timer = Some(ctx.schedule(hold, TimerKind::HsrpStandby(key.0, key.1)));
                }
            }
            _ => {}
        }
    }

    fn keys_on(&self, iface: InterfaceId) -> Vec<GroupKey> {
        self.groups.keys().filter(|(i, _)| *i == iface).copied().collect()
    }
}

impl PacketListener for HsrpService {
    fn on_packet(&mut self, ctx: &mut NodeContext<'_>, event: PacketEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive {
            return Outcome::Continue;
        }
        let (PacketPayload::Hsrp(message), Some(iface)) = (event.packet.payload(), event.iface) else {
            return Outcome::Continue;
        };
        self.receive(ctx, iface, event.packet.src(), message);
        Outcome::Handled
    }
}

impl LifecycleListener for HsrpService {
    fn on_lifecycle(&mut self, ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome {
        match event {
            LifecycleEvent::InterfaceUp(iface) | LifecycleEvent::AddressChanged(iface) => {
                for key in self.keys_on(iface) {
                    if Self::local_ip(ctx, iface).is_none() {
                        self.stop(ctx, key);
                    } else {
                        self.start(ctx, key);
                    }
                }
            }
            LifecycleEvent::InterfaceDown(iface) | LifecycleEvent::LinkDetached(iface) => {
                for key in self.keys_on(iface) {
                    self.stop(ctx, key);
                    if event == LifecycleEvent::LinkDetached(iface) {
                        self.start(ctx, key);
                    }
                }
            }
            LifecycleEvent::InterfaceRemoved(iface) => {
                for key in self.keys_on(iface) {
                    if let Some(mut g) = self.groups.remove(&key) {
                        g.cancel_all();
                    }
                }
            }
            _ => {}
        }
        Outcome::Continue
    }
}

impl Listener for HsrpService {
    fn name(&self) -> &'static str {
        "hsrp"
    }

    fn as_packets(&mut self) -> Option<&mut dyn PacketListener> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn LifecycleListener> {
        Some(self)
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerKind) {
        match timer {
            TimerKind::HsrpHello(iface, group) => {
                if matches!(
                    self.state(iface, group),
                    Some(HsrpState::Speak | HsrpState::Standby | HsrpState::Active)
                ) {
                    self.send(ctx, (iface, group), HsrpOp::Hello);
                }
            }
            TimerKind::HsrpActive(iface, group) => self.on_active_timer(ctx, (iface, group)),
            TimerKind::HsrpStandby(iface, group) => self.on_standby_timer(ctx, (iface, group)),
            _ => {}
        }
    }

    fn shutdown(&mut self) {
        for g in self.groups.values_mut() {
            g.cancel_all();
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
    fn test_fresh_peers_respect_hold_time() {
        let mut g = HsrpGroup::new(&HsrpConfig::default());
        let a = Ipv4Addr::new(10, 0, 0, 2);
        let b = Ipv4Addr::new(10, 0, 0, 3);
        g.peers.insert(a, Peer { priority: 100, state: HsrpState::Active, last_heard: VirtualTime::ZERO });
        g.peers.insert(b, Peer { priority: 90, state: HsrpState::Standby, last_heard: VirtualTime::from_secs(5) });
        assert_eq!(g.fresh_in(VirtualTime::from_secs(9), HsrpState::Active), Some(a));
        assert_eq!(g.fresh_in(VirtualTime::from_secs(10), HsrpState::Active), None);
        assert_eq!(g.fresh_in(VirtualTime::from_secs(10), HsrpState::Standby), Some(b));
    }

    #[test]
    fn test_equal_priority_election_goes_to_higher_address() {
        use crate::config::SimulationConfig;
        use crate::device::DeviceType;
        use crate::shell::Shell;
        use crate::simulator::Simulation;

        // The higher address sits on the router added first.
        let mut sim = Simulation::stepped(SimulationConfig::test());
        let high = sim.add_node("R1", DeviceType::Router).unwrap();
        let low = sim.add_node("R2", DeviceType::Router).unwrap();
        sim.connect_by_name(("R1", "Gi0/0"), ("R2", "Gi0/0"), 10.0).unwrap();
        for (node, address) in [(high, "10.0.0.9"), (low, "10.0.0.4")] {
            let ip = format!("ip address {} 255.255.255.0", address);
            let mut shell = Shell::new(&sim, node).unwrap();
            let lines = ["enable", "configure terminal", "interface Gi0/0", ip.as_str(), "standby 3 ip 10.0.0.1"];
            shell.exec_script(&mut sim, lines).unwrap();
        }
        sim.advance(Duration::from_secs(40));

        let state = |node| sim.service::<HsrpService>(node).unwrap().state(InterfaceId(0), 3);
        assert_eq!(state(high), Some(HsrpState::Active));
        assert_eq!(state(low), Some(HsrpState::Standby));
    }
}
