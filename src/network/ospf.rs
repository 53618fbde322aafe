//! OSPF adjacency bookkeeping without route computation.
//!
//! Hellos go out on every interface a `network` statement matches. A
//! neighbour moves Down to Init on its first hello and to 2-Way once it lists
//! our router id, then climbs one state per hello interval until Full. A
//! neighbour silent for the dead interval is removed.

use crate::config::OspfConfig;
use crate::device::{InterfaceId, NodeContext};
use crate::events::EngineEventKind;
use crate::handler::{
    Direction, LifecycleEvent, LifecycleListener, Listener, Outcome, PacketEvent, PacketListener, TimerKind,
};
use crate::message::{wildcard_match, OspfHello, Packet, PacketPayload};
use crate::simulator::{Duration, TimerHandle, VirtualTime};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// AllSPFRouters.
pub const OSPF_GROUP_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NeighborState {
    Down,
    Init,
    TwoWay,
    ExStart,
    Exchange,
    Loading,
    Full,
}

impl NeighborState {
    fn next(self) -> NeighborState {
        match self {
            NeighborState::Down => NeighborState::Init,
            NeighborState::Init => NeighborState::TwoWay,
            NeighborState::TwoWay => NeighborState::ExStart,
            NeighborState::ExStart => NeighborState::Exchange,
            NeighborState::Exchange => NeighborState::Loading,
            NeighborState::Loading | NeighborState::Full => NeighborState::Full,
        }
    }
}

impl fmt::Display for NeighborState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NeighborState::Down => "DOWN",
            NeighborState::Init => "INIT",
            NeighborState::TwoWay => "2WAY",
            NeighborState::ExStart => "EXSTART",
            NeighborState::Exchange => "EXCHANGE",
            NeighborState::Loading => "LOADING",
            NeighborState::Full => "FULL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatement {
    pub network: Ipv4Addr,
    pub wildcard: Ipv4Addr,
    pub area: u32,
}

impl NetworkStatement {
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        wildcard_match(self.network, self.wildcard, addr)
    }
}

#[derive(Debug)]
struct Neighbor {
    address: Ipv4Addr,
    iface: InterfaceId,
    state: NeighborState,
    dead_at: VirtualTime,
    dead_timer: TimerHandle,
}

/// One row of `show ip ospf neighbor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSummary {
    pub router_id: Ipv4Addr,
    pub state: NeighborState,
    pub dead_in: Duration,
    pub address: Ipv4Addr,
    pub iface: InterfaceId,
}

#[derive(Debug)]
struct OspfProcess {
    pid: u16,
    router_id: Option<Ipv4Addr>,
    networks: Vec<NetworkStatement>,
    neighbors: BTreeMap<Ipv4Addr, Neighbor>,
    hello_timer: TimerHandle,
}

pub struct OspfService {
    hello_secs: u16,
    dead_secs: u32,
    process: Option<OspfProcess>,
}

impl OspfService {
    pub fn new(config: &OspfConfig) -> Self {
        OspfService {
            hello_secs: config.hello_secs.max(1),
            dead_secs: config.dead_secs.max(1),
            process: None,
        }
    }

    pub fn process_id(&self) -> Option<u16> {
        self.process.as_ref().map(|p| p.pid)
    }

    pub fn configured_router_id(&self) -> Option<Ipv4Addr> {
        self.process.as_ref().and_then(|p| p.router_id)
    }

    pub fn networks(&self) -> &[NetworkStatement] {
        self.process.as_ref().map_or(&[], |p| p.networks.as_slice())
    }

    /// Configured router id, else the highest address on an up interface.
    pub fn router_id(&self, ctx: &NodeContext<'_>) -> Option<Ipv4Addr> {
        self.configured_router_id().or_else(|| {
            ctx.interfaces()
                .iter()
                .filter(|(_, i)| i.is_up())
                .filter_map(|(_, i)| i.address().map(|a| a.address))
                .max()
        })
    }

    pub fn neighbors(&self, now: VirtualTime) -> Vec<NeighborSummary> {
        let Some(process) = &self.process else {
            return Vec::new();
        };
        process
            .neighbors
            .iter()
            .map(|(router_id, n)| NeighborSummary {
                router_id: *router_id,
                state: n.state,
                dead_in: n.dead_at.since(now),
                address: n.address,
                iface: n.iface,
            })
            .collect()
    }

    pub fn neighbor_state(&self, router_id: Ipv4Addr) -> Option<NeighborState> {
        self.process
            .as_ref()
            .and_then(|p| p.neighbors.get(&router_id))
            .map(|n| n.state)
    }

    /// `router ospf <pid>`. Only one process runs; a different pid is refused.
    pub fn start_process(&mut self, ctx: &mut NodeContext<'_>, pid: u16) -> bool {
        match &self.process {
            Some(p) => p.pid == pid,
            None => {
                let period = Duration::from_secs(self.hello_secs as u64);
                let hello_timer = ctx.repeat(period, TimerKind::Hello, None);
                self.process = Some(OspfProcess {
                    pid,
                    router_id: None,
                    networks: Vec::new(),
                    neighbors: BTreeMap::new(),
                    hello_timer,
                });
                info!(node = ctx.node().0, pid, "OSPF process started");
                true
            }
        }
    }

    /// `no router ospf <pid>`.
    pub fn stop_process(&mut self, ctx: &mut NodeContext<'_>, pid: u16) -> bool {
        if self.process_id() != Some(pid) {
            return false;
        }
        if let Some(process) = self.process.take() {
            process.hello_timer.cancel();
            for (router_id, n) in process.neighbors {
                n.dead_timer.cancel();
                ctx.emit(EngineEventKind::OspfNeighborChanged {
                    neighbor: router_id,
                    state: NeighborState::Down,
                });
            }
        }
        true
    }

    pub fn set_router_id(&mut self, router_id: Option<Ipv4Addr>) {
        if let Some(process) = self.process.as_mut() {
            process.router_id = router_id;
        }
    }

    pub fn add_network(&mut self, statement: NetworkStatement) {
        if let Some(process) = self.process.as_mut() {
            process.networks.retain(|n| !(n.network == statement.network && n.wildcard == statement.wildcard));
            process.networks.push(statement);
        }
    }

    pub fn remove_network(&mut self, network: Ipv4Addr, wildcard: Ipv4Addr) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        let before = process.networks.len();
        process.networks.retain(|n| !(n.network == network && n.wildcard == wildcard));
        process.networks.len() != before
    }

    /// Area an interface's address falls in, if any statement covers it.
    fn area_of(&self, ctx: &NodeContext<'_>, iface: InterfaceId) -> Option<u32> {
        let process = self.process.as_ref()?;
        let interface = ctx.interfaces().get(iface).filter(|i| i.is_up())?;
        let addr = interface.address()?.address;
        process.networks.iter().find(|n| n.matches(addr)).map(|n| n.area)
    }

    fn set_neighbor_state(ctx: &NodeContext<'_>, router_id: Ipv4Addr, neighbor: &mut Neighbor, state: NeighborState) {
        if neighbor.state == state {
            return;
        }
        debug!(node = ctx.node().0, %router_id, from = %neighbor.state, to = %state, "OSPF neighbor state");
        if state == NeighborState::Full {
            info!(node = ctx.node().0, %router_id, "OSPF adjacency full");
        }
        neighbor.state = state;
        ctx.emit(EngineEventKind::OspfNeighborChanged {
            neighbor: router_id,
            state,
        });
    }

    fn send_hellos(&mut self, ctx: &mut NodeContext<'_>) {
        let Some(router_id) = self.router_id(ctx) else {
            return;
        };
        let Some(process) = &self.process else {
            return;
        };
        for iface in ctx.interfaces().ids() {
            let Some(area) = self.area_of(ctx, iface) else {
                continue;
            };
            let Some(source) = ctx.interfaces().get(iface).and_then(|i| i.address()) else {
                continue;
            };
            let hello = OspfHello {
                router_id,
                area,
                hello_interval: self.hello_secs,
                dead_interval: self.dead_secs,
                neighbors: process
                    .neighbors
                    .iter()
                    .filter(|(_, n)| n.iface == iface)
                    .map(|(id, _)| *id)
                    .collect(),
            };
            let packet = Packet::new(source.address, OSPF_GROUP_ADDRESS, PacketPayload::Ospf(hello)).with_ttl(1);
            ctx.send_packet_via(packet, iface, None);
        }
    }

    /// Neighbours past 2-Way climb one state per hello interval.
    fn progress_adjacencies(&mut self, ctx: &mut NodeContext<'_>) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        for (router_id, neighbor) in process.neighbors.iter_mut() {
            if neighbor.state >= NeighborState::TwoWay && neighbor.state < NeighborState::Full {
                let next = neighbor.state.next();
                Self::set_neighbor_state(ctx, *router_id, neighbor, next);
            }
        }
    }

    fn receive(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, src: Ipv4Addr, hello: &OspfHello) {
        let Some(area) = self.area_of(ctx, iface) else {
            return;
        };
        let Some(own_id) = self.router_id(ctx) else {
            return;
        };
        if hello.router_id == own_id {
            return;
        }
        if hello.area != area || hello.hello_interval != self.hello_secs || hello.dead_interval != self.dead_secs {
            debug!(node = ctx.node().0, neighbor = %hello.router_id, "OSPF hello parameters mismatch, ignored");
            return;
        }
        let dead = Duration::from_secs(self.dead_secs as u64);
        let dead_at = ctx.now() + dead;
        let Some(process) = self.process.as_mut() else {
            return;
        };
        let dead_timer = ctx.schedule(dead, TimerKind::OspfDead(hello.router_id));
        let previous = process.neighbors.remove(&hello.router_id);
        if let Some(old) = &previous {
            old.dead_timer.cancel();
        }
        let state = previous.map_or(NeighborState::Down, |n| n.state);
        let neighbor = process.neighbors.entry(hello.router_id).or_insert(Neighbor {
            address: src,
            iface,
            state,
            dead_at,
            dead_timer,
        });
        let sees_us = hello.neighbors.contains(&own_id);
        let target = match (sees_us, neighbor.state) {
            (false, _) => NeighborState::Init,
            (true, state) if state < NeighborState::TwoWay => NeighborState::TwoWay,
            (true, state) => state,
        };
        Self::set_neighbor_state(ctx, hello.router_id, neighbor, target);
    }
}

impl PacketListener for OspfService {
    fn on_packet(&mut self, ctx: &mut NodeContext<'_>, event: PacketEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive {
            return Outcome::Continue;
        }
        let (PacketPayload::Ospf(hello), Some(iface)) = (event.packet.payload(), event.iface) else {
            return Outcome::Continue;
        };
        self.receive(ctx, iface, event.packet.src(), hello);
        Outcome::Handled
    }
}

impl LifecycleListener for OspfService {
    fn on_lifecycle(&mut self, ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome {
        if let LifecycleEvent::InterfaceDown(iface)
        | LifecycleEvent::LinkDetached(iface)
        | LifecycleEvent::InterfaceRemoved(iface) = event
        {
            if let Some(process) = self.process.as_mut() {
                let lost: Vec<Ipv4Addr> = process
                    .neighbors
                    .iter()
                    .filter(|(_, n)| n.iface == iface)
                    .map(|(id, _)| *id)
                    .collect();
                for router_id in lost {
                    if let Some(n) = process.neighbors.remove(&router_id) {
                        n.dead_timer.cancel();
                        ctx.emit(EngineEventKind::OspfNeighborChanged {
                            neighbor: router_id,
                            state: NeighborState::Down,
                        });
                    }
                }
            }
        }
        Outcome::Continue
    }
}

impl Listener for OspfService {
    fn name(&self) -> &'static str {
        "ospf"
    }

    fn as_packets(&mut self) -> Option<&mut dyn PacketListener> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn LifecycleListener> {
        Some(self)
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerKind) {
        match timer {
            TimerKind::Hello => {
                self.progress_adjacencies(ctx);
                self.send_hellos(ctx);
            }
            TimerKind::OspfDead(router_id) => {
                if let Some(process) = self.process.as_mut() {
                    if process.neighbors.remove(&router_id).is_some() {
                        info!(node = ctx.node().0, %router_id, "OSPF neighbor dead");
                        ctx.emit(EngineEventKind::OspfNeighborChanged {
                            neighbor: router_id,
                            state: NeighborState::Down,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(process) = self.process.take() {
            process.hello_timer.cancel();
            for n in process.neighbors.values() {
                n.dead_timer.cancel();
            }
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
    fn test_state_ladder_ends_at_full() {
        let mut state = NeighborState::Down;
        let mut seen = vec![state];
        while state != NeighborState::Full {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(NeighborState::Full.next(), NeighborState::Full);
        assert_eq!(NeighborState::TwoWay.to_string(), "2WAY");
    }

    #[test]
    fn test_network_statement_wildcard() {
        let stmt = NetworkStatement {
            network: Ipv4Addr::new(10, 0, 0, 0),
            wildcard: Ipv4Addr::new(0, 0, 0, 255),
            area: 0,
        };
        assert!(stmt.matches(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(!stmt.matches(Ipv4Addr::new(10, 0, 1, 7)));
    }
}
