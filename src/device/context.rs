//! The view of the simulation a listener gets while it runs.
//!
//! Listeners never touch other nodes or the link layer directly. Anything
//! they send is queued as an `Action` and carried out by the engine once the
//! current dispatch returns, so a listener can never re-enter its own node's
//! handler chain.

use super::{DeviceType, Interface, InterfaceId, InterfaceTable, NodeId};
use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::events::{EngineEventKind, EventSink};
use crate::handler::{ListenerId, TimerKind};
use crate::message::{Frame, MacAddress, Packet};
use crate::network::RoutingTable;
use crate::simulator::{DeterministicRng, Duration, Scheduler, Simulation, TimerHandle, VirtualTime};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub enum Action {
    /// Transmit a frame out of an interface (Frame send chain, then link).
    SendFrame { iface: InterfaceId, frame: Frame },
    /// Route, resolve and transmit a packet. `via` picks the egress for
    /// multicast and limited broadcast; `src_mac` overrides the frame source.
    SendPacket {
        packet: Packet,
        via: Option<InterfaceId>,
        src_mac: Option<MacAddress>,
    },
    /// Hand a packet addressed to this node to its own receive path.
    DeliverLocal { packet: Packet },
    /// Tell the sender of an undeliverable packet its destination is
    /// unreachable.
    ReportUnreachable { packet: Packet },
}

#[derive(Debug)]
pub(crate) struct PendingAction {
    pub node: NodeId,
    pub origin: Option<ListenerId>,
    pub action: Action,
}

pub struct NodeContext<'a> {
    node: NodeId,
    device_type: DeviceType,
    interfaces: &'a mut InterfaceTable,
    routing: &'a RoutingTable,
    scheduler: &'a mut Scheduler<Simulation>,
    outbox: &'a mut VecDeque<PendingAction>,
    events: &'a EventSink,
    config: &'a SimulationConfig,
    rng: &'a mut DeterministicRng,
    listener: ListenerId,
}

impl<'a> NodeContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node: NodeId,
        device_type: DeviceType,
        interfaces: &'a mut InterfaceTable,
        routing: &'a RoutingTable,
        scheduler: &'a mut Scheduler<Simulation>,
        outbox: &'a mut VecDeque<PendingAction>,
        events: &'a EventSink,
        config: &'a SimulationConfig,
        rng: &'a mut DeterministicRng,
    ) -> Self {
        NodeContext {
            node,
            device_type,
            interfaces,
            routing,
            scheduler,
            outbox,
            events,
            config,
            rng,
            listener: ListenerId::ENGINE,
        }
    }

    pub(crate) fn set_listener(&mut self, listener: ListenerId) {
        self.listener = listener;
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn now(&self) -> VirtualTime {
        self.scheduler.now()
    }

    pub fn config(&self) -> &SimulationConfig {
        self.config
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut *self.rng
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &*self.interfaces
    }

    pub fn interfaces_mut(&mut self) -> &mut InterfaceTable {
        &mut *self.interfaces
    }

    pub fn interface(&self, iface: InterfaceId) -> Result<&Interface, SimError> {
        self.interfaces.get(iface).ok_or(SimError::UnknownInterface {
            node: self.node,
            iface,
        })
    }

    pub fn interface_mut(&mut self, iface: InterfaceId) -> Result<&mut Interface, SimError> {
        let node = self.node;
        self.interfaces
            .get_mut(iface)
            .ok_or(SimError::UnknownInterface { node, iface })
    }

    pub fn routing(&self) -> &RoutingTable {
        self.routing
    }

    /// Arm a one-shot timer that comes back to this listener's `on_timer`.
    pub fn schedule(&mut self, delay: Duration, timer: TimerKind) -> TimerHandle {
        let (node, listener) = (self.node, self.listener);
        self.scheduler
            .once(delay, move |sim: &mut Simulation| sim.fire_timer(node, listener, timer))
    }

    /// Arm a repeating timer for this listener.
    pub fn repeat(&mut self, period: Duration, timer: TimerKind, first_delay: Option<Duration>) -> TimerHandle {
        let (node, listener) = (self.node, self.listener);
        self.scheduler.repeat(
            period,
            move |sim: &mut Simulation| sim.fire_timer(node, listener, timer),
            first_delay,
        )
    }

    fn push(&mut self, action: Action) {
        let origin = (self.listener != ListenerId::ENGINE).then_some(self.listener);
        self.outbox.push_back(PendingAction {
            node: self.node,
            origin,
            action,
        });
    }

    pub fn send_frame(&mut self, iface: InterfaceId, frame: Frame) {
        self.push(Action::SendFrame { iface, frame });
    }

    pub fn send_packet(&mut self, packet: Packet) {
        self.push(Action::SendPacket {
            packet,
            via: None,
            src_mac: None,
        });
    }

    pub fn send_packet_via(&mut self, packet: Packet, via: InterfaceId, src_mac: Option<MacAddress>) {
        self.push(Action::SendPacket {
            packet,
            via: Some(via),
            src_mac,
        });
    }

    pub fn report_unreachable(&mut self, packet: Packet) {
        self.push(Action::ReportUnreachable { packet });
    }

    pub fn emit(&self, kind: EngineEventKind) {
        self.events.emit(self.scheduler.now(), Some(self.node), kind);
    }
}
