//! Engine events for observers such as a renderer or animation layer.
//!
//! Events are broadcast; the engine never waits on observers and a slow
//! receiver only lags (tokio broadcast semantics), it never stalls delivery.

use crate::device::{InterfaceId, LinkId, NodeId, PortRef, PortState};
use crate::message::{HsrpState, Ipv4Interface};
use crate::network::NeighborState;
use crate::simulator::{SpeedMode, VirtualTime};
use std::net::Ipv4Addr;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    NodeAdded { name: String },
    NodeRemoved,
    NodeRenamed { name: String },
    InterfaceAdded { iface: InterfaceId, name: String },
    InterfaceRemoved { iface: InterfaceId },
    InterfaceStateChanged { iface: InterfaceId, up: bool },
    AddressChanged { iface: InterfaceId, address: Option<Ipv4Interface> },
    LinkAdded { link: LinkId, a: PortRef, b: PortRef },
    LinkRemoved { link: LinkId },
    FrameSent {
        iface: InterfaceId,
        link: LinkId,
        bytes: usize,
        protocol: &'static str,
        arrival: VirtualTime,
    },
    FrameReceived {
        iface: InterfaceId,
        link: LinkId,
        bytes: usize,
        protocol: &'static str,
    },
    PacketSent { src: Ipv4Addr, dst: Ipv4Addr, protocol: &'static str },
    PacketReceived { src: Ipv4Addr, dst: Ipv4Addr, protocol: &'static str },
    PortStateChanged { iface: InterfaceId, state: PortState },
    HsrpStateChanged { iface: InterfaceId, group: u8, state: HsrpState },
    OspfNeighborChanged { neighbor: Ipv4Addr, state: NeighborState },
    SpeedChanged { mode: SpeedMode },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub at: VirtualTime,
    /// `None` for simulation-wide events.
    pub node: Option<NodeId>,
    pub kind: EngineEventKind,
}

/// Sending half of the engine event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventSink { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn is_observed(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub fn emit(&self, at: VirtualTime, node: Option<NodeId>, kind: EngineEventKind) {
        if self.is_observed() {
            // Only fails when every receiver has gone away.
            let _ = self.tx.send(EngineEvent { at, node, kind });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_subscribers() {
        let sink = EventSink::new(8);
        sink.emit(VirtualTime::ZERO, None, EngineEventKind::NodeRemoved);
        let mut rx = sink.subscribe();
        sink.emit(
            VirtualTime::from_millis(5),
            Some(NodeId(1)),
            EngineEventKind::SpeedChanged { mode: SpeedMode::Paused },
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.node, Some(NodeId(1)));
        assert_eq!(event.at.as_millis(), 5);
        assert!(rx.try_recv().is_err());
    }
}
