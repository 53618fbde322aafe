//! Send and receive paths.
//!
//! Sending descends: Packet chain, routing, ARP, Frame chain, Bits chain,
//! then the link. Receiving ascends the same chains in reverse. Listener
//! outcomes of `Handled` or `Stop` suppress the default action at each layer.
//! Work listeners queue is drained by `flush` after every entry point.

use super::executor::Simulation;
use crate::device::{Action, DeviceType, InterfaceId, Link, LinkId, NodeId, PendingAction, PortRef};
use crate::error::SimError;
use crate::events::EngineEventKind;
use crate::handler::{
    dispatch, BitsEvent, Direction, EventKind, FrameEvent, LifecycleEvent, ListenerId, Outcome,
    PacketEvent, TimerKind,
};
use crate::message::{
    Frame, FramePayload, IcmpKind, IcmpMessage, MacAddress, Message, Packet, PacketPayload,
    PhysicalMessage,
};
use crate::network::ArpService;
use tracing::{debug, trace, warn};

/// How a routed packet reaches the wire.
enum Egress {
    /// Destination MAC already known (broadcast, multicast).
    Direct(InterfaceId, MacAddress),
    /// Unicast next hop that ARP must resolve.
    Resolve(InterfaceId, std::net::Ipv4Addr),
}

impl Simulation {
    pub(crate) fn fire_timer(&mut self, node: NodeId, listener: ListenerId, timer: TimerKind) {
        if let Some((mut ctx, listeners)) = self.context(node) {
            if let Some(target) = listeners.get_mut(listener) {
                ctx.set_listener(listener);
                target.on_timer(&mut ctx, timer);
            }
        }
        self.flush();
    }

    /// Carry out queued actions until none are left.
    pub(crate) fn flush(&mut self) {
        while let Some(PendingAction { node, origin, action }) = self.outbox.pop_front() {
            match action {
                Action::SendFrame { iface, frame } => self.send_frame_path(node, iface, frame, origin),
                Action::SendPacket { packet, via, src_mac } => {
                    self.send_packet_path(node, packet, via, src_mac, origin)
                }
                Action::DeliverLocal { packet } => self.receive_packet(node, None, packet),
                Action::ReportUnreachable { packet } => {
                    self.send_icmp_error(node, None, &packet, IcmpKind::DestinationUnreachable)
                }
            }
        }
    }

    pub(super) fn dispatch_lifecycle(&mut self, node: NodeId, event: LifecycleEvent) -> Outcome {
        let Some((mut ctx, listeners)) = self.context(node) else {
            return Outcome::Continue;
        };
        dispatch(EventKind::Lifecycle, listeners, None, Some(event.iface()), |id, listener| {
            let target = listener.as_lifecycle()?;
            ctx.set_listener(id);
            Some(target.on_lifecycle(&mut ctx, event))
        })
    }

    fn dispatch_bits(
        &mut self,
        node: NodeId,
        direction: Direction,
        iface: InterfaceId,
        bits: &PhysicalMessage,
        origin: Option<ListenerId>,
    ) -> Outcome {
        let Some((mut ctx, listeners)) = self.context(node) else {
            return Outcome::Continue;
        };
        let event = BitsEvent { direction, iface, bits };
        dispatch(EventKind::Bits(direction), listeners, origin, Some(iface), |id, listener| {
            let target = listener.as_bits()?;
            ctx.set_listener(id);
            Some(target.on_bits(&mut ctx, event))
        })
    }

    fn dispatch_frame(
        &mut self,
        node: NodeId,
        direction: Direction,
        iface: InterfaceId,
        frame: &Frame,
        origin: Option<ListenerId>,
    ) -> Outcome {
        let Some((mut ctx, listeners)) = self.context(node) else {
            return Outcome::Continue;
        };
        let event = FrameEvent { direction, iface, frame };
        dispatch(EventKind::Frame(direction), listeners, origin, Some(iface), |id, listener| {
            let target = listener.as_frames()?;
            ctx.set_listener(id);
            Some(target.on_frame(&mut ctx, event))
        })
    }

    fn dispatch_packet(
        &mut self,
        node: NodeId,
        direction: Direction,
        iface: Option<InterfaceId>,
        packet: &Packet,
        origin: Option<ListenerId>,
    ) -> Outcome {
        let Some((mut ctx, listeners)) = self.context(node) else {
            return Outcome::Continue;
        };
        let event = PacketEvent {
            direction,
            iface,
            packet,
        };
        dispatch(EventKind::Packet(direction), listeners, origin, iface, |id, listener| {
            let target = listener.as_packets()?;
            ctx.set_listener(id);
            Some(target.on_packet(&mut ctx, event))
        })
    }

    fn queue(&mut self, node: NodeId, origin: Option<ListenerId>, action: Action) {
        self.outbox.push_back(PendingAction { node, origin, action });
    }

    fn send_packet_path(
        &mut self,
        node: NodeId,
        packet: Packet,
        via: Option<InterfaceId>,
        src_mac: Option<MacAddress>,
        origin: Option<ListenerId>,
    ) {
        if self
            .dispatch_packet(node, Direction::Send, via, &packet, origin)
            .suppresses_default()
        {
            return;
        }
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        if !n.device_type.is_layer3() {
            return;
        }
        let dst = packet.dst();
        if n.interfaces.owns_ip(dst) || dst.is_loopback() {
            self.queue(node, None, Action::DeliverLocal { packet });
            return;
        }
        let egress = if dst.is_multicast() || dst.is_broadcast() {
            let Some(iface) = via else {
                debug!(node = %n.name, %dst, "no egress interface for group packet, dropped");
                return;
            };
            let mac = if dst.is_multicast() {
                MacAddress::ipv4_multicast(dst)
            } else {
                MacAddress::BROADCAST
            };
            Egress::Direct(iface, mac)
        } else {
            match n.routing.lookup(&n.interfaces, dst) {
                Some(route) if n.interfaces.is_subnet_broadcast(dst) => {
                    Egress::Direct(route.iface, MacAddress::BROADCAST)
                }
                Some(route) => Egress::Resolve(route.iface, route.next_hop),
                None => {
                    debug!(node = %n.name, %dst, "no route, packet dropped");
                    return;
                }
            }
        };
        self.emit(
            Some(node),
            EngineEventKind::PacketSent {
                src: packet.src(),
                dst,
                protocol: packet.payload().protocol_name(),
            },
        );
        match egress {
            Egress::Direct(iface, dst_mac) => {
                let Ok(own) = self.interface(PortRef::new(node, iface)).map(|i| i.mac()) else {
                    return;
                };
                let frame = Frame::new(src_mac.unwrap_or(own), dst_mac, FramePayload::Ipv4(packet));
                self.queue(node, origin, Action::SendFrame { iface, frame });
            }
            Egress::Resolve(iface, next_hop) => {
                let Some((mut ctx, listeners)) = self.context(node) else {
                    return;
                };
                match listeners.find_mut::<ArpService>() {
                    Some((id, arp)) => {
                        ctx.set_listener(id);
                        arp.send_packet(&mut ctx, iface, next_hop, packet, src_mac);
                    }
                    None => warn!(node = node.0, "no ARP service, packet dropped"),
                }
            }
        }
    }

    fn send_frame_path(&mut self, node: NodeId, iface: InterfaceId, frame: Frame, origin: Option<ListenerId>) {
        if self
            .dispatch_frame(node, Direction::Send, iface, &frame, origin)
            .suppresses_default()
        {
            return;
        }
        let bits = PhysicalMessage::new(frame);
        if self
            .dispatch_bits(node, Direction::Send, iface, &bits, origin)
            .suppresses_default()
        {
            return;
        }
        if let Err(err) = self.send_bits(PortRef::new(node, iface), bits) {
            debug!(node = node.0, %err, "frame not transmitted");
        }
    }

    /// Reserve the link and arm the delivery timer at the far end.
    fn send_bits(&mut self, port: PortRef, bits: PhysicalMessage) -> Result<(), SimError> {
        let local = self.interface(port)?;
        if !local.is_up() {
            return Err(SimError::InterfaceDown(local.name().to_string()));
        }
        let link_id = local
            .link()
            .ok_or_else(|| SimError::NotLinked(local.name().to_string()))?;
        let (local_speed, local_duplex) = (local.hardware().speed_mbps, local.hardware().duplex);

        let link = self.network.get(link_id)?;
        let far = link.other_end(port).ok_or(SimError::DanglingLink(link_id))?;
        let remote = self
            .interface(far)
            .map_err(|_| SimError::DanglingLink(link_id))?;
        let speed = link.effective_speed(local_speed, remote.hardware().speed_mbps);
        let duplex = Link::negotiate_duplex(local_duplex, remote.hardware().duplex);

        let now = self.scheduler.now();
        let profile = self.scheduler.physics();
        let bytes = bits.length();
        let protocol = bits.frame().payload().protocol_name();
        let arrival = self
            .network
            .get_mut(link_id)?
            .reserve(port, now, bytes, speed, duplex, profile)?;

        trace!(link = link_id.0, bytes, %arrival, "frame on the wire");
        let mut cargo = Some(bits);
        let handle = self.scheduler.once(arrival.since(now), move |sim: &mut Simulation| {
            if let Some(bits) = cargo.take() {
                sim.deliver(link_id, far, bits);
            }
        });
        self.network.get_mut(link_id)?.track(handle);
        self.emit(
            Some(port.node),
            EngineEventKind::FrameSent {
                iface: port.iface,
                link: link_id,
                bytes,
                protocol,
                arrival,
            },
        );
        Ok(())
    }

    /// Link delivery at the far end: Bits chain, address filter, Frame
    /// chain, then the network layer on hosts and routers.
    fn deliver(&mut self, link: LinkId, port: PortRef, bits: PhysicalMessage) {
        let Some(n) = self.nodes.get(&port.node) else {
            return;
        };
        let Some(iface) = n.interfaces.get(port.iface) else {
            return;
        };
        if !iface.is_up() || iface.link() != Some(link) {
            trace!(node = %n.name, iface = %iface.name(), "arrival on inactive interface dropped");
            return;
        }
        let device_type = n.device_type;
        self.emit(
            Some(port.node),
            EngineEventKind::FrameReceived {
                iface: port.iface,
                link,
                bytes: bits.length(),
                protocol: bits.frame().payload().protocol_name(),
            },
        );

        if !self
            .dispatch_bits(port.node, Direction::Receive, port.iface, &bits, None)
            .suppresses_default()
        {
            let frame = bits.into_frame();
            let accepted = self
                .nodes
                .get(&port.node)
                .map_or(false, |n| n.accepts_frame(port.iface, &frame));
            if accepted {
                let outcome = self.dispatch_frame(port.node, Direction::Receive, port.iface, &frame, None);
                if outcome == Outcome::Continue && device_type.is_layer3() {
                    if let FramePayload::Ipv4(packet) = frame.payload() {
                        self.receive_packet(port.node, Some(port.iface), packet.clone());
                    }
                }
            }
        }
        self.flush();
    }

    /// Network-layer receive: local delivery up the Packet chain, or
    /// forwarding on routers.
    fn receive_packet(&mut self, node: NodeId, ingress: Option<InterfaceId>, packet: Packet) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        let dst = packet.dst();
        let local = n.interfaces.owns_ip(dst)
            || dst.is_broadcast()
            || dst.is_multicast()
            || dst.is_loopback()
            || n.interfaces.is_subnet_broadcast(dst);
        if local {
            self.emit(
                Some(node),
                EngineEventKind::PacketReceived {
                    src: packet.src(),
                    dst,
                    protocol: packet.payload().protocol_name(),
                },
            );
            if self.dispatch_packet(node, Direction::Receive, ingress, &packet, None) == Outcome::Continue {
                trace!(node = node.0, protocol = packet.payload().protocol_name(), "no listener for packet");
            }
            return;
        }
        if n.device_type == DeviceType::Router {
            self.forward(node, ingress, packet);
        } else {
            trace!(node = %n.name, %dst, "packet for another host dropped");
        }
    }

    fn forward(&mut self, node: NodeId, ingress: Option<InterfaceId>, packet: Packet) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        let Some(next) = packet.forwarded() else {
            debug!(node = %n.name, dst = %packet.dst(), "TTL expired in transit");
            self.send_icmp_error(node, ingress, &packet, IcmpKind::TimeExceeded);
            return;
        };
        if n.routing.lookup(&n.interfaces, packet.dst()).is_none() {
            debug!(node = %n.name, dst = %packet.dst(), "no route for forwarded packet");
            self.send_icmp_error(node, ingress, &packet, IcmpKind::DestinationUnreachable);
            return;
        }
        self.queue(
            node,
            None,
            Action::SendPacket {
                packet: next,
                via: None,
                src_mac: None,
            },
        );
    }

    /// Report a forwarding failure back to the sender of an echo or a
    /// non-ICMP packet. ICMP errors never trigger further errors.
    fn send_icmp_error(&mut self, node: NodeId, ingress: Option<InterfaceId>, original: &Packet, kind: IcmpKind) {
        let (identifier, sequence) = match original.payload() {
            PacketPayload::Icmp(m) if matches!(m.kind, IcmpKind::EchoRequest | IcmpKind::EchoReply) => {
                (m.identifier, m.sequence)
            }
            PacketPayload::Icmp(_) => return,
            _ => (0, 0),
        };
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        let source = ingress
            .and_then(|i| n.interfaces.get(i))
            .and_then(|i| i.address())
            .map(|a| a.address)
            .or_else(|| n.routing.lookup(&n.interfaces, original.src()).map(|r| r.source));
        let Some(source) = source else {
            return;
        };
        let error = Packet::new(
            source,
            original.src(),
            PacketPayload::Icmp(IcmpMessage {
                kind,
                identifier,
                sequence,
                data_len: 0,
            }),
        );
        self.queue(
            node,
            None,
            Action::SendPacket {
                packet: error,
                via: None,
                src_mac: None,
            },
        );
    }
}
