//! ICMP echo and its correlation with pending requests.

use crate::config::IcmpConfig;
use crate::device::NodeContext;
use crate::handler::{Direction, Listener, Outcome, PacketEvent, PacketListener, TimerKind};
use crate::message::{IcmpKind, IcmpMessage, Packet, PacketPayload};
use crate::simulator::{Duration, TimerHandle, VirtualTime};
use ahash::AHashMap;
use futures::channel::oneshot;
use std::any::Any;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// How an echo request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    Reply { from: Ipv4Addr, rtt: Duration, ttl: u8 },
    /// Timed out, no route, or a router reported the destination unreachable.
    Unreachable,
    /// A router on the path dropped the request when its TTL ran out.
    TtlExceeded { from: Ipv4Addr },
}

struct PendingEcho {
    tx: oneshot::Sender<EchoOutcome>,
    sent_at: VirtualTime,
    dst: Ipv4Addr,
    timer: TimerHandle,
}

pub struct IcmpService {
    pending: AHashMap<u16, PendingEcho>,
    next_identifier: u16,
    next_sequence: u16,
    data_len: usize,
}

impl IcmpService {
    pub fn new(config: &IcmpConfig) -> Self {
        IcmpService {
            pending: AHashMap::new(),
            next_identifier: 0,
            next_sequence: 0,
            data_len: config.data_len,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send an echo request to `dst`. The receiver resolves exactly once;
    /// without a source address or route it resolves `Unreachable` at once
    /// and nothing is left pending.
    pub fn send_echo_request(
        &mut self,
        ctx: &mut NodeContext<'_>,
        dst: Ipv4Addr,
        timeout: Duration,
    ) -> oneshot::Receiver<EchoOutcome> {
        let (tx, rx) = oneshot::channel();
        let source = if ctx.interfaces().owns_ip(dst) {
            Some(dst)
        } else {
            ctx.routing().lookup(ctx.interfaces(), dst).map(|r| r.source)
        };
        let Some(source) = source else {
            debug!(node = ctx.node().0, %dst, "echo request has no route");
            let _ = tx.send(EchoOutcome::Unreachable);
            return rx;
        };

        let identifier = self.next_identifier;
        self.next_identifier = self.next_identifier.wrapping_add(1);
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let timer = ctx.schedule(timeout, TimerKind::EchoTimeout(identifier));
        if let Some(stale) = self.pending.insert(
            identifier,
            PendingEcho {
                tx,
                sent_at: ctx.now(),
                dst,
                timer,
            },
        ) {
            stale.timer.cancel();
            let _ = stale.tx.send(EchoOutcome::Unreachable);
        }
        let packet = Packet::new(
            source,
            dst,
            PacketPayload::Icmp(IcmpMessage {
                kind: IcmpKind::EchoRequest,
                identifier,
                sequence,
                data_len: self.data_len,
            }),
        );
        trace!(node = ctx.node().0, %dst, identifier, "echo request");
        ctx.send_packet(packet);
        rx
    }

    fn resolve(&mut self, identifier: u16, outcome: EchoOutcome) {
        if let Some(pending) = self.pending.remove(&identifier) {
            pending.timer.cancel();
            let _ = pending.tx.send(outcome);
        }
    }

    fn reply_to(&self, ctx: &mut NodeContext<'_>, request: &Packet, message: &IcmpMessage) {
        let source = if ctx.interfaces().owns_ip(request.dst()) {
            Some(request.dst())
        } else {
            ctx.routing().lookup(ctx.interfaces(), request.src()).map(|r| r.source)
        };
        let Some(source) = source else {
            return;
        };
        let reply = Packet::new(
            source,
            request.src(),
            PacketPayload::Icmp(IcmpMessage {
                kind: IcmpKind::EchoReply,
                ..message.clone()
            }),
        );
        ctx.send_packet(reply);
    }
}

impl PacketListener for IcmpService {
    fn on_packet(&mut self, ctx: &mut NodeContext<'_>, event: PacketEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive {
            return Outcome::Continue;
        }
        let PacketPayload::Icmp(message) = event.packet.payload() else {
            return Outcome::Continue;
        };
        match message.kind {
            IcmpKind::EchoRequest => self.reply_to(ctx, event.packet, message),
            IcmpKind::EchoReply => {
                let Some(pending) = self.pending.get(&message.identifier) else {
                    trace!(identifier = message.identifier, "unmatched echo reply ignored");
                    return Outcome::Handled;
                };
                let outcome = EchoOutcome::Reply {
                    from: event.packet.src(),
                    rtt: ctx.now().since(pending.sent_at),
                    ttl: event.packet.ttl(),
                };
                debug!(node = ctx.node().0, dst = %pending.dst, ?outcome, "echo answered");
                self.resolve(message.identifier, outcome);
            }
            IcmpKind::TimeExceeded => self.resolve(
                message.identifier,
                EchoOutcome::TtlExceeded {
                    from: event.packet.src(),
                },
            ),
            IcmpKind::DestinationUnreachable => self.resolve(message.identifier, EchoOutcome::Unreachable),
        }
        Outcome::Handled
    }
}

impl Listener for IcmpService {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn as_packets(&mut self) -> Option<&mut dyn PacketListener> {
        Some(self)
    }

    fn on_attach(&mut self, ctx: &mut NodeContext<'_>) {
        self.next_identifier = ctx.rng().gen_range(0, u16::MAX as u64) as u16;
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerKind) {
        if let TimerKind::EchoTimeout(identifier) = timer {
            if self.pending.contains_key(&identifier) {
                debug!(node = ctx.node().0, identifier, "echo timed out");
            }
            self.resolve(identifier, EchoOutcome::Unreachable);
        }
    }

    fn shutdown(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.timer.cancel();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
