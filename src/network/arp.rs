//! Address resolution.
//!
//! Packets for an unresolved next hop wait in a per-address queue while a
//! broadcast request is retried; the queue drains when any ARP message from
//! that address arrives and is dropped once retries run out, each dropped
//! packet's sender being told the host is unreachable. Entries age out
//! after the configured timeout (age at or past the timeout means absent).

use crate::config::ArpConfig;
use crate::device::{InterfaceId, NodeContext};
use crate::handler::{
    Direction, FrameEvent, FrameListener, LifecycleEvent, LifecycleListener, Listener, Outcome, TimerKind,
};
use crate::message::{ArpMessage, ArpOp, Frame, FramePayload, MacAddress, Packet};
use crate::simulator::{Duration, TimerHandle, VirtualTime};
use ahash::AHashMap;
use std::any::Any;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub mac: MacAddress,
    pub iface: InterfaceId,
    pub learned_at: VirtualTime,
}

struct Pending {
    iface: InterfaceId,
    resends: u32,
    /// Packets waiting on resolution, with any source MAC override.
    queue: Vec<(Packet, Option<MacAddress>)>,
    timer: TimerHandle,
}

pub struct ArpService {
    cache: AHashMap<Ipv4Addr, ArpEntry>,
    pending: AHashMap<Ipv4Addr, Pending>,
    timeout: Duration,
    retries: u32,
    retry_interval: Duration,
    sweep_interval: Duration,
    sweep: Option<TimerHandle>,
}

impl ArpService {
    pub fn new(config: &ArpConfig) -> Self {
        ArpService {
            cache: AHashMap::new(),
            pending: AHashMap::new(),
            timeout: Duration::from_secs(config.timeout_secs),
            retries: config.retries,
            retry_interval: Duration::from_millis(config.retry_interval_ms.max(1)),
            sweep_interval: Duration::from_secs(config.sweep_secs.max(1)),
            sweep: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn lookup(&self, ip: Ipv4Addr, now: VirtualTime) -> Option<ArpEntry> {
        self.cache
            .get(&ip)
            .filter(|e| now.since(e.learned_at) < self.timeout)
            .copied()
    }

    /// Live entries sorted by address.
    pub fn entries(&self, now: VirtualTime) -> Vec<(Ipv4Addr, ArpEntry)> {
        let mut rows: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, e)| now.since(e.learned_at) < self.timeout)
            .map(|(ip, e)| (*ip, *e))
            .collect();
        rows.sort_by_key(|(ip, _)| *ip);
        rows
    }

    pub fn is_pending(&self, ip: Ipv4Addr) -> bool {
        self.pending.contains_key(&ip)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Deliver `packet` to `next_hop` out of `iface`, resolving first if needed.
    pub fn send_packet(
        &mut self,
        ctx: &mut NodeContext<'_>,
        iface: InterfaceId,
        next_hop: Ipv4Addr,
        packet: Packet,
        src_mac: Option<MacAddress>,
    ) {
        if let Some(entry) = self.lookup(next_hop, ctx.now()) {
            Self::transmit(ctx, entry.iface, entry.mac, packet, src_mac);
            return;
        }
        if let Some(pending) = self.pending.get_mut(&next_hop) {
            pending.queue.push((packet, src_mac));
            return;
        }
        if !self.send_request(ctx, iface, next_hop) {
            debug!(node = ctx.node().0, %next_hop, "no source address for ARP request, packet dropped");
            return;
        }
        let timer = ctx.schedule(self.retry_interval, TimerKind::ArpRetry(next_hop));
        self.pending.insert(
            next_hop,
            Pending {
                iface,
                resends: 0,
                queue: vec![(packet, src_mac)],
                timer,
            },
        );
    }

    fn transmit(ctx: &mut NodeContext<'_>, iface: InterfaceId, dst: MacAddress, packet: Packet, src_mac: Option<MacAddress>) {
        let Ok(own) = ctx.interface(iface).map(|i| i.mac()) else {
            return;
        };
        let frame = Frame::new(src_mac.unwrap_or(own), dst, FramePayload::Ipv4(packet));
        ctx.send_frame(iface, frame);
    }

    fn send_request(&self, ctx: &mut NodeContext<'_>, iface: InterfaceId, target: Ipv4Addr) -> bool {
        let Ok(interface) = ctx.interface(iface) else {
            return false;
        };
        let Some(address) = interface.address() else {
            return false;
        };
        let mac = interface.mac();
        trace!(node = ctx.node().0, %target, "ARP request");
        let request = ArpMessage::request(mac, address.address, target);
        ctx.send_frame(iface, Frame::new(mac, MacAddress::BROADCAST, FramePayload::Arp(request)));
        true
    }

    fn learn(&mut self, ctx: &mut NodeContext<'_>, ip: Ipv4Addr, mac: MacAddress, iface: InterfaceId) {
        let entry = ArpEntry {
            mac,
            iface,
            learned_at: ctx.now(),
        };
        if self.cache.insert(ip, entry).map_or(true, |old| old.mac != mac) {
            debug!(node = ctx.node().0, %ip, %mac, "ARP entry learned");
        }
        if let Some(pending) = self.pending.remove(&ip) {
            pending.timer.cancel();
            for (packet, src_mac) in pending.queue {
                Self::transmit(ctx, iface, mac, packet, src_mac);
            }
        }
    }

    fn receive(&mut self, ctx: &mut NodeContext<'_>, iface: InterfaceId, message: &ArpMessage) {
        let Ok(interface) = ctx.interface(iface) else {
            return;
        };
        let own_mac = interface.mac();
        let own_ip = interface.address().map(|a| a.address);
        let target_is_ours = own_ip == Some(message.target_ip);
        let virtual_mac = interface.network().and_then(|n| n.virtual_mac_for(message.target_ip));

        if message.sender_ip != Ipv4Addr::UNSPECIFIED && Some(message.sender_ip) != own_ip {
            let known = self.cache.contains_key(&message.sender_ip) || self.pending.contains_key(&message.sender_ip);
            if known || target_is_ours || message.op == ArpOp::Reply {
                self.learn(ctx, message.sender_ip, message.sender_mac, iface);
            }
        }

        if message.op != ArpOp::Request || message.sender_ip == message.target_ip {
            return;
        }
        let answer_mac = if target_is_ours { Some(own_mac) } else { virtual_mac };
        if let Some(mac) = answer_mac {
            let reply = ArpMessage::reply(mac, message.target_ip, message.sender_mac, message.sender_ip);
            trace!(node = ctx.node().0, ip = %message.target_ip, %mac, "ARP reply");
            ctx.send_frame(iface, Frame::new(mac, message.sender_mac, FramePayload::Arp(reply)));
        }
    }

    fn retry(&mut self, ctx: &mut NodeContext<'_>, ip: Ipv4Addr) {
        let Some(pending) = self.pending.get_mut(&ip) else {
            return;
        };
        if pending.resends >= self.retries {
            let dropped = pending.queue.len();
            debug!(node = ctx.node().0, %ip, dropped, "ARP resolution failed");
            if let Some(pending) = self.pending.remove(&ip) {
                for (packet, _) in pending.queue {
                    ctx.report_unreachable(packet);
                }
            }
            return;
        }
        pending.resends += 1;
        let iface = pending.iface;
        pending.timer = ctx.schedule(self.retry_interval, TimerKind::ArpRetry(ip));
        self.send_request(ctx, iface, ip);
    }
}

impl FrameListener for ArpService {
    fn on_frame(&mut self, ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive {
            return Outcome::Continue;
        }
        match event.frame.payload() {
            FramePayload::Arp(message) => {
                self.receive(ctx, event.iface, message);
                Outcome::Handled
            }
            _ => Outcome::Continue,
        }
    }
}

impl LifecycleListener for ArpService {
    fn on_lifecycle(&mut self, _ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome {
        match event {
            LifecycleEvent::InterfaceDown(iface)
            | LifecycleEvent::InterfaceRemoved(iface)
            | LifecycleEvent::AddressChanged(iface)
            | LifecycleEvent::LinkDetached(iface) => {
                self.cache.retain(|_, e| e.iface != iface);
            }
            _ => {}
        }
        Outcome::Continue
    }
}

impl Listener for ArpService {
    fn name(&self) -> &'static str {
        "arp"
    }

    fn as_frames(&mut self) -> Option<&mut dyn FrameListener> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn LifecycleListener> {
        Some(self)
    }

    fn on_attach(&mut self, ctx: &mut NodeContext<'_>) {
        self.sweep = Some(ctx.repeat(self.sweep_interval, TimerKind::AgingSweep, None));
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerKind) {
        match timer {
            TimerKind::ArpRetry(ip) => self.retry(ctx, ip),
            TimerKind::AgingSweep => {
                let (now, timeout) = (ctx.now(), self.timeout);
                self.cache.retain(|_, e| now.since(e.learned_at) < timeout);
            }
            _ => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.sweep.take() {
            handle.cancel();
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_entries_read_as_absent() {
        let mut arp = ArpService::new(&ArpConfig {
            timeout_secs: 60,
            ..ArpConfig::default()
        });
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        arp.cache.insert(
            ip,
            ArpEntry {
                mac: MacAddress::local([1, 1, 1, 1, 1]),
                iface: InterfaceId(0),
                learned_at: VirtualTime::from_secs(10),
            },
        );
        assert!(arp.lookup(ip, VirtualTime::from_secs(69)).is_some());
        assert!(arp.lookup(ip, VirtualTime::from_secs(70)).is_none());
        assert_eq!(arp.entries(VirtualTime::from_secs(10)).len(), 1);
        arp.clear();
        assert!(arp.entries(VirtualTime::from_secs(10)).is_empty());
    }
}
