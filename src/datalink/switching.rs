//! VLAN-aware transparent bridging.
//!
//! Source addresses are learned per (VLAN, MAC) against the ingress port.
//! Known unicast goes out of the learned port only; broadcast, multicast and
//! unknown unicast flood to every other forwarding port that carries the
//! VLAN. Entries age out: an entry whose age has reached the aging time is
//! treated as absent even before the periodic sweep removes it.

use crate::config::SwitchingConfig;
use crate::device::{InterfaceId, NodeContext};
use crate::handler::{
    Direction, FrameEvent, FrameListener, LifecycleEvent, LifecycleListener, Listener, Outcome, TimerKind,
};
use crate::message::{MacAddress, VlanId, DEFAULT_VLAN};
use crate::simulator::{Duration, TimerHandle, VirtualTime};
use ahash::AHashMap;
use std::any::Any;
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacEntry {
    pub port: InterfaceId,
    pub last_seen: VirtualTime,
}

pub struct SwitchingService {
    table: AHashMap<(VlanId, MacAddress), MacEntry>,
    aging: Duration,
    sweep_interval: Duration,
    sweep: Option<TimerHandle>,
    vlans: BTreeMap<VlanId, String>,
}

impl SwitchingService {
    pub fn new(config: &SwitchingConfig) -> Self {
        let mut vlans = BTreeMap::new();
        vlans.insert(DEFAULT_VLAN, "default".to_string());
        SwitchingService {
            table: AHashMap::new(),
            aging: config.aging_time(),
            sweep_interval: config.sweep_interval(),
            sweep: None,
            vlans,
        }
    }

    pub fn aging_time(&self) -> Duration {
        self.aging
    }

    pub fn set_aging_time(&mut self, aging: Duration) {
        self.aging = aging;
    }

    fn is_fresh(&self, entry: &MacEntry, now: VirtualTime) -> bool {
        now.since(entry.last_seen) < self.aging
    }

    /// Port a MAC was learned on, if the entry has not aged out.
    pub fn lookup(&self, vlan: VlanId, mac: MacAddress, now: VirtualTime) -> Option<InterfaceId> {
        self.table
            .get(&(vlan, mac))
            .filter(|e| self.is_fresh(e, now))
            .map(|e| e.port)
    }

    pub fn learn(&mut self, vlan: VlanId, mac: MacAddress, port: InterfaceId, now: VirtualTime) {
        if mac.is_multicast() {
            return;
        }
        let previous = self.table.insert((vlan, mac), MacEntry { port, last_seen: now });
        if previous.map_or(true, |e| e.port != port) {
            trace!(vlan, %mac, port = port.0, "learned address");
        }
    }

    /// Live entries sorted by VLAN then MAC.
    pub fn entries(&self, now: VirtualTime) -> Vec<(VlanId, MacAddress, MacEntry)> {
        let mut rows: Vec<_> = self
            .table
            .iter()
            .filter(|(_, e)| self.is_fresh(e, now))
            .map(|((vlan, mac), e)| (*vlan, *mac, *e))
            .collect();
        rows.sort_by_key(|(vlan, mac, _)| (*vlan, *mac));
        rows
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn flush_port(&mut self, port: InterfaceId) {
        self.table.retain(|_, e| e.port != port);
    }

    /// Drop every aged entry; returns how many were removed.
    pub fn sweep(&mut self, now: VirtualTime) -> usize {
        let before = self.table.len();
        let aging = self.aging;
        self.table.retain(|_, e| now.since(e.last_seen) < aging);
        before - self.table.len()
    }

    pub fn vlans(&self) -> &BTreeMap<VlanId, String> {
        &self.vlans
    }

    pub fn create_vlan(&mut self, vlan: VlanId, name: Option<&str>) {
        let name = name.map_or_else(|| format!("VLAN{:04}", vlan), str::to_string);
        self.vlans.insert(vlan, name);
    }

    /// The default VLAN cannot be removed.
    pub fn remove_vlan(&mut self, vlan: VlanId) -> bool {
        if vlan == DEFAULT_VLAN {
            return false;
        }
        self.table.retain(|(v, _), _| *v != vlan);
        self.vlans.remove(&vlan).is_some()
    }

    /// Ports a frame in `vlan` arriving on `ingress` should leave through.
    fn egress_ports(&self, ctx: &NodeContext<'_>, vlan: VlanId, ingress: InterfaceId, dst: MacAddress) -> Vec<InterfaceId> {
        let usable = |iface: InterfaceId| {
            ctx.interfaces().get(iface).map_or(false, |i| {
                i.is_up() && i.link().is_some() && i.datalink().stp_state.forwards() && i.datalink().vlan.carries(vlan)
            })
        };
        if !dst.is_multicast() {
            if let Some(port) = self.lookup(vlan, dst, ctx.now()) {
                if port == ingress {
                    return Vec::new();
                }
                if usable(port) {
                    return vec![port];
                }
            }
        }
        ctx.interfaces()
            .ids()
            .into_iter()
            .filter(|iface| *iface != ingress && usable(*iface))
            .collect()
    }
}

impl FrameListener for SwitchingService {
    fn on_frame(&mut self, ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome {
        if event.direction != Direction::Receive {
            return Outcome::Continue;
        }
        let Ok(ingress) = ctx.interface(event.iface) else {
            return Outcome::Continue;
        };
        let state = ingress.datalink().stp_state;
        let Some(vlan) = ingress.datalink().vlan.ingress_vlan(event.frame.vlan()) else {
            trace!(iface = event.iface.0, tag = ?event.frame.vlan(), "frame for a VLAN the port does not carry");
            return Outcome::Handled;
        };
        if state.learns() {
            self.learn(vlan, event.frame.src(), event.iface, ctx.now());
        }
        if !state.forwards() {
            return Outcome::Handled;
        }
        let targets = self.egress_ports(ctx, vlan, event.iface, event.frame.dst());
        for port in targets {
            let Ok(egress) = ctx.interface(port) else {
                continue;
            };
            let tag = egress.datalink().vlan.egress_tag(vlan);
            let frame = event.frame.tagged(tag);
            ctx.send_frame(port, frame);
        }
        Outcome::Handled
    }
}

impl LifecycleListener for SwitchingService {
    fn on_lifecycle(&mut self, _ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome {
        match event {
            LifecycleEvent::InterfaceDown(iface)
            | LifecycleEvent::LinkDetached(iface)
            | LifecycleEvent::InterfaceRemoved(iface) => self.flush_port(iface),
            _ => {}
        }
        Outcome::Continue
    }
}

impl Listener for SwitchingService {
    fn name(&self) -> &'static str {
        "switching"
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
        if timer == TimerKind::AgingSweep {
            let removed = self.sweep(ctx.now());
            if removed > 0 {
                debug!(node = ctx.node().0, removed, "aged out MAC entries");
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.sweep.take() {
            handle.cancel();
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

    fn service(aging_secs: u64) -> SwitchingService {
        SwitchingService::new(&SwitchingConfig {
            mac_aging_secs: aging_secs,
            aging_sweep_secs: 1,
        })
    }

    fn mac(n: u8) -> MacAddress {
        MacAddress::local([0, 0, 0, 0, n])
    }

    #[test]
    fn test_entry_absent_once_age_reaches_timeout() {
        let mut sw = service(10);
        sw.learn(1, mac(1), InterfaceId(0), VirtualTime::from_secs(5));
        assert_eq!(sw.lookup(1, mac(1), VirtualTime::from_millis(14_999)), Some(InterfaceId(0)));
        assert_eq!(sw.lookup(1, mac(1), VirtualTime::from_secs(15)), None);
        assert_eq!(sw.sweep(VirtualTime::from_secs(15)), 1);
        assert!(sw.is_empty());
    }

    #[test]
    fn test_relearn_moves_entry() {
        let mut sw = service(300);
        sw.learn(1, mac(1), InterfaceId(0), VirtualTime::ZERO);
        sw.learn(1, mac(1), InterfaceId(3), VirtualTime::from_secs(1));
        assert_eq!(sw.lookup(1, mac(1), VirtualTime::from_secs(2)), Some(InterfaceId(3)));
        assert_eq!(sw.len(), 1);
    }

    #[test]
    fn test_tables_are_per_vlan() {
        let mut sw = service(300);
        sw.learn(10, mac(1), InterfaceId(0), VirtualTime::ZERO);
        assert_eq!(sw.lookup(20, mac(1), VirtualTime::ZERO), None);
        sw.learn(1, MacAddress::BROADCAST, InterfaceId(0), VirtualTime::ZERO);
        assert_eq!(sw.len(), 1);
    }

    #[test]
    fn test_default_vlan_is_permanent() {
        let mut sw = service(300);
        sw.create_vlan(10, None);
        assert_eq!(sw.vlans().get(&10).map(String::as_str), Some("VLAN0010"));
        assert!(sw.remove_vlan(10));
        assert!(!sw.remove_vlan(DEFAULT_VLAN));
    }
}
