//! Switch forwarding tests: VLAN isolation, trunking between switches,
//! and MAC table aging at its exact boundary.

use bytes::Bytes;
use netsim::datalink::SwitchingService;
use netsim::device::NodeContext;
use netsim::handler::{Direction, FrameEvent, FrameListener, Listener, Outcome};
use netsim::message::{Frame, FramePayload, MacAddress};
use netsim::network::{ArpService, EchoOutcome};
use netsim::{DeviceType, Duration, InterfaceId, NodeId, Shell, Simulation, SimulationConfig};
use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn configure(sim: &mut Simulation, device: &str, lines: &[&str]) {
    let node = sim.node_by_name(device).unwrap();
    let mut shell = Shell::new(sim, node).unwrap();
    let script = ["enable", "configure terminal"].iter().chain(lines).copied();
    shell.exec_script(sim, script).unwrap();
}

fn host(sim: &mut Simulation, name: &str, address: &str) {
    sim.add_node(name, DeviceType::Host).unwrap();
    let line = format!("ip address {} 255.255.255.0", address);
    configure(sim, name, &["interface eth0", &line]);
}

fn ping(sim: &mut Simulation, from: &str, dst: Ipv4Addr) -> EchoOutcome {
    let node = sim.node_by_name(from).unwrap();
    let mut rx = sim.ping(node, dst).unwrap();
    for _ in 0..1_000 {
        if let Ok(Some(outcome)) = rx.try_recv() {
            return outcome;
        }
        sim.advance(Duration::from_millis(10));
    }
    panic!("echo to {} never resolved", dst);
}

/// PC1 and PC3 in VLAN 10, PC2 in VLAN 20, all on one switch and one subnet.
fn vlan_lab() -> Simulation {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    sim.add_node("S1", DeviceType::Switch).unwrap();
    host(&mut sim, "PC1", "10.0.0.1");
    host(&mut sim, "PC2", "10.0.0.2");
    host(&mut sim, "PC3", "10.0.0.3");
    sim.connect_by_name(("PC1", "eth0"), ("S1", "Fa0/1"), 10.0).unwrap();
    sim.connect_by_name(("PC2", "eth0"), ("S1", "Fa0/2"), 10.0).unwrap();
    sim.connect_by_name(("PC3", "eth0"), ("S1", "Fa0/3"), 10.0).unwrap();
    configure(
        &mut sim,
        "S1",
        &[
            "vlan 10,20",
            "interface Fa0/1",
            "switchport access vlan 10",
            "interface Fa0/2",
            "switchport access vlan 20",
            "interface Fa0/3",
            "switchport access vlan 10",
        ],
    );
    // Ports pass through listening and learning first.
    sim.advance(Duration::from_secs(10));
    sim
}

#[test]
fn test_same_vlan_reachable_other_vlan_isolated() {
    let mut sim = vlan_lab();
    assert!(matches!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 3)),
        EchoOutcome::Reply { .. }
    ));
    assert_eq!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 2)),
        EchoOutcome::Unreachable
    );

    // ARP for the isolated host gives up after its resends.
    sim.advance(Duration::from_secs(10));
    let pc1 = sim.node_by_name("PC1").unwrap();
    let arp = sim.service::<ArpService>(pc1).unwrap();
    assert!(!arp.is_pending(Ipv4Addr::new(10, 0, 0, 2)));
    assert!(arp.lookup(Ipv4Addr::new(10, 0, 0, 2), sim.now()).is_none());
}


/// Counts raw frames received from one source MAC.
struct RawFrom {
    src: MacAddress,
    seen: Arc<AtomicUsize>,
}

impl FrameListener for RawFrom {
    fn on_frame(&mut self, _ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome {
        if event.direction == Direction::Receive
            && event.frame.src() == self.src
            && matches!(event.frame.payload(), FramePayload::Raw(_))
        {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        Outcome::Continue
    }
}

impl Listener for RawFrom {
    fn name(&self) -> &'static str {
        "raw-from"
    }

    fn as_frames(&mut self) -> Option<&mut dyn FrameListener> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn count_raw_from(sim: &mut Simulation, node: NodeId, src: MacAddress) -> Arc<AtomicUsize> {
    let seen = Arc::new(AtomicUsize::new(0));
    let listener = Box::new(RawFrom { src, seen: seen.clone() });
    sim.register_listener(node, listener, Some(InterfaceId(0))).unwrap();
    seen
}

#[test]
fn test_broadcast_stays_inside_its_vlan() {
    let mut sim = vlan_lab();
    let pc1 = sim.node_by_name("PC1").unwrap();
    let pc2 = sim.node_by_name("PC2").unwrap();
    let pc3 = sim.node_by_name("PC3").unwrap();
    let pc1_mac = sim.node(pc1).unwrap().interface(InterfaceId(0)).unwrap().mac();
    let other_vlan = count_raw_from(&mut sim, pc2, pc1_mac);
    let same_vlan = count_raw_from(&mut sim, pc3, pc1_mac);

    for _ in 0..3 {
        let frame = Frame::new(pc1_mac, MacAddress::BROADCAST, FramePayload::Raw(Bytes::from_static(b"hello vlan")));
        sim.send_frame(pc1, InterfaceId(0), frame).unwrap();
    }
    sim.advance(Duration::from_secs(1));
    assert_eq!(other_vlan.load(Ordering::SeqCst), 0);
    assert_eq!(same_vlan.load(Ordering::SeqCst), 3);
}

#[test]
fn test_addresses_learned_per_vlan() {
    let mut sim = vlan_lab();
    ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 3));
    let s1 = sim.node_by_name("S1").unwrap();
    let pc1_mac = sim.port("PC1", "eth0").map(|p| sim.interface(p).unwrap().mac()).unwrap();
    let switching = sim.service::<SwitchingService>(s1).unwrap();
    assert_eq!(switching.lookup(10, pc1_mac, sim.now()), Some(InterfaceId(0)));
    assert_eq!(switching.lookup(1, pc1_mac, sim.now()), None);
    assert_eq!(switching.lookup(20, pc1_mac, sim.now()), None);
}

#[test]
fn test_mac_entry_absent_exactly_at_aging_time() {
    let mut sim = vlan_lab();
    configure(&mut sim, "S1", &["mac address-table aging-time 10"]);
    ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 3));

    let s1 = sim.node_by_name("S1").unwrap();
    let pc1_mac = sim.port("PC1", "eth0").map(|p| sim.interface(p).unwrap().mac()).unwrap();
    let learned = sim
        .service::<SwitchingService>(s1)
        .unwrap()
        .entries(sim.now())
        .into_iter()
        .find(|(vlan, mac, _)| *vlan == 10 && *mac == pc1_mac)
        .map(|(_, _, entry)| entry.last_seen)
        .unwrap();

    let aging = Duration::from_secs(10);
    sim.run_until(learned + Duration(aging.0 - 1));
    assert!(sim
        .service::<SwitchingService>(s1)
        .unwrap()
        .lookup(10, pc1_mac, sim.now())
        .is_some());
    sim.run_until(learned + aging);
    assert!(sim
        .service::<SwitchingService>(s1)
        .unwrap()
        .lookup(10, pc1_mac, sim.now())
        .is_none());
}

#[test]
fn test_trunk_carries_vlan_between_switches() {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    sim.add_node("S1", DeviceType::Switch).unwrap();
    sim.add_node("S2", DeviceType::Switch).unwrap();
    host(&mut sim, "PC1", "10.0.0.1");
    host(&mut sim, "PC2", "10.0.0.2");
    sim.connect_by_name(("PC1", "eth0"), ("S1", "Fa0/1"), 10.0).unwrap();
    sim.connect_by_name(("PC2", "eth0"), ("S2", "Fa0/1"), 10.0).unwrap();
    sim.connect_by_name(("S1", "Fa0/8"), ("S2", "Fa0/8"), 10.0).unwrap();
    for switch in ["S1", "S2"] {
        configure(
            &mut sim,
            switch,
            &[
                "interface Fa0/1",
                "switchport access vlan 30",
                "interface Fa0/8",
                "switchport mode trunk",
                "switchport trunk allowed vlan 1,30",
            ],
        );
    }
    sim.advance(Duration::from_secs(15));
    assert!(matches!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 2)),
        EchoOutcome::Reply { .. }
    ));

    // Pruning VLAN 30 off the trunk cuts the path.
    configure(&mut sim, "S1", &["interface Fa0/8", "switchport trunk allowed vlan 1"]);
    sim.advance(Duration::from_secs(1));
    assert_eq!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 2)),
        EchoOutcome::Unreachable
    );
}
