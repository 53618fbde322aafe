//! Spanning tree convergence tests on a two-switch loop.

use netsim::datalink::{PortRole, StpService};
use netsim::device::PortState;
use netsim::network::EchoOutcome;
use netsim::{DeviceType, Duration, EngineEventKind, InterfaceId, NodeId, Shell, Simulation, SimulationConfig};
use std::net::Ipv4Addr;

/// S1 and S2 joined by two parallel links, one host on each switch.
fn looped() -> (Simulation, NodeId, NodeId) {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    let s1 = sim.add_node("S1", DeviceType::Switch).unwrap();
    let s2 = sim.add_node("S2", DeviceType::Switch).unwrap();
    sim.connect_by_name(("S1", "Fa0/1"), ("S2", "Fa0/1"), 10.0).unwrap();
    sim.connect_by_name(("S1", "Fa0/2"), ("S2", "Fa0/2"), 10.0).unwrap();
    (sim, s1, s2)
}

fn stp(sim: &Simulation, node: NodeId) -> &StpService {
    sim.service::<StpService>(node).unwrap()
}

/// (root bridge, other bridge)
fn by_rank(sim: &Simulation, a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if stp(sim, a).bridge_id() < stp(sim, b).bridge_id() {
        (a, b)
    } else {
        (b, a)
    }
}

#[test]
fn test_loop_converges_with_one_blocked_port() {
    let (mut sim, s1, s2) = looped();
    sim.advance(Duration::from_secs(20));
    let (root, other) = by_rank(&sim, s1, s2);

    assert!(stp(&sim, root).is_root());
    assert!(!stp(&sim, other).is_root());
    assert_eq!(stp(&sim, other).root_id(), stp(&sim, root).bridge_id());

    for port in stp(&sim, root).ports() {
        assert_eq!(port.role, PortRole::Designated);
        assert_eq!(port.state, PortState::Forwarding);
    }

    let ports = stp(&sim, other).ports();
    assert_eq!(ports.len(), 2);
    let root_ports: Vec<_> = ports.iter().filter(|p| p.role == PortRole::Root).collect();
    let blocked: Vec<_> = ports.iter().filter(|p| p.state == PortState::Blocking).collect();
    assert_eq!(root_ports.len(), 1);
    assert_eq!(blocked.len(), 1);
    // Equal costs: the lower sender port id wins.
    assert_eq!(root_ports[0].iface, InterfaceId(0));
    assert_eq!(root_ports[0].state, PortState::Forwarding);
    assert_eq!(stp(&sim, other).root_port(), Some(InterfaceId(0)));
    assert_eq!(stp(&sim, other).root_cost(), 19);
}

#[test]
fn test_lower_priority_takes_root() {
    let (mut sim, s1, s2) = looped();
    sim.advance(Duration::from_secs(20));
    let (_, other) = by_rank(&sim, s1, s2);

    let mut shell = Shell::new(&sim, other).unwrap();
    shell
        .exec_script(&mut sim, ["enable", "configure terminal", "spanning-tree priority 4096"])
        .unwrap();
    sim.advance(Duration::from_secs(20));
    assert!(stp(&sim, other).is_root());
    let (root, _) = by_rank(&sim, s1, s2);
    assert_eq!(root, other);
}

#[test]
fn test_root_port_failure_unblocks_alternate() {
    let (mut sim, s1, s2) = looped();
    sim.advance(Duration::from_secs(20));
    let (_, other) = by_rank(&sim, s1, s2);

    let link = sim.interface(netsim::PortRef::new(other, InterfaceId(0))).unwrap().link().unwrap();
    sim.disconnect(link).unwrap();
    sim.advance(Duration::from_secs(20));
    assert_eq!(stp(&sim, other).root_port(), Some(InterfaceId(1)));
    assert_eq!(stp(&sim, other).port_state(InterfaceId(1)), Some(PortState::Forwarding));
}

#[test]
fn test_broadcast_does_not_circulate_in_loop() {
    let (mut sim, _, _) = looped();
    for (host, switch, address) in [("PC1", "S1", "10.0.0.1"), ("PC2", "S2", "10.0.0.2")] {
        let node = sim.add_node(host, DeviceType::Host).unwrap();
        sim.connect_by_name((host, "eth0"), (switch, "Fa0/8"), 10.0).unwrap();
        let mut shell = Shell::new(&sim, node).unwrap();
        let line = format!("ip address {} 255.255.255.0", address);
        shell
            .exec_script(&mut sim, ["enable", "configure terminal", "interface eth0", line.as_str()])
            .unwrap();
    }
    sim.advance(Duration::from_secs(20));

    let mut events = sim.subscribe();
    let pc1 = sim.node_by_name("PC1").unwrap();
    let mut rx = sim.ping(pc1, Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    let mut outcome = None;
    for _ in 0..300 {
        if let Ok(Some(result)) = rx.try_recv() {
            outcome = Some(result);
            break;
        }
        sim.advance(Duration::from_millis(10));
    }
    assert!(matches!(outcome, Some(EchoOutcome::Reply { .. })));

    let mut arp_frames = 0;
    while let Ok(event) = events.try_recv() {
        if let EngineEventKind::FrameReceived { protocol: "arp", .. } = event.kind {
            arp_frames += 1;
        }
    }
    // Request: PC1 -> S1 -> S2 -> PC2. Reply: back along the same path.
    assert!(arp_frames <= 6, "ARP frames looped: {}", arp_frames);
}
