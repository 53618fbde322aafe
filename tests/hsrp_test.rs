//! HSRP election tests: two routers sharing a virtual gateway behind a
//! switch.

use netsim::message::{HsrpState, MacAddress};
use netsim::network::HsrpService;
use netsim::{DeviceType, Duration, EngineEventKind, InterfaceId, NodeId, PortRef, Shell, Simulation, SimulationConfig};
use std::net::Ipv4Addr;

const VIP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

fn configure(sim: &mut Simulation, device: &str, lines: &[&str]) {
    let node = sim.node_by_name(device).unwrap();
    let mut shell = Shell::new(sim, node).unwrap();
    let script = ["enable", "configure terminal"].iter().chain(lines).copied();
    shell.exec_script(sim, script).unwrap();
}

/// R1 (10.0.0.2) and R2 (10.0.0.3) on S1, both in group 1 for 10.0.0.1.
fn pair(r1_extra: &[&str], r2_extra: &[&str]) -> (Simulation, NodeId, NodeId) {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    sim.add_node("S1", DeviceType::Switch).unwrap();
    let r1 = sim.add_node("R1", DeviceType::Router).unwrap();
    let r2 = sim.add_node("R2", DeviceType::Router).unwrap();
    sim.connect_by_name(("R1", "Gi0/0"), ("S1", "Fa0/1"), 10.0).unwrap();
    sim.connect_by_name(("R2", "Gi0/0"), ("S1", "Fa0/2"), 10.0).unwrap();
    for (name, address, extra) in [("R1", "10.0.0.2", r1_extra), ("R2", "10.0.0.3", r2_extra)] {
        let ip = format!("ip address {} 255.255.255.0", address);
        let mut lines = vec!["interface Gi0/0", ip.as_str(), "standby 1 ip 10.0.0.1"];
        lines.extend_from_slice(extra);
        configure(&mut sim, name, &lines);
    }
    (sim, r1, r2)
}

fn state(sim: &Simulation, router: NodeId) -> HsrpState {
    sim.service::<HsrpService>(router)
        .unwrap()
        .state(InterfaceId(0), 1)
        .unwrap()
}

fn owns_vip(sim: &Simulation, router: NodeId) -> bool {
    sim.interface(PortRef::new(router, InterfaceId(0)))
        .unwrap()
        .virtual_addresses()
        .iter()
        .any(|v| v.ip == VIP && v.mac == MacAddress::hsrp_virtual(1))
}

#[test]
fn test_higher_priority_becomes_active() {
    let (mut sim, r1, r2) = pair(&["standby 1 priority 110", "standby 1 preempt"], &[]);
    sim.advance(Duration::from_secs(40));
    assert_eq!(state(&sim, r1), HsrpState::Active);
    assert_eq!(state(&sim, r2), HsrpState::Standby);
    assert!(owns_vip(&sim, r1));
    assert!(!owns_vip(&sim, r2));
}

#[test]
fn test_superior_router_with_preempt_takes_over() {
    let (mut sim, r1, r2) = pair(&["standby 1 priority 110", "standby 1 preempt"], &[]);
    sim.advance(Duration::from_secs(40));
    assert_eq!(state(&sim, r1), HsrpState::Active);

    let mut events = sim.subscribe();
    configure(&mut sim, "R2", &["interface Gi0/0", "standby 1 priority 120", "standby 1 preempt"]);
    sim.advance(Duration::from_secs(30));
    assert_eq!(state(&sim, r2), HsrpState::Active);
    assert_eq!(state(&sim, r1), HsrpState::Standby);
    assert!(owns_vip(&sim, r2));
    assert!(!owns_vip(&sim, r1));

    let mut r2_went_active = false;
    while let Ok(event) = events.try_recv() {
        if event.node == Some(r2) {
            if let EngineEventKind::HsrpStateChanged { state: HsrpState::Active, .. } = event.kind {
                r2_went_active = true;
            }
        }
    }
    assert!(r2_went_active);
}

#[test]
fn test_preempting_active_resigns_to_superior_peer_without_preempt() {
    let (mut sim, r1, r2) = pair(&["standby 1 priority 110", "standby 1 preempt"], &[]);
    sim.advance(Duration::from_secs(40));
    assert_eq!(state(&sim, r1), HsrpState::Active);
    assert_eq!(state(&sim, r2), HsrpState::Standby);

    configure(&mut sim, "R2", &["interface Gi0/0", "standby 1 priority 120"]);
    sim.advance(Duration::from_secs(30));
    assert_eq!(state(&sim, r2), HsrpState::Active);
    assert_eq!(state(&sim, r1), HsrpState::Standby);
    assert!(owns_vip(&sim, r2));
    assert!(!owns_vip(&sim, r1));
}

#[test]
fn test_equal_priority_tie_goes_to_higher_address() {
    let (mut sim, r1, r2) = pair(&[], &[]);
    sim.advance(Duration::from_secs(40));
    assert_eq!(state(&sim, r2), HsrpState::Active);
    assert_eq!(state(&sim, r1), HsrpState::Standby);
}

#[test]
fn test_standby_takes_over_when_active_goes_down() {
    let (mut sim, r1, r2) = pair(&["standby 1 priority 110"], &[]);
    sim.advance(Duration::from_secs(40));
    assert_eq!(state(&sim, r1), HsrpState::Active);

    configure(&mut sim, "R1", &["interface Gi0/0", "shutdown"]);
    assert_eq!(state(&sim, r1), HsrpState::Initial);
    sim.advance(Duration::from_secs(15));
    assert_eq!(state(&sim, r2), HsrpState::Active);
    assert!(owns_vip(&sim, r2));
}

#[test]
fn test_show_standby_brief_lists_group() {
    let (mut sim, r1, _) = pair(&["standby 1 priority 110", "standby 1 preempt"], &[]);
    sim.advance(Duration::from_secs(40));
    let mut shell = Shell::new(&sim, r1).unwrap();
    let output = shell.exec(&mut sim, "show standby brief").unwrap().join("\n");
    assert!(output.contains("Active"), "{}", output);
    assert!(output.contains("110"), "{}", output);
    assert!(output.contains("10.0.0.1"), "{}", output);
}
