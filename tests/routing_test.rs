//! ICMP reachability through a router, echo failure modes, and listeners
//! that take over the handler chain.

use netsim::device::NodeContext;
use netsim::handler::{Direction, FrameEvent, FrameListener, Listener, ListenerId, Outcome};
use netsim::message::{IcmpKind, IcmpMessage, Packet, PacketPayload};
use netsim::network::{ArpService, EchoOutcome, IcmpService};
use netsim::{DeviceType, Duration, EngineEventKind, NodeId, Shell, Simulation, SimulationConfig};
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

/// Step until the echo resolves, returning the outcome and how long it took.
fn timed_ping(sim: &mut Simulation, from: &str, dst: Ipv4Addr) -> (EchoOutcome, Duration) {
    let started = sim.now();
    let outcome = ping(sim, from, dst);
    (outcome, sim.now() - started)
}

fn routed() -> Simulation {
    routed_with(SimulationConfig::test())
}

/// PC1 (192.168.1.10) -- R1 -- PC2 (10.0.0.10), cabled directly.
fn routed_with(config: SimulationConfig) -> Simulation {
    let mut sim = Simulation::stepped(config);
    sim.add_node("PC1", DeviceType::Host).unwrap();
    sim.add_node("PC2", DeviceType::Host).unwrap();
    sim.add_node("R1", DeviceType::Router).unwrap();
    sim.connect_by_name(("PC1", "eth0"), ("R1", "Gi0/0"), 20.0).unwrap();
    sim.connect_by_name(("PC2", "eth0"), ("R1", "Gi0/1"), 20.0).unwrap();
    configure(
        &mut sim,
        "PC1",
        &["interface eth0", "ip address 192.168.1.10 255.255.255.0", "exit", "ip default-gateway 192.168.1.1"],
    );
    configure(
        &mut sim,
        "PC2",
        &["interface eth0", "ip address 10.0.0.10 255.255.255.0", "exit", "ip default-gateway 10.0.0.1"],
    );
    configure(
        &mut sim,
        "R1",
        &[
            "interface Gi0/0",
            "ip address 192.168.1.1 255.255.255.0",
            "interface Gi0/1",
            "ip address 10.0.0.1 255.255.255.0",
        ],
    );
    sim
}

// =============================================================================
// Reachability
// =============================================================================

#[test]
fn test_ping_across_router() {
    let mut sim = routed();
    match ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)) {
        EchoOutcome::Reply { from, ttl, rtt } => {
            assert_eq!(from, Ipv4Addr::new(10, 0, 0, 10));
            assert_eq!(ttl, 63);
            assert!(rtt > Duration::ZERO);
        }
        other => panic!("expected a reply, got {:?}", other),
    }
}

#[test]
fn test_second_ping_is_faster_once_arp_is_warm() {
    let mut sim = routed();
    let rtt = |outcome| match outcome {
        EchoOutcome::Reply { rtt, .. } => rtt,
        other => panic!("expected a reply, got {:?}", other),
    };
    let cold = rtt(ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)));
    let warm = rtt(ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)));
    assert!(warm < cold);
}

#[test]
fn test_ping_own_address() {
    let mut sim = routed();
    assert!(matches!(
        ping(&mut sim, "PC1", Ipv4Addr::new(192, 168, 1, 10)),
        EchoOutcome::Reply { .. }
    ));
}

#[test]
fn test_ping_without_address_is_unreachable_and_leaves_nothing_pending() {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    let pc = sim.add_node("PC1", DeviceType::Host).unwrap();
    let mut rx = sim.ping(pc, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    assert_eq!(rx.try_recv().unwrap(), Some(EchoOutcome::Unreachable));
    assert_eq!(sim.service::<IcmpService>(pc).unwrap().pending_count(), 0);
}

#[test]
fn test_missing_route_on_router_is_unreachable() {
    let mut sim = routed();
    assert_eq!(
        ping(&mut sim, "PC1", Ipv4Addr::new(172, 16, 0, 1)),
        EchoOutcome::Unreachable
    );
    let pc1 = sim.node_by_name("PC1").unwrap();
    assert_eq!(sim.service::<IcmpService>(pc1).unwrap().pending_count(), 0);
}

#[test]
fn test_unowned_on_link_address_times_out_with_nothing_pending() {
    let mut sim = routed();
    let target = Ipv4Addr::new(192, 168, 1, 77);
    let (outcome, _) = timed_ping(&mut sim, "PC1", target);
    assert_eq!(outcome, EchoOutcome::Unreachable);

    // Let the ARP resends run out as well.
    sim.advance(Duration::from_secs(5));
    let pc1 = sim.node_by_name("PC1").unwrap();
    assert_eq!(sim.service::<IcmpService>(pc1).unwrap().pending_count(), 0);
    assert!(!sim.service::<ArpService>(pc1).unwrap().is_pending(target));
}

fn long_echo_timeout() -> SimulationConfig {
    let mut config = SimulationConfig::test();
    config.icmp.timeout_ms = 20_000;
    config
}

#[test]
fn test_failed_arp_reports_unreachable_before_echo_timeout() {
    let mut sim = routed_with(long_echo_timeout());
    let (outcome, took) = timed_ping(&mut sim, "PC1", Ipv4Addr::new(192, 168, 1, 77));
    assert_eq!(outcome, EchoOutcome::Unreachable);
    // Request plus three resends one second apart, then give up.
    assert!(took >= Duration::from_secs(4), "resolved after {}", took);
    assert!(took < Duration::from_secs(5), "resolved after {}", took);
    let pc1 = sim.node_by_name("PC1").unwrap();
    assert_eq!(sim.service::<IcmpService>(pc1).unwrap().pending_count(), 0);
}

#[test]
fn test_router_reports_failed_next_hop_resolution() {
    let mut sim = routed_with(long_echo_timeout());
    let pc1 = sim.node_by_name("PC1").unwrap();
    let mut events = sim.subscribe();
    let (outcome, took) = timed_ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 77));
    assert_eq!(outcome, EchoOutcome::Unreachable);
    assert!(took < Duration::from_secs(20), "resolved after {}", took);

    let mut from_router = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEventKind::PacketReceived { src, protocol: "icmp", .. } = event.kind {
            from_router |= event.node == Some(pc1) && src == Ipv4Addr::new(192, 168, 1, 1);
        }
    }
    assert!(from_router);
    assert_eq!(sim.service::<IcmpService>(pc1).unwrap().pending_count(), 0);
}

#[test]
fn test_expired_ttl_is_answered_by_router() {
    let mut sim = routed();
    let pc1 = sim.node_by_name("PC1").unwrap();
    let pc2 = sim.node_by_name("PC2").unwrap();
    let packet = Packet::new(
        Ipv4Addr::new(192, 168, 1, 10),
        Ipv4Addr::new(10, 0, 0, 10),
        PacketPayload::Icmp(IcmpMessage {
            kind: IcmpKind::EchoRequest,
            identifier: 900,
            sequence: 0,
            data_len: 32,
        }),
    )
    .with_ttl(1);
    let mut events = sim.subscribe();
    sim.send_packet(pc1, packet).unwrap();
    sim.advance(Duration::from_secs(3));

    let mut reached_pc2 = false;
    let mut error_from_router = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEventKind::PacketReceived { src, protocol: "icmp", .. } = event.kind {
            reached_pc2 |= event.node == Some(pc2);
            error_from_router |= event.node == Some(pc1) && src == Ipv4Addr::new(192, 168, 1, 1);
        }
    }
    assert!(!reached_pc2);
    assert!(error_from_router);
}

// =============================================================================
// Handler chain
// =============================================================================

/// Swallows every received frame and counts them.
struct Blackhole {
    seen: Arc<AtomicUsize>,
    verdict: Outcome,
}

impl FrameListener for Blackhole {
    fn on_frame(&mut self, _ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome {
        if event.direction == Direction::Receive {
            self.seen.fetch_add(1, Ordering::SeqCst);
            return self.verdict;
        }
        Outcome::Continue
    }
}

impl Listener for Blackhole {
    fn name(&self) -> &'static str {
        "blackhole"
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

fn blackhole(sim: &mut Simulation, node: NodeId, verdict: Outcome) -> (Arc<AtomicUsize>, ListenerId) {
    let seen = Arc::new(AtomicUsize::new(0));
    let listener = Box::new(Blackhole {
        seen: seen.clone(),
        verdict,
    });
    let id = sim.register_listener(node, listener, None).unwrap();
    (seen, id)
}

#[test]
fn test_continue_listener_observes_without_interfering() {
    let mut sim = routed();
    let pc2 = sim.node_by_name("PC2").unwrap();
    let (seen, _) = blackhole(&mut sim, pc2, Outcome::Continue);
    assert!(matches!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)),
        EchoOutcome::Reply { .. }
    ));
    assert!(seen.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_stop_listener_suppresses_delivery() {
    let mut sim = routed();
    let pc2 = sim.node_by_name("PC2").unwrap();
    let (seen, id) = blackhole(&mut sim, pc2, Outcome::Stop);
    assert_eq!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)),
        EchoOutcome::Unreachable
    );
    assert!(seen.load(Ordering::SeqCst) > 0);

    sim.deregister_listener(pc2, id).unwrap();
    sim.advance(Duration::from_secs(5));
    assert!(matches!(
        ping(&mut sim, "PC1", Ipv4Addr::new(10, 0, 0, 10)),
        EchoOutcome::Reply { .. }
    ));
}

#[test]
fn test_registered_listener_joins_end_of_chain() {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    let pc = sim.add_node("PC1", DeviceType::Host).unwrap();
    let names = sim.node(pc).unwrap().listener_names();
    blackhole(&mut sim, pc, Outcome::Continue);
    let mut after = names.clone();
    after.push("blackhole");
    assert_eq!(sim.node(pc).unwrap().listener_names(), after);
}
