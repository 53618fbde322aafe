//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These cover the paths every simulated second goes through: timer
//! dispatch, frame delivery over a link, switch forwarding, and shell
//! command resolution.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use netsim::message::{Frame, FramePayload};
use netsim::network::EchoOutcome;
use netsim::simulator::SchedulerContext;
use netsim::{DeviceType, Duration, InterfaceId, Shell, Simulation, SimulationConfig};
use std::net::Ipv4Addr;

/// Timers armed up front, then drained by one `advance`.
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    for timers in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(timers));
        group.bench_function(format!("once_{}", timers), |b| {
            b.iter_batched(
                || {
                    let mut sim = Simulation::stepped(SimulationConfig::test());
                    for i in 0..timers {
                        sim.scheduler().once(Duration::from_micros(i * 7 % 5_000), |_: &mut Simulation| {});
                    }
                    sim
                },
                |mut sim| black_box(sim.advance(Duration::from_millis(10))),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Raw frames pushed across one cable, full and half duplex.
fn bench_link_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_delivery");
    group.throughput(Throughput::Elements(64));

    group.bench_function("raw_frames_64", |b| {
        b.iter_batched(
            || {
                let mut sim = Simulation::stepped(SimulationConfig::test());
                let a = sim.add_node("A", DeviceType::Host).unwrap();
                let z = sim.add_node("Z", DeviceType::Host).unwrap();
                sim.connect_by_name(("A", "eth0"), ("Z", "eth0"), 100.0).unwrap();
                let mac = |node| sim.node(node).unwrap().interface(InterfaceId(0)).unwrap().mac();
                let frame = Frame::new(mac(a), mac(z), FramePayload::Raw(Bytes::from(vec![0u8; 512])));
                (sim, a, frame)
            },
            |(mut sim, a, frame)| {
                for _ in 0..64 {
                    sim.send_frame(a, InterfaceId(0), frame.clone()).unwrap();
                }
                black_box(sim.advance(Duration::from_secs(1)))
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// One echo through a converged switch with a warm ARP cache.
fn bench_switched_ping(c: &mut Criterion) {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    sim.add_node("S1", DeviceType::Switch).unwrap();
    for (host, port, address) in [("PC1", "Fa0/1", "10.0.0.1"), ("PC2", "Fa0/2", "10.0.0.2")] {
        let node = sim.add_node(host, DeviceType::Host).unwrap();
        sim.connect_by_name((host, "eth0"), ("S1", port), 10.0).unwrap();
        let line = format!("ip address {} 255.255.255.0", address);
        Shell::new(&sim, node)
            .unwrap()
            .exec_script(&mut sim, ["enable", "configure terminal", "interface eth0", line.as_str()])
            .unwrap();
    }
    sim.advance(Duration::from_secs(10));
    let pc1 = sim.node_by_name("PC1").unwrap();
    let dst = Ipv4Addr::new(10, 0, 0, 2);

    let mut echo = |sim: &mut Simulation| {
        let mut rx = sim.ping(pc1, dst).unwrap();
        loop {
            if let Ok(Some(outcome)) = rx.try_recv() {
                return outcome;
            }
            sim.advance(Duration::from_millis(1));
        }
    };
    assert!(matches!(echo(&mut sim), EchoOutcome::Reply { .. }));

    c.bench_function("switched_ping_warm", |b| b.iter(|| black_box(echo(&mut sim))));
}

/// Abbreviated command lines resolved against the router tree.
fn bench_shell_resolution(c: &mut Criterion) {
    let mut sim = Simulation::stepped(SimulationConfig::test());
    let r1 = sim.add_node("R1", DeviceType::Router).unwrap();
    let mut shell = Shell::new(&sim, r1).unwrap();
    shell.exec_script(&mut sim, ["enable", "conf t", "int gi0/0"]).unwrap();

    c.bench_function("shell_standby_priority", |b| {
        b.iter(|| black_box(shell.exec(&mut sim, "stand 1 prio 110").unwrap()))
    });
}

criterion_group!(
    benches,
    bench_scheduler,
    bench_link_delivery,
    bench_switched_ping,
    bench_shell_resolution
);
criterion_main!(benches);
