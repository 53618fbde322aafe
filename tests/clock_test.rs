//! Virtual clock tests.
//!
//! Speed changes must never make virtual time jump, pausing must freeze it,
//! and timers armed before a speed change still fire at their virtual
//! deadline.

use netsim::simulator::{ManualWallClock, SchedulerContext};
use netsim::{Duration, EngineEventKind, Simulation, SimulationConfig, SpeedMode, VirtualTime};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn secs(s: u64) -> std::time::Duration {
    std::time::Duration::from_secs(s)
}

fn manual() -> (Arc<ManualWallClock>, Simulation) {
    let wall = Arc::new(ManualWallClock::new());
    let sim = Simulation::with_wall_clock(SimulationConfig::default(), wall.clone());
    (wall, sim)
}

// =============================================================================
// Continuity
// =============================================================================

#[test]
fn test_virtual_time_is_continuous_across_speed_changes() {
    let (wall, mut sim) = manual();
    wall.advance(secs(1));
    assert_eq!(sim.now(), VirtualTime::from_secs(1));

    sim.set_speed(SpeedMode::Faster);
    assert_eq!(sim.now(), VirtualTime::from_secs(1));
    wall.advance(secs(1));
    assert_eq!(sim.now(), VirtualTime::from_secs(5));

    sim.set_speed(SpeedMode::Paused);
    assert_eq!(sim.now(), VirtualTime::from_secs(5));
    wall.advance(secs(30));
    assert_eq!(sim.now(), VirtualTime::from_secs(5));
    assert_eq!(sim.elapsed_virtual_time(), 5_000);

    sim.set_speed(SpeedMode::Slower);
    wall.advance(secs(4));
    assert_eq!(sim.now(), VirtualTime::from_secs(6));
}

#[test]
fn test_advance_does_nothing_while_paused() {
    let (_wall, mut sim) = manual();
    sim.set_speed(SpeedMode::Paused);
    sim.advance(Duration::from_secs(10));
    assert_eq!(sim.now(), VirtualTime::ZERO);
    assert!(sim.next_wall_wait().is_none());
}

// =============================================================================
// Timers under speed changes
// =============================================================================

#[test]
fn test_pending_timer_fires_at_virtual_deadline_after_speedup() {
    let (wall, mut sim) = manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    sim.scheduler().once(Duration::from_secs(10), move |_: &mut Simulation| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    wall.advance(secs(2));
    sim.poll();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // 8 virtual seconds remain; at 4x that is 2 wall seconds.
    sim.set_speed(SpeedMode::Faster);
    assert_eq!(sim.next_wall_wait(), Some(secs(2)));
    wall.advance(std::time::Duration::from_millis(1_999));
    sim.poll();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    wall.advance(std::time::Duration::from_millis(1));
    sim.poll();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_paused_timers_survive_and_resume() {
    let (wall, mut sim) = manual();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    sim.scheduler().once(Duration::from_secs(3), move |_: &mut Simulation| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    sim.set_speed(SpeedMode::Paused);
    wall.advance(secs(60));
    sim.poll();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    sim.set_speed(SpeedMode::RealTime);
    wall.advance(secs(3));
    sim.poll();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_speed_change_is_broadcast_once() {
    let (_wall, mut sim) = manual();
    let mut events = sim.subscribe();
    sim.set_speed(SpeedMode::Slower);
    sim.set_speed(SpeedMode::Slower);
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.kind);
    }
    assert_eq!(
        seen,
        vec![EngineEventKind::SpeedChanged {
            mode: SpeedMode::Slower
        }]
    );
}

#[test]
fn test_clock_subscribers_receive_clock_string() {
    let (wall, mut sim) = manual();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sim.subscribe_to_clock(move |text| sink.lock().push(text.to_string()));
    wall.advance(secs(61));
    sim.notify_clock();
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], sim.now().clock_string());
}
