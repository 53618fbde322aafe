//! Realtime driver: fires timers against the wall clock on a tokio task.

use super::executor::Simulation;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Simulation shared between the driver task and whoever issues commands.
pub type SharedSimulation = Arc<Mutex<Simulation>>;

pub struct RealtimeDriver {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl RealtimeDriver {
    /// Start driving `sim`. Clock subscribers are notified at least every
    /// `clock_tick`; timers fire as soon as their wall-clock wait elapses.
    pub fn spawn(sim: SharedSimulation, clock_tick: std::time::Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                let wait = {
                    let mut sim = sim.lock();
                    sim.poll();
                    sim.notify_clock();
                    sim.next_wall_wait()
                };
                let wait = wait.map_or(clock_tick, |w| w.min(clock_tick));
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop.notified() => break,
                }
            }
            debug!("realtime driver stopped");
        });
        RealtimeDriver { task, shutdown }
    }

    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}
