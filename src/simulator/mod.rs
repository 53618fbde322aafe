//! Virtual time, the scheduler, and the simulated world built on them.

mod clock;
mod delivery;
mod driver;
mod executor;
mod network;
mod rng;
mod scheduler;
mod time;

pub use clock::{ManualWallClock, SpeedMode, SpeedProfile, SpeedProfiles, SystemWallClock, WallClock};
pub use driver::{RealtimeDriver, SharedSimulation};
pub use executor::Simulation;
pub use network::Network;
pub use rng::DeterministicRng;
pub use scheduler::{
    advance, poll, run_until, Callback, ClockSubscription, Scheduler, SchedulerContext, TimerHandle, TimerId,
};
pub use time::{Duration, VirtualTime};
