//! Wall-clock sources and speed modes for the virtual clock.
//!
//! The scheduler never reads `Instant::now()` directly. It asks a `WallClock`,
//! so tests can drive wall time by hand with `ManualWallClock` the same way
//! the realtime driver drives it with `SystemWallClock`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic wall-clock readings, measured from an arbitrary origin.
pub trait WallClock: Send + Sync {
    fn now(&self) -> std::time::Duration;
}

/// Monotonic wall clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct SystemWallClock {
    origin: Instant,
}

impl SystemWallClock {
    pub fn new() -> Self {
        SystemWallClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemWallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemWallClock {
    fn now(&self) -> std::time::Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven wall clock for tests. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualWallClock {
    nanos: Arc<AtomicU64>,
}

impl ManualWallClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: std::time::Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: std::time::Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl WallClock for ManualWallClock {
    fn now(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// How fast virtual time runs relative to wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedMode {
    Faster,
    RealTime,
    Slower,
    Paused,
}

impl SpeedMode {
    pub fn is_paused(&self) -> bool {
        matches!(self, SpeedMode::Paused)
    }
}

impl Default for SpeedMode {
    fn default() -> Self {
        SpeedMode::RealTime
    }
}

impl fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeedMode::Faster => "faster",
            SpeedMode::RealTime => "realtime",
            SpeedMode::Slower => "slower",
            SpeedMode::Paused => "paused",
        };
        f.write_str(name)
    }
}

impl FromStr for SpeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "faster" | "fast" => Ok(SpeedMode::Faster),
            "realtime" | "real-time" | "normal" => Ok(SpeedMode::RealTime),
            "slower" | "slow" => Ok(SpeedMode::Slower),
            "paused" | "pause" => Ok(SpeedMode::Paused),
            other => Err(format!("unknown speed mode '{}'", other)),
        }
    }
}

/// Rate and physics multipliers applied while a speed mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    /// Virtual seconds that elapse per wall-clock second.
    pub rate: f64,
    /// Scales the signal propagation speed on links.
    pub propagation_multiplier: f64,
    /// Scales the serialization rate on links.
    pub transmission_multiplier: f64,
}

impl SpeedProfile {
    pub const PAUSED: SpeedProfile = SpeedProfile {
        rate: 0.0,
        propagation_multiplier: 0.0,
        transmission_multiplier: 0.0,
    };
}

/// Profiles for the three running modes. Paused is always all-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfiles {
    pub faster: SpeedProfile,
    pub realtime: SpeedProfile,
    pub slower: SpeedProfile,
}

impl Default for SpeedProfiles {
    fn default() -> Self {
        // Physical light-speed and Mbps rates are scaled down so a frame
        // takes a visible fraction of a second to cross a 100 m link.
        let physics = |rate| SpeedProfile {
            rate,
            propagation_multiplier: 1e-6,
            transmission_multiplier: 1e-4,
        };
        SpeedProfiles {
            faster: physics(4.0),
            realtime: physics(1.0),
            slower: physics(0.25),
        }
    }
}

impl SpeedProfiles {
    pub fn profile(&self, mode: SpeedMode) -> SpeedProfile {
        match mode {
            SpeedMode::Faster => self.faster,
            SpeedMode::RealTime => self.realtime,
            SpeedMode::Slower => self.slower,
            SpeedMode::Paused => SpeedProfile::PAUSED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualWallClock::new();
        let other = clock.clone();
        clock.advance(std::time::Duration::from_millis(250));
        assert_eq!(other.now(), std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_speed_mode_parse() {
        assert_eq!("Faster".parse::<SpeedMode>(), Ok(SpeedMode::Faster));
        assert_eq!("pause".parse::<SpeedMode>(), Ok(SpeedMode::Paused));
        assert!("warp".parse::<SpeedMode>().is_err());
    }

    #[test]
    fn test_paused_profile_is_zero() {
        let profiles = SpeedProfiles::default();
        let paused = profiles.profile(SpeedMode::Paused);
        assert_eq!(paused.rate, 0.0);
        assert_eq!(paused.propagation_multiplier, 0.0);
        assert_eq!(paused.transmission_multiplier, 0.0);
        assert!(profiles.profile(SpeedMode::Slower).rate > 0.0);
    }
}
