use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point on the virtual timeline, in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualTime(pub u64);

/// A span of virtual time, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn from_micros(micros: u64) -> Self {
        VirtualTime(micros)
    }

    pub fn from_millis(millis: u64) -> Self {
        VirtualTime(millis * 1_000)
    }

    pub fn from_secs(secs: u64) -> Self {
        VirtualTime(secs * 1_000_000)
    }

    /// Time elapsed since `earlier`, saturating at zero.
    pub fn since(&self, earlier: VirtualTime) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Render as `HH:MM:SS.mmm` for clock subscribers and `show clock`.
    pub fn clock_string(&self) -> String {
        let millis = self.as_millis();
        let hours = millis / 3_600_000;
        let minutes = (millis / 60_000) % 60;
        let seconds = (millis / 1_000) % 60;
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1_000)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clock_string())
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;

    fn add(self, rhs: Duration) -> Self::Output {
        VirtualTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Duration> for VirtualTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

/// Saturates at zero, like `since`.
impl Sub<VirtualTime> for VirtualTime {
    type Output = Duration;

    fn sub(self, rhs: VirtualTime) -> Self::Output {
        self.since(rhs)
    }
}

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub fn from_micros(micros: u64) -> Self {
        Duration(micros)
    }

    pub fn from_millis(millis: u64) -> Self {
        Duration(millis * 1_000)
    }

    pub fn from_secs(secs: u64) -> Self {
        Duration(secs * 1_000_000)
    }

    /// Rounds to the nearest microsecond; negative and NaN inputs become zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration((secs * 1_000_000.0).round() as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000 {
            write!(f, "{:.3}s", self.as_secs_f64())
        } else if self.0 >= 1_000 {
            write!(f, "{:.3}ms", self.0 as f64 / 1_000.0)
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_string() {
        let t = VirtualTime::from_millis(3_723_045);
        assert_eq!(t.clock_string(), "01:02:03.045");
    }

    #[test]
    fn test_from_secs_f64_rounds_and_clamps() {
        assert_eq!(Duration::from_secs_f64(0.0000015), Duration(2));
        assert_eq!(Duration::from_secs_f64(-1.0), Duration::ZERO);
        assert_eq!(Duration::from_secs_f64(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_subtracting_later_instant_saturates() {
        let early = VirtualTime::from_secs(1);
        let late = VirtualTime::from_secs(3);
        assert_eq!(late - early, Duration::from_secs(2));
        assert_eq!(early - late, Duration::ZERO);
    }
}
