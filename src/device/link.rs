//! Point-to-point links with propagation and transmission delay.

use super::{DuplexSetting, LinkId, PortRef};
use crate::error::SimError;
use crate::simulator::{Duration, SpeedProfile, TimerHandle, VirtualTime};

/// Signal speed in copper as a fraction of c.
const VELOCITY_FACTOR: f64 = 2.0 / 3.0;
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Duplex {
    Full,
    Half,
}

#[derive(Debug)]
pub struct Link {
    id: LinkId,
    ends: [PortRef; 2],
    length_m: f64,
    speed_mbps: Option<u32>,
    /// Transmitter free time per direction; half duplex only uses slot 0.
    busy_until: [VirtualTime; 2],
    /// Latest scheduled arrival per direction.
    last_arrival: [VirtualTime; 2],
    in_flight: Vec<TimerHandle>,
    frames_carried: u64,
}

impl Link {
    pub fn new(id: LinkId, a: PortRef, b: PortRef, length_m: f64) -> Result<Self, SimError> {
        if !length_m.is_finite() || length_m < 0.0 {
            return Err(SimError::InvalidLength(length_m.to_string()));
        }
        Ok(Link {
            id,
            ends: [a, b],
            length_m,
            speed_mbps: None,
            busy_until: [VirtualTime::ZERO; 2],
            last_arrival: [VirtualTime::ZERO; 2],
            in_flight: Vec::new(),
            frames_carried: 0,
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn ends(&self) -> [PortRef; 2] {
        self.ends
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }

    pub fn speed_mbps(&self) -> Option<u32> {
        self.speed_mbps
    }

    /// Cap the link rate below the interface rates (cable category).
    pub fn set_speed_mbps(&mut self, speed: Option<u32>) {
        self.speed_mbps = speed;
    }

    pub fn frames_carried(&self) -> u64 {
        self.frames_carried
    }

    pub fn touches(&self, port: PortRef) -> bool {
        self.ends.contains(&port)
    }

    pub fn side_of(&self, port: PortRef) -> Option<usize> {
        self.ends.iter().position(|end| *end == port)
    }

    pub fn other_end(&self, port: PortRef) -> Option<PortRef> {
        self.side_of(port).map(|side| self.ends[1 - side])
    }

    /// Full duplex only when both ends are full; auto negotiates full.
    pub fn negotiate_duplex(a: DuplexSetting, b: DuplexSetting) -> Duplex {
        if a == DuplexSetting::Half || b == DuplexSetting::Half {
            Duplex::Half
        } else {
            Duplex::Full
        }
    }

    /// Line rate: the slowest of both interfaces and the link itself.
    pub fn effective_speed(&self, a_mbps: u32, b_mbps: u32) -> u32 {
        let speed = a_mbps.min(b_mbps);
        self.speed_mbps.map_or(speed, |cap| speed.min(cap)).max(1)
    }

    pub fn propagation_delay(&self, profile: SpeedProfile) -> Duration {
        if profile.propagation_multiplier <= 0.0 {
            return Duration::ZERO;
        }
        let velocity = VELOCITY_FACTOR * SPEED_OF_LIGHT * profile.propagation_multiplier;
        Duration::from_secs_f64(self.length_m / velocity)
    }

    pub fn transmission_delay(bytes: usize, speed_mbps: u32, profile: SpeedProfile) -> Duration {
        if profile.transmission_multiplier <= 0.0 || speed_mbps == 0 {
            return Duration::ZERO;
        }
        let bits_per_sec = speed_mbps as f64 * 1_000_000.0 * profile.transmission_multiplier;
        Duration::from_secs_f64((bytes * 8) as f64 / bits_per_sec)
    }

    /// Reserve the transmitter for `bytes` sent from `from` at `now` and
    /// return the arrival time at the far end. Frames queue behind earlier
    /// frames in the same direction (both directions under half duplex).
    pub fn reserve(
        &mut self,
        from: PortRef,
        now: VirtualTime,
        bytes: usize,
        speed_mbps: u32,
        duplex: Duplex,
        profile: SpeedProfile,
    ) -> Result<VirtualTime, SimError> {
        let side = self.side_of(from).ok_or(SimError::DanglingLink(self.id))?;
        let queue = match duplex {
            Duplex::Full => side,
            Duplex::Half => 0,
        };
        let start = self.busy_until[queue].max(now);
        let done = start + Self::transmission_delay(bytes, speed_mbps, profile);
        self.busy_until[queue] = done;
        let arrival = (done + self.propagation_delay(profile)).max(self.last_arrival[side]);
        self.last_arrival[side] = arrival;
        self.frames_carried += 1;
        Ok(arrival)
    }

    pub fn track(&mut self, handle: TimerHandle) {
        self.in_flight.retain(TimerHandle::is_active);
        self.in_flight.push(handle);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|h| h.is_active()).count()
    }

    /// Cancel every delivery still on the wire.
    pub fn cancel_in_flight(&mut self) -> usize {
        let cancelled = self.in_flight();
        for handle in self.in_flight.drain(..) {
            handle.cancel();
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{InterfaceId, NodeId};

    fn link(length: f64) -> Link {
        Link::new(
            LinkId(0),
            PortRef::new(NodeId(0), InterfaceId(0)),
            PortRef::new(NodeId(1), InterfaceId(0)),
            length,
        )
        .unwrap()
    }

    fn unscaled() -> SpeedProfile {
        SpeedProfile {
            rate: 1.0,
            propagation_multiplier: 1.0,
            transmission_multiplier: 1.0,
        }
    }

    #[test]
    fn test_delay_formulas() {
        let l = link(200.0);
        // 200 m at 2e8 m/s is 1 us
        assert_eq!(l.propagation_delay(unscaled()).as_micros(), 1);
        // 1250 bytes at 10 Mbps is 1 ms
        assert_eq!(Link::transmission_delay(1250, 10, unscaled()).as_micros(), 1000);
    }

    #[test]
    fn test_negative_length_rejected() {
        let result = Link::new(
            LinkId(0),
            PortRef::new(NodeId(0), InterfaceId(0)),
            PortRef::new(NodeId(1), InterfaceId(0)),
            -1.0,
        );
        assert!(matches!(result, Err(SimError::InvalidLength(_))));
    }

    #[test]
    fn test_duplex_negotiation() {
        use DuplexSetting::*;
        assert_eq!(Link::negotiate_duplex(Auto, Full), Duplex::Full);
        assert_eq!(Link::negotiate_duplex(Full, Half), Duplex::Half);
        assert_eq!(Link::negotiate_duplex(Auto, Auto), Duplex::Full);
    }

    #[test]
    fn test_half_duplex_shares_transmitter() {
        let profile = unscaled();
        let a = PortRef::new(NodeId(0), InterfaceId(0));
        let b = PortRef::new(NodeId(1), InterfaceId(0));

        let mut full = link(0.0);
        let fa = full.reserve(a, VirtualTime::ZERO, 1250, 10, Duplex::Full, profile).unwrap();
        let fb = full.reserve(b, VirtualTime::ZERO, 1250, 10, Duplex::Full, profile).unwrap();
        assert_eq!(fa.as_micros(), 1000);
        assert_eq!(fb.as_micros(), 1000);

        let mut half = link(0.0);
        let ha = half.reserve(a, VirtualTime::ZERO, 1250, 10, Duplex::Half, profile).unwrap();
        let hb = half.reserve(b, VirtualTime::ZERO, 1250, 10, Duplex::Half, profile).unwrap();
        assert_eq!(ha.as_micros(), 1000);
        assert_eq!(hb.as_micros(), 2000);
    }

    #[test]
    fn test_effective_speed_takes_slowest() {
        let mut l = link(1.0);
        assert_eq!(l.effective_speed(100, 1000), 100);
        l.set_speed_mbps(Some(10));
        assert_eq!(l.effective_speed(100, 1000), 10);
    }
}
