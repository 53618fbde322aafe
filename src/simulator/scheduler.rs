//! Virtual-time scheduler.
//!
//! Timers are keyed by their virtual deadline and fire in (deadline, arm order)
//! order. Wall-clock waits are never stored: they are derived from the current
//! speed whenever a driver asks, which is what keeps speed changes from
//! losing, reordering or double-firing anything already armed.
//!
//! Callbacks receive the context that owns the scheduler (normally the
//! `Simulation`). Firing therefore happens through the free functions
//! [`advance`], [`run_until`] and [`poll`], which pop one timer at a time so
//! the callback can take `&mut` of the whole context.

use super::clock::{SpeedMode, SpeedProfile, SpeedProfiles, WallClock};
use super::time::{Duration, VirtualTime};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

pub type Callback<C> = Box<dyn FnMut(&mut C) + Send>;

/// Implemented by whatever owns a `Scheduler` and is handed to its callbacks.
pub trait SchedulerContext: Sized {
    fn scheduler(&mut self) -> &mut Scheduler<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Cancellation handle returned by `once` and `repeat`.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: TimerId,
    state: Arc<TimerState>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancelling a timer that already fired (or was cancelled) is a no-op.
    pub fn cancel(&self) {
        if !self.state.finished.load(AtomicOrdering::SeqCst) {
            self.state.cancelled.store(true, AtomicOrdering::SeqCst);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.cancelled.load(AtomicOrdering::SeqCst)
            && !self.state.finished.load(AtomicOrdering::SeqCst)
    }
}

/// Handle for a clock-string subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockSubscription(u64);

struct TimerEntry<C> {
    deadline: VirtualTime,
    seq: u64,
    period: Option<Duration>,
    callback: Callback<C>,
    state: Arc<TimerState>,
}

impl<C> TimerEntry<C> {
    fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(AtomicOrdering::SeqCst)
    }
}

impl<C> PartialEq for TimerEntry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<C> Eq for TimerEntry<C> {}

impl<C> PartialOrd for TimerEntry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for TimerEntry<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<C> {
    wall: Arc<dyn WallClock>,
    profiles: SpeedProfiles,
    mode: SpeedMode,
    /// Last non-paused mode; links keep using its physics while paused.
    running_mode: SpeedMode,
    anchor_wall: std::time::Duration,
    anchor_virtual: VirtualTime,
    /// Deadline of the timer currently being dispatched.
    dispatching: Option<VirtualTime>,
    timers: BinaryHeap<TimerEntry<C>>,
    next_seq: u64,
    rescheduled: u64,
    subscribers: Vec<(ClockSubscription, Box<dyn FnMut(&str) + Send>)>,
    next_subscription: u64,
}

impl<C> Scheduler<C> {
    pub fn new(wall: Arc<dyn WallClock>, profiles: SpeedProfiles, mode: SpeedMode) -> Self {
        let anchor_wall = wall.now();
        Scheduler {
            wall,
            profiles,
            mode,
            running_mode: if mode.is_paused() {
                SpeedMode::RealTime
            } else {
                mode
            },
            anchor_wall,
            anchor_virtual: VirtualTime::ZERO,
            dispatching: None,
            timers: BinaryHeap::new(),
            next_seq: 0,
            rescheduled: 0,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn speed(&self) -> SpeedMode {
        self.mode
    }

    pub fn profile(&self) -> SpeedProfile {
        self.profiles.profile(self.mode)
    }

    /// Profile whose physics multipliers links should use right now.
    pub fn physics(&self) -> SpeedProfile {
        self.profiles.profile(self.running_mode)
    }

    pub fn propagation_multiplier(&self) -> f64 {
        self.profile().propagation_multiplier
    }

    pub fn transmission_multiplier(&self) -> f64 {
        self.profile().transmission_multiplier
    }

    fn wall_derived(&self, wall_now: std::time::Duration) -> VirtualTime {
        let rate = self.profile().rate;
        let wall_elapsed = wall_now.saturating_sub(self.anchor_wall);
        let virtual_elapsed = (wall_elapsed.as_nanos() as f64 * rate / 1_000.0) as u64;
        VirtualTime(self.anchor_virtual.0 + virtual_elapsed)
    }

    /// Current virtual time. Inside a timer callback this is the timer's own
    /// deadline, so work scheduled from callbacks is relative to the event.
    pub fn now(&self) -> VirtualTime {
        match self.dispatching {
            Some(t) => t,
            None => self.wall_derived(self.wall.now()),
        }
    }

    /// Virtual milliseconds since start, frozen while paused.
    pub fn elapsed_virtual_time(&self) -> u64 {
        self.now().as_millis()
    }

    /// Switch speed mode without a jump in virtual time.
    pub fn set_speed(&mut self, mode: SpeedMode) {
        let wall_now = self.wall.now();
        let now = match self.dispatching {
            Some(t) => t,
            None => self.wall_derived(wall_now),
        };
        self.anchor_virtual = now;
        self.anchor_wall = wall_now;
        let previous = self.mode;
        self.mode = mode;
        if !mode.is_paused() {
            self.running_mode = mode;
        }
        self.reschedule_all();
        debug!(from = %previous, to = %mode, at = %now, "scheduler speed changed");
    }

    /// Re-queue every outstanding timer against the current rate, dropping
    /// cancelled entries. Deadlines are virtual, so order is preserved.
    fn reschedule_all(&mut self) {
        let entries: Vec<TimerEntry<C>> = std::mem::take(&mut self.timers).into_vec();
        for entry in entries {
            if entry.is_cancelled() {
                continue;
            }
            self.rescheduled += 1;
            self.timers.push(entry);
        }
    }

    /// Number of timer re-queues performed by speed changes so far.
    pub fn rescheduled_count(&self) -> u64 {
        self.rescheduled
    }

    /// Wall-clock time a virtual delay takes at the current speed.
    /// `None` while paused: the wait is unbounded.
    pub fn delay_for(&self, delay: Duration) -> Option<std::time::Duration> {
        let rate = self.profile().rate;
        if rate <= 0.0 {
            return None;
        }
        Some(std::time::Duration::from_nanos(
            (delay.as_micros() as f64 * 1_000.0 / rate) as u64,
        ))
    }

    pub fn once<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        let deadline = self.now() + delay;
        self.arm(deadline, None, Box::new(callback))
    }

    /// Repeating timer. The first firing happens after `first_delay` (or
    /// `period` when `None`), then every `period` from the previous deadline.
    pub fn repeat<F>(&mut self, period: Duration, callback: F, first_delay: Option<Duration>) -> TimerHandle
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        let period = if period == Duration::ZERO {
            Duration::from_micros(1)
        } else {
            period
        };
        let deadline = self.now() + first_delay.unwrap_or(period);
        self.arm(deadline, Some(period), Box::new(callback))
    }

    fn arm(&mut self, deadline: VirtualTime, period: Option<Duration>, callback: Callback<C>) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let state = Arc::new(TimerState::default());
        self.timers.push(TimerEntry {
            deadline,
            seq,
            period,
            callback,
            state: state.clone(),
        });
        TimerHandle {
            id: TimerId(seq),
            state,
        }
    }

    pub fn active_timers(&self) -> usize {
        self.timers.iter().filter(|e| !e.is_cancelled()).count()
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&mut self) -> Option<VirtualTime> {
        while let Some(top) = self.timers.peek() {
            if top.is_cancelled() {
                self.timers.pop();
            } else {
                return Some(top.deadline);
            }
        }
        None
    }

    /// Wall-clock wait until the next timer is due, at the current speed.
    pub fn next_wall_wait(&mut self) -> Option<std::time::Duration> {
        let deadline = self.next_deadline()?;
        let remaining = deadline.since(self.now());
        self.delay_for(remaining)
    }

    fn pop_due(&mut self, target: VirtualTime) -> Option<TimerEntry<C>> {
        loop {
            let top = self.timers.peek()?;
            if top.is_cancelled() {
                self.timers.pop();
                continue;
            }
            if top.deadline > target {
                return None;
            }
            let entry = self.timers.pop()?;
            self.dispatching = Some(entry.deadline);
            return Some(entry);
        }
    }

    fn finish(&mut self, mut entry: TimerEntry<C>) {
        self.dispatching = None;
        match entry.period {
            Some(period) if !entry.is_cancelled() => {
                entry.deadline += period;
                entry.seq = self.next_seq;
                self.next_seq += 1;
                self.timers.push(entry);
            }
            _ => {
                entry.state.finished.store(true, AtomicOrdering::SeqCst);
            }
        }
    }

    /// Move the virtual anchor forward to `target` without touching the rate.
    fn settle(&mut self, target: VirtualTime) {
        let wall_now = self.wall.now();
        if self.wall_derived(wall_now) < target {
            self.anchor_virtual = target;
            self.anchor_wall = wall_now;
        }
    }

    pub fn subscribe_to_clock<F>(&mut self, callback: F) -> ClockSubscription
    where
        F: FnMut(&str) + Send + 'static,
    {
        let sub = ClockSubscription(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((sub, Box::new(callback)));
        sub
    }

    pub fn unsubscribe_from_clock(&mut self, sub: ClockSubscription) {
        self.subscribers.retain(|(id, _)| *id != sub);
    }

    /// Push the current clock string to every subscriber.
    pub fn notify_clock(&mut self) {
        let text = self.now().clock_string();
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&text);
        }
    }
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("mode", &self.mode)
            .field("timers", &self.timers.len())
            .finish()
    }
}

/// Fire every timer due at or before `target`, in order, then move the clock
/// to `target`. Returns the number of callbacks run.
pub fn run_until<C: SchedulerContext>(ctx: &mut C, target: VirtualTime) -> usize {
    let mut fired = 0;
    while let Some(mut entry) = ctx.scheduler().pop_due(target) {
        (entry.callback)(ctx);
        ctx.scheduler().finish(entry);
        fired += 1;
    }
    ctx.scheduler().settle(target);
    fired
}

/// Skip virtual time forward by `by`, firing everything on the way.
/// Does nothing while paused.
pub fn advance<C: SchedulerContext>(ctx: &mut C, by: Duration) -> usize {
    if ctx.scheduler().speed().is_paused() {
        return 0;
    }
    let target = ctx.scheduler().now() + by;
    run_until(ctx, target)
}

/// Fire timers that are due according to the wall clock.
pub fn poll<C: SchedulerContext>(ctx: &mut C) -> usize {
    let now = ctx.scheduler().now();
    let mut fired = 0;
    while let Some(mut entry) = ctx.scheduler().pop_due(now) {
        (entry.callback)(ctx);
        ctx.scheduler().finish(entry);
        fired += 1;
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::clock::ManualWallClock;

    struct Recorder {
        scheduler: Scheduler<Recorder>,
        log: Vec<(u64, &'static str)>,
    }

    impl SchedulerContext for Recorder {
        fn scheduler(&mut self) -> &mut Scheduler<Self> {
            &mut self.scheduler
        }
    }

    fn recorder(mode: SpeedMode) -> (Recorder, ManualWallClock) {
        let wall = ManualWallClock::new();
        let scheduler = Scheduler::new(Arc::new(wall.clone()), SpeedProfiles::default(), mode);
        (
            Recorder {
                scheduler,
                log: Vec::new(),
            },
            wall,
        )
    }

    fn mark(tag: &'static str) -> impl FnMut(&mut Recorder) + Send + 'static {
        move |r: &mut Recorder| {
            let now = r.scheduler.now().as_millis();
            r.log.push((now, tag));
        }
    }

    #[test]
    fn test_once_fires_in_deadline_then_arm_order() {
        let (mut r, _) = recorder(SpeedMode::RealTime);
        r.scheduler.once(Duration::from_millis(20), mark("b"));
        r.scheduler.once(Duration::from_millis(10), mark("a"));
        r.scheduler.once(Duration::from_millis(20), mark("c"));
        advance(&mut r, Duration::from_millis(50));
        assert_eq!(r.log, vec![(10, "a"), (20, "b"), (20, "c")]);
        assert_eq!(r.scheduler.now().as_millis(), 50);
    }

    #[test]
    fn test_cancel_before_and_after_firing() {
        let (mut r, _) = recorder(SpeedMode::RealTime);
        let cancelled = r.scheduler.once(Duration::from_millis(5), mark("never"));
        let fired = r.scheduler.once(Duration::from_millis(5), mark("fired"));
        cancelled.cancel();
        assert!(!cancelled.is_active());
        advance(&mut r, Duration::from_millis(10));
        assert_eq!(r.log, vec![(5, "fired")]);
        assert!(!fired.is_active());
        // no-op after firing
        fired.cancel();
        assert_eq!(r.scheduler.active_timers(), 0);
    }

    #[test]
    fn test_repeat_rearms_from_previous_deadline() {
        let (mut r, _) = recorder(SpeedMode::RealTime);
        let handle = r.scheduler.repeat(Duration::from_millis(10), mark("tick"), Some(Duration::from_millis(3)));
        advance(&mut r, Duration::from_millis(35));
        let times: Vec<u64> = r.log.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![3, 13, 23, 33]);
        handle.cancel();
        advance(&mut r, Duration::from_millis(100));
        assert_eq!(r.log.len(), 4);
    }

    #[test]
    fn test_repeat_can_cancel_itself() {
        let (mut r, _) = recorder(SpeedMode::RealTime);
        let slot: Arc<parking_lot::Mutex<Option<TimerHandle>>> = Arc::new(parking_lot::Mutex::new(None));
        let inner = slot.clone();
        let handle = r.scheduler.repeat(
            Duration::from_millis(10),
            move |rec: &mut Recorder| {
                rec.log.push((rec.scheduler.now().as_millis(), "once"));
                if let Some(h) = inner.lock().as_ref() {
                    h.cancel();
                }
            },
            None,
        );
        *slot.lock() = Some(handle);
        advance(&mut r, Duration::from_millis(100));
        assert_eq!(r.log, vec![(10, "once")]);
    }

    #[test]
    fn test_speed_change_is_continuous() {
        let (r, wall) = recorder(SpeedMode::RealTime);
        let mut scheduler = r.scheduler;
        wall.advance(std::time::Duration::from_millis(1_000));
        for mode in [SpeedMode::Faster, SpeedMode::Slower, SpeedMode::Paused, SpeedMode::RealTime] {
            let before = scheduler.elapsed_virtual_time();
            scheduler.set_speed(mode);
            let after = scheduler.elapsed_virtual_time();
            assert_eq!(before, after, "jump switching to {}", mode);
            wall.advance(std::time::Duration::from_millis(400));
        }
    }

    #[test]
    fn test_rates_follow_speed_mode() {
        let (r, wall) = recorder(SpeedMode::RealTime);
        let mut scheduler = r.scheduler;
        wall.advance(std::time::Duration::from_millis(100));
        assert_eq!(scheduler.elapsed_virtual_time(), 100);

        scheduler.set_speed(SpeedMode::Faster);
        wall.advance(std::time::Duration::from_millis(100));
        assert_eq!(scheduler.elapsed_virtual_time(), 500);

        scheduler.set_speed(SpeedMode::Paused);
        wall.advance(std::time::Duration::from_secs(60));
        assert_eq!(scheduler.elapsed_virtual_time(), 500);
        assert_eq!(scheduler.delay_for(Duration::from_millis(1)), None);

        scheduler.set_speed(SpeedMode::Slower);
        wall.advance(std::time::Duration::from_millis(400));
        assert_eq!(scheduler.elapsed_virtual_time(), 600);
    }

    #[test]
    fn test_delay_for_scales_with_rate() {
        let (r, _) = recorder(SpeedMode::Faster);
        let mut scheduler = r.scheduler;
        assert_eq!(
            scheduler.delay_for(Duration::from_secs(4)),
            Some(std::time::Duration::from_secs(1))
        );
        scheduler.set_speed(SpeedMode::Slower);
        assert_eq!(
            scheduler.delay_for(Duration::from_secs(1)),
            Some(std::time::Duration::from_secs(4))
        );
    }

    #[test]
    fn test_speed_change_keeps_pending_timers() {
        let (mut r, wall) = recorder(SpeedMode::RealTime);
        r.scheduler.once(Duration::from_millis(100), mark("a"));
        r.scheduler.once(Duration::from_millis(200), mark("b"));
        wall.advance(std::time::Duration::from_millis(50));
        r.scheduler.set_speed(SpeedMode::Faster);
        assert_eq!(r.scheduler.rescheduled_count(), 2);
        assert_eq!(r.scheduler.next_wall_wait(), Some(std::time::Duration::from_micros(12_500)));

        wall.advance(std::time::Duration::from_millis(20));
        poll(&mut r);
        assert_eq!(r.log, vec![(100, "a")]);
        wall.advance(std::time::Duration::from_millis(100));
        poll(&mut r);
        poll(&mut r);
        assert_eq!(r.log, vec![(100, "a"), (200, "b")]);
    }

    #[test]
    fn test_advance_is_noop_while_paused() {
        let (mut r, _) = recorder(SpeedMode::Paused);
        r.scheduler.once(Duration::from_millis(1), mark("x"));
        assert_eq!(advance(&mut r, Duration::from_secs(5)), 0);
        assert!(r.log.is_empty());
    }

    #[test]
    fn test_clock_subscription() {
        let (mut r, _) = recorder(SpeedMode::RealTime);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = r.scheduler.subscribe_to_clock(move |s| sink.lock().push(s.to_string()));
        advance(&mut r, Duration::from_millis(1_500));
        r.scheduler.notify_clock();
        r.scheduler.unsubscribe_from_clock(sub);
        r.scheduler.notify_clock();
        assert_eq!(*seen.lock(), vec!["00:00:01.500".to_string()]);
    }
}
