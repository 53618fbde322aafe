//! Handler chain: ordered dispatch of send/receive/lifecycle events to the
//! listeners registered on a node.
//!
//! A listener advertises the event kinds it handles through the `as_*`
//! capability accessors. Each visited listener returns an `Outcome`; the
//! strongest one seen is handed back so the caller can decide whether the
//! default action (forwarding, delivery upward, transmission) still runs.
//! `Stop` short-circuits: no later listener is visited.

use crate::device::{InterfaceId, NodeContext};
use crate::message::{Frame, Packet, PhysicalMessage};
use std::any::Any;
use std::net::Ipv4Addr;
use tracing::trace;

/// Listener verdict, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// No opinion; the default action still applies.
    Continue,
    /// Fully processed; skip the default action.
    Handled,
    /// End processing now; skip later listeners and the default action.
    Stop,
}

impl Outcome {
    pub fn suppresses_default(&self) -> bool {
        *self >= Outcome::Handled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Bits(Direction),
    Frame(Direction),
    Packet(Direction),
    Lifecycle,
}

#[derive(Debug, Clone, Copy)]
pub struct BitsEvent<'a> {
    pub direction: Direction,
    pub iface: InterfaceId,
    pub bits: &'a PhysicalMessage,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    pub direction: Direction,
    pub iface: InterfaceId,
    pub frame: &'a Frame,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketEvent<'a> {
    pub direction: Direction,
    /// Ingress interface on receive; the chosen egress (if known) on send.
    pub iface: Option<InterfaceId>,
    pub packet: &'a Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    InterfaceAdded(InterfaceId),
    InterfaceRemoved(InterfaceId),
    InterfaceUp(InterfaceId),
    InterfaceDown(InterfaceId),
    AddressChanged(InterfaceId),
    LinkAttached(InterfaceId),
    LinkDetached(InterfaceId),
}

impl LifecycleEvent {
    pub fn iface(&self) -> InterfaceId {
        match *self {
            LifecycleEvent::InterfaceAdded(i)
            | LifecycleEvent::InterfaceRemoved(i)
            | LifecycleEvent::InterfaceUp(i)
            | LifecycleEvent::InterfaceDown(i)
            | LifecycleEvent::AddressChanged(i)
            | LifecycleEvent::LinkAttached(i)
            | LifecycleEvent::LinkDetached(i) => i,
        }
    }
}

/// Timer tokens services arm through `NodeContext::schedule`; the token comes
/// back to the same listener's `on_timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    AgingSweep,
    Hello,
    PortTransition(InterfaceId),
    PortInfoExpiry(InterfaceId),
    ArpRetry(Ipv4Addr),
    EchoTimeout(u16),
    HsrpHello(InterfaceId, u8),
    HsrpActive(InterfaceId, u8),
    HsrpStandby(InterfaceId, u8),
    OspfDead(Ipv4Addr),
}

pub trait BitsListener {
    fn on_bits(&mut self, ctx: &mut NodeContext<'_>, event: BitsEvent<'_>) -> Outcome;
}

pub trait FrameListener {
    fn on_frame(&mut self, ctx: &mut NodeContext<'_>, event: FrameEvent<'_>) -> Outcome;
}

pub trait PacketListener {
    fn on_packet(&mut self, ctx: &mut NodeContext<'_>, event: PacketEvent<'_>) -> Outcome;
}

pub trait LifecycleListener {
    fn on_lifecycle(&mut self, ctx: &mut NodeContext<'_>, event: LifecycleEvent) -> Outcome;
}

/// Anything that can sit in a node's handler chain.
pub trait Listener: Any + Send {
    fn name(&self) -> &'static str;

    fn as_bits(&mut self) -> Option<&mut dyn BitsListener> {
        None
    }

    fn as_frames(&mut self) -> Option<&mut dyn FrameListener> {
        None
    }

    fn as_packets(&mut self) -> Option<&mut dyn PacketListener> {
        None
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn LifecycleListener> {
        None
    }

    /// Called once after registration; periodic timers are armed here.
    fn on_attach(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_timer(&mut self, _ctx: &mut NodeContext<'_>, _timer: TimerKind) {}

    /// Called when the listener is removed; must cancel every timer it owns.
    fn shutdown(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Origin of work started by the engine itself rather than a listener.
    pub const ENGINE: ListenerId = ListenerId(u64::MAX);
}

struct Registration {
    id: ListenerId,
    scope: Option<InterfaceId>,
    listener: Box<dyn Listener>,
}

/// A node's listeners, kept in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<Registration>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, optionally scoped to events on one interface.
    pub fn register(&mut self, listener: Box<dyn Listener>, scope: Option<InterfaceId>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Registration { id, scope, listener });
        id
    }

    /// Remove a listener, calling its `shutdown` first.
    pub fn deregister(&mut self, id: ListenerId) -> Option<Box<dyn Listener>> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        let mut reg = self.entries.remove(pos);
        reg.listener.shutdown();
        Some(reg.listener)
    }

    /// Shut down and drop every listener.
    pub fn clear(&mut self) {
        for reg in self.entries.iter_mut() {
            reg.listener.shutdown();
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|r| r.listener.name()).collect()
    }

    pub fn get_mut(&mut self, id: ListenerId) -> Option<&mut (dyn Listener + 'static)> {
        self.entries
            .iter_mut()
            .find(|r| r.id == id)
            .map(|r| r.listener.as_mut())
    }

    /// First listener of concrete type `T`.
    pub fn find<T: Listener>(&self) -> Option<&T> {
        self.entries
            .iter()
            .find_map(|r| r.listener.as_any().downcast_ref::<T>())
    }

    /// First listener of concrete type `T`, with its id.
    pub fn find_mut<T: Listener>(&mut self) -> Option<(ListenerId, &mut T)> {
        self.entries.iter_mut().find_map(|r| {
            let id = r.id;
            r.listener.as_any_mut().downcast_mut::<T>().map(|l| (id, l))
        })
    }
}

/// Visit listeners in registration order, skipping `sender` and listeners
/// scoped to a different interface. `visit` returns `None` when the listener
/// lacks the capability for this event kind.
pub fn dispatch<F>(
    kind: EventKind,
    registry: &mut ListenerRegistry,
    sender: Option<ListenerId>,
    iface: Option<InterfaceId>,
    mut visit: F,
) -> Outcome
where
    F: FnMut(ListenerId, &mut dyn Listener) -> Option<Outcome>,
{
    let mut strongest = Outcome::Continue;
    for reg in registry.entries.iter_mut() {
        if Some(reg.id) == sender {
            continue;
        }
        if let (Some(scope), Some(iface)) = (reg.scope, iface) {
            if scope != iface {
                continue;
            }
        }
        let Some(outcome) = visit(reg.id, reg.listener.as_mut()) else {
            continue;
        };
        strongest = strongest.max(outcome);
        if outcome == Outcome::Stop {
            trace!(?kind, listener = reg.listener.name(), "handler chain stopped");
            break;
        }
    }
    strongest
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        reply: Outcome,
        seen: usize,
    }

    impl Listener for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn recorder(name: &'static str, reply: Outcome) -> Box<dyn Listener> {
        Box::new(Recorder { name, reply, seen: 0 })
    }

    fn run(registry: &mut ListenerRegistry, sender: Option<ListenerId>, iface: Option<InterfaceId>) -> (Outcome, Vec<&'static str>) {
        let mut visited = Vec::new();
        let outcome = dispatch(EventKind::Lifecycle, registry, sender, iface, |_, listener| {
            let recorder = listener.as_any_mut().downcast_mut::<Recorder>()?;
            recorder.seen += 1;
            visited.push(recorder.name);
            Some(recorder.reply)
        });
        (outcome, visited)
    }

    #[test]
    fn test_strongest_outcome_wins() {
        let mut registry = ListenerRegistry::new();
        registry.register(recorder("a", Outcome::Continue), None);
        registry.register(recorder("b", Outcome::Handled), None);
        registry.register(recorder("c", Outcome::Continue), None);
        let (outcome, visited) = run(&mut registry, None, None);
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(visited, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stop_short_circuits_later_listeners() {
        let mut registry = ListenerRegistry::new();
        registry.register(recorder("a", Outcome::Continue), None);
        registry.register(recorder("stopper", Outcome::Stop), None);
        registry.register(recorder("late", Outcome::Handled), None);
        let (outcome, visited) = run(&mut registry, None, None);
        assert_eq!(outcome, Outcome::Stop);
        assert_eq!(visited, vec!["a", "stopper"]);
        assert!(outcome.suppresses_default());
    }

    #[test]
    fn test_sender_is_skipped() {
        let mut registry = ListenerRegistry::new();
        let a = registry.register(recorder("a", Outcome::Stop), None);
        registry.register(recorder("b", Outcome::Continue), None);
        let (outcome, visited) = run(&mut registry, Some(a), None);
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(visited, vec!["b"]);
    }

    #[test]
    fn test_scoped_listener_only_sees_its_interface() {
        let mut registry = ListenerRegistry::new();
        registry.register(recorder("port1", Outcome::Continue), Some(InterfaceId(1)));
        registry.register(recorder("any", Outcome::Continue), None);
        let (_, visited) = run(&mut registry, None, Some(InterfaceId(2)));
        assert_eq!(visited, vec!["any"]);
        let (_, visited) = run(&mut registry, None, Some(InterfaceId(1)));
        assert_eq!(visited, vec!["port1", "any"]);
    }

    #[test]
    fn test_find_and_deregister() {
        let mut registry = ListenerRegistry::new();
        let id = registry.register(recorder("a", Outcome::Continue), None);
        assert!(registry.find::<Recorder>().is_some());
        let (found, _) = registry.find_mut::<Recorder>().unwrap();
        assert_eq!(found, id);
        assert!(registry.deregister(id).is_some());
        assert!(registry.is_empty());
        assert!(registry.deregister(id).is_none());
    }
}
