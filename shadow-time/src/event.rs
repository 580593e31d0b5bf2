use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::sim_time::SimTime;

/// Stable identifier for a host, used everywhere a pointer-based back-
/// reference would otherwise be needed (spec.md §9: "replace pointer cycles
/// with an arena + integer ids").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub u32);

impl HostId {
    pub const fn new(id: u32) -> Self {
        HostId(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Unique id for an event, equal to the `sequence` field it was created
/// with. Kept as a distinct type so call sites can't accidentally compare a
/// sequence number against an unrelated counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

/// Monotonic, engine-wide sequence counter.
///
/// Every event is assigned a sequence number at creation time, from this one
/// counter, regardless of which worker thread creates it. Ties in
/// `deliver_time` break on `sequence`, which makes total order independent
/// of thread interleaving — the reproducibility guarantee in spec.md §5.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub const fn new() -> Self {
        SequenceCounter(AtomicU64::new(0))
    }

    /// Allocate the next sequence number.
    pub fn next(&self) -> EventId {
        EventId(self.0.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// The kind of an event, and the inline payload it carries.
///
/// A tagged sum rather than a trait object, per spec.md §9's guidance to
/// avoid heterogeneous virtual tables so that event memory layout (and
/// thus iteration/allocation behavior) stays deterministic across runs.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A packet has arrived at this host's NIC ingress.
    PacketArrival {
        /// Opaque handle into the packet pool; interpreted by the NIC.
        packet_id: u64,
    },
    /// A previously-armed timer has fired.
    TimerCallback {
        /// Identifies which timer, scoped to the owning descriptor.
        timer_id: u64,
        /// The descriptor (socket) that armed this timer, if any.
        descriptor: Option<u64>,
    },
    /// A socket-level callback (e.g. a deferred `connect`/`accept`
    /// completion) is ready to run.
    SocketCallback {
        descriptor: u64,
    },
    /// Periodic heartbeat tick for counter reporting.
    Heartbeat,
    /// Periodic tick for summarizing sampled link latencies (spec.md §6
    /// `--latency-sample-interval`).
    LatencySample,
    /// Engine-wide kill: the highest-priority event at its deliver time.
    EngineKill,
}

impl EventKind {
    /// A stable short name, used in log lines and PCAP-adjacent diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::PacketArrival { .. } => "packet-arrival",
            EventKind::TimerCallback { .. } => "timer-callback",
            EventKind::SocketCallback { .. } => "socket-callback",
            EventKind::Heartbeat => "heartbeat",
            EventKind::LatencySample => "latency-sample",
            EventKind::EngineKill => "engine-kill",
        }
    }
}

/// A scheduled event: `deliver_time ≥ creation_time + min_delay_for_kind` is
/// an invariant enforced by callers (the NIC, timer code) at construction,
/// not by this type, since the minimum delay is kind- and context-specific.
#[derive(Debug, Clone)]
pub struct Event {
    pub deliver_time: SimTime,
    pub sequence: EventId,
    pub target_host: HostId,
    pub kind: EventKind,
    /// Set when a timer owning this event is cancelled; the event is left
    /// in the heap (removing from a binary heap by key is O(n)) and skipped
    /// at dispatch instead (spec.md §5).
    pub cancelled: bool,
}

impl Event {
    pub fn new(
        deliver_time: SimTime,
        sequence: EventId,
        target_host: HostId,
        kind: EventKind,
    ) -> Self {
        Event {
            deliver_time,
            sequence,
            target_host,
            kind,
            cancelled: false,
        }
    }
}

/// Total order over events is `(deliver_time, sequence)` — spec.md §3.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_time == other.deliver_time && self.sequence == other.sequence
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_time, self.sequence.0).cmp(&(other.deliver_time, other.sequence.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counter_is_monotonic() {
        let counter = SequenceCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a.0 < b.0);
        assert!(b.0 < c.0);
    }

    #[test]
    fn ordering_breaks_ties_on_sequence() {
        let t = SimTime::from_millis(5);
        let e1 = Event::new(t, EventId(1), HostId(0), EventKind::Heartbeat);
        let e2 = Event::new(t, EventId(2), HostId(0), EventKind::Heartbeat);
        assert!(e1 < e2);
    }

    #[test]
    fn ordering_prefers_deliver_time() {
        let e1 = Event::new(
            SimTime::from_millis(1),
            EventId(100),
            HostId(0),
            EventKind::Heartbeat,
        );
        let e2 = Event::new(
            SimTime::from_millis(2),
            EventId(1),
            HostId(0),
            EventKind::Heartbeat,
        );
        assert!(e1 < e2);
    }
}
