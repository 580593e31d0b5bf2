use shadow_time::Event;
use shadow_topo::Packet;

/// One entry crossing a worker boundary: the event to deliver, plus the
/// packet payload when the event is a `PacketArrival` (spec.md §3
/// Ownership summary: "Packets are handed off by value (move) when
/// crossing hosts").
///
/// GLOSSARY "Mailbox": a per-worker-pair queue of events produced in the
/// current round that target a host owned by another worker, drained at
/// the barrier.
#[derive(Debug, Clone)]
pub struct MailboxEntry {
    pub event: Event,
    pub packet: Option<Packet>,
}
