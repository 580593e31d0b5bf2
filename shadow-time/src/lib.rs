//! Virtual time, event records, and deterministic per-host randomness.
//!
//! Everything here is pure data and pure functions: no wall-clock reads, no
//! OS entropy. The simulation's reproducibility guarantee (two runs with the
//! same seed, worker count, and topology produce the same event trace) rests
//! on this crate never touching either.

mod event;
mod rng;
mod sim_time;

pub use event::{Event, EventId, EventKind, HostId, SequenceCounter};
pub use rng::HostRng;
pub use sim_time::SimTime;
