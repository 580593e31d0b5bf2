//! `Host`: the per-host event queue, the host runtime API surface used by
//! guest code (socket creation, connect/accept/send/recv/close, timers,
//! RNG draws), and the CPU-delay accumulator (spec.md §2 component 6, §4.6).
//!
//! A `Host` is never shared across workers at a given instant (spec.md §3
//! Host: "never shared across workers at a given instant") — it is owned
//! outright by whichever `Worker` is currently executing it.

mod cpu;
mod error;
mod host;

pub use cpu::CpuDelayAccumulator;
pub use error::HostError;
pub use host::{DispatchOutcome, Host, HostConfig, HostStats, PcapRecord, RemotePacket};
