//! Leveled logging for the simulation engine: a thin façade over `tracing`
//! that speaks the engine's own level names, plus a heartbeat line
//! formatter for periodic per-host counter summaries.

mod heartbeat;
mod level;
mod sink;

pub use heartbeat::{HeartbeatLine, LatencySampleLine};
pub use level::Level;
pub use sink::init;
