//! The virtual network interface: per-host send/receive buffers, a queuing
//! discipline across sockets, and token-bucket rate limiting in each
//! direction (spec.md §2 component 4, §4.3).

mod error;
mod qdisc;
mod token_bucket;
mod nic;

pub use error::NicError;
pub use qdisc::QueueDiscipline;
pub use token_bucket::TokenBucket;
pub use nic::{Nic, NicConfig, Transmitted};
