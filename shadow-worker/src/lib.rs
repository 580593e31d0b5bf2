//! Worker threads: each owns an exclusive partition of hosts, drains them
//! in strict `(deliver_time, sequence)` order up to a horizon the engine
//! assigns each round, and exchanges cross-partition events through
//! per-destination mailboxes (spec.md §2 component 7, §4.7, §5).

mod error;
mod mailbox;
mod worker;

pub use error::WorkerError;
pub use mailbox::MailboxEntry;
pub use worker::{spawn_worker, WorkerHandle, WorkerId, WorkerReport};
