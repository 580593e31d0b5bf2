//! The engine: host partitioning across worker threads, the conservative-
//! window barrier loop, termination, PCAP emission, and the final report
//! (spec.md §2 component 8, §4.8).

mod config;
mod engine;
mod error;
mod pcap;
mod report;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use pcap::write_pcap_file;
pub use report::FinalReport;
