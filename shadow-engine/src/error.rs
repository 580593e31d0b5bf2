use std::path::PathBuf;

use thiserror::Error;

/// The engine-level composition of spec.md §7's error taxonomy: topology
/// setup errors and worker-orchestration failures are configuration/resource
/// errors respectively, `Invariant` covers the fatal "this should never
/// happen" class, and `Pcap` covers the one engine-owned I/O boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Topology(#[from] shadow_topo::TopoError),

    #[error(transparent)]
    Worker(#[from] shadow_worker::WorkerError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("failed to write pcap file {path}: {source}")]
    Pcap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
