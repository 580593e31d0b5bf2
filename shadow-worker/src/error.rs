use thiserror::Error;

/// Errors raised by worker orchestration itself (not by the hosts it
/// drives, which surface `shadow_host::HostError` through their own call
/// paths). These are the "Worker failures propagate to the engine" half of
/// spec.md §4.8's failure semantics.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} is no longer running")]
    WorkerGone(u32),

    #[error("worker {0} thread panicked")]
    ThreadPanicked(u32),

    #[error("failed to spawn worker {0} thread: {1}")]
    SpawnFailed(u32, std::io::Error),
}
