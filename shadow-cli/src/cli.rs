use std::path::PathBuf;

use clap::Parser;

/// Command-line surface of spec.md §6, minus the XML topology/hosts file
/// (an explicit out-of-scope external collaborator — see `scenario`).
#[derive(Parser, Debug)]
#[command(name = "shadow", version, about = "Discrete-event network simulation engine")]
pub struct Args {
    /// Minimum level passed through to the log sink.
    #[arg(long, default_value = "message")]
    pub log_level: String,

    /// Minimum level heartbeat lines are logged at.
    #[arg(long, default_value = "message")]
    pub heartbeat_log_level: String,

    /// Heartbeat interval, in simulated seconds.
    #[arg(long, default_value_t = 60)]
    pub heartbeat_frequency: u64,

    /// Global seed for per-host deterministic RNGs.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Worker thread count; 0 picks one per available core.
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// CPU-delay accumulator threshold in microseconds; negative disables it.
    #[arg(long = "cpu-threshold", default_value_t = 1_000)]
    pub cpu_threshold_us: i64,

    /// CPU-delay accumulator rounding precision in microseconds.
    #[arg(long = "cpu-precision", default_value_t = 200)]
    pub cpu_precision_us: u64,

    /// NIC batching interval in milliseconds.
    #[arg(long = "interface-batch", default_value_t = 10)]
    pub interface_batch_ms: u64,

    /// NIC ingress buffer size in bytes (clamped to at least one MTU).
    #[arg(long = "interface-buffer", default_value_t = 1_048_576)]
    pub interface_buffer_bytes: u32,

    /// NIC queuing discipline: fifo or rr.
    #[arg(long = "interface-qdisc", default_value = "fifo")]
    pub interface_qdisc: String,

    /// Conservative window (runahead), in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub runahead: u64,

    /// TCP window size, in MSS-sized packets.
    #[arg(long = "tcp-windows", default_value_t = 10)]
    pub tcp_window_packets: u32,

    /// Fixed TCP receive-buffer size in bytes; 0 autotunes.
    #[arg(long = "socket-recv-buffer", default_value_t = 0)]
    pub socket_recv_buffer_bytes: u32,

    /// Fixed TCP send-buffer size in bytes; 0 autotunes.
    #[arg(long = "socket-send-buffer", default_value_t = 0)]
    pub socket_send_buffer_bytes: u32,

    /// Built-in topology to run, standing in for the out-of-scope XML
    /// front end (SPEC_FULL.md §10): one of `echo`, `lossy`.
    #[arg(long, default_value = "echo")]
    pub scenario: String,

    /// Kill time in milliseconds; the engine stops once this simulated
    /// time is reached regardless of remaining queued work (spec.md §6
    /// `kill` element, §4.8 termination).
    #[arg(long)]
    pub kill_time_ms: Option<u64>,

    /// Directory to write one PCAP file per host to. Omit to disable
    /// capture.
    #[arg(long)]
    pub pcap_dir: Option<PathBuf>,
}
