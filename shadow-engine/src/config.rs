use std::path::PathBuf;

use shadow_host::HostConfig;
use shadow_log::Level;
use shadow_nic::{NicConfig, QueueDiscipline};
use shadow_socket::TcpConfig;
use shadow_time::SimTime;

/// Top-level engine configuration, one field per CLI flag in spec.md §6.
/// Built by `shadow-cli` from parsed arguments and handed to [`crate::Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub log_level: Level,
    pub heartbeat_log_level: Level,
    pub heartbeat_interval_secs: u64,
    pub seed: u64,
    /// Worker thread count; `0` picks one per available core
    /// (spec.md §6 `--workers`, default 0).
    pub workers: usize,
    /// Negative disables the CPU-delay accumulator entirely (SPEC_FULL.md
    /// §13's resolution of the accumulator's Open Question).
    pub cpu_threshold_us: i64,
    pub cpu_precision_us: u64,
    pub interface_batch_ms: u64,
    pub interface_buffer_bytes: u32,
    pub interface_qdisc: QueueDiscipline,
    pub runahead_ms: u64,
    pub tcp_window_packets: u32,
    /// `0` means autotune; otherwise a fixed buffer size in bytes.
    pub socket_recv_buffer_bytes: u32,
    pub socket_send_buffer_bytes: u32,
    pub tcp_backlog: usize,
    pub udp_recv_queue_len: usize,
    pub kill_time: Option<SimTime>,
    pub pcap_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            log_level: Level::Message,
            heartbeat_log_level: Level::Message,
            heartbeat_interval_secs: 60,
            seed: 1,
            workers: 0,
            cpu_threshold_us: 1_000,
            cpu_precision_us: 200,
            interface_batch_ms: 10,
            interface_buffer_bytes: 1_048_576,
            interface_qdisc: QueueDiscipline::Fifo,
            runahead_ms: 10,
            tcp_window_packets: 10,
            socket_recv_buffer_bytes: 0,
            socket_send_buffer_bytes: 0,
            tcp_backlog: 128,
            udp_recv_queue_len: 64,
            kill_time: None,
            pcap_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn runahead_ns(&self) -> u64 {
        self.runahead_ms * SimTime::MILLISECOND
    }

    /// Resolve `workers == 0` to the host's available parallelism, matching
    /// `--workers 0` ("one per core") in spec.md §6.
    pub fn resolved_worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.workers
        }
    }

    /// Build the per-host configuration every [`shadow_host::Host`] this
    /// engine constructs is given, layering the host's own cluster bandwidth
    /// envelope over the CLI-level defaults.
    pub fn host_config(&self, bandwidth_down_bytes_per_sec: u64, bandwidth_up_bytes_per_sec: u64) -> HostConfig {
        let mss = shadow_socket::DEFAULT_MSS;
        let window_bytes = self.tcp_window_packets.saturating_mul(mss);

        let tcp = TcpConfig {
            recv_buffer_bytes: if self.socket_recv_buffer_bytes == 0 {
                window_bytes.max(174_760)
            } else {
                self.socket_recv_buffer_bytes
            },
            send_buffer_bytes: if self.socket_send_buffer_bytes == 0 {
                window_bytes.max(131_072)
            } else {
                self.socket_send_buffer_bytes
            },
            autotune: self.socket_recv_buffer_bytes == 0,
            ..TcpConfig::default()
        };

        let nic = NicConfig {
            bandwidth_down_bytes_per_sec,
            bandwidth_up_bytes_per_sec,
            qdisc: self.interface_qdisc,
            ingress_buffer_bytes: self.interface_buffer_bytes,
            batch_interval_ns: self.interface_batch_ms * SimTime::MILLISECOND,
        }
        .clamp();

        HostConfig {
            nic,
            tcp,
            tcp_backlog: self.tcp_backlog,
            udp_recv_queue_len: self.udp_recv_queue_len,
            cpu_threshold_ns: self.cpu_threshold_us.saturating_mul(1_000),
            cpu_precision_ns: self.cpu_precision_us.saturating_mul(1_000),
            heartbeat_interval_ns: self.heartbeat_interval_secs.saturating_mul(SimTime::SECOND),
            pcap_enabled: self.pcap_dir.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_buffer_sizes_mean_autotune() {
        let config = EngineConfig::default();
        let host_config = config.host_config(1_000_000, 1_000_000);
        assert!(host_config.tcp.autotune);
    }

    #[test]
    fn explicit_buffer_sizes_disable_autotune() {
        let config = EngineConfig {
            socket_recv_buffer_bytes: 65_536,
            socket_send_buffer_bytes: 65_536,
            ..EngineConfig::default()
        };
        let host_config = config.host_config(1_000_000, 1_000_000);
        assert!(!host_config.tcp.autotune);
        assert_eq!(host_config.tcp.recv_buffer_bytes, 65_536);
    }

    #[test]
    fn zero_workers_resolves_to_available_parallelism() {
        let config = EngineConfig::default();
        assert!(config.resolved_worker_count() >= 1);
    }
}
