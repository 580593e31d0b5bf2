use std::fmt;

/// One host's periodic counter summary, emitted at the configured heartbeat
/// interval (spec.md §6 `--heartbeat-frequency`, §6 Persisted state).
#[derive(Debug, Clone, Default)]
pub struct HeartbeatLine {
    pub host_name: String,
    pub sim_time_secs: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub active_sockets: u32,
}

impl fmt::Display for HeartbeatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}] {} sent={}B/{}pkts recv={}B/{}pkts dropped={}pkts sockets={}",
            self.sim_time_secs,
            self.host_name,
            self.bytes_sent,
            self.packets_sent,
            self.bytes_received,
            self.packets_received,
            self.packets_dropped,
            self.active_sockets,
        )
    }
}

/// A periodic summary of link latencies this host's NIC sampled while
/// routing egress packets since the last sample tick (spec.md §6
/// `--latency-sample-interval`). Empty (`count == 0`) samples are not
/// emitted by the caller.
#[derive(Debug, Clone, Default)]
pub struct LatencySampleLine {
    pub host_name: String,
    pub sim_time_secs: f64,
    pub count: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
}

impl fmt::Display for LatencySampleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}] {} latency samples={} min={:.3}ms max={:.3}ms mean={:.3}ms",
            self.sim_time_secs,
            self.host_name,
            self.count,
            self.min_ns as f64 / 1_000_000.0,
            self.max_ns as f64 / 1_000_000.0,
            self.mean_ns / 1_000_000.0,
        )
    }
}
