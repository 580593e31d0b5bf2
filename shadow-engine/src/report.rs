use shadow_host::HostStats;
use shadow_log::Level;
use shadow_time::SimTime;

/// Everything the engine knows once a run has terminated: aggregate counters
/// plus a per-host breakdown, matching spec.md §4.8 "the engine ... emits a
/// final report" and §6 "Persisted state".
#[derive(Debug, Default)]
pub struct FinalReport {
    pub rounds: u64,
    pub events_dispatched: u64,
    pub final_sim_time: SimTime,
    pub terminated_by_kill: bool,
    pub host_stats: Vec<HostStats>,
}

impl FinalReport {
    pub fn total_bytes_sent(&self) -> u64 {
        self.host_stats.iter().map(|h| h.bytes_sent).sum()
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.host_stats.iter().map(|h| h.bytes_received).sum()
    }

    pub fn total_packets_dropped(&self) -> u64 {
        self.host_stats.iter().map(|h| h.packets_dropped).sum()
    }

    /// Emit a one-line summary at `level` via [`shadow_log::log_at!`].
    pub fn log_summary(&self, level: Level) {
        shadow_log::log_at!(
            level,
            "simulation finished at {} after {} rounds ({} events dispatched, {} hosts, \
             {} bytes sent, {} bytes received, {} packets dropped, kill_triggered={})",
            self.final_sim_time,
            self.rounds,
            self.events_dispatched,
            self.host_stats.len(),
            self.total_bytes_sent(),
            self.total_bytes_received(),
            self.total_packets_dropped(),
            self.terminated_by_kill,
        );
    }
}
