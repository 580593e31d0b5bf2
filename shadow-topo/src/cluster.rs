use crate::cdf::Cdf;

/// Identifier for a cluster (a vertex in the topology graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(pub u32);

/// A cluster: a bandwidth envelope shared by its member hosts, plus an
/// intra-cluster packet-loss probability applied to traffic that never
/// leaves the cluster (spec.md §3 Topology: "vertices are clusters
/// (bandwidth envelope, intra-cluster packet loss)").
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub bandwidth_down_bytes_per_sec: u64,
    pub bandwidth_up_bytes_per_sec: u64,
    pub intra_cluster_packet_loss: f64,
}

impl Cluster {
    pub fn new(id: ClusterId, bandwidth_down_bytes_per_sec: u64, bandwidth_up_bytes_per_sec: u64) -> Self {
        Cluster {
            id,
            bandwidth_down_bytes_per_sec,
            bandwidth_up_bytes_per_sec,
            intra_cluster_packet_loss: 0.0,
        }
    }

    pub fn with_packet_loss(mut self, loss: f64) -> Self {
        self.intra_cluster_packet_loss = loss;
        self
    }
}

/// A directed edge between two clusters (spec.md §3 Link): immutable after
/// setup, looked up by `(source cluster, destination cluster)`.
#[derive(Debug, Clone)]
pub struct Link {
    pub from: ClusterId,
    pub to: ClusterId,
    pub base_latency_ns: u64,
    pub jitter: Option<Cdf>,
    pub packet_loss: f64,
    /// An optional CDF of latencies that, when present, is sampled directly
    /// instead of `base_latency_ns + jitter` (spec.md §3: "or optionally a
    /// CDF of latencies").
    pub latency_quantiles: Option<Cdf>,
}

impl Link {
    pub fn new(from: ClusterId, to: ClusterId, base_latency_ns: u64) -> Self {
        Link {
            from,
            to,
            base_latency_ns,
            jitter: None,
            packet_loss: 0.0,
            latency_quantiles: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Cdf) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn with_packet_loss(mut self, loss: f64) -> Self {
        self.packet_loss = loss;
        self
    }

    pub fn with_latency_quantiles(mut self, cdf: Cdf) -> Self {
        self.latency_quantiles = Some(cdf);
        self
    }
}
