use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use shadow_time::{HostId, HostRng};

use crate::cdf::Cdf;
use crate::cluster::{Cluster, ClusterId, Link};
use crate::error::TopoError;
use crate::packet::MTU;

/// What routing a packet resolves to: enough information for the caller
/// (the sending host's NIC) to draw its own latency and loss samples from
/// its own RNG, preserving "a single RNG consumer per packet" (spec.md
/// §4.2).
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub link_sequence: u64,
    pub base_latency_ns: u64,
    pub jitter: Option<Cdf>,
    pub latency_quantiles: Option<Cdf>,
    pub loss_probability: f64,
    pub mtu: u32,
}

impl RouteResult {
    /// Draw an effective one-way latency in nanoseconds. If the link
    /// carries an explicit latency-quantile table, that table is sampled
    /// directly; otherwise the result is `base + jitter_sample`, with the
    /// jitter sample clamped so the result never falls below `base`
    /// (invariant 7: "No link delivers a packet with effective latency
    /// below its configured base.").
    pub fn sample_latency(&self, rng: &mut HostRng) -> u64 {
        if let Some(cdf) = &self.latency_quantiles {
            return cdf.sample(rng).max(self.base_latency_ns);
        }
        let jitter = self.jitter.as_ref().map(|c| c.sample(rng)).unwrap_or(0);
        self.base_latency_ns + jitter
    }

    /// Draw whether this packet is lost in transit, using the sender's RNG.
    pub fn sample_loss(&self, rng: &mut HostRng) -> bool {
        if self.loss_probability <= 0.0 {
            return false;
        }
        rng.next_f64() < self.loss_probability
    }
}

/// The cluster/link/host graph, immutable after [`TopologyBuilder::build`].
///
/// Cloning a `Topology` is cheap: the graph is stored behind an `Arc` so
/// every worker gets its own handle without locking (spec.md §5).
#[derive(Clone)]
pub struct Topology {
    inner: Arc<TopologyInner>,
}

struct TopologyInner {
    clusters: BTreeMap<ClusterId, Cluster>,
    links: BTreeMap<(ClusterId, ClusterId), (Link, u64)>,
    hosts: BTreeMap<Ipv4Addr, (HostId, ClusterId)>,
}

impl Topology {
    /// Resolve a source/destination IP pair to a [`RouteResult`], per
    /// spec.md §4.2: "Given source and destination IPs, routing consults
    /// the topology to return: (base latency, jitter sample, loss
    /// probability, MTU)."
    pub fn resolve(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Result<RouteResult, TopoError> {
        let &(_, src_cluster) = self
            .inner
            .hosts
            .get(&src_ip)
            .ok_or(TopoError::UnknownHost(src_ip))?;
        let &(_, dst_cluster) = self
            .inner
            .hosts
            .get(&dst_ip)
            .ok_or(TopoError::UnknownHost(dst_ip))?;

        let (link, sequence) = self
            .inner
            .links
            .get(&(src_cluster, dst_cluster))
            .ok_or(TopoError::NoRoute(src_cluster.0, dst_cluster.0))?;

        let mut loss = link.packet_loss;
        if src_cluster == dst_cluster {
            let cluster_loss = self
                .inner
                .clusters
                .get(&src_cluster)
                .map(|c| c.intra_cluster_packet_loss)
                .unwrap_or(0.0);
            // Combine independent loss events: P(lost) = 1 - P(survive both).
            loss = 1.0 - (1.0 - loss) * (1.0 - cluster_loss);
        }

        Ok(RouteResult {
            link_sequence: *sequence,
            base_latency_ns: link.base_latency_ns,
            jitter: link.jitter.clone(),
            latency_quantiles: link.latency_quantiles.clone(),
            loss_probability: loss,
            mtu: MTU,
        })
    }

    /// Look up which host owns an IP address, for delivery targeting.
    pub fn host_at(&self, ip: Ipv4Addr) -> Option<HostId> {
        self.inner.hosts.get(&ip).map(|(id, _)| *id)
    }

    /// All registered host IPs and ids, in deterministic (sorted-by-IP)
    /// order, for engine setup (host partitioning across workers).
    pub fn hosts(&self) -> impl Iterator<Item = (Ipv4Addr, HostId)> + '_ {
        self.inner.hosts.iter().map(|(ip, (id, _))| (*ip, *id))
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.inner.clusters.get(&id)
    }
}

/// One-shot builder that validates the runahead invariant as links are
/// added, then freezes the graph.
pub struct TopologyBuilder {
    min_runahead_ns: u64,
    clusters: BTreeMap<ClusterId, Cluster>,
    links: BTreeMap<(ClusterId, ClusterId), (Link, u64)>,
    hosts: BTreeMap<Ipv4Addr, (HostId, ClusterId)>,
    next_link_sequence: u64,
}

impl TopologyBuilder {
    /// `min_runahead_ns` is the engine's configured conservative window
    /// (spec.md §4.8 `min_runahead`, default 10ms); every link's latency
    /// must be at least this large or setup fails (spec.md §8 scenario f).
    pub fn new(min_runahead_ns: u64) -> Self {
        TopologyBuilder {
            min_runahead_ns,
            clusters: BTreeMap::new(),
            links: BTreeMap::new(),
            hosts: BTreeMap::new(),
            next_link_sequence: 0,
        }
    }

    pub fn add_cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.insert(cluster.id, cluster);
        self
    }

    pub fn add_link(mut self, link: Link) -> Result<Self, TopoError> {
        if link.base_latency_ns < self.min_runahead_ns {
            return Err(TopoError::RunaheadViolation(
                link.from.0,
                link.to.0,
                link.base_latency_ns,
                self.min_runahead_ns,
            ));
        }
        if !self.clusters.contains_key(&link.from) {
            return Err(TopoError::UnknownCluster(link.from.0));
        }
        if !self.clusters.contains_key(&link.to) {
            return Err(TopoError::UnknownCluster(link.to.0));
        }
        let sequence = self.next_link_sequence;
        self.next_link_sequence += 1;
        self.links.insert((link.from, link.to), (link, sequence));
        Ok(self)
    }

    pub fn add_host(
        mut self,
        ip: Ipv4Addr,
        host_id: HostId,
        cluster_id: ClusterId,
    ) -> Result<Self, TopoError> {
        if self.hosts.contains_key(&ip) {
            return Err(TopoError::DuplicateHostIp(ip));
        }
        if !self.clusters.contains_key(&cluster_id) {
            return Err(TopoError::UnknownCluster(cluster_id.0));
        }
        self.hosts.insert(ip, (host_id, cluster_id));
        Ok(self)
    }

    pub fn build(self) -> Topology {
        Topology {
            inner: Arc::new(TopologyInner {
                clusters: self.clusters,
                links: self.links,
                hosts: self.hosts,
            }),
        }
    }
}
