use thiserror::Error;

/// Configuration errors raised while building a [`crate::Topology`].
///
/// These are always fatal at setup (spec.md §7: "Configuration errors are
/// fatal at setup").
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopoError {
    #[error("link {0} -> {1} has latency {2}ns below the configured runahead {3}ns")]
    RunaheadViolation(ClusterLabel, ClusterLabel, u64, u64),

    #[error("cluster {0} is not defined")]
    UnknownCluster(ClusterLabel),

    #[error("host ip {0} is already bound to another host")]
    DuplicateHostIp(std::net::Ipv4Addr),

    #[error("no host is bound to ip {0}")]
    UnknownHost(std::net::Ipv4Addr),

    #[error("no link registered from cluster {0} to cluster {1}")]
    NoRoute(ClusterLabel, ClusterLabel),

    #[error("cdf table must be non-empty and sorted by ascending cumulative probability")]
    InvalidCdf,
}

/// A cluster id rendered for error messages without requiring `ClusterId` to
/// implement `Display` on its own (keeps the id type a plain newtype).
pub type ClusterLabel = u32;
