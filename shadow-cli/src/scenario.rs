//! Built-in in-memory topologies, standing in for the XML topology/hosts
//! file front end (spec.md §1 Non-goals, §6): the core never parses XML, so
//! this module plays the role the external front end would, handing
//! `shadow-engine::Engine::new` a [`Topology`] and a set of pre-scripted
//! [`Host`]s directly.
//!
//! Setup-time scripting is the only scripting this engine supports (spec.md
//! §1: no guest-plugin-loading layer), so these scenarios can only pre-stage
//! actions that are legal at t=0 before the engine ever runs: binding
//! sockets, initiating connections, and sending UDP datagrams (which need no
//! prior handshake). End-to-end TCP data-transfer scenarios (spec.md §8
//! a-d), which need to poll connection state mid-run before issuing a
//! `send`, are covered by `shadow-engine`'s own integration tests using a
//! single-threaded harness that drives `Host` directly instead of handing it
//! to a worker thread.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{bail, Result};

use shadow_engine::EngineConfig;
use shadow_host::Host;
use shadow_time::{HostId, SequenceCounter};
use shadow_topo::{Cluster, ClusterId, Link, Topology, TopologyBuilder};

const CLUSTER_A: ClusterId = ClusterId(1);
const CLUSTER_B: ClusterId = ClusterId(2);
const BANDWIDTH_BYTES_PER_SEC: u64 = 12_500_000; // 100 Mbit/s

pub struct Scenario {
    pub topology: Topology,
    pub hosts: Vec<Host>,
}

pub fn build(name: &str, config: &EngineConfig) -> Result<Scenario> {
    match name {
        "echo" => echo(config),
        "lossy" => lossy(config),
        other => bail!("unknown scenario '{other}', expected one of: echo, lossy"),
    }
}

fn two_cluster_topology(config: &EngineConfig, latency_ns: u64, loss: f64) -> Result<Topology> {
    let topology = TopologyBuilder::new(config.runahead_ns())
        .add_cluster(Cluster::new(CLUSTER_A, BANDWIDTH_BYTES_PER_SEC, BANDWIDTH_BYTES_PER_SEC))
        .add_cluster(Cluster::new(CLUSTER_B, BANDWIDTH_BYTES_PER_SEC, BANDWIDTH_BYTES_PER_SEC))
        .add_link(Link::new(CLUSTER_A, CLUSTER_B, latency_ns).with_packet_loss(loss))?
        .add_link(Link::new(CLUSTER_B, CLUSTER_A, latency_ns).with_packet_loss(loss))?
        .add_host(Ipv4Addr::new(11, 0, 0, 1), HostId::new(0), CLUSTER_A)?
        .add_host(Ipv4Addr::new(12, 0, 0, 1), HostId::new(1), CLUSTER_B)?
        .build();
    Ok(topology)
}

fn two_hosts(config: &EngineConfig, topology: &Topology) -> (Host, Host) {
    let sequence = Arc::new(SequenceCounter::new());
    let host_config = config.host_config(BANDWIDTH_BYTES_PER_SEC, BANDWIDTH_BYTES_PER_SEC);
    let a = Host::new(
        HostId::new(0),
        "a".into(),
        Ipv4Addr::new(11, 0, 0, 1),
        CLUSTER_A,
        config.seed,
        topology.clone(),
        sequence.clone(),
        host_config.clone(),
    );
    let b = Host::new(
        HostId::new(1),
        "b".into(),
        Ipv4Addr::new(12, 0, 0, 1),
        CLUSTER_B,
        config.seed,
        topology.clone(),
        sequence,
        host_config,
    );
    (a, b)
}

/// Host A sends one 1 KiB UDP datagram to host B over a 50 ms, loss-free
/// link (the transport-level shape of spec.md §8 scenario (a), minus the
/// TCP handshake a guest application would normally drive).
fn echo(config: &EngineConfig) -> Result<Scenario> {
    let topology = two_cluster_topology(config, 50 * shadow_time::SimTime::MILLISECOND, 0.0)?;
    let (mut a, mut b) = two_hosts(config, &topology);

    b.udp_socket(9000)?;
    let a_socket = a.udp_socket(0)?;
    let payload = vec![0xABu8; 1024];
    a.udp_send_to(a_socket, Ipv4Addr::new(12, 0, 0, 1), 9000, &payload)?;

    Ok(Scenario { topology, hosts: vec![a, b] })
}

/// Same topology as `echo`, but with a 10% packet-loss link and a burst of
/// 20 datagrams, to observe drops accumulate in the final report (spec.md
/// §8 scenario (b)'s loss condition, applied to UDP since CLI scenarios
/// cannot script mid-run TCP retransmission observation).
fn lossy(config: &EngineConfig) -> Result<Scenario> {
    let topology = two_cluster_topology(config, 50 * shadow_time::SimTime::MILLISECOND, 0.1)?;
    let (mut a, mut b) = two_hosts(config, &topology);

    b.udp_socket(9000)?;
    let a_socket = a.udp_socket(0)?;
    for i in 0..20u8 {
        let payload = vec![i; 512];
        a.udp_send_to(a_socket, Ipv4Addr::new(12, 0, 0, 1), 9000, &payload)?;
    }

    Ok(Scenario { topology, hosts: vec![a, b] })
}
