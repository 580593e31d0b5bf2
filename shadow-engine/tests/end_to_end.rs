//! End-to-end scenarios from spec.md §8, driven with a single-threaded
//! two-host harness instead of the multi-threaded `Engine`/`Worker` barrier
//! loop: there is no guest-plugin-loading layer in this engine (spec.md §1
//! Non-goals), so a test has to play the part of the application itself,
//! polling `Host::tcp_state` between dispatches to know when it is safe to
//! call `tcp_send`. That polling loop needs direct access to both hosts at
//! once, which the engine's cross-worker mailbox design deliberately
//! doesn't expose to a single caller.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use shadow_host::{Host, HostConfig};
use shadow_socket::{Descriptor, TcpState};
use shadow_time::{HostId, SequenceCounter, SimTime};
use shadow_topo::{Cluster, ClusterId, Link, Topology, TopologyBuilder};

const CLUSTER_A: ClusterId = ClusterId(1);
const CLUSTER_B: ClusterId = ClusterId(2);

fn topology(latency_ns: u64, loss: f64, runahead_ns: u64, bandwidth_bytes_per_sec: u64) -> Topology {
    TopologyBuilder::new(runahead_ns)
        .add_cluster(Cluster::new(CLUSTER_A, bandwidth_bytes_per_sec, bandwidth_bytes_per_sec))
        .add_cluster(Cluster::new(CLUSTER_B, bandwidth_bytes_per_sec, bandwidth_bytes_per_sec))
        .add_link(Link::new(CLUSTER_A, CLUSTER_B, latency_ns).with_packet_loss(loss))
        .unwrap()
        .add_link(Link::new(CLUSTER_B, CLUSTER_A, latency_ns).with_packet_loss(loss))
        .unwrap()
        .add_host(Ipv4Addr::new(11, 0, 0, 1), HostId::new(0), CLUSTER_A)
        .unwrap()
        .add_host(Ipv4Addr::new(12, 0, 0, 1), HostId::new(1), CLUSTER_B)
        .unwrap()
        .build()
}

fn two_hosts(topo: &Topology, seed: u64, host_config: HostConfig) -> HashMap<HostId, Host> {
    let sequence = Arc::new(SequenceCounter::new());
    let a = Host::new(
        HostId::new(0),
        "a".into(),
        Ipv4Addr::new(11, 0, 0, 1),
        CLUSTER_A,
        seed,
        topo.clone(),
        sequence.clone(),
        host_config.clone(),
    );
    let b = Host::new(
        HostId::new(1),
        "b".into(),
        Ipv4Addr::new(12, 0, 0, 1),
        CLUSTER_B,
        seed,
        topo.clone(),
        sequence,
        host_config,
    );
    let mut hosts = HashMap::new();
    hosts.insert(a.id, a);
    hosts.insert(b.id, b);
    hosts
}

/// Drain every owned host's queue, in strict global `(deliver_time,
/// sequence)` order, up to `horizon`, routing cross-host packets directly
/// (there is only one "worker" here, so every remote packet is a same-
/// process delivery rather than a mailbox round-trip).
fn run_until(hosts: &mut HashMap<HostId, Host>, horizon: SimTime) {
    loop {
        let next = hosts
            .values()
            .filter_map(|h| h.peek().map(|e| (h.id, e.deliver_time, e.sequence)))
            .filter(|&(_, t, _)| t <= horizon)
            .min_by_key(|&(_, t, seq)| (t, seq));
        let Some((host_id, _, _)) = next else { break };
        let Some(outcome) = hosts.get_mut(&host_id).unwrap().dispatch_next(horizon) else {
            continue;
        };
        for remote in outcome.remote_packets {
            if let Some(dest) = hosts.get_mut(&remote.dest_host) {
                dest.deliver_inbound_packet(remote.event, remote.packet);
            }
        }
    }
}

/// Run until `tcp_state(descriptor)` on `host_id` satisfies `pred`, or
/// `deadline` is reached (whichever first); returns whether the predicate
/// was reached.
fn run_until_state(
    hosts: &mut HashMap<HostId, Host>,
    host_id: HostId,
    descriptor: Descriptor,
    deadline: SimTime,
    pred: impl Fn(TcpState) -> bool,
) -> bool {
    loop {
        if pred(hosts[&host_id].tcp_state(descriptor).unwrap()) {
            return true;
        }
        let before = hosts.values().map(Host::min_time).filter(|t| !t.is_invalid()).min();
        let Some(before) = before else { return false };
        if before > deadline {
            return false;
        }
        run_until(hosts, before);
    }
}

fn default_host_config(bandwidth: u64) -> HostConfig {
    let mut config = HostConfig::default();
    config.heartbeat_interval_ns = 0;
    config.nic.bandwidth_up_bytes_per_sec = bandwidth;
    config.nic.bandwidth_down_bytes_per_sec = bandwidth;
    config
}

/// Scenario (a): two-host echo, TCP: host A sends 10 KiB to host B over a
/// link with 50 ms latency, 0% loss. B receives exactly 10,240 bytes and the
/// connection closes cleanly. (That no packet ever arrives sooner than its
/// link's configured latency is invariant 7, covered directly in
/// `shadow-topo`'s `latency_never_below_base_with_quantiles`.)
#[test]
fn scenario_a_two_host_tcp_transfer() {
    let topo = topology(50 * SimTime::MILLISECOND, 0.0, 10 * SimTime::MILLISECOND, 100_000_000);
    let mut hosts = two_hosts(&topo, 1, default_host_config(100_000_000));
    for h in hosts.values_mut() {
        h.start();
    }

    let a = HostId::new(0);
    let b = HostId::new(1);
    let server = hosts.get_mut(&b).unwrap().tcp_socket(80).unwrap();
    hosts.get_mut(&b).unwrap().tcp_listen(server, 4).unwrap();

    let client = hosts.get_mut(&a).unwrap().tcp_socket(0).unwrap();
    hosts
        .get_mut(&a)
        .unwrap()
        .tcp_connect(client, Ipv4Addr::new(12, 0, 0, 1), 80)
        .unwrap();

    let deadline = SimTime::from_secs(5);
    assert!(run_until_state(&mut hosts, a, client, deadline, |s| s == TcpState::Established));

    let payload = vec![0x5Au8; 10 * 1024];
    let queued = hosts.get_mut(&a).unwrap().tcp_send(client, &payload).unwrap();
    assert_eq!(queued, payload.len());
    hosts.get_mut(&a).unwrap().tcp_close(client).unwrap();

    // Poll in small increments for the backlog entry to appear and for the
    // transfer to complete, rather than assuming a fixed wall of simulated
    // time — the exact handshake/transfer timing depends on tick alignment.
    let mut server_conn = None;
    let mut received = Vec::new();
    let mut horizon = SimTime::ZERO;
    while received.len() < payload.len() && horizon < deadline {
        horizon = horizon.add_nanos(20 * SimTime::MILLISECOND);
        run_until(&mut hosts, horizon);

        if server_conn.is_none() {
            server_conn = hosts.get_mut(&b).unwrap().tcp_accept(server).unwrap();
        }
        if let Some(conn) = server_conn {
            let mut buf = [0u8; 4096];
            // Accepting a backlog entry doesn't guarantee its handshake has
            // finished (spec.md §4.4: SYN_RECEIVED children are queued as
            // soon as the SYN arrives); a `recv` this early legitimately
            // reports `NotConnected` rather than "no data yet".
            while let Ok(n) = hosts.get_mut(&b).unwrap().tcp_recv(conn, &mut buf) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
        }
    }

    let server_conn = server_conn.expect("handshake must complete within the deadline");
    assert_eq!(received.len(), payload.len(), "B must receive exactly 10,240 bytes");
    assert_eq!(received, payload);

    assert!(run_until_state(&mut hosts, b, server_conn, deadline, |s| {
        matches!(s, TcpState::CloseWait | TcpState::Closed | TcpState::LastAck | TcpState::TimeWait)
    }));
}

/// Scenario (b)-adjacent: the same topology but with 10% packet loss still
/// completes the transfer, by way of retransmission, and the total bytes
/// the sender put on the wire exceed the payload size (invariant: loss
/// forces at least one retransmit).
#[test]
fn lossy_link_still_completes_via_retransmission() {
    let topo = topology(50 * SimTime::MILLISECOND, 0.10, 10 * SimTime::MILLISECOND, 100_000_000);
    let mut hosts = two_hosts(&topo, 7, default_host_config(100_000_000));
    for h in hosts.values_mut() {
        h.start();
    }

    let a = HostId::new(0);
    let b = HostId::new(1);
    let server = hosts.get_mut(&b).unwrap().tcp_socket(80).unwrap();
    hosts.get_mut(&b).unwrap().tcp_listen(server, 4).unwrap();
    let client = hosts.get_mut(&a).unwrap().tcp_socket(0).unwrap();
    hosts
        .get_mut(&a)
        .unwrap()
        .tcp_connect(client, Ipv4Addr::new(12, 0, 0, 1), 80)
        .unwrap();

    let deadline = SimTime::from_secs(30);
    assert!(run_until_state(&mut hosts, a, client, deadline, |s| s == TcpState::Established));

    let payload = vec![0x11u8; 2048];
    hosts.get_mut(&a).unwrap().tcp_send(client, &payload).unwrap();

    // Keep polling for the backlog entry and draining it until the full
    // payload has arrived or we give up — a fixed wait would be fragile
    // under loss, since handshake segments can themselves be dropped and
    // need a retransmission RTO to recover.
    let mut server_conn = None;
    let mut received = Vec::new();
    let mut horizon = SimTime::ZERO;
    while received.len() < payload.len() && horizon < deadline {
        horizon = horizon.add_nanos(50 * SimTime::MILLISECOND);
        run_until(&mut hosts, horizon);

        if server_conn.is_none() {
            server_conn = hosts.get_mut(&b).unwrap().tcp_accept(server).unwrap();
        }
        if let Some(conn) = server_conn {
            let mut buf = [0u8; 4096];
            while let Ok(n) = hosts.get_mut(&b).unwrap().tcp_recv(conn, &mut buf) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
        }
    }

    assert_eq!(received, payload, "10% loss must not corrupt or drop bytes, only delay them");

    let stats_a = hosts[&a].stats();
    assert!(
        stats_a.bytes_sent as usize > payload.len(),
        "loss must force at least one retransmission, inflating bytes on the wire"
    );
}

/// Scenario (e): a kill event at t = 60s interrupts an ongoing transfer; no
/// event with `deliver_time > 60s` is ever dispatched.
#[test]
fn scenario_e_kill_event_bounds_dispatch_time() {
    let topo = topology(50 * SimTime::MILLISECOND, 0.0, 10 * SimTime::MILLISECOND, 1_000); // slow link
    let mut hosts = two_hosts(&topo, 3, default_host_config(1_000));
    let kill_time = SimTime::from_secs(60);
    for h in hosts.values_mut() {
        h.schedule_kill(kill_time);
        h.start();
    }

    let a = HostId::new(0);
    let b = HostId::new(1);
    let server = hosts.get_mut(&b).unwrap().tcp_socket(80).unwrap();
    hosts.get_mut(&b).unwrap().tcp_listen(server, 4).unwrap();
    let client = hosts.get_mut(&a).unwrap().tcp_socket(0).unwrap();
    hosts
        .get_mut(&a)
        .unwrap()
        .tcp_connect(client, Ipv4Addr::new(12, 0, 0, 1), 80)
        .unwrap();

    assert!(run_until_state(&mut hosts, a, client, kill_time, |s| s == TcpState::Established));
    // Queue far more data than the slow link can deliver before the kill
    // fires.
    let payload = vec![0u8; 10 * 1024 * 1024];
    hosts.get_mut(&a).unwrap().tcp_send(client, &payload).unwrap();

    // Mirror `Engine::run`'s own horizon clamp: the last round it ever drives
    // is capped at exactly `kill_time`, never beyond. Driving this harness to
    // that same cap, instead of past it, is what actually exercises the
    // "never dispatch an event with deliver_time > kill_time" invariant,
    // rather than just checking the kill flag after the fact.
    run_until(&mut hosts, kill_time);

    assert!(hosts[&a].is_killed());
    assert!(hosts[&b].is_killed());

    // The transfer must still be genuinely in flight: with a 1,000 byte/sec
    // link, 10 MiB cannot possibly have drained in 60 simulated seconds, so
    // the kill really did interrupt something rather than racing a transfer
    // that had already finished.
    let stats_a = hosts[&a].stats();
    assert!(
        (stats_a.bytes_sent as usize) < payload.len(),
        "60s at 1,000 B/s cannot have sent all of a 10 MiB payload"
    );

    // And there is still a pending event beyond the kill horizon (the next
    // NIC batch tick, at least) that `run_until`'s horizon cap correctly
    // refused to dispatch.
    let pending_beyond_kill = hosts.values().map(Host::min_time).filter(|t| !t.is_invalid()).any(|t| t > kill_time);
    assert!(
        pending_beyond_kill,
        "work must remain queued past kill_time for the cap to have meant anything"
    );
}

/// Scenario (f): configuring a link with latency below the configured
/// runahead is a fatal configuration error raised at setup, never something
/// discovered mid-run.
#[test]
fn scenario_f_runahead_violation_is_rejected_at_setup() {
    let runahead_ns = 10 * SimTime::MILLISECOND;
    let result = TopologyBuilder::new(runahead_ns)
        .add_cluster(Cluster::new(CLUSTER_A, 1_000_000, 1_000_000))
        .add_cluster(Cluster::new(CLUSTER_B, 1_000_000, 1_000_000))
        .add_link(Link::new(CLUSTER_A, CLUSTER_B, 5 * SimTime::MILLISECOND));

    assert!(result.is_err(), "a 5ms link under a 10ms runahead must fail at setup");
}
