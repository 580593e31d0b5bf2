use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use shadow_host::{Host, HostStats, PcapRecord, RemotePacket};
use shadow_log::HeartbeatLine;
use shadow_time::{HostId, SimTime};

use crate::error::WorkerError;
use crate::mailbox::MailboxEntry;

/// Identifies one of the engine's worker threads; owned hosts are
/// partitioned across these (spec.md §2 component 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u32);

/// Everything produced by draining a partition up to a horizon: the new
/// local minimum time (for the engine's horizon recomputation), how many
/// events were dispatched, and any heartbeat lines emitted this round.
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub worker_id: u32,
    pub min_time: SimTime,
    pub dispatched: u64,
    pub heartbeats: Vec<HeartbeatLine>,
    pub killed_hosts: Vec<HostId>,
    pub idle: bool,
    /// Current counters for every host this worker owns, refreshed every
    /// round so the engine can assemble its final report without ever
    /// reaching back into a worker thread's hosts directly.
    pub host_stats: Vec<HostStats>,
    /// Packets captured at NIC egress/ingress since the last round, per
    /// host, when that host's `HostConfig::pcap_enabled` is set.
    pub pcap: Vec<(HostId, Vec<PcapRecord>)>,
}

enum WorkerCommand {
    RunUntil(SimTime),
    Shutdown,
}

/// A worker thread's exclusive partition of hosts, the round-draining loop,
/// and the cross-worker mailbox plumbing (spec.md §4.7, §5).
///
/// Grounded on `mvirt-net::dataplane::worker`'s per-NIC worker thread:
/// one thread, one partition, a command/report channel pair instead of a
/// blocking vhost-user socket loop.
struct Worker {
    id: WorkerId,
    hosts: HashMap<HostId, Host>,
    inbox: Receiver<MailboxEntry>,
    outboxes: HashMap<WorkerId, Sender<MailboxEntry>>,
    /// Read-only after setup (spec.md §5): which worker owns each host,
    /// consulted when a dispatched event targets a host this worker
    /// doesn't own.
    host_owner: Arc<HashMap<HostId, WorkerId>>,
}

impl Worker {
    fn new(
        id: WorkerId,
        hosts: Vec<Host>,
        inbox: Receiver<MailboxEntry>,
        outboxes: HashMap<WorkerId, Sender<MailboxEntry>>,
        host_owner: Arc<HashMap<HostId, WorkerId>>,
    ) -> Self {
        Worker {
            id,
            hosts: hosts.into_iter().map(|h| (h.id, h)).collect(),
            inbox,
            outboxes,
            host_owner,
        }
    }

    fn start_hosts(&mut self) {
        for host in self.hosts.values_mut() {
            host.start();
        }
    }

    /// Pull every mailbox entry that has arrived since the last round and
    /// push it into the owning host's local queue. Entries for a host this
    /// worker doesn't (or no longer) own are dropped with a warning — that
    /// can only happen if host ownership changes mid-run, which this engine
    /// never does.
    fn drain_inbox(&mut self) {
        while let Ok(entry) = self.inbox.try_recv() {
            match self.hosts.get_mut(&entry.event.target_host) {
                Some(host) => match entry.packet {
                    Some(packet) => host.deliver_inbound_packet(entry.event, packet),
                    None => host.push_event(entry.event),
                },
                None => warn!(
                    worker = self.id.0,
                    host = entry.event.target_host.as_u32(),
                    "dropped mailbox entry for a host this worker does not own"
                ),
            }
        }
    }

    /// Route a packet produced by dispatch: same-partition hosts are
    /// delivered directly (no channel round-trip needed), cross-partition
    /// hosts go out through that destination worker's mailbox sender
    /// (spec.md §4.7: "may produce new events either for the same host
    /// ... or for a host owned by another worker, routed via a
    /// cross-worker mailbox").
    fn route_remote_packet(&mut self, remote: RemotePacket) {
        if let Some(host) = self.hosts.get_mut(&remote.dest_host) {
            host.deliver_inbound_packet(remote.event, remote.packet);
            return;
        }
        let Some(&owner) = self.host_owner.get(&remote.dest_host) else {
            warn!(host = remote.dest_host.as_u32(), "packet routed to an unknown host id");
            return;
        };
        if let Some(sender) = self.outboxes.get(&owner) {
            let _ = sender.send(MailboxEntry {
                event: remote.event,
                packet: Some(remote.packet),
            });
        }
    }

    /// The minimum `deliver_time` across every event currently queued for
    /// this partition, or `SimTime::INVALID` if every owned host is idle.
    fn local_min_time(&self) -> SimTime {
        self.hosts
            .values()
            .map(Host::min_time)
            .min()
            .unwrap_or(SimTime::INVALID)
    }

    /// Drain the partition in strict global `(deliver_time, sequence)`
    /// order up to `horizon`, dispatching one event at a time and routing
    /// whatever packets each dispatch produces (spec.md §4.7 Worker).
    fn run_until(&mut self, horizon: SimTime) -> WorkerReport {
        self.drain_inbox();

        let mut dispatched = 0u64;
        let mut heartbeats = Vec::new();
        let mut killed_hosts = Vec::new();

        loop {
            let next_host = self
                .hosts
                .values()
                .filter_map(|h| h.peek().map(|e| (h.id, e.deliver_time, e.sequence)))
                .filter(|&(_, t, _)| t <= horizon)
                .min_by_key(|&(_, t, seq)| (t, seq))
                .map(|(id, _, _)| id);

            let Some(host_id) = next_host else { break };
            let host = self.hosts.get_mut(&host_id).expect("host id came from self.hosts");
            let Some(outcome) = host.dispatch_next(horizon) else {
                // Every remaining event at the head was a cancelled timer;
                // the host has nothing left due by `horizon`.
                continue;
            };
            dispatched += 1;
            if host.is_killed() {
                killed_hosts.push(host_id);
            }
            if let Some(line) = outcome.heartbeat {
                heartbeats.push(line);
            }
            for remote in outcome.remote_packets {
                self.route_remote_packet(remote);
            }
        }

        let min_time = self.local_min_time();
        let host_stats = self.hosts.values().map(Host::stats).collect();
        let pcap = self
            .hosts
            .values_mut()
            .filter_map(|h| {
                let records = h.drain_pcap_records();
                (!records.is_empty()).then_some((h.id, records))
            })
            .collect();

        WorkerReport {
            worker_id: self.id.0,
            min_time,
            dispatched,
            heartbeats,
            killed_hosts,
            idle: min_time.is_invalid(),
            host_stats,
            pcap,
        }
    }
}

/// A handle the engine holds for a running worker thread: a command sender
/// and a report receiver, mirroring `mvirt-net::dataplane::worker::WorkerHandle`
/// (minus the vhost-specific exit-eventfd wakeup, which this worker has no
/// need for since it never blocks on outside I/O between rounds).
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    command_tx: Sender<WorkerCommand>,
    report_rx: Receiver<WorkerReport>,
    pub worker_id: WorkerId,
}

impl WorkerHandle {
    /// Ask the worker to drain its partition up to `horizon`. Asynchronous:
    /// call [`WorkerHandle::recv_report`] to block for the result.
    pub fn run_until(&self, horizon: SimTime) -> Result<(), WorkerError> {
        self.command_tx
            .send(WorkerCommand::RunUntil(horizon))
            .map_err(|_| WorkerError::WorkerGone(self.worker_id.0))
    }

    pub fn recv_report(&self) -> Result<WorkerReport, WorkerError> {
        self.report_rx
            .recv()
            .map_err(|_| WorkerError::WorkerGone(self.worker_id.0))
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal shutdown and join the thread.
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| WorkerError::ThreadPanicked(self.worker_id.0))?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn a worker thread owning `hosts`, consuming `inbox` for cross-worker
/// deliveries and holding `outboxes` to send packets destined for hosts
/// other workers own.
///
/// Propagates a failed `Builder::spawn` to the caller instead of panicking,
/// matching `mvirt-net::dataplane::worker::spawn_worker`'s
/// `.map_err(...)?` handling of the identical fallible OS call — a worker
/// thread failing to spawn is a resource condition the engine can report
/// and abort setup on, not an invariant violation.
pub fn spawn_worker(
    id: WorkerId,
    hosts: Vec<Host>,
    inbox: Receiver<MailboxEntry>,
    outboxes: HashMap<WorkerId, Sender<MailboxEntry>>,
    host_owner: Arc<HashMap<HostId, WorkerId>>,
) -> Result<WorkerHandle, WorkerError> {
    let (command_tx, command_rx) = crossbeam_channel::unbounded::<WorkerCommand>();
    let (report_tx, report_rx) = crossbeam_channel::unbounded::<WorkerReport>();

    let thread_name = format!("shadow-worker-{}", id.0);
    let thread = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let mut worker = Worker::new(id, hosts, inbox, outboxes, host_owner);
            worker.start_hosts();
            loop {
                match command_rx.recv() {
                    Ok(WorkerCommand::RunUntil(horizon)) => {
                        let report = worker.run_until(horizon);
                        debug!(worker = id.0, dispatched = report.dispatched, "round complete");
                        if report_tx.send(report).is_err() {
                            break;
                        }
                    }
                    Ok(WorkerCommand::Shutdown) | Err(_) => break,
                }
            }
        })
        .map_err(|e| WorkerError::SpawnFailed(id.0, e))?;

    Ok(WorkerHandle {
        thread: Some(thread),
        command_tx,
        report_rx,
        worker_id: id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use shadow_time::{HostId, SequenceCounter};
    use shadow_topo::{Cluster, ClusterId, TopologyBuilder};

    fn single_host_topology() -> shadow_topo::Topology {
        let cluster = ClusterId(1);
        TopologyBuilder::new(10_000_000)
            .add_cluster(Cluster::new(cluster, 1_000_000, 1_000_000))
            .add_host(Ipv4Addr::new(10, 0, 0, 1), HostId::new(0), cluster)
            .unwrap()
            .build()
    }

    fn make_host(id: u32) -> Host {
        Host::new(
            HostId::new(id),
            format!("host{id}"),
            Ipv4Addr::new(10, 0, 0, (id + 1) as u8),
            shadow_topo::ClusterId(1),
            1,
            single_host_topology(),
            Arc::new(SequenceCounter::new()),
            Default::default(),
        )
    }

    #[test]
    fn worker_reports_idle_when_no_events_due() {
        let (_tx, inbox) = crossbeam_channel::unbounded();
        let mut worker = Worker::new(WorkerId(0), vec![make_host(0)], inbox, HashMap::new(), Arc::new(HashMap::new()));
        let report = worker.run_until(SimTime::from_millis(1));
        // The host's NIC tick timer was never armed (start() wasn't called),
        // so nothing is due.
        assert_eq!(report.dispatched, 0);
        assert!(report.idle);
    }

    #[test]
    fn worker_dispatches_heartbeat_after_start() {
        let mut config = shadow_host::HostConfig::default();
        config.heartbeat_interval_ns = 1_000_000;
        let host = Host::new(
            HostId::new(0),
            "h0".into(),
            Ipv4Addr::new(10, 0, 0, 1),
            shadow_topo::ClusterId(1),
            1,
            single_host_topology(),
            Arc::new(SequenceCounter::new()),
            config,
        );
        let (_tx, inbox) = crossbeam_channel::unbounded();
        let mut worker = Worker::new(WorkerId(0), vec![host], inbox, HashMap::new(), Arc::new(HashMap::new()));
        worker.start_hosts();
        let report = worker.run_until(SimTime::from_millis(1));
        assert_eq!(report.heartbeats.len(), 1);
    }

    #[test]
    fn mailbox_entries_are_delivered_to_owned_hosts() {
        let (tx, inbox) = crossbeam_channel::unbounded();
        let mut worker = Worker::new(WorkerId(0), vec![make_host(0)], inbox, HashMap::new(), Arc::new(HashMap::new()));
        let seq = shadow_time::SequenceCounter::new();
        let event = shadow_time::Event::new(
            SimTime::from_millis(1),
            seq.next(),
            HostId::new(0),
            shadow_time::EventKind::Heartbeat,
        );
        tx.send(MailboxEntry { event, packet: None }).unwrap();
        worker.drain_inbox();
        let report = worker.run_until(SimTime::from_millis(2));
        assert_eq!(report.dispatched, 1);
    }
}
