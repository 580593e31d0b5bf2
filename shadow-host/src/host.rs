use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use shadow_log::{HeartbeatLine, LatencySampleLine};
use shadow_nic::{Nic, NicConfig};
use shadow_socket::{Descriptor, DescriptorTable, Socket, TcpConfig, TcpSocket, UdpSocket};
use shadow_time::{Event, EventKind, HostId, HostRng, SequenceCounter, SimTime};
use shadow_topo::{ClusterId, Packet, Protocol, Topology};

use crate::cpu::CpuDelayAccumulator;
use crate::error::HostError;

const NIC_TICK_TIMER_ID: u64 = u64::MAX;
const FIRST_EPHEMERAL_PORT: u16 = 32_768;

/// Per-host, setup-time configuration (spec.md §3 Host, §6 CLI defaults).
#[derive(Clone)]
pub struct HostConfig {
    pub nic: NicConfig,
    pub tcp: TcpConfig,
    pub tcp_backlog: usize,
    pub udp_recv_queue_len: usize,
    pub cpu_threshold_ns: i64,
    pub cpu_precision_ns: u64,
    pub heartbeat_interval_ns: u64,
    pub pcap_enabled: bool,
    /// `0` disables periodic latency-sample reporting (spec.md §6
    /// `--latency-sample-interval`, default 1 simulated second).
    pub latency_sample_interval_ns: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            nic: NicConfig::default(),
            tcp: TcpConfig::default(),
            tcp_backlog: 128,
            udp_recv_queue_len: 64,
            cpu_threshold_ns: 1_000_000, // 1000 microseconds, per spec.md §6 default
            cpu_precision_ns: 200_000,   // 200 microseconds
            heartbeat_interval_ns: 60 * SimTime::SECOND,
            pcap_enabled: false,
            latency_sample_interval_ns: SimTime::SECOND,
        }
    }
}

/// A packet ready to leave this host for delivery to `dest_host` at
/// `event.deliver_time`, produced while ticking the NIC's egress side.
/// The caller (the owning worker) routes this either into the local host's
/// own queue (loopback) or into the cross-worker mailbox that serves
/// `dest_host`.
pub struct RemotePacket {
    pub dest_host: HostId,
    pub event: Event,
    pub packet: Packet,
}

/// A captured packet plus the simulated time it crossed this host's NIC,
/// for PCAP emission (spec.md §6 Persisted state; SPEC_FULL.md §12).
pub struct PcapRecord {
    pub timestamp: SimTime,
    pub packet: Packet,
}

/// Per-host counters aggregated into the engine's final report and
/// heartbeat lines (spec.md §4.8 "emits a final report").
#[derive(Debug, Clone)]
pub struct HostStats {
    pub host_id: HostId,
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub open_descriptors: usize,
}

/// Everything a single dispatch can produce: packets destined elsewhere, and
/// a heartbeat line if this dispatch was a heartbeat tick.
#[derive(Default)]
pub struct DispatchOutcome {
    pub remote_packets: Vec<RemotePacket>,
    pub heartbeat: Option<HeartbeatLine>,
    pub latency_sample: Option<LatencySampleLine>,
}

/// Running min/max/mean accumulator for the latencies this host's NIC has
/// sampled while routing egress packets since the last sample tick.
#[derive(Default)]
struct LatencySampleAccumulator {
    count: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
}

impl LatencySampleAccumulator {
    fn record(&mut self, latency_ns: u64) {
        if self.count == 0 {
            self.min_ns = latency_ns;
            self.max_ns = latency_ns;
        } else {
            self.min_ns = self.min_ns.min(latency_ns);
            self.max_ns = self.max_ns.max(latency_ns);
        }
        self.sum_ns += latency_ns as u128;
        self.count += 1;
    }

    fn take(&mut self) -> Option<(u64, u64, u64, f64)> {
        if self.count == 0 {
            return None;
        }
        let mean = self.sum_ns as f64 / self.count as f64;
        let result = (self.count, self.min_ns, self.max_ns, mean);
        *self = LatencySampleAccumulator::default();
        Some(result)
    }
}

/// One simulated host: its NIC, descriptor table, local event queue, RNG,
/// and the bookkeeping that ties inbound packets to the socket that owns
/// them (spec.md §3 Host, §4.6 Host Runtime).
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub ip: Ipv4Addr,
    pub cluster_id: ClusterId,

    rng: HostRng,
    nic: Nic,
    descriptors: DescriptorTable,
    queue: BinaryHeap<Reverse<Event>>,
    cancelled_timers: HashSet<u64>,
    next_timer_id: u64,
    clock: SimTime,
    cpu: CpuDelayAccumulator,

    bound_tcp_ports: HashMap<u16, Descriptor>,
    tcp_connections: HashMap<(Ipv4Addr, u16, u16), Descriptor>,
    bound_udp_ports: HashMap<u16, Descriptor>,
    next_ephemeral_port: u16,

    topology: Topology,
    sequence: Arc<SequenceCounter>,
    packet_ids: Arc<AtomicU64>,
    config: HostConfig,

    bytes_sent: u64,
    bytes_received: u64,
    packets_sent: u64,
    packets_received: u64,
    packets_dropped: u64,

    /// Packets awaiting their `PacketArrival` event, keyed by packet id.
    /// Keeps `EventKind` itself free of a full `Packet` payload (it only
    /// carries the opaque id) while still moving packets by value across
    /// host and worker boundaries.
    inbound_packets: HashMap<u64, Packet>,

    killed: bool,
    pcap_records: Vec<PcapRecord>,
    latency_samples: LatencySampleAccumulator,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: HostId,
        name: String,
        ip: Ipv4Addr,
        cluster_id: ClusterId,
        global_seed: u64,
        topology: Topology,
        sequence: Arc<SequenceCounter>,
        config: HostConfig,
    ) -> Self {
        Host {
            id,
            name,
            ip,
            cluster_id,
            rng: HostRng::seeded(global_seed, id),
            nic: Nic::new(config.nic.clone()),
            descriptors: DescriptorTable::new(),
            queue: BinaryHeap::new(),
            cancelled_timers: HashSet::new(),
            next_timer_id: 0,
            clock: SimTime::ZERO,
            cpu: CpuDelayAccumulator::new(config.cpu_threshold_ns, config.cpu_precision_ns),
            bound_tcp_ports: HashMap::new(),
            tcp_connections: HashMap::new(),
            bound_udp_ports: HashMap::new(),
            next_ephemeral_port: FIRST_EPHEMERAL_PORT,
            topology,
            sequence,
            packet_ids: Arc::new(AtomicU64::new(0)),
            config,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            packets_dropped: 0,
            inbound_packets: HashMap::new(),
            killed: false,
            pcap_records: Vec::new(),
            latency_samples: LatencySampleAccumulator::default(),
        }
    }

    /// Arm the recurring NIC egress/ingress tick and, if configured, the
    /// heartbeat timer. Called once by the owning worker right after the
    /// host is created.
    pub fn start(&mut self) {
        self.schedule_timer_at(self.clock.add_nanos(self.nic.batch_interval_ns()), NIC_TICK_TIMER_ID, None);
        if self.config.heartbeat_interval_ns > 0 {
            self.schedule_heartbeat();
        }
        if self.config.latency_sample_interval_ns > 0 {
            self.schedule_latency_sample();
        }
    }

    fn schedule_heartbeat(&mut self) {
        let deliver = self.clock.add_nanos(self.config.heartbeat_interval_ns);
        let seq = self.sequence.next();
        self.queue
            .push(Reverse(Event::new(deliver, seq, self.id, EventKind::Heartbeat)));
    }

    fn schedule_latency_sample(&mut self) {
        let deliver = self.clock.add_nanos(self.config.latency_sample_interval_ns);
        let seq = self.sequence.next();
        self.queue
            .push(Reverse(Event::new(deliver, seq, self.id, EventKind::LatencySample)));
    }

    fn schedule_timer_at(&mut self, deliver_time: SimTime, timer_id: u64, descriptor: Option<u64>) {
        let seq = self.sequence.next();
        self.queue.push(Reverse(Event::new(
            deliver_time,
            seq,
            self.id,
            EventKind::TimerCallback { timer_id, descriptor },
        )));
    }

    /// Arm a one-shot timer, returning its id so the caller can cancel it
    /// later. `descriptor` ties the timer to the socket that owns it, if any
    /// (spec.md §4.6: "timer creation with `(delay_ns, callback, arg)`").
    pub fn arm_timer(&mut self, delay_ns: u64, descriptor: Option<Descriptor>) -> u64 {
        let timer_id = self.next_timer_id;
        self.next_timer_id += 1;
        let deliver = self.clock.add_nanos(delay_ns);
        self.schedule_timer_at(deliver, timer_id, descriptor.map(|d| d.0));
        timer_id
    }

    /// Cancel a previously armed timer. The event stays in the heap (a
    /// binary heap has no efficient by-key removal) and is skipped when it
    /// is eventually popped (spec.md §5 Cancellation and timeouts).
    pub fn cancel_timer(&mut self, timer_id: u64) {
        self.cancelled_timers.insert(timer_id);
    }

    pub fn min_time(&self) -> SimTime {
        self.queue.peek().map(|Reverse(e)| e.deliver_time).unwrap_or(SimTime::INVALID)
    }

    /// Borrow the next ready event without removing it, so a worker can
    /// compare it against the head of every other owned host's queue and
    /// pick the globally next `(deliver_time, sequence)` across the whole
    /// partition (spec.md §4.7).
    pub fn peek(&self) -> Option<&Event> {
        self.queue.peek().map(|Reverse(e)| e)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            host_id: self.id,
            name: self.name.clone(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_dropped: self.packets_dropped,
            open_descriptors: self.descriptors.len(),
        }
    }

    /// Drain the packet records captured this round for PCAP emission.
    /// Empty unless `HostConfig::pcap_enabled` is set (spec.md §6 Persisted
    /// state).
    pub fn drain_pcap_records(&mut self) -> Vec<PcapRecord> {
        std::mem::take(&mut self.pcap_records)
    }

    /// Arm the kill event for this host at `at`, called by the engine during
    /// setup, before `start()` ever runs. Allocating its sequence number
    /// ahead of every other event this host will ever schedule gives it
    /// priority over anything else due at the same instant (spec.md §4.8:
    /// "the kill event is the highest priority at its deliver-time").
    pub fn schedule_kill(&mut self, at: SimTime) {
        let seq = self.sequence.next();
        self.queue.push(Reverse(Event::new(at, seq, self.id, EventKind::EngineKill)));
    }

    /// Push an event into this host's own queue. Used by the worker to
    /// deliver cross-worker mailbox entries once the barrier has merged
    /// them, and internally for same-host scheduling.
    pub fn push_event(&mut self, event: Event) {
        debug_assert_eq!(event.target_host, self.id);
        self.queue.push(Reverse(event));
    }

    /// Deliver an inbound packet alongside its arrival event: the packet is
    /// stashed locally and the event is queued, so the two travel together
    /// even when the event crossed a worker boundary (spec.md §3 Ownership
    /// summary: "Packets are handed off by value (move) when crossing
    /// hosts.").
    pub fn deliver_inbound_packet(&mut self, event: Event, packet: Packet) {
        debug_assert_eq!(event.target_host, self.id);
        // The NIC's own ingress buffer accounting happens at dispatch time,
        // not here, so that bucket refills stay anchored to `tick_ingress`.
        self.inbound_packets.insert(packet.id.0, packet);
        self.queue.push(Reverse(event));
    }

    /// Pop and dispatch the next ready event, if any is due by `horizon`.
    /// Returns `None` once the host has no event with `deliver_time <=
    /// horizon`.
    pub fn dispatch_next(&mut self, horizon: SimTime) -> Option<DispatchOutcome> {
        loop {
            let Reverse(event) = self.queue.peek()?.clone();
            if event.deliver_time > horizon {
                return None;
            }
            self.queue.pop();

            if let EventKind::TimerCallback { timer_id, .. } = &event.kind {
                if self.cancelled_timers.remove(timer_id) {
                    continue;
                }
            }

            debug_assert!(event.deliver_time >= self.clock, "event scheduled in the past");
            self.clock = event.deliver_time;
            return Some(self.dispatch(event));
        }
    }

    fn dispatch(&mut self, event: Event) -> DispatchOutcome {
        match event.kind {
            EventKind::PacketArrival { packet_id } => self.on_packet_arrival(packet_id),
            EventKind::TimerCallback { timer_id, descriptor } => {
                if timer_id == NIC_TICK_TIMER_ID {
                    self.on_nic_tick()
                } else if let Some(d) = descriptor {
                    self.on_socket_timer(Descriptor(d));
                    DispatchOutcome::default()
                } else {
                    DispatchOutcome::default()
                }
            }
            EventKind::SocketCallback { .. } => DispatchOutcome::default(),
            EventKind::Heartbeat => self.on_heartbeat(),
            EventKind::LatencySample => self.on_latency_sample(),
            EventKind::EngineKill => {
                self.killed = true;
                DispatchOutcome::default()
            }
        }
    }

    fn on_heartbeat(&mut self) -> DispatchOutcome {
        let line = HeartbeatLine {
            host_name: self.name.clone(),
            sim_time_secs: self.clock.as_secs_f64(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_dropped: self.packets_dropped,
            active_sockets: self.descriptors.len() as u32,
        };
        self.schedule_heartbeat();
        DispatchOutcome {
            remote_packets: Vec::new(),
            heartbeat: Some(line),
            latency_sample: None,
        }
    }

    /// Summarize the latencies this host's NIC sampled while routing egress
    /// packets since the last tick, then reschedule (spec.md §6
    /// `--latency-sample-interval`). Skips emitting a line if nothing was
    /// sent this interval, rather than reporting a meaningless all-zero
    /// sample.
    fn on_latency_sample(&mut self) -> DispatchOutcome {
        let sample = self.latency_samples.take().map(|(count, min_ns, max_ns, mean_ns)| LatencySampleLine {
            host_name: self.name.clone(),
            sim_time_secs: self.clock.as_secs_f64(),
            count,
            min_ns,
            max_ns,
            mean_ns,
        });
        self.schedule_latency_sample();
        DispatchOutcome {
            remote_packets: Vec::new(),
            heartbeat: None,
            latency_sample: sample,
        }
    }

    fn on_nic_tick(&mut self) -> DispatchOutcome {
        let interval = self.nic.batch_interval_ns();
        let mut outcome = DispatchOutcome::default();

        let transmitted = self.nic.tick_egress(interval);
        for t in transmitted {
            self.route_and_send(t.packet, &mut outcome);
        }

        let arrived = self.nic.tick_ingress(interval);
        for packet in arrived {
            self.deliver_to_socket(packet);
        }

        self.pump_all_tcp_sockets(&mut outcome);
        self.check_all_tcp_timers();

        if self.nic_tick_still_needed() {
            self.schedule_timer_at(self.clock.add_nanos(interval), NIC_TICK_TIMER_ID, None);
        }
        outcome
    }

    /// Whether this host's NIC has any reason to tick again: queued egress
    /// or ingress traffic, or a TCP socket with data still waiting behind
    /// the send window. Without this check the tick would rearm forever and
    /// the engine's "all hosts' queues are empty" termination condition
    /// (spec.md §4.8) could never be reached for an otherwise-idle host.
    /// Safe because nothing outside the NIC tick itself ever buffers new
    /// data into a socket mid-run — guest-call interception is out of scope
    /// (spec.md §1) — so once nothing is pending, nothing ever will be.
    fn nic_tick_still_needed(&self) -> bool {
        if self.nic.has_pending_egress() || self.nic.has_pending_ingress() {
            return true;
        }
        self.descriptors.iter().any(|(_, socket)| {
            socket.as_tcp().is_some_and(|tcp| {
                tcp.has_unsent_data()
                    || tcp.retransmit_deadline().is_some()
                    || tcp.keepalive_deadline().is_some()
                    || tcp.is_time_wait()
            })
        })
    }

    /// Check every open TCP socket's retransmission, TIME_WAIT, and
    /// keepalive deadlines against the current clock, firing whichever have
    /// come due. Driven from the recurring NIC tick rather than a discrete
    /// per-socket timer event, since `nic_tick_still_needed` already keeps
    /// the tick alive for exactly as long as any of these deadlines are
    /// pending (spec.md §4.4 Retransmission/Close; SPEC_FULL.md §12
    /// keepalive timers).
    fn check_all_tcp_timers(&mut self) {
        let descriptors: Vec<Descriptor> = self
            .descriptors
            .iter()
            .filter_map(|(d, s)| s.as_tcp().map(|_| d))
            .collect();
        for descriptor in descriptors {
            self.on_socket_timer(descriptor);
        }
    }

    fn route_and_send(&mut self, packet: Packet, outcome: &mut DispatchOutcome) {
        let route = match self.topology.resolve(packet.src_ip, packet.dst_ip) {
            Ok(route) => route,
            Err(_) => {
                self.packets_dropped += 1;
                return;
            }
        };

        self.bytes_sent += packet.wire_size() as u64;
        self.packets_sent += 1;
        if self.config.pcap_enabled {
            self.pcap_records.push(PcapRecord {
                timestamp: self.clock,
                packet: packet.clone(),
            });
        }

        if route.sample_loss(&mut self.rng) {
            self.packets_dropped += 1;
            return;
        }

        let latency_ns = route.sample_latency(&mut self.rng);
        self.latency_samples.record(latency_ns);
        let deliver_time = self.clock.add_nanos(latency_ns);

        let Some(dest_host) = self.topology.host_at(packet.dst_ip) else {
            self.packets_dropped += 1;
            return;
        };

        let seq = self.sequence.next();
        let event = Event::new(
            deliver_time,
            seq,
            dest_host,
            EventKind::PacketArrival { packet_id: packet.id.0 },
        );

        if dest_host == self.id {
            self.deliver_inbound_packet(event, packet);
        } else {
            outcome.remote_packets.push(RemotePacket {
                dest_host,
                event,
                packet,
            });
        }
    }

    fn on_packet_arrival(&mut self, packet_id: u64) -> DispatchOutcome {
        let Some(packet) = self.inbound_packets.remove(&packet_id) else {
            return DispatchOutcome::default();
        };
        self.bytes_received += packet.wire_size() as u64;
        self.packets_received += 1;
        if self.config.pcap_enabled {
            self.pcap_records.push(PcapRecord {
                timestamp: self.clock,
                packet: packet.clone(),
            });
        }

        let interval = self.nic.batch_interval_ns();
        match self.nic.receive(packet, interval) {
            Ok(()) => {}
            Err(_) => self.packets_dropped += 1,
        }
        DispatchOutcome::default()
    }

    fn deliver_to_socket(&mut self, packet: Packet) {
        match packet.protocol {
            Protocol::Udp => {
                if let Some(&descriptor) = self.bound_udp_ports.get(&packet.dst_port) {
                    if let Ok(socket) = self.descriptors.get_mut(descriptor) {
                        if let Some(udp) = socket.as_udp_mut() {
                            udp.deliver(packet);
                        }
                    }
                }
            }
            Protocol::Tcp => {
                let Some(header) = packet.tcp else { return };
                let key = (packet.src_ip, packet.src_port, packet.dst_port);
                if let Some(&descriptor) = self.tcp_connections.get(&key) {
                    if let Ok(socket) = self.descriptors.get_mut(descriptor) {
                        if let Some(tcp) = socket.as_tcp_mut() {
                            let out = tcp.on_segment(packet.src_ip, packet.src_port, &header, packet.payload(), self.clock);
                            self.enqueue_tcp_output(descriptor, out.to_send);
                        }
                    }
                    return;
                }
                if let Some(&listener) = self.bound_tcp_ports.get(&packet.dst_port) {
                    if let Ok(socket) = self.descriptors.get_mut(listener) {
                        if let Some(tcp) = socket.as_tcp_mut() {
                            if let Some(out) = tcp.deliver_to_backlog(packet.src_ip, packet.src_port, &header, packet.payload(), self.clock) {
                                self.enqueue_tcp_output(listener, out.to_send);
                            } else {
                                let out = tcp.on_segment(packet.src_ip, packet.src_port, &header, packet.payload(), self.clock);
                                self.enqueue_tcp_output(listener, out.to_send);
                            }
                        }
                    }
                }
            }
        }
    }

    fn enqueue_tcp_output(&mut self, descriptor: Descriptor, packets: Vec<Packet>) {
        for packet in packets {
            self.nic.enqueue_egress(descriptor.0, packet);
        }
    }

    fn pump_all_tcp_sockets(&mut self, _outcome: &mut DispatchOutcome) {
        let now = self.clock;
        let descriptors: Vec<Descriptor> = self
            .descriptors
            .iter()
            .filter_map(|(d, s)| s.as_tcp().map(|_| d))
            .collect();
        for descriptor in descriptors {
            if let Ok(socket) = self.descriptors.get_mut(descriptor) {
                if let Some(tcp) = socket.as_tcp_mut() {
                    for segment in tcp.pump_send(now) {
                        self.nic.enqueue_egress(descriptor.0, segment);
                    }
                }
            }
        }
    }

    fn on_socket_timer(&mut self, descriptor: Descriptor) {
        let now = self.clock;
        let Ok(socket) = self.descriptors.get_mut(descriptor) else {
            return;
        };
        let Some(tcp) = socket.as_tcp_mut() else { return };

        if tcp.time_wait_expired(now) {
            tcp.mark_closed();
            let _ = self.descriptors.remove(descriptor);
            return;
        }

        if let Some(deadline) = tcp.retransmit_deadline() {
            if deadline <= now {
                match tcp.on_retransmit_timeout(now) {
                    Ok(out) => self.enqueue_tcp_output(descriptor, out.to_send),
                    Err(_) => {
                        let _ = self.descriptors.remove(descriptor);
                        return;
                    }
                }
            }
        }

        let Ok(socket) = self.descriptors.get_mut(descriptor) else {
            return;
        };
        let Some(tcp) = socket.as_tcp_mut() else { return };
        if let Some(deadline) = tcp.keepalive_deadline() {
            if deadline <= now {
                match tcp.on_keepalive_timeout(now) {
                    Ok(out) => self.enqueue_tcp_output(descriptor, out.to_send),
                    Err(_) => {
                        let _ = self.descriptors.remove(descriptor);
                    }
                }
            }
        }
    }

    fn allocate_ephemeral_port(&mut self) -> Result<u16, HostError> {
        for _ in 0..u16::MAX {
            let port = self.next_ephemeral_port;
            self.next_ephemeral_port = self.next_ephemeral_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            if !self.bound_tcp_ports.contains_key(&port) && !self.bound_udp_ports.contains_key(&port) {
                return Ok(port);
            }
        }
        Err(HostError::PortsExhausted)
    }

    /// Create a TCP socket bound to `local_port` (0 picks an ephemeral
    /// port).
    pub fn tcp_socket(&mut self, local_port: u16) -> Result<Descriptor, HostError> {
        let port = if local_port == 0 {
            self.allocate_ephemeral_port()?
        } else {
            if self.bound_tcp_ports.contains_key(&local_port) {
                return Err(HostError::AddressInUse(local_port));
            }
            local_port
        };
        let iss = self.rng.next_u64() as u32;
        let socket = TcpSocket::new(self.ip, port, self.config.tcp.clone(), iss, self.packet_ids.clone());
        let descriptor = self.descriptors.insert(Socket::Tcp(socket))?;
        self.bound_tcp_ports.insert(port, descriptor);
        Ok(descriptor)
    }

    pub fn tcp_connect(&mut self, descriptor: Descriptor, remote_ip: Ipv4Addr, remote_port: u16) -> Result<(), HostError> {
        let local_port;
        {
            let socket = self.descriptors.get_mut(descriptor)?;
            let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
            local_port = tcp.local_port;
            let syn = tcp.connect(remote_ip, remote_port)?;
            self.nic.enqueue_egress(descriptor.0, syn);
        }
        self.tcp_connections.insert((remote_ip, remote_port, local_port), descriptor);
        Ok(())
    }

    pub fn tcp_listen(&mut self, descriptor: Descriptor, backlog: usize) -> Result<(), HostError> {
        let socket = self.descriptors.get_mut(descriptor)?;
        let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
        tcp.listen(backlog)?;
        self.bound_tcp_ports.insert(tcp.local_port, descriptor);
        Ok(())
    }

    /// Promote a fully-established pending connection out of a listening
    /// socket's backlog into its own descriptor.
    pub fn tcp_accept(&mut self, listener: Descriptor) -> Result<Option<Descriptor>, HostError> {
        let child = {
            let socket = self.descriptors.get_mut(listener)?;
            let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
            tcp.accept()
        };
        let Some(child) = child else { return Ok(None) };
        let remote_ip = child.remote_ip;
        let remote_port = child.remote_port;
        let local_port = child.local_port;
        let descriptor = self.descriptors.insert(Socket::Tcp(child))?;
        self.tcp_connections.insert((remote_ip, remote_port, local_port), descriptor);
        Ok(Some(descriptor))
    }

    pub fn tcp_send(&mut self, descriptor: Descriptor, bytes: &[u8]) -> Result<usize, HostError> {
        let socket = self.descriptors.get_mut(descriptor)?;
        let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
        Ok(tcp.send(bytes)?)
    }

    pub fn tcp_recv(&mut self, descriptor: Descriptor, buf: &mut [u8]) -> Result<usize, HostError> {
        let socket = self.descriptors.get_mut(descriptor)?;
        let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
        Ok(tcp.recv(buf)?)
    }

    pub fn tcp_close(&mut self, descriptor: Descriptor) -> Result<(), HostError> {
        let now = self.clock;
        let socket = self.descriptors.get_mut(descriptor)?;
        let tcp = socket.as_tcp_mut().ok_or(HostError::PortsExhausted)?;
        if let Some(fin) = tcp.close(now)? {
            self.nic.enqueue_egress(descriptor.0, fin);
        }
        Ok(())
    }

    /// Poll (and drain) the `TcpEvent`s accumulated for `descriptor` since
    /// the last call. Since this implementation doesn't bridge guest-call
    /// interception (out of scope, spec.md §1), callers poll state directly
    /// rather than being woken via `SocketCallback`.
    pub fn tcp_state(&self, descriptor: Descriptor) -> Result<shadow_socket::TcpState, HostError> {
        let socket = self.descriptors.get(descriptor)?;
        let tcp = socket.as_tcp().ok_or(HostError::PortsExhausted)?;
        Ok(tcp.state)
    }

    pub fn udp_socket(&mut self, local_port: u16) -> Result<Descriptor, HostError> {
        let port = if local_port == 0 {
            self.allocate_ephemeral_port()?
        } else {
            if self.bound_udp_ports.contains_key(&local_port) {
                return Err(HostError::AddressInUse(local_port));
            }
            local_port
        };
        let socket = UdpSocket::new(self.ip, port, self.config.udp_recv_queue_len, self.packet_ids.clone());
        let descriptor = self.descriptors.insert(Socket::Udp(socket))?;
        self.bound_udp_ports.insert(port, descriptor);
        Ok(descriptor)
    }

    pub fn udp_send_to(&mut self, descriptor: Descriptor, dst_ip: Ipv4Addr, dst_port: u16, payload: &[u8]) -> Result<(), HostError> {
        let packet = {
            let socket = self.descriptors.get(descriptor)?;
            let udp = socket.as_udp().ok_or(HostError::PortsExhausted)?;
            udp.send_to(dst_ip, dst_port, payload)?
        };
        self.nic.enqueue_egress(descriptor.0, packet);
        Ok(())
    }

    pub fn udp_recv_from(&mut self, descriptor: Descriptor) -> Result<Option<(Ipv4Addr, u16, Arc<[u8]>)>, HostError> {
        let socket = self.descriptors.get_mut(descriptor)?;
        let udp = socket.as_udp_mut().ok_or(HostError::PortsExhausted)?;
        Ok(udp.recv_from())
    }

    pub fn close_socket(&mut self, descriptor: Descriptor) -> Result<(), HostError> {
        let socket = self.descriptors.remove(descriptor)?;
        match socket {
            Socket::Tcp(tcp) => {
                self.bound_tcp_ports.remove(&tcp.local_port);
                self.tcp_connections.retain(|_, d| *d != descriptor);
            }
            Socket::Udp(udp) => {
                self.bound_udp_ports.remove(&udp.local_port);
            }
        }
        Ok(())
    }

    /// Draw the next value from this host's deterministic RNG, exposed to
    /// guest code per spec.md §4.6.
    pub fn next_random_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn open_descriptor_count(&self) -> usize {
        self.descriptors.len()
    }
}
