use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

use shadow_time::SimTime;
use shadow_topo::{Packet, PacketId, Protocol, TcpFlags, TcpHeader};

use crate::error::SocketError;

/// Default maximum segment size. Wire-level header overhead (the 66-byte
/// TCP header over Ethernet-v2+IP+TCP) is accounted separately from the
/// stream-layer segment size; 1460 is the conventional Internet default for
/// a 1500-byte-MTU path and is used here purely to size outgoing segments,
/// independent of the token-bucket accounting in `shadow-nic`, which always
/// charges the full `Packet::wire_size()`.
pub const DEFAULT_MSS: u32 = 1460;

const INITIAL_CWND_SEGMENTS: u32 = 10;
const RTO_MIN_NS: u64 = 200 * SimTime::MILLISECOND;
const RTO_MAX_NS: u64 = 60 * SimTime::SECOND;
const RTO_INITIAL_NS: u64 = SimTime::SECOND;
const MAX_RETRANSMITS: u32 = 12;
const DEFAULT_TIME_WAIT_NS: u64 = 60 * SimTime::SECOND;
const DUP_ACK_THRESHOLD: u32 = 3;

/// RFC 793 states, adapted to event-driven dispatch (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Configuration knobs surfaced on the CLI (spec.md §6).
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub initial_cwnd_segments: u32,
    pub mss: u32,
    pub send_buffer_bytes: u32,
    pub recv_buffer_bytes: u32,
    pub autotune: bool,
    pub autotune_max_bytes: u32,
    pub time_wait_ns: u64,
    pub keepalive_interval_ns: Option<u64>,
    pub keepalive_max_probes: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            initial_cwnd_segments: INITIAL_CWND_SEGMENTS,
            mss: DEFAULT_MSS,
            // CLI default per spec.md §6: autotune if 0, else 174,760 / 131,072.
            send_buffer_bytes: 131_072,
            recv_buffer_bytes: 174_760,
            autotune: true,
            autotune_max_bytes: 16 * 1024 * 1024,
            time_wait_ns: DEFAULT_TIME_WAIT_NS,
            keepalive_interval_ns: None,
            keepalive_max_probes: 8,
        }
    }
}

/// A high-level event the owning host reacts to (waking a blocked guest
/// call, scheduling the socket's next timer deadline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpEvent {
    /// `connect()` completed; the socket is ESTABLISHED.
    Connected,
    /// A new connection finished its handshake and is waiting in the
    /// listening socket's accept backlog.
    IncomingConnectionReady,
    /// Bytes are available in the receive buffer for `recv()`.
    DataAvailable,
    /// The peer drained receive-window space; a blocked `send()` can retry.
    SendWindowOpened,
    /// The connection finished closing (reached CLOSED from TIME_WAIT, or
    /// was reset).
    Closed,
    /// The connection was reset (RST received, or retransmission timeout
    /// exceeded).
    Reset,
    /// Nothing externally observable happened.
    None,
}

/// A congestion event observed this round, surfaced for telemetry/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionEvent {
    None,
    FastRetransmit,
    Timeout,
}

/// The result of feeding the state machine a packet or a timer firing:
/// packets to transmit, the next retransmit deadline (if any), and the
/// externally observable event.
#[derive(Debug, Clone, Default)]
pub struct TcpOutput {
    pub to_send: Vec<Packet>,
    pub event: Option<TcpEvent>,
}

#[derive(Debug, Clone)]
struct InFlightSegment {
    seq: u32,
    len: u32,
    sent_at: SimTime,
    retransmits: u32,
}

/// One TCP endpoint's full connection state.
pub struct TcpSocket {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub state: TcpState,
    config: TcpConfig,

    // -- send side --
    send_una: u32,
    send_nxt: u32,
    send_buffer: VecDeque<u8>,
    in_flight: BTreeMap<u32, InFlightSegment>,
    peer_window: u32,
    cwnd: u32,
    ssthresh: u32,
    dup_ack_count: u32,
    last_ack_seen: Option<u32>,

    // -- receive side --
    recv_nxt: u32,
    recv_buffer: VecDeque<u8>,
    reassembly: BTreeMap<u32, Vec<u8>>,
    recv_buffer_cap: u32,
    send_buffer_cap: u32,

    // -- RTT / RTO --
    srtt_ns: Option<f64>,
    rttvar_ns: f64,
    rto_ns: u64,
    retransmit_deadline: Option<SimTime>,

    // -- close / listen --
    iss: u32,
    backlog: VecDeque<TcpSocket>,
    backlog_cap: usize,
    time_wait_deadline: Option<SimTime>,
    keepalive_deadline: Option<SimTime>,
    keepalive_probes_sent: u32,
    /// `close()` was called but some application bytes were still queued
    /// unsent at the time; the FIN is held back until `pump_send` has
    /// drained the rest of `send_buffer`, so its sequence number always
    /// lands right after the last data byte (spec.md §4.4 Close).
    fin_pending: bool,
    fin_sent: bool,

    next_packet_id: Arc<std::sync::atomic::AtomicU64>,
}

impl TcpSocket {
    /// Construct a CLOSED socket bound to `(local_ip, local_port)`, ready
    /// for `connect()` or `listen()`.
    pub fn new(
        local_ip: Ipv4Addr,
        local_port: u16,
        config: TcpConfig,
        iss: u32,
        next_packet_id: Arc<std::sync::atomic::AtomicU64>,
    ) -> Self {
        TcpSocket {
            local_ip,
            local_port,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
            state: TcpState::Closed,
            send_una: iss,
            send_nxt: iss,
            send_buffer: VecDeque::new(),
            in_flight: BTreeMap::new(),
            peer_window: 0,
            cwnd: config.initial_cwnd_segments * config.mss,
            ssthresh: u32::MAX,
            dup_ack_count: 0,
            last_ack_seen: None,
            recv_nxt: 0,
            recv_buffer: VecDeque::new(),
            reassembly: BTreeMap::new(),
            recv_buffer_cap: config.recv_buffer_bytes,
            send_buffer_cap: config.send_buffer_bytes,
            srtt_ns: None,
            rttvar_ns: 0.0,
            rto_ns: RTO_INITIAL_NS,
            retransmit_deadline: None,
            iss,
            backlog: VecDeque::new(),
            backlog_cap: 0,
            time_wait_deadline: None,
            keepalive_deadline: None,
            keepalive_probes_sent: 0,
            fin_pending: false,
            fin_sent: false,
            config,
            next_packet_id,
        }
    }

    fn alloc_packet_id(&self) -> PacketId {
        PacketId(self.next_packet_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    fn advertised_window(&self) -> u16 {
        let free = self.recv_buffer_cap.saturating_sub(self.recv_buffer.len() as u32);
        free.min(u16::MAX as u32) as u16
    }

    fn make_segment(&self, seq: u32, ack: u32, flags: TcpFlags, payload: Vec<u8>) -> Packet {
        Packet::new(
            self.alloc_packet_id(),
            self.local_ip,
            self.local_port,
            self.remote_ip,
            self.remote_port,
            Protocol::Tcp,
            Some(TcpHeader {
                seq,
                ack,
                window: self.advertised_window(),
                flags,
            }),
            Arc::from(payload),
        )
    }

    /// Active open: send a SYN and move to SYN_SENT (spec.md §4.4).
    pub fn connect(&mut self, remote_ip: Ipv4Addr, remote_port: u16) -> Result<Packet, SocketError> {
        if self.state != TcpState::Closed {
            return Err(SocketError::WrongState(self.state));
        }
        self.remote_ip = remote_ip;
        self.remote_port = remote_port;
        self.state = TcpState::SynSent;
        let syn = self.make_segment(self.send_nxt, 0, TcpFlags::syn(), Vec::new());
        self.send_nxt = self.send_nxt.wrapping_add(1);
        self.record_in_flight(self.send_nxt.wrapping_sub(1), 1, SimTime::ZERO);
        Ok(syn)
    }

    /// Passive open: bound backlog of pending connections (spec.md §4.4).
    pub fn listen(&mut self, backlog: usize) -> Result<(), SocketError> {
        if self.state != TcpState::Closed {
            return Err(SocketError::WrongState(self.state));
        }
        self.state = TcpState::Listen;
        self.backlog_cap = backlog;
        Ok(())
    }

    /// Pop a fully-established connection off the accept backlog.
    pub fn accept(&mut self) -> Option<TcpSocket> {
        self.backlog.pop_front()
    }

    pub fn has_pending_accept(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Queue bytes for transmission; returns the number of bytes actually
    /// queued (may be less than `bytes.len()` if the send buffer is full).
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, SocketError> {
        if !matches!(self.state, TcpState::Established | TcpState::CloseWait) {
            return Err(SocketError::WrongState(self.state));
        }
        let free = self.send_buffer_cap.saturating_sub(self.send_buffer.len() as u32) as usize;
        let n = bytes.len().min(free);
        if n == 0 && !bytes.is_empty() {
            return Err(SocketError::BufferFull);
        }
        self.send_buffer.extend(&bytes[..n]);
        Ok(n)
    }

    /// Copy available in-order bytes into `buf`, returning the count read.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if self.recv_buffer.is_empty()
            && !matches!(
                self.state,
                TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
            )
        {
            if matches!(self.state, TcpState::CloseWait | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait | TcpState::Closed) {
                return Ok(0); // peer closed, EOF
            }
            return Err(SocketError::NotConnected);
        }
        let n = buf.len().min(self.recv_buffer.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.recv_buffer.pop_front().unwrap();
        }
        self.autotune_recv_buffer();
        Ok(n)
    }

    /// Produce any segments the current window and cwnd allow sending from
    /// the queued send buffer, and arm the retransmission timer if new data
    /// went out.
    pub fn pump_send(&mut self, now: SimTime) -> Vec<Packet> {
        let mut out = Vec::new();
        if !matches!(
            self.state,
            TcpState::Established
                | TcpState::CloseWait
                | TcpState::SynSent
                | TcpState::SynReceived
                | TcpState::FinWait1
                | TcpState::LastAck
        ) {
            return out;
        }

        let effective_window = self.cwnd.min(self.peer_window);
        loop {
            let in_flight_bytes = self.send_nxt.wrapping_sub(self.send_una);
            if in_flight_bytes >= effective_window {
                break;
            }
            let room = effective_window - in_flight_bytes;
            let already_sent = (self.send_nxt.wrapping_sub(self.send_una)) as usize;
            let queued_unsent = self.send_buffer.len().saturating_sub(already_sent);
            if queued_unsent == 0 {
                break;
            }
            let seg_len = (room as usize).min(queued_unsent).min(self.config.mss as usize);
            if seg_len == 0 {
                break;
            }
            let data: Vec<u8> = self
                .send_buffer
                .iter()
                .skip(already_sent)
                .take(seg_len)
                .copied()
                .collect();
            let seq = self.send_nxt;
            let packet = self.make_segment(seq, self.recv_nxt, TcpFlags::ack(), data);
            self.record_in_flight(seq, seg_len as u32, now);
            self.send_nxt = self.send_nxt.wrapping_add(seg_len as u32);
            out.push(packet);
        }

        // The FIN always carries the sequence number right after the last
        // data byte, so it cannot go out until every buffered byte has
        // actually been handed to a segment above (spec.md §4.4: FIN is
        // part of the stream's sequence space, same as RFC 793).
        if self.fin_pending && !self.fin_sent {
            let already_sent = (self.send_nxt.wrapping_sub(self.send_una)) as usize;
            if self.send_buffer.len().saturating_sub(already_sent) == 0 {
                let seq = self.send_nxt;
                let fin = self.make_segment(seq, self.recv_nxt, TcpFlags::fin_ack(), Vec::new());
                self.record_in_flight(seq, 1, now);
                self.send_nxt = self.send_nxt.wrapping_add(1);
                self.fin_sent = true;
                out.push(fin);
            }
        }

        if !self.in_flight.is_empty() && self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(now.add_nanos(self.rto_ns));
        }
        out
    }

    fn record_in_flight(&mut self, seq: u32, len: u32, sent_at: SimTime) {
        self.in_flight.insert(
            seq,
            InFlightSegment {
                seq,
                len,
                sent_at,
                retransmits: 0,
            },
        );
    }

    /// Handle an incoming segment, updating state and returning any
    /// generated reply segments plus an observable event.
    pub fn on_segment(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        header: &TcpHeader,
        payload: &[u8],
        now: SimTime,
    ) -> TcpOutput {
        if header.flags.rst {
            self.state = TcpState::Closed;
            return TcpOutput {
                to_send: Vec::new(),
                event: Some(TcpEvent::Reset),
            };
        }

        match self.state {
            TcpState::SynSent => self.on_segment_syn_sent(header, now),
            TcpState::Listen => self.on_segment_listen(remote_ip, remote_port, header, now),
            TcpState::SynReceived => self.on_segment_syn_received(header, now),
            TcpState::Established
            | TcpState::FinWait1
            | TcpState::FinWait2
            | TcpState::CloseWait
            | TcpState::Closing
            | TcpState::LastAck => self.on_segment_data(header, payload, now),
            TcpState::TimeWait => TcpOutput::default(),
            TcpState::Closed => TcpOutput::default(),
        }
    }

    /// Route an incoming segment to whichever pending (not-yet-accepted)
    /// connection in this listening socket's backlog matches the peer,
    /// without touching `self`'s own state. Returns `None` if no backlog
    /// entry matches, in which case the caller should fall back to
    /// `on_segment` to handle a fresh SYN.
    pub fn deliver_to_backlog(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        header: &TcpHeader,
        payload: &[u8],
        now: SimTime,
    ) -> Option<TcpOutput> {
        self.backlog
            .iter_mut()
            .find(|child| child.remote_ip == remote_ip && child.remote_port == remote_port)
            .map(|child| child.on_segment(remote_ip, remote_port, header, payload, now))
    }

    fn on_segment_syn_sent(&mut self, header: &TcpHeader, now: SimTime) -> TcpOutput {
        if header.flags.syn && header.flags.ack {
            self.recv_nxt = header.seq.wrapping_add(1);
            self.peer_window = header.window as u32;
            self.acknowledge(header.ack, now);
            self.state = TcpState::Established;
            self.rearm_keepalive(now);
            let ack = self.make_segment(self.send_nxt, self.recv_nxt, TcpFlags::ack(), Vec::new());
            TcpOutput {
                to_send: vec![ack],
                event: Some(TcpEvent::Connected),
            }
        } else {
            TcpOutput::default()
        }
    }

    fn on_segment_listen(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        header: &TcpHeader,
        now: SimTime,
    ) -> TcpOutput {
        if !header.flags.syn {
            return TcpOutput::default();
        }
        if self.backlog.len() >= self.backlog_cap {
            return TcpOutput::default();
        }
        let mut child = TcpSocket::new(
            self.local_ip,
            self.local_port,
            self.config.clone(),
            splitmix_iss(self.iss, header.seq),
            self.next_packet_id.clone(),
        );
        child.remote_ip = remote_ip;
        child.remote_port = remote_port;
        child.recv_nxt = header.seq.wrapping_add(1);
        child.peer_window = header.window as u32;
        child.state = TcpState::SynReceived;
        let syn_ack = child.make_segment(child.send_nxt, child.recv_nxt, TcpFlags::syn_ack(), Vec::new());
        child.send_nxt = child.send_nxt.wrapping_add(1);
        child.record_in_flight(child.send_nxt.wrapping_sub(1), 1, now);
        child.retransmit_deadline = Some(now.add_nanos(child.rto_ns));
        self.backlog.push_back(child);
        TcpOutput {
            to_send: vec![syn_ack],
            event: None,
        }
    }

    fn on_segment_syn_received(&mut self, header: &TcpHeader, now: SimTime) -> TcpOutput {
        if header.flags.ack && !header.flags.syn {
            self.acknowledge(header.ack, now);
            self.state = TcpState::Established;
            self.rearm_keepalive(now);
            return TcpOutput {
                to_send: Vec::new(),
                event: Some(TcpEvent::IncomingConnectionReady),
            };
        }
        TcpOutput::default()
    }

    fn on_segment_data(&mut self, header: &TcpHeader, payload: &[u8], now: SimTime) -> TcpOutput {
        let mut out = TcpOutput::default();
        self.peer_window = header.window as u32;
        if self.state == TcpState::Established {
            self.rearm_keepalive(now);
        }

        if header.flags.ack {
            let had_new_data = self.acknowledge(header.ack, now);
            if !had_new_data {
                self.dup_ack_count += 1;
                if self.dup_ack_count == DUP_ACK_THRESHOLD {
                    self.fast_retransmit(now, &mut out);
                }
            } else {
                self.dup_ack_count = 0;
            }
        }

        if !payload.is_empty() {
            self.accept_payload(header.seq, payload);
            if !self.recv_buffer.is_empty() {
                out.event = Some(TcpEvent::DataAvailable);
            }
            let ack = self.make_segment(self.send_nxt, self.recv_nxt, TcpFlags::ack(), Vec::new());
            out.to_send.push(ack);
        }

        if header.flags.fin {
            self.recv_nxt = self.recv_nxt.wrapping_add(1);
            let ack = self.make_segment(self.send_nxt, self.recv_nxt, TcpFlags::ack(), Vec::new());
            out.to_send.push(ack);
            self.state = match self.state {
                TcpState::Established => TcpState::CloseWait,
                TcpState::FinWait1 => TcpState::Closing,
                TcpState::FinWait2 => {
                    self.time_wait_deadline = Some(now.add_nanos(self.config.time_wait_ns));
                    TcpState::TimeWait
                }
                other => other,
            };
            out.event.get_or_insert(TcpEvent::DataAvailable);
        }

        // ACK of our own FIN while winding down.
        if header.flags.ack && !header.flags.fin {
            match self.state {
                TcpState::FinWait1 if self.in_flight.is_empty() => {
                    self.state = TcpState::FinWait2;
                }
                TcpState::Closing if self.in_flight.is_empty() => {
                    self.time_wait_deadline = Some(now.add_nanos(self.config.time_wait_ns));
                    self.state = TcpState::TimeWait;
                }
                TcpState::LastAck if self.in_flight.is_empty() => {
                    self.state = TcpState::Closed;
                    out.event = Some(TcpEvent::Closed);
                }
                _ => {}
            }
        }

        out
    }

    /// Accept a (possibly out-of-order) data segment into the reassembly
    /// structure, then flush any now-contiguous bytes into `recv_buffer`
    /// (spec.md §4.4 Reassembly).
    fn accept_payload(&mut self, seq: u32, payload: &[u8]) {
        let expected = self.recv_nxt;
        if seq == expected {
            self.recv_buffer.extend(payload.iter().copied());
            self.recv_nxt = self.recv_nxt.wrapping_add(payload.len() as u32);
            // Drain any reassembled segments that are now contiguous.
            while let Some((&next_seq, _)) = self.reassembly.iter().next() {
                if next_seq == self.recv_nxt {
                    let data = self.reassembly.remove(&next_seq).unwrap();
                    self.recv_buffer.extend(data.iter().copied());
                    self.recv_nxt = self.recv_nxt.wrapping_add(data.len() as u32);
                } else {
                    break;
                }
            }
        } else if seq.wrapping_sub(expected) < u32::MAX / 2 && seq != expected {
            // Ahead of the expected sequence: buffer for reassembly,
            // discarding if we already have an overlapping or duplicate
            // entry (spec.md §4.4: "Duplicate bytes are discarded.").
            self.reassembly.entry(seq).or_insert_with(|| payload.to_vec());
        }
        // seq < expected (or hard-duplicate wraparound): already-seen bytes,
        // discarded.
    }

    /// Process an ACK: advance `send_una`, retire fully-acked in-flight
    /// segments, update RTT estimate, and grow `cwnd` per slow-start/
    /// congestion-avoidance. Returns whether this ACK acknowledged any new
    /// data (vs. being a duplicate ACK of already-acked data).
    fn acknowledge(&mut self, ack: u32, now: SimTime) -> bool {
        if ack == self.last_ack_seen.unwrap_or(self.send_una) && ack == self.send_una {
            return false;
        }
        let advanced = ack.wrapping_sub(self.send_una);
        if advanced == 0 {
            return false;
        }
        self.send_una = ack;
        self.last_ack_seen = Some(ack);

        let mut newly_acked_bytes = 0u32;
        let acked_seqs: Vec<u32> = self
            .in_flight
            .range(..ack)
            .map(|(&seq, seg)| (seq, seg.len))
            .filter(|&(seq, len)| seq.wrapping_add(len) <= ack)
            .map(|(seq, _)| seq)
            .collect();
        for seq in acked_seqs {
            if let Some(seg) = self.in_flight.remove(&seq) {
                newly_acked_bytes += seg.len;
                if seg.retransmits == 0 {
                    self.update_rto(now - seg.sent_at);
                }
            }
        }

        if newly_acked_bytes > 0 {
            self.grow_cwnd(newly_acked_bytes);
        }

        if self.in_flight.is_empty() {
            self.retransmit_deadline = None;
        } else {
            self.retransmit_deadline = Some(now.add_nanos(self.rto_ns));
        }

        true
    }

    fn grow_cwnd(&mut self, acked_bytes: u32) {
        if self.cwnd < self.ssthresh {
            // Slow start: cwnd doubles per RTT, i.e. grows by one MSS per ACK.
            self.cwnd = self.cwnd.saturating_add(self.config.mss.min(acked_bytes.max(self.config.mss)));
        } else {
            // Congestion avoidance: roughly +MSS per RTT.
            let increment = ((self.config.mss as u64 * acked_bytes as u64) / self.cwnd.max(1) as u64) as u32;
            self.cwnd = self.cwnd.saturating_add(increment.max(1));
        }
    }

    fn update_rto(&mut self, sample_ns: u64) {
        let sample = sample_ns as f64;
        match self.srtt_ns {
            None => {
                self.srtt_ns = Some(sample);
                self.rttvar_ns = sample / 2.0;
            }
            Some(srtt) => {
                self.rttvar_ns = 0.75 * self.rttvar_ns + 0.25 * (srtt - sample).abs();
                self.srtt_ns = Some(0.875 * srtt + 0.125 * sample);
            }
        }
        let srtt = self.srtt_ns.unwrap_or(sample);
        let computed = srtt + 4.0 * self.rttvar_ns;
        self.rto_ns = (computed as u64).clamp(RTO_MIN_NS, RTO_MAX_NS);
    }

    fn fast_retransmit(&mut self, now: SimTime, out: &mut TcpOutput) {
        self.ssthresh = (self.cwnd / 2).max(self.config.mss);
        self.cwnd = self.ssthresh;
        if let Some((&seq, seg)) = self.in_flight.iter().next() {
            let len = seg.len;
            let start = (seq.wrapping_sub(self.send_una)) as usize;
            let data: Vec<u8> = self.send_buffer.iter().skip(start).take(len as usize).copied().collect();
            out.to_send.push(self.make_segment(seq, self.recv_nxt, TcpFlags::ack(), data));
        }
    }

    /// Called by the host when this socket's retransmission timer fires.
    /// Retransmits the oldest unacked segment and doubles the backoff, or
    /// resets the connection once `MAX_RETRANSMITS` is exceeded (spec.md
    /// §4.4 Retransmission; §7 timeout -> reset).
    pub fn on_retransmit_timeout(&mut self, now: SimTime) -> Result<TcpOutput, SocketError> {
        let Some((&seq, seg)) = self.in_flight.iter_mut().next() else {
            self.retransmit_deadline = None;
            return Ok(TcpOutput::default());
        };
        if seg.retransmits >= MAX_RETRANSMITS {
            self.state = TcpState::Closed;
            self.retransmit_deadline = None;
            return Err(SocketError::RetransmissionTimeout);
        }
        seg.retransmits += 1;
        seg.sent_at = now;
        let len = seg.len;

        self.ssthresh = (self.cwnd / 2).max(self.config.mss);
        self.cwnd = self.config.mss; // spec.md §4.4: cwnd = 1 segment on timeout.
        self.rto_ns = (self.rto_ns.saturating_mul(2)).min(RTO_MAX_NS);
        self.retransmit_deadline = Some(now.add_nanos(self.rto_ns));

        let start = (seq.wrapping_sub(self.send_una)) as usize;
        let data: Vec<u8> = self.send_buffer.iter().skip(start).take(len as usize).copied().collect();
        let packet = self.make_segment(seq, self.recv_nxt, TcpFlags::ack(), data);
        Ok(TcpOutput {
            to_send: vec![packet],
            event: None,
        })
    }

    pub fn retransmit_deadline(&self) -> Option<SimTime> {
        self.retransmit_deadline
    }

    /// Reset the idle-connection keepalive timer to fire `keepalive_interval_ns`
    /// from `now`, or clear it if keepalive is disabled or the connection
    /// isn't ESTABLISHED. Called whenever the connection sees fresh activity
    /// (handshake completion, an incoming segment) so the timer only ever
    /// fires after a genuinely idle stretch (spec.md §3 Socket(TCP):
    /// "keepalive ... timers").
    fn rearm_keepalive(&mut self, now: SimTime) {
        match (self.state, self.config.keepalive_interval_ns) {
            (TcpState::Established, Some(interval)) => {
                self.keepalive_deadline = Some(now.add_nanos(interval));
                self.keepalive_probes_sent = 0;
            }
            _ => {
                self.keepalive_deadline = None;
            }
        }
    }

    pub fn keepalive_deadline(&self) -> Option<SimTime> {
        self.keepalive_deadline
    }

    /// Called by the host when this socket's keepalive timer fires. Sends a
    /// zero-length probe segment carrying the sequence number just before
    /// `send_una` (the conventional keepalive probe, acked by any response
    /// from a live peer) and rearms the timer; once `keepalive_max_probes`
    /// probes have gone unanswered, resets the connection.
    pub fn on_keepalive_timeout(&mut self, now: SimTime) -> Result<TcpOutput, SocketError> {
        if self.state != TcpState::Established {
            self.keepalive_deadline = None;
            return Ok(TcpOutput::default());
        }
        let Some(interval) = self.config.keepalive_interval_ns else {
            self.keepalive_deadline = None;
            return Ok(TcpOutput::default());
        };
        if self.keepalive_probes_sent >= self.config.keepalive_max_probes {
            self.state = TcpState::Closed;
            self.keepalive_deadline = None;
            return Err(SocketError::KeepaliveTimeout);
        }
        self.keepalive_probes_sent += 1;
        self.keepalive_deadline = Some(now.add_nanos(interval));
        let probe = self.make_segment(self.send_una.wrapping_sub(1), self.recv_nxt, TcpFlags::ack(), Vec::new());
        Ok(TcpOutput {
            to_send: vec![probe],
            event: None,
        })
    }

    /// Grow the receive buffer under sustained bandwidth-delay-product
    /// pressure, capped at `autotune_max_bytes` (spec.md §4.4 Autotuning).
    /// A simple heuristic: if the application is draining the buffer
    /// faster than it fills (buffer stays mostly empty after a read), leave
    /// it; if the buffer is saturated at capacity, grow it.
    fn autotune_recv_buffer(&mut self) {
        if !self.config.autotune {
            return;
        }
        let occupancy = self.recv_buffer.len() as u32;
        if occupancy >= self.recv_buffer_cap.saturating_sub(self.config.mss) {
            let grown = (self.recv_buffer_cap.saturating_mul(2)).min(self.config.autotune_max_bytes);
            self.recv_buffer_cap = grown;
        }
    }

    /// `close()`: walks the standard shutdown path (spec.md §4.4 Close). If
    /// every queued byte has already been handed to a segment, the FIN goes
    /// out immediately; otherwise it is queued behind the remaining
    /// buffered data and emitted by a later `pump_send` once the buffer
    /// drains, so the FIN's sequence number always lands right after the
    /// last data byte.
    pub fn close(&mut self, now: SimTime) -> Result<Option<Packet>, SocketError> {
        self.state = match self.state {
            TcpState::Established => TcpState::FinWait1,
            TcpState::CloseWait => TcpState::LastAck,
            other => return Err(SocketError::WrongState(other)),
        };
        self.fin_pending = true;

        let already_sent = (self.send_nxt.wrapping_sub(self.send_una)) as usize;
        if self.send_buffer.len().saturating_sub(already_sent) > 0 {
            // Data is still queued; `pump_send` will emit the FIN once it's
            // all been sent.
            return Ok(None);
        }

        let fin_seq = self.send_nxt;
        let fin = self.make_segment(fin_seq, self.recv_nxt, TcpFlags::fin_ack(), Vec::new());
        self.send_nxt = self.send_nxt.wrapping_add(1);
        self.record_in_flight(fin_seq, 1, now);
        self.fin_sent = true;
        self.retransmit_deadline = Some(now.add_nanos(self.rto_ns));
        Ok(Some(fin))
    }

    /// Whether TIME_WAIT has elapsed and the socket can be reaped.
    pub fn time_wait_expired(&self, now: SimTime) -> bool {
        matches!(self.state, TcpState::TimeWait)
            && self.time_wait_deadline.is_some_and(|d| now >= d)
    }

    /// Whether the socket is sitting in TIME_WAIT, waiting to be reaped.
    /// Used by the host to keep the NIC tick alive long enough for
    /// `time_wait_expired` to actually be observed.
    pub fn is_time_wait(&self) -> bool {
        matches!(self.state, TcpState::TimeWait)
    }

    pub fn mark_closed(&mut self) {
        self.state = TcpState::Closed;
    }

    pub fn bytes_in_flight(&self) -> u32 {
        self.send_nxt.wrapping_sub(self.send_una)
    }

    /// Whether `pump_send` would have anything to emit once the window
    /// allows it — i.e. there is buffered data past `send_nxt`. Used by the
    /// host to decide whether its NIC still needs ticking (spec.md §4.8
    /// termination: "all hosts' queues are empty").
    pub fn has_unsent_data(&self) -> bool {
        let already_sent = self.send_nxt.wrapping_sub(self.send_una) as usize;
        self.send_buffer.len().saturating_sub(already_sent) > 0
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn recv_buffer_len(&self) -> usize {
        self.recv_buffer.len()
    }
}

/// Mixes the listening socket's ISS with the peer's SYN sequence to derive
/// a distinct, deterministic ISS for the accepted child connection.
fn splitmix_iss(base: u32, peer_seq: u32) -> u32 {
    let mut z = (base as u64) ^ ((peer_seq as u64) << 17);
    z = z.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    (z >> 16) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn socket(ip: u8, port: u16) -> TcpSocket {
        TcpSocket::new(
            Ipv4Addr::new(10, 0, 0, ip),
            port,
            TcpConfig::default(),
            1000,
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn handshake_reaches_established_both_sides() {
        let mut client = socket(1, 2000);
        let mut server = socket(2, 80);
        server.listen(4).unwrap();

        let syn = client.connect(Ipv4Addr::new(10, 0, 0, 2), 80).unwrap();
        assert_eq!(client.state, TcpState::SynSent);

        let out = server.on_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            2000,
            &syn.tcp.unwrap(),
            &[],
            SimTime::ZERO,
        );
        assert_eq!(out.to_send.len(), 1); // the SYN+ACK for the new backlog entry
        assert!(server.has_pending_accept());

        let mut child = server.accept().unwrap();
        assert_eq!(child.state, TcpState::SynReceived);

        let syn_ack = out.to_send[0].clone();
        let out = client.on_segment(
            Ipv4Addr::new(10, 0, 0, 2),
            80,
            &syn_ack.tcp.unwrap(),
            &[],
            SimTime::from_millis(50),
        );
        assert_eq!(client.state, TcpState::Established);
        assert_eq!(out.event, Some(TcpEvent::Connected));

        let ack = out.to_send[0].clone();
        let out2 = child.on_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            2000,
            &ack.tcp.unwrap(),
            &[],
            SimTime::from_millis(100),
        );
        assert_eq!(child.state, TcpState::Established);
        assert_eq!(out2.event, Some(TcpEvent::IncomingConnectionReady));
    }

    #[test]
    fn send_and_receive_in_order_data() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        a.remote_ip = Ipv4Addr::new(10, 0, 0, 2);
        a.remote_port = 80;
        a.peer_window = 65535;

        let n = a.send(b"hello world").unwrap();
        assert_eq!(n, 11);

        let segments = a.pump_send(SimTime::ZERO);
        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.payload(), b"hello world");

        let mut b = socket(2, 80);
        b.state = TcpState::Established;
        b.recv_nxt = seg.tcp.unwrap().seq;

        let out = b.on_segment(
            Ipv4Addr::new(10, 0, 0, 1),
            2000,
            &seg.tcp.unwrap(),
            seg.payload(),
            SimTime::from_millis(10),
        );
        assert_eq!(out.event, Some(TcpEvent::DataAvailable));

        let mut buf = [0u8; 32];
        let read = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"hello world");
    }

    #[test]
    fn out_of_order_segment_is_reassembled() {
        let mut b = socket(2, 80);
        b.state = TcpState::Established;
        b.recv_nxt = 100;

        // Segment arriving ahead of expected sequence is buffered.
        let peer = Ipv4Addr::new(10, 0, 0, 1);
        let ahead = TcpHeader { seq: 105, ack: 0, window: 100, flags: TcpFlags::ack() };
        b.on_segment(peer, 2000, &ahead, b"WORLD", SimTime::ZERO);
        assert_eq!(b.recv_buffer_len(), 0);

        // The missing piece arrives; both flush into the receive buffer.
        let first = TcpHeader { seq: 100, ack: 0, window: 100, flags: TcpFlags::ack() };
        b.on_segment(peer, 2000, &first, b"HELLO", SimTime::from_millis(1));
        assert_eq!(b.recv_buffer_len(), 10);

        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"HELLOWORLD");
    }

    #[test]
    fn retransmission_backs_off_exponentially() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        a.peer_window = 65535;
        a.remote_ip = Ipv4Addr::new(10, 0, 0, 2);
        a.send(b"data").unwrap();
        a.pump_send(SimTime::ZERO);

        let rto0 = a.rto_ns;
        a.on_retransmit_timeout(SimTime::from_millis(1)).unwrap();
        assert!(a.rto_ns >= rto0 * 2 || a.rto_ns == RTO_MAX_NS);
        assert_eq!(a.cwnd(), a.config.mss);
    }

    #[test]
    fn retransmission_cap_resets_connection() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        a.peer_window = 65535;
        a.send(b"data").unwrap();
        a.pump_send(SimTime::ZERO);

        let mut now = SimTime::ZERO;
        let mut result = Ok(TcpOutput::default());
        for _ in 0..(MAX_RETRANSMITS + 1) {
            now = now.add_nanos(a.rto_ns);
            result = a.on_retransmit_timeout(now);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SocketError::RetransmissionTimeout)));
        assert_eq!(a.state, TcpState::Closed);
    }

    #[test]
    fn close_walks_fin_wait_path() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        a.peer_window = 65535;
        let fin = a.close(SimTime::ZERO).unwrap().expect("no unsent data queued, FIN goes out immediately");
        assert_eq!(a.state, TcpState::FinWait1);
        assert!(fin.tcp.unwrap().flags.fin);

        let fin_ack = TcpHeader {
            seq: 0,
            ack: fin.tcp.unwrap().seq + 1,
            window: 100,
            flags: TcpFlags::ack(),
        };
        a.on_segment(Ipv4Addr::new(10, 0, 0, 2), 80, &fin_ack, &[], SimTime::from_millis(10));
        assert_eq!(a.state, TcpState::FinWait2);
    }

    #[test]
    fn close_with_unsent_data_defers_fin_until_buffer_drains() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        a.remote_ip = Ipv4Addr::new(10, 0, 0, 2);
        a.peer_window = 65535;

        a.send(b"hello").unwrap();
        // Nothing transmitted yet: close() must not cut a FIN in front of
        // the still-buffered data.
        let immediate = a.close(SimTime::ZERO).unwrap();
        assert!(immediate.is_none());
        assert_eq!(a.state, TcpState::FinWait1);

        let segments = a.pump_send(SimTime::from_millis(1));
        assert_eq!(segments.len(), 2, "the data segment, then the deferred FIN");
        assert_eq!(segments[0].payload(), b"hello");
        assert!(!segments[0].tcp.unwrap().flags.fin);
        assert!(segments[1].tcp.unwrap().flags.fin);
        assert_eq!(segments[1].tcp.unwrap().seq, segments[0].tcp.unwrap().seq + 5);
    }

    #[test]
    fn keepalive_probes_then_resets_after_max_unanswered() {
        let mut config = TcpConfig::default();
        config.keepalive_interval_ns = Some(10 * SimTime::SECOND);
        config.keepalive_max_probes = 2;
        let mut a = TcpSocket::new(
            Ipv4Addr::new(10, 0, 0, 1),
            2000,
            config,
            1000,
            Arc::new(AtomicU64::new(0)),
        );
        a.state = TcpState::Established;
        a.remote_ip = Ipv4Addr::new(10, 0, 0, 2);
        a.remote_port = 80;
        a.rearm_keepalive(SimTime::ZERO);
        assert_eq!(a.keepalive_deadline(), Some(SimTime::from_nanos(10 * SimTime::SECOND)));

        let out1 = a.on_keepalive_timeout(SimTime::from_nanos(10 * SimTime::SECOND)).unwrap();
        assert_eq!(out1.to_send.len(), 1);
        assert_eq!(a.state, TcpState::Established);

        let out2 = a.on_keepalive_timeout(SimTime::from_nanos(20 * SimTime::SECOND)).unwrap();
        assert_eq!(out2.to_send.len(), 1);
        assert_eq!(a.state, TcpState::Established);

        let err = a.on_keepalive_timeout(SimTime::from_nanos(30 * SimTime::SECOND));
        assert!(matches!(err, Err(SocketError::KeepaliveTimeout)));
        assert_eq!(a.state, TcpState::Closed);
    }

    #[test]
    fn keepalive_disabled_by_default_never_arms() {
        let a = socket(1, 2000);
        assert_eq!(a.keepalive_deadline(), None);
    }

    #[test]
    fn incoming_segment_rearms_keepalive_timer() {
        let mut config = TcpConfig::default();
        config.keepalive_interval_ns = Some(5 * SimTime::SECOND);
        let mut a = TcpSocket::new(
            Ipv4Addr::new(10, 0, 0, 2),
            80,
            config,
            1,
            Arc::new(AtomicU64::new(0)),
        );
        a.state = TcpState::Established;
        a.recv_nxt = 100;
        a.rearm_keepalive(SimTime::ZERO);

        let peer = Ipv4Addr::new(10, 0, 0, 1);
        let seg = TcpHeader { seq: 100, ack: 0, window: 100, flags: TcpFlags::ack() };
        a.on_segment(peer, 2000, &seg, b"hi", SimTime::from_millis(3));
        assert_eq!(a.keepalive_deadline(), Some(SimTime::from_millis(3).add_nanos(5 * SimTime::SECOND)));
    }

    #[test]
    fn rst_forces_closed_and_reset_event() {
        let mut a = socket(1, 2000);
        a.state = TcpState::Established;
        let rst = TcpHeader { seq: 0, ack: 0, window: 0, flags: TcpFlags::rst() };
        let out = a.on_segment(Ipv4Addr::new(10, 0, 0, 2), 80, &rst, &[], SimTime::ZERO);
        assert_eq!(a.state, TcpState::Closed);
        assert_eq!(out.event, Some(TcpEvent::Reset));
    }
}
