use std::collections::{HashMap, VecDeque};

use shadow_topo::{Packet, MTU};

use crate::error::NicError;
use crate::qdisc::QueueDiscipline;
use crate::token_bucket::TokenBucket;

/// Configuration for a per-host NIC (spec.md §3 NIC, §6 CLI defaults).
#[derive(Debug, Clone)]
pub struct NicConfig {
    pub bandwidth_up_bytes_per_sec: u64,
    pub bandwidth_down_bytes_per_sec: u64,
    pub qdisc: QueueDiscipline,
    /// Ingress buffer size in bytes; clamped to at least one MTU.
    pub ingress_buffer_bytes: u32,
    pub batch_interval_ns: u64,
}

impl NicConfig {
    pub fn clamp(mut self) -> Self {
        if self.ingress_buffer_bytes < MTU {
            self.ingress_buffer_bytes = MTU;
        }
        self
    }
}

impl Default for NicConfig {
    fn default() -> Self {
        NicConfig {
            bandwidth_up_bytes_per_sec: 12_500_000, // 100 Mbit/s
            bandwidth_down_bytes_per_sec: 12_500_000,
            qdisc: QueueDiscipline::Fifo,
            ingress_buffer_bytes: 1_048_576,
            batch_interval_ns: 10_000_000,
        }
        .clamp()
    }
}

/// A packet handed off by the NIC's egress tick, still carrying which
/// descriptor sent it (used for per-socket accounting upstream).
pub struct Transmitted {
    pub descriptor: u64,
    pub packet: Packet,
}

/// The virtual NIC for one host.
pub struct Nic {
    config: NicConfig,
    upstream: TokenBucket,
    downstream: TokenBucket,
    egress_queues: HashMap<u64, VecDeque<Packet>>,
    /// Enqueue order of descriptors that currently have pending egress
    /// data; `Fifo` serves front-to-back, `RoundRobin` cycles through it.
    egress_order: VecDeque<u64>,
    rr_cursor: usize,
    ingress_queue: VecDeque<Packet>,
    ingress_buffer_used: u32,
}

impl Nic {
    pub fn new(config: NicConfig) -> Self {
        let config = config.clamp();
        Nic {
            upstream: TokenBucket::new(config.bandwidth_up_bytes_per_sec, config.batch_interval_ns),
            downstream: TokenBucket::new(config.bandwidth_down_bytes_per_sec, config.batch_interval_ns),
            egress_queues: HashMap::new(),
            egress_order: VecDeque::new(),
            rr_cursor: 0,
            ingress_queue: VecDeque::new(),
            ingress_buffer_used: 0,
            config,
        }
    }

    pub fn batch_interval_ns(&self) -> u64 {
        self.config.batch_interval_ns
    }

    /// Queue a packet for egress from `descriptor`.
    pub fn enqueue_egress(&mut self, descriptor: u64, packet: Packet) {
        let queue = self.egress_queues.entry(descriptor).or_default();
        if queue.is_empty() && !self.egress_order.contains(&descriptor) {
            self.egress_order.push_back(descriptor);
        }
        queue.push_back(packet);
    }

    /// Drain the egress side for one batch tick: refill the upstream
    /// bucket, then hand out packets to sockets in qdisc order until the
    /// bucket is exhausted or every queue is empty (spec.md §4.3).
    pub fn tick_egress(&mut self, elapsed_ns: u64) -> Vec<Transmitted> {
        self.upstream.refill(elapsed_ns);
        let mut sent = Vec::new();

        loop {
            if self.egress_order.is_empty() {
                break;
            }
            let idx = match self.config.qdisc {
                QueueDiscipline::Fifo => 0,
                QueueDiscipline::RoundRobin => self.rr_cursor % self.egress_order.len(),
            };
            let descriptor = self.egress_order[idx];

            let wire_size = match self.egress_queues.get(&descriptor).and_then(|q| q.front()) {
                Some(front) => front.wire_size(),
                None => {
                    self.egress_order.remove(idx);
                    continue;
                }
            };

            if !self.upstream.try_consume(wire_size) {
                // Not enough tokens for the head-of-line packet; stop this
                // tick rather than reorder across it.
                break;
            }

            let packet = self
                .egress_queues
                .get_mut(&descriptor)
                .and_then(|q| q.pop_front())
                .expect("checked non-empty above");
            sent.push(Transmitted { descriptor, packet });

            let now_empty = self
                .egress_queues
                .get(&descriptor)
                .is_some_and(|q| q.is_empty());
            if now_empty {
                self.egress_order.remove(idx);
                self.egress_queues.remove(&descriptor);
            } else if self.config.qdisc == QueueDiscipline::RoundRobin {
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
            }
        }

        sent
    }

    /// Called when a packet-arrival event fires at this host: debit the
    /// inbound bucket immediately if possible, otherwise queue it in the
    /// ingress buffer; drop it if the buffer is full (spec.md §4.3).
    pub fn receive(&mut self, packet: Packet, elapsed_since_last_tick_ns: u64) -> Result<(), NicError> {
        self.downstream.refill(elapsed_since_last_tick_ns);

        if self.downstream.try_consume(packet.wire_size()) {
            self.ingress_queue.push_back(packet);
            return Ok(());
        }

        let used_after = self.ingress_buffer_used + packet.wire_size();
        if used_after > self.config.ingress_buffer_bytes {
            return Err(NicError::IngressBufferFull);
        }
        self.ingress_buffer_used = used_after;
        self.ingress_queue.push_back(packet);
        Ok(())
    }

    /// Drain packets that have cleared the ingress side and are ready to be
    /// delivered up to the socket layer this tick.
    pub fn tick_ingress(&mut self, elapsed_ns: u64) -> Vec<Packet> {
        self.downstream.refill(elapsed_ns);
        let mut delivered = Vec::new();
        while let Some(front) = self.ingress_queue.front() {
            if !self.downstream.try_consume(front.wire_size()) {
                break;
            }
            let packet = self.ingress_queue.pop_front().expect("checked above");
            self.ingress_buffer_used = self.ingress_buffer_used.saturating_sub(packet.wire_size());
            delivered.push(packet);
        }
        delivered
    }

    pub fn has_pending_egress(&self) -> bool {
        !self.egress_order.is_empty()
    }

    /// Whether any packet is still sitting in the ingress buffer waiting for
    /// a future tick's downstream bucket to admit it upward.
    pub fn has_pending_ingress(&self) -> bool {
        !self.ingress_queue.is_empty()
    }

    pub fn upstream_available_bytes(&self) -> u64 {
        self.upstream.available_bytes()
    }
}
