use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shadow_topo::{Packet, PacketId, Protocol, MAX_UDP_PAYLOAD};

use crate::error::SocketError;

/// A stateless datagram socket (spec.md §4.5): no handshake, no ordering,
/// no retransmission. Overflowing the receive buffer silently drops the
/// newest datagram.
pub struct UdpSocket {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    recv_queue: VecDeque<Packet>,
    recv_buffer_cap_datagrams: usize,
    next_packet_id: Arc<AtomicU64>,
}

impl UdpSocket {
    pub fn new(local_ip: Ipv4Addr, local_port: u16, recv_buffer_cap_datagrams: usize, next_packet_id: Arc<AtomicU64>) -> Self {
        UdpSocket {
            local_ip,
            local_port,
            recv_queue: VecDeque::new(),
            recv_buffer_cap_datagrams,
            next_packet_id,
        }
    }

    /// Build a datagram for transmission. Payloads larger than
    /// `MAX_UDP_PAYLOAD` are rejected rather than silently truncated.
    pub fn send_to(
        &self,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<Packet, SocketError> {
        if payload.len() > MAX_UDP_PAYLOAD as usize {
            return Err(SocketError::BufferFull);
        }
        let id = PacketId(self.next_packet_id.fetch_add(1, Ordering::Relaxed));
        Ok(Packet::new(
            id,
            self.local_ip,
            self.local_port,
            dst_ip,
            dst_port,
            Protocol::Udp,
            None,
            Arc::from(payload.to_vec()),
        ))
    }

    /// Deliver an inbound datagram. Dropped silently (per spec.md §4.5) if
    /// the receive queue is already at capacity.
    pub fn deliver(&mut self, packet: Packet) {
        if self.recv_queue.len() >= self.recv_buffer_cap_datagrams {
            return;
        }
        self.recv_queue.push_back(packet);
    }

    /// Pop the oldest queued datagram, if any, returning its sender and
    /// payload.
    pub fn recv_from(&mut self) -> Option<(Ipv4Addr, u16, Arc<[u8]>)> {
        self.recv_queue
            .pop_front()
            .map(|p| (p.src_ip, p.src_port, Arc::from(p.payload())))
    }

    pub fn pending(&self) -> usize {
        self.recv_queue.len()
    }
}
