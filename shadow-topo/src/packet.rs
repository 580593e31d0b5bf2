use std::net::Ipv4Addr;
use std::sync::Arc;

/// TCP header size over Ethernet-v2+IP+TCP (spec.md §3).
pub const TCP_HEADER_BYTES: u32 = 66;
/// UDP header size over Ethernet-v2+IP+UDP (spec.md §3).
pub const UDP_HEADER_BYTES: u32 = 42;
/// Maximum transmission unit in bytes.
pub const MTU: u32 = 1500;
/// Maximum UDP datagram payload in bytes.
pub const MAX_UDP_PAYLOAD: u32 = 65507;

/// Opaque identifier for a packet, unique within the engine's run. Carries
/// no pointer into sender state — spec.md §3: "A packet carries no pointers
/// into sender state."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(pub u64);

/// Transport-layer protocol of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// TCP control bits, modeled as a small bitset rather than a generic `u8` so
/// call sites read as `flags.syn` instead of bit-masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub const fn syn() -> Self {
        TcpFlags { syn: true, ack: false, fin: false, rst: false }
    }
    pub const fn syn_ack() -> Self {
        TcpFlags { syn: true, ack: true, fin: false, rst: false }
    }
    pub const fn ack() -> Self {
        TcpFlags { syn: false, ack: true, fin: false, rst: false }
    }
    pub const fn fin_ack() -> Self {
        TcpFlags { syn: false, ack: true, fin: true, rst: false }
    }
    pub const fn rst() -> Self {
        TcpFlags { syn: false, ack: false, fin: false, rst: true }
    }
}

/// TCP sequencing header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub flags: TcpFlags,
}

/// An immutable packet. Once constructed it is never mutated — only moved
/// (spec.md §3: "Packets are handed off by value (move) when crossing
/// hosts").
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: PacketId,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub tcp: Option<TcpHeader>,
    payload: Arc<[u8]>,
}

impl Packet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PacketId,
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        protocol: Protocol,
        tcp: Option<TcpHeader>,
        payload: Arc<[u8]>,
    ) -> Self {
        Packet {
            id,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            protocol,
            tcp,
            payload,
        }
    }

    /// Payload length in bytes (not including any header).
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Borrow the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total on-wire size including the protocol's fixed header overhead,
    /// used by the NIC's token-bucket accounting (spec.md §4.3).
    pub fn wire_size(&self) -> u32 {
        let header = match self.protocol {
            Protocol::Tcp => TCP_HEADER_BYTES,
            Protocol::Udp => UDP_HEADER_BYTES,
        };
        header + self.payload_len() as u32
    }
}
