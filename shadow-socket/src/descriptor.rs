use std::collections::BTreeMap;

use crate::error::SocketError;
use crate::tcp::TcpSocket;
use crate::udp::UdpSocket;

/// The first descriptor value a host hands out (spec.md §3: "small
/// integers, starting above a reserved range to avoid collision with
/// guest-visible stdio-like handles").
pub const FIRST_DESCRIPTOR: u64 = 1_000_000;

/// A small integer naming a socket owned by exactly one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Descriptor(pub u64);

/// A tagged sum of the socket kinds a descriptor can name. Using an enum
/// rather than a trait object keeps dispatch a match instead of a vtable
/// call, and keeps every socket's memory layout uniform across hosts
/// (spec.md §9).
pub enum Socket {
    Tcp(TcpSocket),
    Udp(UdpSocket),
}

impl Socket {
    pub fn as_tcp(&self) -> Option<&TcpSocket> {
        match self {
            Socket::Tcp(s) => Some(s),
            Socket::Udp(_) => None,
        }
    }

    pub fn as_tcp_mut(&mut self) -> Option<&mut TcpSocket> {
        match self {
            Socket::Tcp(s) => Some(s),
            Socket::Udp(_) => None,
        }
    }

    pub fn as_udp(&self) -> Option<&UdpSocket> {
        match self {
            Socket::Udp(s) => Some(s),
            Socket::Tcp(_) => None,
        }
    }

    pub fn as_udp_mut(&mut self) -> Option<&mut UdpSocket> {
        match self {
            Socket::Udp(s) => Some(s),
            Socket::Tcp(_) => None,
        }
    }
}

/// Owns every socket a host has open, keyed by [`Descriptor`].
///
/// `entries` is a `BTreeMap`, not a `HashMap`: descriptor ids come from a
/// strictly increasing counter (`next`, below), so ascending-key iteration
/// order is equivalent to insertion order. Several call sites
/// (`shadow-host::host::Host::check_all_tcp_timers`,
/// `Host::pump_all_tcp_sockets`) iterate this table to decide the order
/// multiple TCP sockets on one host get pumped within a single NIC tick,
/// which in turn determines the order `Nic::enqueue_egress` serves them
/// under bandwidth contention — a `HashMap`'s iteration order is not stable
/// across process runs, which would break invariant 4's bitwise
/// reproducibility (spec.md §5: never iterate a simulation-relevant
/// container by hash-table order).
pub struct DescriptorTable {
    next: u64,
    entries: BTreeMap<u64, Socket>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        DescriptorTable {
            next: FIRST_DESCRIPTOR,
            entries: BTreeMap::new(),
        }
    }
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh descriptor and install `socket` under it.
    pub fn insert(&mut self, socket: Socket) -> Result<Descriptor, SocketError> {
        let descriptor = self.next;
        self.next = self.next.checked_add(1).ok_or(SocketError::DescriptorsExhausted)?;
        self.entries.insert(descriptor, socket);
        Ok(Descriptor(descriptor))
    }

    pub fn get(&self, descriptor: Descriptor) -> Result<&Socket, SocketError> {
        self.entries
            .get(&descriptor.0)
            .ok_or(SocketError::UnknownDescriptor(descriptor.0))
    }

    pub fn get_mut(&mut self, descriptor: Descriptor) -> Result<&mut Socket, SocketError> {
        self.entries
            .get_mut(&descriptor.0)
            .ok_or(SocketError::UnknownDescriptor(descriptor.0))
    }

    pub fn remove(&mut self, descriptor: Descriptor) -> Result<Socket, SocketError> {
        self.entries
            .remove(&descriptor.0)
            .ok_or(SocketError::UnknownDescriptor(descriptor.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Descriptor, &Socket)> {
        self.entries.iter().map(|(&id, s)| (Descriptor(id), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Descriptor, &mut Socket)> {
        self.entries.iter_mut().map(|(&id, s)| (Descriptor(id), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn descriptors_start_at_the_reserved_floor() {
        let mut table = DescriptorTable::new();
        let d = table
            .insert(Socket::Udp(UdpSocket::new(
                Ipv4Addr::new(10, 0, 0, 1),
                9000,
                4,
                Arc::new(AtomicU64::new(0)),
            )))
            .unwrap();
        assert_eq!(d, Descriptor(FIRST_DESCRIPTOR));
    }

    #[test]
    fn unknown_descriptor_is_an_error() {
        let table = DescriptorTable::new();
        assert!(table.get(Descriptor(42)).is_err());
    }

    #[test]
    fn remove_frees_the_descriptor_slot() {
        let mut table = DescriptorTable::new();
        let d = table
            .insert(Socket::Udp(UdpSocket::new(
                Ipv4Addr::new(10, 0, 0, 1),
                9000,
                4,
                Arc::new(AtomicU64::new(0)),
            )))
            .unwrap();
        assert!(table.remove(d).is_ok());
        assert!(table.get(d).is_err());
    }
}
