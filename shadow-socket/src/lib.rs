//! The socket layer: a descriptor table, stateless UDP sockets, and the
//! full event-driven TCP state machine (spec.md §2 component 5, §4.4–§4.5).

mod descriptor;
mod error;
mod tcp;
mod udp;

pub use descriptor::{Descriptor, DescriptorTable, Socket, FIRST_DESCRIPTOR};
pub use error::SocketError;
pub use tcp::{
    CongestionEvent, TcpConfig, TcpEvent, TcpOutput, TcpSocket, TcpState, DEFAULT_MSS,
};
pub use udp::UdpSocket;
