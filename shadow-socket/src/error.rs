use thiserror::Error;

/// The error taxonomy of spec.md §7, as it applies at the socket layer.
/// Configuration and invariant errors are handled above this crate (in
/// `shadow-engine`); this crate raises resource, protocol, and timeout
/// errors.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SocketError {
    #[error("no descriptors available")]
    DescriptorsExhausted,

    #[error("socket buffer is full")]
    BufferFull,

    #[error("operation invalid in state {0:?}")]
    WrongState(crate::tcp::TcpState),

    #[error("socket is not connected")]
    NotConnected,

    #[error("local address already in use")]
    AddressInUse,

    #[error("listen backlog is full")]
    BacklogFull,

    #[error("retransmission attempts exceeded, connection reset")]
    RetransmissionTimeout,

    #[error("keepalive probes unanswered, connection reset")]
    KeepaliveTimeout,

    #[error("unknown descriptor {0}")]
    UnknownDescriptor(u64),
}
