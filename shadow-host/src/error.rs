use thiserror::Error;

/// Errors raised by the host runtime (spec.md §7): resource and protocol
/// errors from the layers a host owns, composed with its own bind/teardown
/// failures.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Socket(#[from] shadow_socket::SocketError),

    #[error(transparent)]
    Nic(#[from] shadow_nic::NicError),

    #[error("local port {0} is already bound")]
    AddressInUse(u16),

    #[error("no ephemeral ports remain")]
    PortsExhausted,

    #[error("unknown timer {0}")]
    UnknownTimer(u64),

    #[error("routing failed: {0}")]
    Route(#[from] shadow_topo::TopoError),
}
