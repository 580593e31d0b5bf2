use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NicError {
    #[error("unknown egress socket {0}")]
    UnknownSocket(u64),

    #[error("ingress buffer full, packet dropped")]
    IngressBufferFull,
}
