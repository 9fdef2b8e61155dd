use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a segment")]
    TimedOut,

    #[error("handshake with {peer} failed: {detail}")]
    MalformedHandshake { peer: SocketAddr, detail: String },

    #[error("connection reset by peer")]
    PeerReset,

    #[error("no progress within the drain budget, force-closing connection")]
    DrainBudgetExceeded,
}

pub type Result<T> = std::result::Result<T, TransportError>;
