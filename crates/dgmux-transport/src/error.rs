use crate::id::{PeerId, SessionId};

/// Errors that can occur in datagram transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The datagram exceeds the transport's per-call limit.
    #[error("datagram too large ({size} bytes, max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    /// No endpoint is registered for the destination peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The session name is empty or otherwise unusable.
    #[error("invalid session id {0:?}")]
    InvalidSession(SessionId),

    /// The transport refused to register a notification subscription.
    #[error("notification subscription failed: {0}")]
    Subscribe(String),

    /// The send was rejected by the underlying library.
    #[error("send to {peer} failed: {reason}")]
    SendFailed { peer: PeerId, reason: String },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
