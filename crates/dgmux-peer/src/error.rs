use crate::table::ConnectionId;

/// Errors returned by server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dgmux_transport::TransportError),

    /// Fragmentation or codec error.
    #[error("frame error: {0}")]
    Frame(#[from] dgmux_frame::FrameError),

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No connection with this id exists.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The channel index is not one of the configured application channels.
    #[error("channel {channel} not configured ({channels} channels)")]
    UnknownChannel { channel: u8, channels: usize },

    /// The client has no established connection.
    #[error("not connected")]
    NotConnected,

    /// The client is already connecting or connected.
    #[error("already connected or connecting to {0}")]
    AlreadyActive(String),

    /// Session names must not be empty.
    #[error("session id must not be empty")]
    InvalidSession,

    /// The node has been shut down.
    #[error("node shut down")]
    ShutDown,

    /// JSON configuration could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
