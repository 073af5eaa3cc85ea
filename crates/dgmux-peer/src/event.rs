use std::fmt;

use bytes::Bytes;
use dgmux_frame::ChannelIndex;
use dgmux_transport::ClosedReason;

use crate::table::ConnectionId;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side called `disconnect`.
    Local,
    /// The local node shut down.
    Shutdown,
    /// The remote side sent DISCONNECT.
    RemoteDisconnect,
    /// The server answered CONNECT with DISCONNECT.
    Rejected,
    /// No answer to CONNECT within the connect timeout.
    Timeout,
    /// The transport reported the session closed.
    SessionClosed(ClosedReason),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Local => f.write_str("disconnected locally"),
            DisconnectReason::Shutdown => f.write_str("local node shut down"),
            DisconnectReason::RemoteDisconnect => f.write_str("remote peer disconnected"),
            DisconnectReason::Rejected => f.write_str("connection rejected by server"),
            DisconnectReason::Timeout => f.write_str("connection attempt timed out"),
            DisconnectReason::SessionClosed(reason) => write!(f, "session closed: {reason}"),
        }
    }
}

/// Category of an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Data or DISCONNECT from a peer with no connection.
    UnknownPeer,
    /// A datagram shorter than the fragment header.
    MalformedPacket,
    /// A fragment index beyond the fragment budget.
    FragmentOutOfRange,
    /// A connection attempt got no answer.
    Timeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownPeer => "unknown_peer",
            ErrorCode::MalformedPacket => "malformed_packet",
            ErrorCode::FragmentOutOfRange => "fragment_out_of_range",
            ErrorCode::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the application should react to, produced by a tick or an
/// API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    Connected {
        connection: ConnectionId,
    },
    Disconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    /// One complete application message.
    Data {
        connection: ConnectionId,
        channel: ChannelIndex,
        payload: Bytes,
    },
    /// `connection` is `None` when the sender could not be resolved.
    Error {
        connection: Option<ConnectionId>,
        code: ErrorCode,
        message: String,
    },
}

impl MuxEvent {
    /// The connection the event concerns, if known.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            MuxEvent::Connected { connection }
            | MuxEvent::Disconnected { connection, .. }
            | MuxEvent::Data { connection, .. } => Some(*connection),
            MuxEvent::Error { connection, .. } => *connection,
        }
    }

    /// Short lowercase event name.
    pub fn kind(&self) -> &'static str {
        match self {
            MuxEvent::Connected { .. } => "connected",
            MuxEvent::Disconnected { .. } => "disconnected",
            MuxEvent::Data { .. } => "data",
            MuxEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_connection() {
        let data = MuxEvent::Data {
            connection: ConnectionId::new(3),
            channel: 0,
            payload: Bytes::from_static(b"hi"),
        };
        assert_eq!(data.connection(), Some(ConnectionId::new(3)));
        assert_eq!(data.kind(), "data");

        let err = MuxEvent::Error {
            connection: None,
            code: ErrorCode::UnknownPeer,
            message: "who".to_string(),
        };
        assert_eq!(err.connection(), None);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            DisconnectReason::SessionClosed(ClosedReason::TimedOut).to_string(),
            "session closed: connection timed out"
        );
        assert_eq!(ErrorCode::FragmentOutOfRange.to_string(), "fragment_out_of_range");
    }
}
