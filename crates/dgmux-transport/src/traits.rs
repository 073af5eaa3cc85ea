use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::{PeerId, SessionId};

/// Delivery guarantee requested for a channel.
///
/// The mode is honoured by the underlying transport; dgmux only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Datagrams may be lost or reordered.
    UnreliableUnordered,
    /// Datagrams are retransmitted but may arrive out of order.
    ReliableUnordered,
    /// Datagrams are retransmitted and delivered in send order.
    ReliableOrdered,
}

impl Reliability {
    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Reliability::UnreliableUnordered => "unreliable-unordered",
            Reliability::ReliableUnordered => "reliable-unordered",
            Reliability::ReliableOrdered => "reliable-ordered",
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the transport tore down a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    ClosedByLocal,
    ClosedByPeer,
    Closed,
    Failed,
    InvalidData,
    InvalidMessage,
    NegotiationFailed,
    TimedOut,
    TooManyConnections,
    Unexpected,
    Unknown,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClosedReason::ClosedByLocal => "connection gracefully closed by the local user",
            ClosedReason::ClosedByPeer => "connection gracefully closed by the remote user",
            ClosedReason::Closed => "connection unexpectedly closed",
            ClosedReason::Failed => "failed to establish connection",
            ClosedReason::InvalidData => "remote user sent invalid data",
            ClosedReason::InvalidMessage => "remote user sent an invalid message",
            ClosedReason::NegotiationFailed => "negotiation failed",
            ClosedReason::TimedOut => "connection timed out",
            ClosedReason::TooManyConnections => "too many connections",
            ClosedReason::Unexpected => "unexpected error, connection closed",
            ClosedReason::Unknown => "unknown error, connection closed",
        };
        f.write_str(text)
    }
}

/// One datagram pulled from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender.
    pub peer: PeerId,
    /// Session the datagram arrived on.
    pub session: SessionId,
    /// Raw bytes, at most `max_datagram_size`.
    pub payload: Bytes,
}

/// Session-level notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A remote peer opened a session towards us and awaits acceptance.
    IncomingConnection { peer: PeerId, session: SessionId },
    /// A session with a remote peer ended.
    RemoteClosed {
        peer: PeerId,
        session: SessionId,
        reason: ClosedReason,
    },
}

/// Handle returned by [`DatagramTransport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Connectionless, peer-addressed datagram transport.
///
/// Every call is non-blocking. `receive` drains exactly one pending datagram
/// per call.
pub trait DatagramTransport {
    /// Identifier of the local endpoint.
    fn local_peer(&self) -> PeerId;

    /// Largest datagram accepted by `send`.
    fn max_datagram_size(&self) -> usize;

    /// Send one datagram on `channel` with the given delivery mode.
    fn send(
        &mut self,
        peer: &PeerId,
        session: &SessionId,
        channel: u8,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<()>;

    /// Pop the next pending datagram on `channel`, if any.
    fn receive(&mut self, channel: u8) -> Option<Datagram>;

    /// Accept a session announced by [`Notification::IncomingConnection`].
    fn accept_session(&mut self, peer: &PeerId, session: &SessionId) -> Result<()>;

    /// Tear down a session with a peer.
    fn close_session(&mut self, peer: &PeerId, session: &SessionId) -> Result<()>;

    /// Start receiving [`Notification`]s.
    fn subscribe(&mut self) -> Result<SubscriptionId>;

    /// Stop receiving notifications for a subscription.
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Pop the next pending notification, if any.
    fn poll_notification(&mut self) -> Option<Notification>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_names() {
        assert_eq!(Reliability::ReliableOrdered.to_string(), "reliable-ordered");
        assert_eq!(
            Reliability::UnreliableUnordered.as_str(),
            "unreliable-unordered"
        );
    }

    #[test]
    fn closed_reason_describes_cause() {
        assert_eq!(ClosedReason::TimedOut.to_string(), "connection timed out");
        assert_eq!(
            ClosedReason::TooManyConnections.to_string(),
            "too many connections"
        );
    }
}
