//! CONNECT / ACCEPT_CONNECT / DISCONNECT state machines.
//!
//! Both machines are pure: they update their connection table and return an
//! action describing what the caller must send, emit or close. Nothing here
//! touches the transport.

use std::time::{Duration, Instant};

use dgmux_transport::{PeerId, SessionId};
use tracing::{error, info, warn};

use crate::control::ControlMessage;
use crate::error::{MuxError, Result};
use crate::table::{ConnectionId, ConnectionTable};

/// Outcome of a control message received by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// New connection admitted: reply ACCEPT_CONNECT and report it.
    Accepted(ConnectionId),
    /// Repeated CONNECT from a connected peer: reply ACCEPT_CONNECT again.
    AlreadyConnected(ConnectionId),
    /// Table full: reply DISCONNECT and do nothing else.
    Rejected,
    /// Peer left: report it and close its session.
    Disconnected(ConnectionId),
    /// DISCONNECT from a peer with no connection.
    UnknownPeer,
    /// Message that makes no sense on a server.
    Ignored(ControlMessage),
}

/// Server side of the handshake.
#[derive(Debug)]
pub struct ServerHandshake {
    table: ConnectionTable,
    max_connections: usize,
}

impl ServerHandshake {
    pub fn new(max_connections: usize) -> Self {
        Self {
            table: ConnectionTable::new(),
            max_connections,
        }
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Apply a control message from `peer` received over `session`.
    pub fn on_control(
        &mut self,
        message: ControlMessage,
        peer: &PeerId,
        session: &SessionId,
    ) -> ServerAction {
        match message {
            ControlMessage::Connect => {
                if let Some(existing) = self.table.connection_of(peer) {
                    info!(%peer, connection = %existing, "repeated CONNECT from connected peer");
                    return ServerAction::AlreadyConnected(existing);
                }
                if self.table.len() >= self.max_connections {
                    error!(
                        %peer,
                        %session,
                        max_connections = self.max_connections,
                        "reached max connections, rejecting peer"
                    );
                    return ServerAction::Rejected;
                }
                let connection = self.table.insert(peer.clone(), session.clone());
                info!(%peer, %session, %connection, "peer connected");
                ServerAction::Accepted(connection)
            }
            ControlMessage::Disconnect => match self.table.remove_peer(peer) {
                Some((connection, _)) => {
                    info!(%peer, %connection, "peer disconnected");
                    ServerAction::Disconnected(connection)
                }
                None => {
                    error!(%peer, %session, "DISCONNECT from unknown peer");
                    ServerAction::UnknownPeer
                }
            },
            ControlMessage::AcceptConnect => {
                warn!(%peer, %session, "server received ACCEPT_CONNECT, ignoring");
                ServerAction::Ignored(message)
            }
        }
    }

    /// The transport reported `peer`'s `session` gone.
    ///
    /// Returns the peer's connection id when `session` is the one it connected
    /// on, removing the entry. Any other session gets a freshly allocated id
    /// and leaves the table untouched.
    pub fn on_session_closed(&mut self, peer: &PeerId, session: &SessionId) -> ConnectionId {
        if self.table.session_of(peer) == Some(session) {
            if let Some((connection, _)) = self.table.remove_peer(peer) {
                return connection;
            }
        }
        self.table.allocate_id()
    }

    /// Drop a connection on local request. Returns its peer and session.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<(PeerId, SessionId)> {
        self.table
            .remove_connection(connection)
            .ok_or(MuxError::UnknownConnection(connection))
    }

    /// Remove every connection, returning them in id order.
    pub fn drain(&mut self) -> Vec<(ConnectionId, PeerId, SessionId)> {
        let mut out = Vec::with_capacity(self.table.len());
        for connection in self.table.connections() {
            if let Some((peer, session)) = self.table.remove_connection(connection) {
                out.push((connection, peer, session));
            }
        }
        self.table.clear();
        out
    }
}

/// Where a client stands with its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting {
        host: PeerId,
        session: SessionId,
        since: Instant,
    },
    Connected {
        host: PeerId,
        session: SessionId,
        connection: ConnectionId,
    },
}

/// Outcome of a control message received by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// ACCEPT_CONNECT while connecting.
    Connected(ConnectionId),
    /// DISCONNECT while connecting: the server refused us.
    Rejected {
        connection: ConnectionId,
        host: PeerId,
        session: SessionId,
    },
    /// DISCONNECT while connected.
    Disconnected {
        connection: ConnectionId,
        host: PeerId,
        session: SessionId,
    },
    /// Control message from someone other than the host.
    UnknownPeer,
    /// Message that does not apply in the current state.
    Ignored(ControlMessage),
}

/// A connection attempt or connection that ended without a control
/// message from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedConnection {
    pub connection: ConnectionId,
    pub host: PeerId,
    pub session: SessionId,
    /// False when the attempt never reached Connected.
    pub was_connected: bool,
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    state: ClientState,
    table: ConnectionTable,
    connect_timeout: Duration,
}

impl ClientHandshake {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            state: ClientState::Idle,
            table: ConnectionTable::new(),
            connect_timeout,
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, ClientState::Connecting { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Connected { .. })
    }

    /// The current connection, once established.
    pub fn connection(&self) -> Option<ConnectionId> {
        match &self.state {
            ClientState::Connected { connection, .. } => Some(*connection),
            _ => None,
        }
    }

    /// Host and session of the attempt or connection in progress.
    pub fn target(&self) -> Option<(&PeerId, &SessionId)> {
        match &self.state {
            ClientState::Idle => None,
            ClientState::Connecting { host, session, .. }
            | ClientState::Connected { host, session, .. } => Some((host, session)),
        }
    }

    /// Whether `peer` is the host we are connecting or connected to.
    pub fn is_host(&self, peer: &PeerId) -> bool {
        self.target().is_some_and(|(host, _)| host == peer)
    }

    /// Start connecting. The caller sends CONNECT.
    pub fn begin(&mut self, host: PeerId, session: SessionId, now: Instant) -> Result<()> {
        if session.is_empty() {
            return Err(MuxError::InvalidSession);
        }
        if let Some((current, _)) = self.target() {
            return Err(MuxError::AlreadyActive(current.to_string()));
        }
        info!(%host, %session, "connecting");
        self.state = ClientState::Connecting {
            host,
            session,
            since: now,
        };
        Ok(())
    }

    /// Apply a control message from `peer`.
    pub fn on_control(&mut self, message: ControlMessage, peer: &PeerId) -> ClientAction {
        if !self.is_host(peer) {
            error!(%peer, %message, "control message from unknown peer");
            return ClientAction::UnknownPeer;
        }

        match (message, std::mem::replace(&mut self.state, ClientState::Idle)) {
            (ControlMessage::AcceptConnect, ClientState::Connecting { host, session, .. }) => {
                let connection = self.table.insert(host.clone(), session.clone());
                info!(%host, %session, %connection, "connected");
                self.state = ClientState::Connected {
                    host,
                    session,
                    connection,
                };
                ClientAction::Connected(connection)
            }
            (ControlMessage::Disconnect, ClientState::Connecting { host, session, .. }) => {
                let connection = self.table.allocate_id();
                warn!(%host, %session, "connection rejected by server");
                ClientAction::Rejected {
                    connection,
                    host,
                    session,
                }
            }
            (
                ControlMessage::Disconnect,
                ClientState::Connected {
                    host,
                    session,
                    connection,
                },
            ) => {
                self.table.remove_connection(connection);
                info!(%host, %connection, "disconnected by server");
                ClientAction::Disconnected {
                    connection,
                    host,
                    session,
                }
            }
            (message, state) => {
                self.state = state;
                warn!(%peer, %message, "unexpected control message, ignoring");
                ClientAction::Ignored(message)
            }
        }
    }

    /// Give up on a connection attempt older than the connect timeout.
    pub fn check_timeout(&mut self, now: Instant) -> Option<EndedConnection> {
        let ClientState::Connecting { since, .. } = &self.state else {
            return None;
        };
        if now.saturating_duration_since(*since) < self.connect_timeout {
            return None;
        }
        let ended = self.reset()?;
        warn!(
            host = %ended.host,
            timeout_ms = self.connect_timeout.as_millis() as u64,
            "connection attempt timed out"
        );
        Some(ended)
    }

    /// The transport reported a session gone.
    ///
    /// Only the session we are connecting or connected on ends the attempt.
    /// Anything else returns `None`.
    pub fn on_session_closed(
        &mut self,
        peer: &PeerId,
        session: &SessionId,
    ) -> Option<EndedConnection> {
        if self.target() != Some((peer, session)) {
            return None;
        }
        self.reset()
    }

    /// Return to Idle, reporting what was in progress.
    ///
    /// An attempt that never connected gets a freshly allocated id.
    pub fn reset(&mut self) -> Option<EndedConnection> {
        match std::mem::replace(&mut self.state, ClientState::Idle) {
            ClientState::Idle => None,
            ClientState::Connecting { host, session, .. } => Some(EndedConnection {
                connection: self.table.allocate_id(),
                host,
                session,
                was_connected: false,
            }),
            ClientState::Connected {
                host,
                session,
                connection,
            } => {
                self.table.remove_connection(connection);
                Some(EndedConnection {
                    connection,
                    host,
                    session,
                    was_connected: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::from(name)
    }

    fn session() -> SessionId {
        SessionId::from("s")
    }

    #[test]
    fn test_server_accepts_until_full() {
        let mut hs = ServerHandshake::new(1);

        let first = hs.on_control(ControlMessage::Connect, &peer("a"), &session());
        assert_eq!(first, ServerAction::Accepted(ConnectionId::new(1)));

        let second = hs.on_control(ControlMessage::Connect, &peer("b"), &session());
        assert_eq!(second, ServerAction::Rejected);
        assert_eq!(hs.table().len(), 1);
        assert!(!hs.table().contains_peer(&peer("b")));
    }

    #[test]
    fn test_server_repeated_connect_keeps_id() {
        let mut hs = ServerHandshake::new(1);
        hs.on_control(ControlMessage::Connect, &peer("a"), &session());

        let again = hs.on_control(ControlMessage::Connect, &peer("a"), &session());

        assert_eq!(again, ServerAction::AlreadyConnected(ConnectionId::new(1)));
        assert_eq!(hs.table().len(), 1);
    }

    #[test]
    fn test_server_disconnect() {
        let mut hs = ServerHandshake::new(4);
        hs.on_control(ControlMessage::Connect, &peer("a"), &session());

        let action = hs.on_control(ControlMessage::Disconnect, &peer("a"), &session());
        assert_eq!(action, ServerAction::Disconnected(ConnectionId::new(1)));
        assert!(hs.table().is_empty());

        let action = hs.on_control(ControlMessage::Disconnect, &peer("a"), &session());
        assert_eq!(action, ServerAction::UnknownPeer);
    }

    #[test]
    fn test_server_ignores_accept() {
        let mut hs = ServerHandshake::new(4);
        let action = hs.on_control(ControlMessage::AcceptConnect, &peer("a"), &session());
        assert_eq!(action, ServerAction::Ignored(ControlMessage::AcceptConnect));
        assert!(hs.table().is_empty());
    }

    #[test]
    fn test_server_session_closed_synthesizes_id() {
        let mut hs = ServerHandshake::new(4);
        hs.on_control(ControlMessage::Connect, &peer("a"), &session());

        assert_eq!(hs.on_session_closed(&peer("a"), &session()), ConnectionId::new(1));
        assert_eq!(hs.on_session_closed(&peer("ghost"), &session()), ConnectionId::new(2));
        assert!(hs.table().is_empty());

        let next = hs.on_control(ControlMessage::Connect, &peer("b"), &session());
        assert_eq!(next, ServerAction::Accepted(ConnectionId::new(3)));
    }

    #[test]
    fn test_server_close_of_other_session_keeps_connection() {
        let mut hs = ServerHandshake::new(4);
        hs.on_control(ControlMessage::Connect, &peer("a"), &SessionId::from("a-2"));

        let id = hs.on_session_closed(&peer("a"), &SessionId::from("a-1"));
        assert_eq!(id, ConnectionId::new(2));
        assert_eq!(hs.table().connection_of(&peer("a")), Some(ConnectionId::new(1)));

        let id = hs.on_session_closed(&peer("a"), &SessionId::from("a-2"));
        assert_eq!(id, ConnectionId::new(1));
        assert!(hs.table().is_empty());
    }

    #[test]
    fn test_server_local_disconnect_and_drain() {
        let mut hs = ServerHandshake::new(4);
        hs.on_control(ControlMessage::Connect, &peer("a"), &SessionId::from("sa"));
        hs.on_control(ControlMessage::Connect, &peer("b"), &SessionId::from("sb"));

        let (p, s) = hs.disconnect(ConnectionId::new(1)).unwrap();
        assert_eq!((p, s), (peer("a"), SessionId::from("sa")));
        assert!(matches!(
            hs.disconnect(ConnectionId::new(1)),
            Err(MuxError::UnknownConnection(_))
        ));

        let drained = hs.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, ConnectionId::new(2));
        assert!(hs.table().is_empty());
    }

    #[test]
    fn test_client_connects() {
        let mut hs = ClientHandshake::new(Duration::from_secs(25));
        hs.begin(peer("host"), session(), Instant::now()).unwrap();
        assert!(hs.is_connecting());

        let action = hs.on_control(ControlMessage::AcceptConnect, &peer("host"));

        assert_eq!(action, ClientAction::Connected(ConnectionId::new(1)));
        assert!(hs.is_connected());
        assert_eq!(hs.connection(), Some(ConnectionId::new(1)));
    }

    #[test]
    fn test_client_begin_rejects_misuse() {
        let mut hs = ClientHandshake::new(Duration::from_secs(25));
        assert!(matches!(
            hs.begin(peer("host"), SessionId::default(), Instant::now()),
            Err(MuxError::InvalidSession)
        ));

        hs.begin(peer("host"), session(), Instant::now()).unwrap();
        assert!(matches!(
            hs.begin(peer("other"), session(), Instant::now()),
            Err(MuxError::AlreadyActive(_))
        ));
    }

    #[test]
    fn test_client_rejected() {
        let mut hs = ClientHandshake::new(Duration::from_secs(25));
        hs.begin(peer("host"), session(), Instant::now()).unwrap();

        let action = hs.on_control(ControlMessage::Disconnect, &peer("host"));

        assert!(matches!(action, ClientAction::Rejected { .. }));
        assert_eq!(*hs.state(), ClientState::Idle);
    }

    #[test]
    fn test_client_disconnected_by_server() {
        let mut hs = ClientHandshake::new(Duration::from_secs(25));
        hs.begin(peer("host"), session(), Instant::now()).unwrap();
        hs.on_control(ControlMessage::AcceptConnect, &peer("host"));

        let action = hs.on_control(ControlMessage::Disconnect, &peer("host"));

        assert_eq!(
            action,
            ClientAction::Disconnected {
                connection: ConnectionId::new(1),
                host: peer("host"),
                session: session(),
            }
        );
        assert!(!hs.is_connected());
    }

    #[test]
    fn test_client_ignores_strangers() {
        let mut hs = ClientHandshake::new(Duration::from_secs(25));
        assert_eq!(
            hs.on_control(ControlMessage::AcceptConnect, &peer("host")),
            ClientAction::UnknownPeer
        );

        hs.begin(peer("host"), session(), Instant::now()).unwrap();
        assert_eq!(
            hs.on_control(ControlMessage::AcceptConnect, &peer("mallory")),
            ClientAction::UnknownPeer
        );
        assert_eq!(
            hs.on_control(ControlMessage::Connect, &peer("host")),
            ClientAction::Ignored(ControlMessage::Connect)
        );
        assert!(hs.is_connecting());
    }

    #[test]
    fn test_client_timeout() {
        let mut hs = ClientHandshake::new(Duration::from_secs(5));
        let start = Instant::now();
        hs.begin(peer("host"), session(), start).unwrap();

        assert!(hs.check_timeout(start + Duration::from_secs(4)).is_none());
        let ended = hs.check_timeout(start + Duration::from_secs(5)).unwrap();

        assert!(!ended.was_connected);
        assert_eq!(ended.host, peer("host"));
        assert_eq!(*hs.state(), ClientState::Idle);
        assert!(hs.check_timeout(start + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_connected_client_does_not_time_out() {
        let mut hs = ClientHandshake::new(Duration::from_secs(5));
        let start = Instant::now();
        hs.begin(peer("host"), session(), start).unwrap();
        hs.on_control(ControlMessage::AcceptConnect, &peer("host"));

        assert!(hs.check_timeout(start + Duration::from_secs(60)).is_none());
        assert!(hs.is_connected());
    }

    #[test]
    fn test_client_session_closed() {
        let mut hs = ClientHandshake::new(Duration::from_secs(5));
        hs.begin(peer("host"), session(), Instant::now()).unwrap();
        hs.on_control(ControlMessage::AcceptConnect, &peer("host"));

        assert!(hs.on_session_closed(&peer("other"), &session()).is_none());
        assert!(hs
            .on_session_closed(&peer("host"), &SessionId::from("old"))
            .is_none());
        assert!(hs.is_connected());

        let ended = hs.on_session_closed(&peer("host"), &session()).unwrap();
        assert!(ended.was_connected);
        assert_eq!(ended.connection, ConnectionId::new(1));
        assert!(hs.on_session_closed(&peer("host"), &session()).is_none());
    }
}
