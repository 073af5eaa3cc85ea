use dgmux_frame::ChannelIndex;
use dgmux_transport::{ClosedReason, DatagramTransport, PeerId, SessionId};
use tracing::{error, info};

use crate::config::MuxConfig;
use crate::control::ControlMessage;
use crate::error::{MuxError, Result};
use crate::event::{DisconnectReason, ErrorCode, MuxEvent};
use crate::handshake::{ServerAction, ServerHandshake};
use crate::node::{InboundMessage, MuxEndpoint, Node, Role};
use crate::table::ConnectionId;

/// Accepts clients over a [`DatagramTransport`] and multiplexes their
/// messages across the configured channels.
///
/// Nothing happens between calls: drive it with [`poll_once`](Self::poll_once)
/// and read the results with [`next_event`](Self::next_event).
#[derive(Debug)]
pub struct Server<T: DatagramTransport> {
    node: Node<T>,
    handshake: ServerHandshake,
}

impl<T: DatagramTransport> Server<T> {
    /// Validate `config`, subscribe to transport notifications and start
    /// the startup grace window if one is configured.
    pub fn new(transport: T, config: MuxConfig) -> Result<Self> {
        let handshake = ServerHandshake::new(config.max_connections);
        let node = Node::new(transport, config)?;
        info!(
            max_connections = handshake.max_connections(),
            "server listening"
        );
        Ok(Self { node, handshake })
    }

    /// Run one tick.
    pub fn poll_once(&mut self) -> Result<()> {
        self.node.poll(&mut self.handshake)
    }

    /// Send one message to a connection.
    pub fn send(
        &mut self,
        connection: ConnectionId,
        channel: ChannelIndex,
        payload: &[u8],
    ) -> Result<()> {
        self.node.ensure_running()?;
        let (peer, session) = self.route(connection)?;
        self.node.send_message(&peer, &session, channel, payload)?;
        Ok(())
    }

    /// End a connection: DISCONNECT now, session close on the next tick.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<()> {
        self.node.ensure_running()?;
        let (peer, session) = self.handshake.disconnect(connection)?;
        info!(%peer, %connection, "disconnecting peer");
        // failure is logged by the node; the local entry is gone regardless
        let _ = self
            .node
            .send_control(&peer, &session, ControlMessage::Disconnect);
        self.node.defer_close(peer, session);
        self.node.emit(MuxEvent::Disconnected {
            connection,
            reason: DisconnectReason::Local,
        });
        Ok(())
    }

    /// Disconnect every client, drain once and release transport resources.
    pub fn shutdown(&mut self) -> Result<()> {
        self.node.ensure_running()?;
        for (connection, peer, session) in self.handshake.drain() {
            let _ = self
                .node
                .send_control(&peer, &session, ControlMessage::Disconnect);
            self.node.defer_close(peer, session);
            self.node.emit(MuxEvent::Disconnected {
                connection,
                reason: DisconnectReason::Shutdown,
            });
        }
        self.node.finish_shutdown(&mut self.handshake);
        Ok(())
    }

    /// Peer behind a connection.
    pub fn peer_address(&self, connection: ConnectionId) -> Result<&PeerId> {
        self.handshake
            .table()
            .peer_of(connection)
            .ok_or(MuxError::UnknownConnection(connection))
    }

    pub fn connection_count(&self) -> usize {
        self.handshake.table().len()
    }

    /// Live connection ids in ascending order.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.handshake.table().connections()
    }

    pub fn next_event(&mut self) -> Option<MuxEvent> {
        self.node.next_event()
    }

    pub fn drain_events(&mut self) -> Vec<MuxEvent> {
        self.node.drain_events()
    }

    /// Assert or clear the ignore-all-messages flag.
    pub fn set_ignore_all_messages(&mut self, ignore: bool) {
        self.node.set_ignore_all_messages(ignore);
    }

    pub fn is_ignoring_messages(&self) -> bool {
        self.node.is_ignoring()
    }

    pub fn is_shut_down(&self) -> bool {
        self.node.is_shut_down()
    }

    /// Incomplete messages currently buffered.
    pub fn pending_fragments(&self) -> usize {
        self.node.pending_fragments()
    }

    /// Largest message [`send`](Self::send) accepts.
    pub fn max_message_size(&self) -> usize {
        self.node.fragmenter().max_message_size()
    }

    pub fn config(&self) -> &MuxConfig {
        self.node.config()
    }

    pub fn transport(&self) -> &T {
        self.node.transport()
    }

    fn route(&self, connection: ConnectionId) -> Result<(PeerId, SessionId)> {
        let table = self.handshake.table();
        let peer = table
            .peer_of(connection)
            .ok_or(MuxError::UnknownConnection(connection))?;
        let session = table.session_of(peer).cloned().unwrap_or_default();
        Ok((peer.clone(), session))
    }
}

impl<T: DatagramTransport> MuxEndpoint for Server<T> {
    fn poll_once(&mut self) -> Result<()> {
        Server::poll_once(self)
    }

    fn next_event(&mut self) -> Option<MuxEvent> {
        Server::next_event(self)
    }

    fn shutdown(&mut self) -> Result<()> {
        Server::shutdown(self)
    }
}

impl<T: DatagramTransport> Role<T> for ServerHandshake {
    fn accepts_session(&self, _peer: &PeerId, _session: &SessionId) -> bool {
        true
    }

    fn handle_control(
        &mut self,
        node: &mut Node<T>,
        message: ControlMessage,
        peer: PeerId,
        session: SessionId,
    ) {
        // control send failures are logged by the node
        match self.on_control(message, &peer, &session) {
            ServerAction::Accepted(connection) => {
                let _ = node.send_control(&peer, &session, ControlMessage::AcceptConnect);
                node.emit(MuxEvent::Connected { connection });
            }
            ServerAction::AlreadyConnected(_) => {
                let _ = node.send_control(&peer, &session, ControlMessage::AcceptConnect);
            }
            ServerAction::Rejected => {
                let _ = node.send_control(&peer, &session, ControlMessage::Disconnect);
            }
            ServerAction::Disconnected(connection) => {
                node.defer_close(peer, session);
                node.emit(MuxEvent::Disconnected {
                    connection,
                    reason: DisconnectReason::RemoteDisconnect,
                });
            }
            ServerAction::UnknownPeer => {
                node.emit(MuxEvent::Error {
                    connection: None,
                    code: ErrorCode::UnknownPeer,
                    message: format!("DISCONNECT from unknown peer {peer}"),
                });
            }
            ServerAction::Ignored(_) => {}
        }
    }

    fn handle_message(&mut self, node: &mut Node<T>, message: InboundMessage) {
        let InboundMessage {
            peer,
            session,
            channel,
            payload,
        } = message;

        match self.table().connection_of(&peer) {
            Some(connection) => node.emit(MuxEvent::Data {
                connection,
                channel,
                payload,
            }),
            None => {
                error!(%peer, %session, channel, "data received from unknown peer");
                let text = format!("data from unknown peer {peer}");
                node.defer_close(peer, session);
                node.emit(MuxEvent::Error {
                    connection: None,
                    code: ErrorCode::UnknownPeer,
                    message: text,
                });
            }
        }
    }

    fn handle_remote_closed(
        &mut self,
        node: &mut Node<T>,
        peer: PeerId,
        session: SessionId,
        reason: ClosedReason,
    ) {
        let connection = self.on_session_closed(&peer, &session);
        node.emit(MuxEvent::Disconnected {
            connection,
            reason: DisconnectReason::SessionClosed(reason),
        });
    }

    fn resolve(&self, peer: &PeerId) -> Option<ConnectionId> {
        self.table().connection_of(peer)
    }
}
