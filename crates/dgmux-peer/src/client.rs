use std::time::Instant;

use dgmux_frame::ChannelIndex;
use dgmux_transport::{ClosedReason, DatagramTransport, PeerId, SessionId};
use tracing::{debug, error, info, warn};

use crate::config::MuxConfig;
use crate::control::ControlMessage;
use crate::error::{MuxError, Result};
use crate::event::{DisconnectReason, ErrorCode, MuxEvent};
use crate::handshake::{ClientAction, ClientHandshake, ClientState};
use crate::node::{InboundMessage, MuxEndpoint, Node, Role};
use crate::table::ConnectionId;

/// Connects to one host over a [`DatagramTransport`].
///
/// Session names identify one connection attempt. Pick a fresh one per
/// [`connect`](Self::connect): a name that has been closed stays refused for
/// the life of the client.
#[derive(Debug)]
pub struct Client<T: DatagramTransport> {
    node: Node<T>,
    handshake: ClientHandshake,
}

impl<T: DatagramTransport> Client<T> {
    pub fn new(transport: T, config: MuxConfig) -> Result<Self> {
        let handshake = ClientHandshake::new(config.connect_timeout());
        let node = Node::new(transport, config)?;
        Ok(Self { node, handshake })
    }

    /// Send CONNECT to `host` over `session`.
    ///
    /// The outcome arrives later as a `Connected` event, or a `Disconnected`
    /// event with reason `Rejected` or `Timeout`.
    pub fn connect(
        &mut self,
        host: impl Into<PeerId>,
        session: impl Into<SessionId>,
    ) -> Result<()> {
        self.node.ensure_running()?;
        let host = host.into();
        let session = session.into();
        if self.node.is_closing_session(&session) {
            return Err(MuxError::InvalidSession);
        }

        self.handshake
            .begin(host.clone(), session.clone(), Instant::now())?;
        if let Err(err) = self
            .node
            .send_control(&host, &session, ControlMessage::Connect)
        {
            self.handshake.reset();
            return Err(err);
        }
        Ok(())
    }

    /// Run one tick.
    pub fn poll_once(&mut self) -> Result<()> {
        self.node.poll(&mut self.handshake)
    }

    /// Send one message to the host.
    pub fn send(&mut self, channel: ChannelIndex, payload: &[u8]) -> Result<()> {
        self.node.ensure_running()?;
        let ClientState::Connected { host, session, .. } = self.handshake.state() else {
            return Err(MuxError::NotConnected);
        };
        let (host, session) = (host.clone(), session.clone());
        self.node.send_message(&host, &session, channel, payload)?;
        Ok(())
    }

    /// Leave the host, or abandon a connection attempt.
    pub fn disconnect(&mut self) -> Result<()> {
        self.node.ensure_running()?;
        let ended = self.handshake.reset().ok_or(MuxError::NotConnected)?;
        info!(host = %ended.host, connection = %ended.connection, "disconnecting");
        // failure is logged by the node
        let _ = self
            .node
            .send_control(&ended.host, &ended.session, ControlMessage::Disconnect);
        self.node.defer_close(ended.host, ended.session);
        self.node.emit(MuxEvent::Disconnected {
            connection: ended.connection,
            reason: DisconnectReason::Local,
        });
        Ok(())
    }

    /// Disconnect, drain once and release transport resources.
    pub fn shutdown(&mut self) -> Result<()> {
        self.node.ensure_running()?;
        if let Some(ended) = self.handshake.reset() {
            let _ = self
                .node
                .send_control(&ended.host, &ended.session, ControlMessage::Disconnect);
            self.node.defer_close(ended.host, ended.session);
            self.node.emit(MuxEvent::Disconnected {
                connection: ended.connection,
                reason: DisconnectReason::Shutdown,
            });
        }
        self.node.finish_shutdown(&mut self.handshake);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.handshake.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.handshake.is_connecting()
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.handshake.connection()
    }

    /// Host of the current attempt or connection.
    pub fn host(&self) -> Option<&PeerId> {
        self.handshake.target().map(|(host, _)| host)
    }

    pub fn next_event(&mut self) -> Option<MuxEvent> {
        self.node.next_event()
    }

    pub fn drain_events(&mut self) -> Vec<MuxEvent> {
        self.node.drain_events()
    }

    pub fn set_ignore_all_messages(&mut self, ignore: bool) {
        self.node.set_ignore_all_messages(ignore);
    }

    pub fn is_ignoring_messages(&self) -> bool {
        self.node.is_ignoring()
    }

    pub fn is_shut_down(&self) -> bool {
        self.node.is_shut_down()
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
}

impl<T: DatagramTransport> MuxEndpoint for Client<T> {
    fn poll_once(&mut self) -> Result<()> {
        Client::poll_once(self)
    }

    fn next_event(&mut self) -> Option<MuxEvent> {
        Client::next_event(self)
    }

    fn shutdown(&mut self) -> Result<()> {
        Client::shutdown(self)
    }
}

impl<T: DatagramTransport> Role<T> for ClientHandshake {
    fn on_tick(&mut self, node: &mut Node<T>) {
        let Some(ended) = self.check_timeout(Instant::now()) else {
            return;
        };
        node.defer_close(ended.host.clone(), ended.session);
        node.emit(MuxEvent::Error {
            connection: Some(ended.connection),
            code: ErrorCode::Timeout,
            message: format!("no answer from {} within the connect timeout", ended.host),
        });
        node.emit(MuxEvent::Disconnected {
            connection: ended.connection,
            reason: DisconnectReason::Timeout,
        });
    }

    fn accepts_session(&self, peer: &PeerId, session: &SessionId) -> bool {
        self.target() == Some((peer, session))
    }

    fn handle_control(
        &mut self,
        node: &mut Node<T>,
        message: ControlMessage,
        peer: PeerId,
        _session: SessionId,
    ) {
        match self.on_control(message, &peer) {
            ClientAction::Connected(connection) => {
                node.emit(MuxEvent::Connected { connection });
            }
            ClientAction::Rejected {
                connection,
                host,
                session,
            } => {
                node.defer_close(host, session);
                node.emit(MuxEvent::Disconnected {
                    connection,
                    reason: DisconnectReason::Rejected,
                });
            }
            ClientAction::Disconnected {
                connection,
                host,
                session,
            } => {
                node.defer_close(host, session);
                node.emit(MuxEvent::Disconnected {
                    connection,
                    reason: DisconnectReason::RemoteDisconnect,
                });
            }
            ClientAction::UnknownPeer => {
                node.emit(MuxEvent::Error {
                    connection: None,
                    code: ErrorCode::UnknownPeer,
                    message: format!("{message} from unknown peer {peer}"),
                });
            }
            ClientAction::Ignored(_) => {}
        }
    }

    fn handle_message(&mut self, node: &mut Node<T>, message: InboundMessage) {
        let InboundMessage {
            peer,
            session,
            channel,
            payload,
        } = message;

        if self.is_host(&peer) {
            match self.connection() {
                Some(connection) => node.emit(MuxEvent::Data {
                    connection,
                    channel,
                    payload,
                }),
                None => warn!(%peer, channel, "data from host before the connection was accepted, dropping"),
            }
            return;
        }

        error!(%peer, %session, channel, "data received from unknown peer");
        let text = format!("data from unknown peer {peer}");
        node.defer_close(peer, session);
        node.emit(MuxEvent::Error {
            connection: None,
            code: ErrorCode::UnknownPeer,
            message: text,
        });
    }

    fn handle_remote_closed(
        &mut self,
        node: &mut Node<T>,
        peer: PeerId,
        session: SessionId,
        reason: ClosedReason,
    ) {
        match self.on_session_closed(&peer, &session) {
            Some(ended) => node.emit(MuxEvent::Disconnected {
                connection: ended.connection,
                reason: DisconnectReason::SessionClosed(reason),
            }),
            None => debug!(%peer, %session, %reason, "closed session is not the host connection"),
        }
    }

    fn resolve(&self, peer: &PeerId) -> Option<ConnectionId> {
        if self.is_host(peer) {
            self.connection()
        } else {
            None
        }
    }
}
