//! Tick engine shared by [`Server`](crate::Server) and [`Client`](crate::Client).
//!
//! One tick, in order:
//! 1. run session closes deferred by the previous tick, age the reassembly
//!    buffer, end the startup grace window if it has expired
//! 2. role housekeeping (client connect timeout)
//! 3. deliver messages held back while inbound traffic was ignored
//! 4. drain transport notifications
//! 5. drain the internal channel; the first valid control message is handled
//!    and ends the tick
//! 6. drain every application channel into the reassembly buffer and deliver
//!    completed messages in completion order

use std::collections::VecDeque;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use dgmux_frame::{
    decode_packet, encode_packet, internal_channel, ChannelIndex, FrameError, Fragmenter,
    MessageIdCounter, ReassemblyBuffer, HEADER_SIZE,
};
use dgmux_transport::{
    ClosedReason, Datagram, DatagramTransport, Notification, PeerId, Reliability, SessionId,
    SubscriptionId,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::{GracePolicy, MuxConfig};
use crate::control::ControlMessage;
use crate::error::{MuxError, Result};
use crate::event::{ErrorCode, MuxEvent};
use crate::table::ConnectionId;
use crate::teardown::SessionTeardown;

/// Reassembly is keyed per sender, session and channel, so closing one
/// session never touches groups arriving on another.
pub type ReassemblyKey = (PeerId, SessionId, ChannelIndex);

/// Anything that can be driven tick by tick and yields [`MuxEvent`]s.
pub trait MuxEndpoint {
    /// Run one tick.
    fn poll_once(&mut self) -> Result<()>;
    /// Pop the oldest queued event.
    fn next_event(&mut self) -> Option<MuxEvent>;
    /// Disconnect everything and release transport resources.
    fn shutdown(&mut self) -> Result<()>;
}

/// A completed application message with the session it arrived on.
#[derive(Debug)]
pub(crate) struct InboundMessage {
    pub peer: PeerId,
    pub session: SessionId,
    pub channel: ChannelIndex,
    pub payload: Bytes,
}

#[derive(Debug)]
enum Inbound {
    Message(InboundMessage),
    Rejected {
        peer: PeerId,
        channel: ChannelIndex,
        error: FrameError,
    },
}

/// Role-specific reactions plugged into the tick.
pub(crate) trait Role<T: DatagramTransport> {
    /// Called once per tick before any inbound traffic is drained.
    fn on_tick(&mut self, _node: &mut Node<T>) {}

    /// Whether to accept a session the transport announced.
    fn accepts_session(&self, peer: &PeerId, session: &SessionId) -> bool;

    fn handle_control(
        &mut self,
        node: &mut Node<T>,
        message: ControlMessage,
        peer: PeerId,
        session: SessionId,
    );

    fn handle_message(&mut self, node: &mut Node<T>, message: InboundMessage);

    fn handle_remote_closed(
        &mut self,
        node: &mut Node<T>,
        peer: PeerId,
        session: SessionId,
        reason: ClosedReason,
    );

    /// Connection of `peer`, used to attribute error events.
    fn resolve(&self, peer: &PeerId) -> Option<ConnectionId>;
}

#[derive(Debug)]
pub(crate) struct Node<T> {
    transport: T,
    config: MuxConfig,
    fragmenter: Fragmenter,
    ids: MessageIdCounter,
    reassembly: ReassemblyBuffer<ReassemblyKey>,
    teardown: SessionTeardown,
    events: VecDeque<MuxEvent>,
    held: VecDeque<InboundMessage>,
    ignore_all: bool,
    grace_until: Option<Instant>,
    subscription: Option<SubscriptionId>,
    shut_down: bool,
}

impl<T: DatagramTransport> Node<T> {
    pub fn new(mut transport: T, config: MuxConfig) -> Result<Self> {
        config.validate()?;
        let fragmenter =
            Fragmenter::for_datagram_size(transport.max_datagram_size(), config.max_fragments)?;
        let subscription = transport.subscribe()?;

        let grace = config.startup_grace();
        let grace_until = (!grace.is_zero()).then(|| Instant::now() + grace);

        info!(
            local = %transport.local_peer(),
            channels = config.channels.len(),
            max_payload = fragmenter.max_payload(),
            max_fragments = fragmenter.max_fragments(),
            grace_ms = config.startup_grace_ms,
            "node started"
        );

        Ok(Self {
            reassembly: ReassemblyBuffer::new(config.reassembly()),
            transport,
            fragmenter,
            ids: MessageIdCounter::new(),
            teardown: SessionTeardown::new(),
            events: VecDeque::new(),
            held: VecDeque::new(),
            ignore_all: grace_until.is_some(),
            grace_until,
            subscription: Some(subscription),
            shut_down: false,
            config,
        })
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn fragmenter(&self) -> &Fragmenter {
        &self.fragmenter
    }

    pub fn pending_fragments(&self) -> usize {
        self.reassembly.pending_groups()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(MuxError::ShutDown);
        }
        Ok(())
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignore_all
    }

    /// Set or clear the ignore flag by hand. Cancels any pending grace timer.
    pub fn set_ignore_all_messages(&mut self, ignore: bool) {
        self.grace_until = None;
        if self.ignore_all != ignore {
            info!(ignore, policy = ?self.config.grace_policy, "ignore-all-messages changed");
        }
        self.ignore_all = ignore;
    }

    /// Run one tick.
    pub fn poll<R: Role<T>>(&mut self, role: &mut R) -> Result<()> {
        self.ensure_running()?;
        self.run_tick(role);
        Ok(())
    }

    fn run_tick<R: Role<T>>(&mut self, role: &mut R) {
        self.begin_tick();
        role.on_tick(self);
        self.release_held(role);
        self.drain_notifications(role);
        if self.drain_control(role) {
            return;
        }
        for inbound in self.drain_application() {
            self.dispatch(role, inbound);
        }
    }

    fn begin_tick(&mut self) {
        for (peer, session) in self.teardown.take_deferred() {
            self.close_session(&peer, &session);
        }
        self.reassembly.tick();

        if let Some(until) = self.grace_until {
            if Instant::now() >= until {
                self.grace_until = None;
                self.ignore_all = false;
                info!("startup grace window over");
            }
        }
    }

    fn release_held<R: Role<T>>(&mut self, role: &mut R) {
        if self.ignore_all || self.held.is_empty() {
            return;
        }
        let held = std::mem::take(&mut self.held);
        debug!(count = held.len(), "delivering messages held during grace window");
        for message in held {
            role.handle_message(self, message);
        }
    }

    fn drain_notifications<R: Role<T>>(&mut self, role: &mut R) {
        if self.ignore_all {
            if self.config.grace_policy == GracePolicy::Drop {
                while let Some(notification) = self.transport.poll_notification() {
                    debug!(?notification, "ignoring notification");
                }
            }
            return;
        }

        while let Some(notification) = self.transport.poll_notification() {
            match notification {
                Notification::IncomingConnection { peer, session } => {
                    self.accept_incoming(role, &peer, &session);
                }
                Notification::RemoteClosed {
                    peer,
                    session,
                    reason,
                } => {
                    if self.teardown.is_closing(&session) {
                        debug!(%peer, %session, %reason, "remote close of a session already being closed");
                        continue;
                    }
                    let dropped = self
                        .reassembly
                        .discard_matching(|(p, s, _)| *p == peer && *s == session);
                    if matches!(reason, ClosedReason::ClosedByPeer | ClosedReason::ClosedByLocal) {
                        info!(%peer, %session, %reason, dropped, "remote session closed");
                    } else {
                        error!(%peer, %session, %reason, dropped, "remote session failed");
                    }
                    role.handle_remote_closed(self, peer.clone(), session.clone(), reason);
                    // releases our half and purges datagrams still queued on it
                    self.close_session(&peer, &session);
                }
            }
        }
    }

    fn accept_incoming<R: Role<T>>(&mut self, role: &R, peer: &PeerId, session: &SessionId) {
        if self.teardown.is_dead(session) {
            error!(%peer, %session, "incoming connection request on dead session");
            return;
        }
        if !role.accepts_session(peer, session) {
            warn!(%peer, %session, "refusing incoming session");
            return;
        }
        match self.transport.accept_session(peer, session) {
            Ok(()) => debug!(%peer, %session, "session accepted"),
            Err(err) => error!(%peer, %session, error = %err, "failed to accept session"),
        }
    }

    /// Returns true when a control message was handled and the tick must end.
    fn drain_control<R: Role<T>>(&mut self, role: &mut R) -> bool {
        let channel = internal_channel(self.config.channels.len());

        if self.ignore_all {
            if self.config.grace_policy == GracePolicy::Drop {
                let mut dropped = 0usize;
                while self.transport.receive(channel).is_some() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(dropped, "ignoring control datagrams");
                }
            }
            return false;
        }

        while let Some(Datagram {
            peer,
            session,
            payload,
        }) = self.transport.receive(channel)
        {
            match ControlMessage::decode(&payload) {
                Some(message) => {
                    debug!(%peer, %session, %message, "control message");
                    role.handle_control(self, message, peer, session);
                    return true;
                }
                None => {
                    warn!(%peer, %session, len = payload.len(), "malformed control datagram, ignoring");
                }
            }
        }
        false
    }

    fn drain_application(&mut self) -> Vec<Inbound> {
        let dropping = self.ignore_all && self.config.grace_policy == GracePolicy::Drop;
        let mut inbound = Vec::new();

        for index in 0..self.config.channels.len() {
            let channel = index as ChannelIndex;
            while let Some(Datagram {
                peer,
                session,
                payload,
            }) = self.transport.receive(channel)
            {
                if dropping {
                    trace!(%peer, channel, "ignoring datagram");
                    continue;
                }

                let packet = match decode_packet(payload) {
                    Ok(packet) => packet,
                    Err(error) => {
                        inbound.push(Inbound::Rejected {
                            peer,
                            channel,
                            error,
                        });
                        continue;
                    }
                };
                trace!(
                    %peer,
                    channel,
                    message_id = packet.message_id,
                    fragment = packet.fragment_index,
                    more = packet.more_fragments,
                    "fragment received"
                );

                let key = (peer.clone(), session.clone(), channel);
                match self.reassembly.insert(key, packet) {
                    Ok(Some(done)) => inbound.push(Inbound::Message(InboundMessage {
                        peer,
                        session,
                        channel,
                        payload: done.payload,
                    })),
                    Ok(None) => {}
                    Err(error) => inbound.push(Inbound::Rejected {
                        peer,
                        channel,
                        error,
                    }),
                }
            }
        }

        if self.ignore_all {
            for item in inbound {
                match item {
                    Inbound::Message(message) => self.held.push_back(message),
                    Inbound::Rejected { peer, channel, error } => {
                        debug!(%peer, channel, %error, "dropping bad datagram during grace window");
                    }
                }
            }
            return Vec::new();
        }
        inbound
    }

    fn dispatch<R: Role<T>>(&mut self, role: &mut R, inbound: Inbound) {
        match inbound {
            Inbound::Message(message) => role.handle_message(self, message),
            Inbound::Rejected {
                peer,
                channel,
                error,
            } => {
                let code = match error {
                    FrameError::FragmentIndexOutOfRange { .. } => ErrorCode::FragmentOutOfRange,
                    _ => ErrorCode::MalformedPacket,
                };
                warn!(%peer, channel, %error, "dropping bad datagram");
                self.emit(MuxEvent::Error {
                    connection: role.resolve(&peer),
                    code,
                    message: format!("{error} from {peer} on channel {channel}"),
                });
            }
        }
    }

    /// Fragment `payload` and send every packet on `channel`.
    ///
    /// Nothing is sent if the channel is unknown or the message exceeds the
    /// fragment budget. Returns the number of packets sent.
    pub fn send_message(
        &mut self,
        peer: &PeerId,
        session: &SessionId,
        channel: ChannelIndex,
        payload: &[u8],
    ) -> Result<usize> {
        self.ensure_running()?;
        let reliability = *self.config.channels.get(channel as usize).ok_or(
            MuxError::UnknownChannel {
                channel,
                channels: self.config.channels.len(),
            },
        )?;
        let packets = self.fragmenter.fragment(&mut self.ids, payload)?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.fragmenter.max_payload());
        for packet in &packets {
            buf.clear();
            encode_packet(packet, &mut buf);
            if let Err(err) = self
                .transport
                .send(peer, session, channel, &buf, reliability)
            {
                error!(
                    %peer,
                    %session,
                    channel,
                    message_id = packet.message_id,
                    fragment = packet.fragment_index,
                    error = %err,
                    "send failed"
                );
                return Err(err.into());
            }
        }

        debug!(%peer, channel, size = payload.len(), fragments = packets.len(), "message sent");
        Ok(packets.len())
    }

    /// Send one control byte on the internal channel. Failures are logged.
    pub fn send_control(
        &mut self,
        peer: &PeerId,
        session: &SessionId,
        message: ControlMessage,
    ) -> Result<()> {
        let channel = internal_channel(self.config.channels.len());
        self.transport
            .send(
                peer,
                session,
                channel,
                &[message.as_byte()],
                Reliability::ReliableOrdered,
            )
            .map_err(|err| {
                error!(%peer, %session, %message, error = %err, "control send failed");
                MuxError::from(err)
            })
    }

    /// Whether `session` is closed or about to be.
    pub fn is_closing_session(&self, session: &SessionId) -> bool {
        self.teardown.is_closing(session)
    }

    /// Close a session now. See [`SessionTeardown::close`].
    pub fn close_session(&mut self, peer: &PeerId, session: &SessionId) -> bool {
        self.teardown
            .close(&mut self.transport, &mut self.reassembly, peer, session)
    }

    /// Close a session at the start of the next tick.
    pub fn defer_close(&mut self, peer: PeerId, session: SessionId) {
        self.teardown.defer(peer, session);
    }

    pub fn emit(&mut self, event: MuxEvent) {
        debug!(event = event.kind(), connection = ?event.connection(), "event queued");
        self.events.push_back(event);
    }

    pub fn next_event(&mut self) -> Option<MuxEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<MuxEvent> {
        self.events.drain(..).collect()
    }

    /// Final phase of a shutdown, after the role queued its disconnects.
    ///
    /// Drains inbound traffic once with the ignore flag set, runs every queued
    /// close since no further tick will, then releases reassembly state and
    /// the notification subscription.
    pub fn finish_shutdown<R: Role<T>>(&mut self, role: &mut R) {
        self.grace_until = None;
        self.ignore_all = true;

        // the final drain is the tick these closes wait for
        let queued = self.teardown.take_deferred();
        self.run_tick(role);
        for (peer, session) in queued.into_iter().chain(self.teardown.take_deferred()) {
            self.close_session(&peer, &session);
        }
        self.reassembly.clear();
        self.held.clear();
        if let Some(id) = self.subscription.take() {
            self.transport.unsubscribe(id);
        }
        self.shut_down = true;
        info!(local = %self.transport.local_peer(), "node shut down");
    }
}
