use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::id::{PeerId, SessionId};
use crate::traits::{
    ClosedReason, Datagram, DatagramTransport, Notification, Reliability, SubscriptionId,
};

/// Per-call datagram limit used when none is configured.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1170;

/// In-process datagram network.
///
/// Every endpoint gets one FIFO inbox per channel. Datagrams are delivered
/// the moment they are sent; the first datagram of a new `(sender, session)`
/// pair raises [`Notification::IncomingConnection`] at the receiver. Cloning
/// the network shares the same state.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

/// Record of one successful `send`, kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub from: PeerId,
    pub to: PeerId,
    pub session: SessionId,
    pub channel: u8,
    pub reliability: Reliability,
    pub payload: Bytes,
}

struct NetworkState {
    max_datagram_size: usize,
    endpoints: HashMap<PeerId, Endpoint>,
    next_subscription: u64,
    sent: Vec<SentDatagram>,
}

#[derive(Default)]
struct Endpoint {
    inboxes: HashMap<u8, VecDeque<Datagram>>,
    notifications: VecDeque<Notification>,
    subscription: Option<SubscriptionId>,
    open_sessions: HashSet<(PeerId, SessionId)>,
    accepted: HashSet<(PeerId, SessionId)>,
    closes: Vec<(PeerId, SessionId)>,
}

impl Endpoint {
    fn notify(&mut self, notification: Notification) {
        if self.subscription.is_some() {
            self.notifications.push_back(notification);
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create a network with [`DEFAULT_MAX_DATAGRAM_SIZE`].
    pub fn new() -> Self {
        Self::with_max_datagram_size(DEFAULT_MAX_DATAGRAM_SIZE)
    }

    /// Create a network with an explicit per-datagram limit.
    pub fn with_max_datagram_size(max_datagram_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkState {
                max_datagram_size,
                endpoints: HashMap::new(),
                next_subscription: 1,
                sent: Vec::new(),
            })),
        }
    }

    /// Register (or reattach to) the endpoint for `peer`.
    pub fn endpoint(&self, peer: impl Into<PeerId>) -> MemoryTransport {
        let local = peer.into();
        self.state().endpoints.entry(local.clone()).or_default();
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }

    /// Number of datagrams waiting in `peer`'s inbox for `channel`.
    pub fn pending(&self, peer: &PeerId, channel: u8) -> usize {
        self.state()
            .endpoints
            .get(peer)
            .and_then(|ep| ep.inboxes.get(&channel))
            .map_or(0, VecDeque::len)
    }

    /// Reverse the order of `peer`'s inbox for `channel`.
    pub fn reverse_inbox(&self, peer: &PeerId, channel: u8) {
        if let Some(inbox) = self
            .state()
            .endpoints
            .get_mut(peer)
            .and_then(|ep| ep.inboxes.get_mut(&channel))
        {
            inbox.make_contiguous().reverse();
        }
    }

    /// Reorder `peer`'s inbox for `channel` by the given positions.
    ///
    /// `order[i]` names the current position of the datagram that should be
    /// delivered `i`-th. Positions out of range are skipped.
    pub fn permute_inbox(&self, peer: &PeerId, channel: u8, order: &[usize]) {
        let mut state = self.state();
        let Some(inbox) = state
            .endpoints
            .get_mut(peer)
            .and_then(|ep| ep.inboxes.get_mut(&channel))
        else {
            return;
        };
        let current: Vec<Datagram> = inbox.drain(..).collect();
        let mut taken = vec![false; current.len()];
        for &pos in order {
            if pos < current.len() && !taken[pos] {
                taken[pos] = true;
                inbox.push_back(current[pos].clone());
            }
        }
        for (pos, datagram) in current.into_iter().enumerate() {
            if !taken[pos] {
                inbox.push_back(datagram);
            }
        }
    }

    /// Deliver a raw datagram to `to`, bypassing size checks.
    pub fn inject(&self, from: &PeerId, to: &PeerId, session: &SessionId, channel: u8, payload: &[u8]) {
        let mut state = self.state();
        let endpoint = state.endpoints.entry(to.clone()).or_default();
        endpoint
            .inboxes
            .entry(channel)
            .or_default()
            .push_back(Datagram {
                peer: from.clone(),
                session: session.clone(),
                payload: Bytes::copy_from_slice(payload),
            });
    }

    /// Simulate the transport reporting that `remote`'s session ended.
    ///
    /// The notification is queued at `local` only if it is subscribed.
    pub fn fail_session(
        &self,
        local: &PeerId,
        remote: &PeerId,
        session: &SessionId,
        reason: ClosedReason,
    ) {
        let mut state = self.state();
        if let Some(endpoint) = state.endpoints.get_mut(local) {
            endpoint
                .open_sessions
                .remove(&(remote.clone(), session.clone()));
            endpoint.notify(Notification::RemoteClosed {
                peer: remote.clone(),
                session: session.clone(),
                reason,
            });
        }
    }

    /// Every datagram sent so far, in send order.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.state().sent.clone()
    }

    /// Datagrams sent to `peer` on `channel`.
    pub fn sent_to(&self, peer: &PeerId, channel: u8) -> Vec<SentDatagram> {
        self.state()
            .sent
            .iter()
            .filter(|d| &d.to == peer && d.channel == channel)
            .cloned()
            .collect()
    }

    /// `close_session` calls made by `peer`, in call order.
    pub fn closes(&self, peer: &PeerId) -> Vec<(PeerId, SessionId)> {
        self.state()
            .endpoints
            .get(peer)
            .map(|ep| ep.closes.clone())
            .unwrap_or_default()
    }

    /// Whether `peer` accepted `session` from `remote`.
    pub fn is_accepted(&self, peer: &PeerId, remote: &PeerId, session: &SessionId) -> bool {
        self.state()
            .endpoints
            .get(peer)
            .is_some_and(|ep| ep.accepted.contains(&(remote.clone(), session.clone())))
    }

    /// Whether `peer` currently has an active subscription.
    pub fn is_subscribed(&self, peer: &PeerId) -> bool {
        self.state()
            .endpoints
            .get(peer)
            .is_some_and(|ep| ep.subscription.is_some())
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint attached to a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerId,
}

impl MemoryTransport {
    /// The network this endpoint belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("local", &self.local)
            .finish()
    }
}

impl DatagramTransport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn max_datagram_size(&self) -> usize {
        self.network.state().max_datagram_size
    }

    fn send(
        &mut self,
        peer: &PeerId,
        session: &SessionId,
        channel: u8,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<()> {
        if session.is_empty() {
            return Err(TransportError::InvalidSession(session.clone()));
        }

        let mut state = self.network.state();
        if payload.len() > state.max_datagram_size {
            return Err(TransportError::DatagramTooLarge {
                size: payload.len(),
                max: state.max_datagram_size,
            });
        }

        let remote = state
            .endpoints
            .get_mut(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
        let key = (self.local.clone(), session.clone());
        if remote.open_sessions.insert(key) {
            debug!(from = %self.local, to = %peer, %session, "new incoming session");
            remote.notify(Notification::IncomingConnection {
                peer: self.local.clone(),
                session: session.clone(),
            });
        }
        let payload = Bytes::copy_from_slice(payload);
        remote
            .inboxes
            .entry(channel)
            .or_default()
            .push_back(Datagram {
                peer: self.local.clone(),
                session: session.clone(),
                payload: payload.clone(),
            });

        if let Some(local) = state.endpoints.get_mut(&self.local) {
            local.open_sessions.insert((peer.clone(), session.clone()));
        }

        trace!(from = %self.local, to = %peer, channel, size = payload.len(), "datagram sent");
        state.sent.push(SentDatagram {
            from: self.local.clone(),
            to: peer.clone(),
            session: session.clone(),
            channel,
            reliability,
            payload,
        });
        Ok(())
    }

    fn receive(&mut self, channel: u8) -> Option<Datagram> {
        self.network
            .state()
            .endpoints
            .get_mut(&self.local)?
            .inboxes
            .get_mut(&channel)?
            .pop_front()
    }

    fn accept_session(&mut self, peer: &PeerId, session: &SessionId) -> Result<()> {
        if session.is_empty() {
            return Err(TransportError::InvalidSession(session.clone()));
        }
        let mut state = self.network.state();
        let endpoint = state.endpoints.entry(self.local.clone()).or_default();
        endpoint.open_sessions.insert((peer.clone(), session.clone()));
        endpoint.accepted.insert((peer.clone(), session.clone()));
        Ok(())
    }

    fn close_session(&mut self, peer: &PeerId, session: &SessionId) -> Result<()> {
        let mut state = self.network.state();
        let key = (peer.clone(), session.clone());

        let was_open = match state.endpoints.get_mut(&self.local) {
            Some(local) => {
                local.closes.push(key.clone());
                local.accepted.remove(&key);
                for inbox in local.inboxes.values_mut() {
                    inbox.retain(|d| !(&d.peer == peer && &d.session == session));
                }
                local.open_sessions.remove(&key)
            }
            None => false,
        };

        if was_open {
            if let Some(remote) = state.endpoints.get_mut(peer) {
                let remote_key = (self.local.clone(), session.clone());
                if remote.open_sessions.remove(&remote_key) {
                    remote.notify(Notification::RemoteClosed {
                        peer: self.local.clone(),
                        session: session.clone(),
                        reason: ClosedReason::ClosedByPeer,
                    });
                }
            }
        }
        debug!(local = %self.local, %peer, %session, was_open, "session closed");
        Ok(())
    }

    fn subscribe(&mut self) -> Result<SubscriptionId> {
        let mut state = self.network.state();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        let endpoint = state.endpoints.entry(self.local.clone()).or_default();
        if endpoint.subscription.is_some() {
            return Err(TransportError::Subscribe(format!(
                "{} already has an active subscription",
                self.local
            )));
        }
        endpoint.subscription = Some(id);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(endpoint) = self.network.state().endpoints.get_mut(&self.local) {
            if endpoint.subscription == Some(id) {
                endpoint.subscription = None;
                endpoint.notifications.clear();
            }
        }
    }

    fn poll_notification(&mut self) -> Option<Notification> {
        self.network
            .state()
            .endpoints
            .get_mut(&self.local)?
            .notifications
            .pop_front()
    }
}
