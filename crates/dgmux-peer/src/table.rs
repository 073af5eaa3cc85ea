use std::collections::HashMap;
use std::fmt;

use dgmux_transport::{PeerId, SessionId};
use serde::{Deserialize, Serialize};

/// Numeric handle for an established connection.
///
/// Assigned from 1 upwards and never reused by the table that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Wrap a raw id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bidirectional `PeerId <-> ConnectionId` map with the session each peer
/// connected over.
///
/// The forward and inverse maps only change together through
/// [`insert`](Self::insert) and [`remove_peer`](Self::remove_peer).
#[derive(Debug)]
pub struct ConnectionTable {
    by_peer: HashMap<PeerId, ConnectionId>,
    by_connection: HashMap<ConnectionId, PeerId>,
    sessions: HashMap<PeerId, SessionId>,
    next_id: u32,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            by_peer: HashMap::new(),
            by_connection: HashMap::new(),
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Take the next id without inserting anything.
    ///
    /// Used when an event must name a connection that was never admitted.
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Admit `peer`, returning its id.
    ///
    /// An already-present peer keeps its id; only the session is refreshed.
    pub fn insert(&mut self, peer: PeerId, session: SessionId) -> ConnectionId {
        if let Some(&existing) = self.by_peer.get(&peer) {
            self.sessions.insert(peer, session);
            return existing;
        }
        let id = self.allocate_id();
        self.by_connection.insert(id, peer.clone());
        self.sessions.insert(peer.clone(), session);
        self.by_peer.insert(peer, id);
        id
    }

    /// Remove `peer`, returning its id and session.
    pub fn remove_peer(&mut self, peer: &PeerId) -> Option<(ConnectionId, SessionId)> {
        let id = self.by_peer.remove(peer)?;
        self.by_connection.remove(&id);
        let session = self.sessions.remove(peer).unwrap_or_default();
        Some((id, session))
    }

    /// Remove by connection id, returning the peer and its session.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<(PeerId, SessionId)> {
        let peer = self.by_connection.get(&id)?.clone();
        let (_, session) = self.remove_peer(&peer)?;
        Some((peer, session))
    }

    pub fn connection_of(&self, peer: &PeerId) -> Option<ConnectionId> {
        self.by_peer.get(peer).copied()
    }

    pub fn peer_of(&self, id: ConnectionId) -> Option<&PeerId> {
        self.by_connection.get(&id)
    }

    pub fn session_of(&self, peer: &PeerId) -> Option<&SessionId> {
        self.sessions.get(peer)
    }

    pub fn contains_peer(&self, peer: &PeerId) -> bool {
        self.by_peer.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }

    /// Connection ids in ascending order.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.by_connection.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every entry. Ids already issued are still never reused.
    pub fn clear(&mut self) {
        self.by_peer.clear();
        self.by_connection.clear();
        self.sessions.clear();
    }
}
