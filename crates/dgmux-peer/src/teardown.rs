use std::collections::HashSet;

use dgmux_frame::ReassemblyBuffer;
use dgmux_transport::{DatagramTransport, PeerId, SessionId};
use tracing::{debug, error, warn};

use crate::node::ReassemblyKey;

/// Closes transport sessions at most once and defers closes by one tick.
///
/// Session names that have been closed are remembered for the life of the
/// node so late connection requests on them can be refused.
#[derive(Debug, Default)]
pub struct SessionTeardown {
    dead: HashSet<SessionId>,
    deferred: Vec<(PeerId, SessionId)>,
}

impl SessionTeardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `session` has already been closed.
    pub fn is_dead(&self, session: &SessionId) -> bool {
        self.dead.contains(session)
    }

    /// Whether `session` is closed or has a close queued.
    pub fn is_closing(&self, session: &SessionId) -> bool {
        self.is_dead(session) || self.deferred.iter().any(|(_, s)| s == session)
    }

    /// Close `session` with `peer` now.
    ///
    /// Empty and already-closed session names are ignored. Returns true when
    /// a close was issued. Reassembly state for this session is dropped
    /// whenever a close is issued, even if the transport reports a failure.
    /// The peer's other sessions keep theirs.
    pub fn close<T: DatagramTransport>(
        &mut self,
        transport: &mut T,
        reassembly: &mut ReassemblyBuffer<ReassemblyKey>,
        peer: &PeerId,
        session: &SessionId,
    ) -> bool {
        if session.is_empty() {
            warn!(%peer, "refusing to close a session with an empty name");
            return false;
        }
        if !self.dead.insert(session.clone()) {
            debug!(%peer, %session, "session already closed");
            return false;
        }

        let dropped = reassembly.discard_matching(|(p, s, _)| p == peer && s == session);
        if let Err(err) = transport.close_session(peer, session) {
            error!(%peer, %session, error = %err, "transport failed to close session");
        } else {
            debug!(%peer, %session, dropped, "session closed");
        }
        true
    }

    /// Queue a close for the start of the next tick.
    pub fn defer(&mut self, peer: PeerId, session: SessionId) {
        debug!(%peer, %session, "session close deferred");
        self.deferred.push((peer, session));
    }

    /// Take every close queued so far. Closes queued after this call wait
    /// for the next one.
    pub fn take_deferred(&mut self) -> Vec<(PeerId, SessionId)> {
        std::mem::take(&mut self.deferred)
    }

    /// Number of queued closes.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dgmux_frame::Packet;
    use dgmux_transport::MemoryNetwork;

    fn setup() -> (
        MemoryNetwork,
        dgmux_transport::MemoryTransport,
        ReassemblyBuffer<ReassemblyKey>,
    ) {
        let net = MemoryNetwork::new();
        let local = net.endpoint("server");
        net.endpoint("client");
        (net, local, ReassemblyBuffer::default())
    }

    #[test]
    fn test_close_is_idempotent() {
        let (net, mut transport, mut reassembly) = setup();
        let mut teardown = SessionTeardown::new();
        let peer = PeerId::from("client");
        let session = SessionId::from("s1");

        assert!(teardown.close(&mut transport, &mut reassembly, &peer, &session));
        assert!(!teardown.close(&mut transport, &mut reassembly, &peer, &session));

        assert_eq!(net.closes(&PeerId::from("server")).len(), 1);
        assert!(teardown.is_dead(&session));
    }

    #[test]
    fn test_empty_session_rejected() {
        let (net, mut transport, mut reassembly) = setup();
        let mut teardown = SessionTeardown::new();

        let closed = teardown.close(
            &mut transport,
            &mut reassembly,
            &PeerId::from("client"),
            &SessionId::default(),
        );

        assert!(!closed);
        assert!(net.closes(&PeerId::from("server")).is_empty());
    }

    #[test]
    fn test_close_discards_only_that_session() {
        let (_net, mut transport, mut reassembly) = setup();
        let mut teardown = SessionTeardown::new();
        let peer = PeerId::from("client");
        let old = SessionId::from("s1");
        let live = SessionId::from("s2");
        let partial = Packet {
            message_id: 1,
            fragment_index: 0,
            more_fragments: true,
            payload: Bytes::from_static(b"x"),
        };
        for key in [
            (peer.clone(), old.clone(), 0),
            (peer.clone(), live.clone(), 0),
            (PeerId::from("other"), old.clone(), 0),
        ] {
            reassembly.insert(key, partial.clone()).unwrap();
        }

        teardown.close(&mut transport, &mut reassembly, &peer, &old);

        assert_eq!(reassembly.pending_for(&(peer.clone(), old, 0)), 0);
        assert_eq!(reassembly.pending_for(&(peer, live, 0)), 1);
        assert_eq!(reassembly.pending_groups(), 2);
    }

    #[test]
    fn test_deferred_queue_is_taken_once() {
        let mut teardown = SessionTeardown::new();
        let session = SessionId::from("s");
        teardown.defer(PeerId::from("a"), session.clone());

        assert!(teardown.is_closing(&session));
        assert!(!teardown.is_dead(&session));
        assert_eq!(teardown.pending(), 1);

        let batch = teardown.take_deferred();
        assert_eq!(batch.len(), 1);
        assert!(teardown.take_deferred().is_empty());
        assert!(!teardown.is_closing(&session));
    }
}
