//! Out-of-order reassembly of fragmented messages.
//!
//! Fragments are grouped per key (in dgmux: `(peer, channel)`) and per
//! message id. Each group keeps its packets sorted by fragment index, so a
//! group is complete exactly when its indices are `0..=t` with no gaps and
//! packet `t` carries `more_fragments = false`.
//!
//! Groups that never complete are bounded two ways: at most
//! `max_pending_groups` per key (the oldest is evicted first), and an
//! optional age limit counted in [`ReassemblyBuffer::tick`] calls.

use std::collections::HashMap;
use std::hash::Hash;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::codec::Packet;
use crate::error::{FrameError, Result};
use crate::fragment::DEFAULT_MAX_FRAGMENTS;

/// Default bound on incomplete groups per key.
pub const DEFAULT_MAX_PENDING_GROUPS: usize = 64;

/// Default age limit for incomplete groups, in ticks.
pub const DEFAULT_MAX_GROUP_AGE_TICKS: u64 = 600;

/// Retention limits for the reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Fragments with an index at or above this are rejected.
    pub max_fragments: usize,
    /// Incomplete groups kept per key before the oldest is evicted.
    pub max_pending_groups: usize,
    /// Ticks an incomplete group may wait before eviction. `None` keeps
    /// groups until they complete or their key is discarded.
    pub max_group_age_ticks: Option<u64>,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            max_pending_groups: DEFAULT_MAX_PENDING_GROUPS,
            max_group_age_ticks: Some(DEFAULT_MAX_GROUP_AGE_TICKS),
        }
    }
}

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage<K> {
    /// The key the fragments arrived under.
    pub key: K,
    /// Id shared by the message's fragments.
    pub message_id: u32,
    /// Fragment payloads concatenated in index order.
    pub payload: Bytes,
}

#[derive(Debug)]
struct FragmentGroup {
    message_id: u32,
    packets: Vec<Packet>,
    opened_at: u64,
}

impl FragmentGroup {
    fn new(message_id: u32, opened_at: u64) -> Self {
        Self {
            message_id,
            packets: Vec::new(),
            opened_at,
        }
    }

    /// Insert keeping index order. Returns false for a duplicate index.
    fn insert(&mut self, packet: Packet) -> bool {
        match self
            .packets
            .binary_search_by_key(&packet.fragment_index, |p| p.fragment_index)
        {
            Ok(_) => false,
            Err(pos) => {
                self.packets.insert(pos, packet);
                true
            }
        }
    }

    fn is_complete(&self) -> bool {
        let Some(last) = self.packets.last() else {
            return false;
        };
        !last.more_fragments
            && self
                .packets
                .iter()
                .enumerate()
                .all(|(i, p)| p.fragment_index as usize == i)
    }

    fn into_payload(mut self) -> Bytes {
        if self.packets.len() == 1 {
            return self.packets.pop().map(|p| p.payload).unwrap_or_default();
        }
        let total = self.packets.iter().map(|p| p.payload.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for packet in &self.packets {
            out.extend_from_slice(&packet.payload);
        }
        out.freeze()
    }
}

/// Per-key collection of in-flight fragment groups.
#[derive(Debug)]
pub struct ReassemblyBuffer<K> {
    groups: HashMap<K, Vec<FragmentGroup>>,
    config: ReassemblyConfig,
    now: u64,
}

impl<K: Eq + Hash + Clone> Default for ReassemblyBuffer<K> {
    fn default() -> Self {
        Self::new(ReassemblyConfig::default())
    }
}

impl<K: Eq + Hash + Clone> ReassemblyBuffer<K> {
    /// Create an empty buffer.
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            groups: HashMap::new(),
            config,
            now: 0,
        }
    }

    /// Current retention configuration.
    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    /// Add one packet. Returns the message it completes, if any.
    ///
    /// Packets may arrive in any order and messages with different ids may
    /// interleave freely. A duplicate fragment index keeps the first arrival.
    pub fn insert(&mut self, key: K, packet: Packet) -> Result<Option<CompletedMessage<K>>> {
        if packet.fragment_index as usize >= self.config.max_fragments {
            return Err(FrameError::FragmentIndexOutOfRange {
                index: packet.fragment_index,
                max: self.config.max_fragments,
            });
        }

        let message_id = packet.message_id;
        let groups = self.groups.entry(key.clone()).or_default();

        let pos = match groups.iter().position(|g| g.message_id == message_id) {
            Some(pos) => pos,
            None => {
                if groups.len() >= self.config.max_pending_groups.max(1) {
                    let evicted = groups.remove(0);
                    warn!(
                        message_id = evicted.message_id,
                        fragments = evicted.packets.len(),
                        "pending group limit reached, evicting oldest incomplete message"
                    );
                }
                groups.push(FragmentGroup::new(message_id, self.now));
                groups.len() - 1
            }
        };

        let group = &mut groups[pos];
        if !group.insert(packet) {
            trace!(message_id, "duplicate fragment ignored");
            return Ok(None);
        }
        if !group.is_complete() {
            return Ok(None);
        }

        let group = groups.remove(pos);
        if groups.is_empty() {
            self.groups.remove(&key);
        }

        Ok(Some(CompletedMessage {
            key,
            message_id,
            payload: group.into_payload(),
        }))
    }

    /// Advance the age clock by one and evict groups past the age limit.
    ///
    /// Returns the number of evicted groups.
    pub fn tick(&mut self) -> usize {
        self.now += 1;
        let Some(max_age) = self.config.max_group_age_ticks else {
            return 0;
        };

        let now = self.now;
        let mut evicted = 0;
        self.groups.retain(|_, groups| {
            let before = groups.len();
            groups.retain(|g| now.saturating_sub(g.opened_at) <= max_age);
            evicted += before - groups.len();
            !groups.is_empty()
        });
        if evicted > 0 {
            warn!(evicted, max_age, "evicted stale incomplete messages");
        }
        evicted
    }

    /// Drop every key matching `predicate` together with its groups.
    ///
    /// Returns the number of incomplete groups dropped.
    pub fn discard_matching(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut dropped = 0;
        self.groups.retain(|key, groups| {
            if predicate(key) {
                dropped += groups.len();
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Incomplete groups across all keys.
    pub fn pending_groups(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Incomplete groups under one key.
    pub fn pending_for(&self, key: &K) -> usize {
        self.groups.get(key).map_or(0, Vec::len)
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop all pending state.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragmenter, MessageIdCounter};

    type Key = (&'static str, u8);

    fn packets(payload: &[u8], max_payload: usize, ids: &mut MessageIdCounter) -> Vec<Packet> {
        Fragmenter::new(max_payload, 64)
            .unwrap()
            .fragment(ids, payload)
            .unwrap()
    }

    fn feed(
        buf: &mut ReassemblyBuffer<Key>,
        key: Key,
        packets: &[Packet],
        order: &[usize],
    ) -> Vec<CompletedMessage<Key>> {
        order
            .iter()
            .filter_map(|&i| buf.insert(key, packets[i].clone()).unwrap())
            .collect()
    }

    #[test]
    fn in_order_completion() {
        let mut buf = ReassemblyBuffer::default();
        let mut ids = MessageIdCounter::new();
        let pkts = packets(b"abcdefgh", 3, &mut ids);

        let done = feed(&mut buf, ("a", 0), &pkts, &[0, 1, 2]);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].payload.as_ref(), b"abcdefgh");
        assert_eq!(done[0].key, ("a", 0));
        assert!(buf.is_empty());
    }

    #[test]
    fn out_of_order_matches_in_order() {
        let mut ids = MessageIdCounter::new();
        let pkts = packets(b"abcdefgh", 3, &mut ids);

        let mut a = ReassemblyBuffer::default();
        let mut b = ReassemblyBuffer::default();
        let in_order = feed(&mut a, ("p", 1), &pkts, &[0, 1, 2]);
        let shuffled = feed(&mut b, ("p", 1), &pkts, &[2, 0, 1]);

        assert_eq!(in_order, shuffled);
    }

    #[test]
    fn incomplete_group_stays_pending() {
        let mut buf = ReassemblyBuffer::default();
        let mut ids = MessageIdCounter::new();
        let pkts = packets(b"abcdefgh", 3, &mut ids);

        assert!(feed(&mut buf, ("a", 0), &pkts, &[2, 0]).is_empty());
        assert_eq!(buf.pending_for(&("a", 0)), 1);

        let done = feed(&mut buf, ("a", 0), &pkts, &[1]);
        assert_eq!(done[0].payload.as_ref(), b"abcdefgh");
    }

    #[test]
    fn interleaved_messages_complete_independently() {
        let mut buf = ReassemblyBuffer::default();
        let mut ids = MessageIdCounter::new();
        let first = packets(b"111111", 2, &mut ids);
        let second = packets(b"2222", 2, &mut ids);
        let key = ("a", 0);

        assert!(buf.insert(key, first[0].clone()).unwrap().is_none());
        assert!(buf.insert(key, second[1].clone()).unwrap().is_none());
        assert!(buf.insert(key, first[2].clone()).unwrap().is_none());
        let done = buf.insert(key, second[0].clone()).unwrap().unwrap();
        assert_eq!(done.payload.as_ref(), b"2222");
        assert_eq!(buf.pending_for(&key), 1);

        let done = buf.insert(key, first[1].clone()).unwrap().unwrap();
        assert_eq!(done.payload.as_ref(), b"111111");
        assert!(buf.is_empty());
    }

    #[test]
    fn same_id_on_different_keys_is_separate() {
        let mut buf = ReassemblyBuffer::default();
        let pkts = packets(b"abcd", 2, &mut MessageIdCounter::new());

        assert!(buf.insert(("a", 0), pkts[0].clone()).unwrap().is_none());
        assert!(buf.insert(("a", 1), pkts[1].clone()).unwrap().is_none());
        assert!(buf.insert(("b", 0), pkts[1].clone()).unwrap().is_none());
        assert_eq!(buf.pending_groups(), 3);
    }

    #[test]
    fn duplicate_fragment_keeps_first_arrival() {
        let mut buf = ReassemblyBuffer::default();
        let key = ("a", 0);
        let first = Packet {
            message_id: 1,
            fragment_index: 0,
            more_fragments: true,
            payload: Bytes::from_static(b"ab"),
        };
        let dup = Packet {
            payload: Bytes::from_static(b"XX"),
            ..first.clone()
        };
        let last = Packet {
            message_id: 1,
            fragment_index: 1,
            more_fragments: false,
            payload: Bytes::from_static(b"cd"),
        };

        assert!(buf.insert(key, first).unwrap().is_none());
        assert!(buf.insert(key, dup).unwrap().is_none());
        let done = buf.insert(key, last).unwrap().unwrap();
        assert_eq!(done.payload.as_ref(), b"abcd");
    }

    #[test]
    fn terminal_flag_required() {
        let mut buf = ReassemblyBuffer::default();
        let open = Packet {
            message_id: 5,
            fragment_index: 0,
            more_fragments: true,
            payload: Bytes::from_static(b"x"),
        };
        assert!(buf.insert(("a", 0), open).unwrap().is_none());
        assert_eq!(buf.pending_groups(), 1);
    }

    #[test]
    fn rejects_index_beyond_budget() {
        let mut buf: ReassemblyBuffer<Key> = ReassemblyBuffer::new(ReassemblyConfig {
            max_fragments: 4,
            ..ReassemblyConfig::default()
        });
        let packet = Packet {
            message_id: 0,
            fragment_index: 4,
            more_fragments: false,
            payload: Bytes::new(),
        };
        assert!(matches!(
            buf.insert(("a", 0), packet),
            Err(FrameError::FragmentIndexOutOfRange { index: 4, max: 4 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn pending_limit_evicts_oldest() {
        let mut buf: ReassemblyBuffer<Key> = ReassemblyBuffer::new(ReassemblyConfig {
            max_pending_groups: 2,
            ..ReassemblyConfig::default()
        });
        let key = ("a", 0);
        for id in 0..3 {
            let packet = Packet {
                message_id: id,
                fragment_index: 0,
                more_fragments: true,
                payload: Bytes::from_static(b"x"),
            };
            assert!(buf.insert(key, packet).unwrap().is_none());
        }
        assert_eq!(buf.pending_for(&key), 2);

        // Message 0 was evicted, so its terminal fragment opens a new group.
        let tail = Packet {
            message_id: 0,
            fragment_index: 1,
            more_fragments: false,
            payload: Bytes::from_static(b"y"),
        };
        assert!(buf.insert(key, tail).unwrap().is_none());
    }

    #[test]
    fn tick_evicts_stale_groups() {
        let mut buf: ReassemblyBuffer<Key> = ReassemblyBuffer::new(ReassemblyConfig {
            max_group_age_ticks: Some(2),
            ..ReassemblyConfig::default()
        });
        let open = Packet {
            message_id: 1,
            fragment_index: 0,
            more_fragments: true,
            payload: Bytes::from_static(b"x"),
        };
        buf.insert(("a", 0), open).unwrap();

        assert_eq!(buf.tick(), 0);
        assert_eq!(buf.tick(), 0);
        assert_eq!(buf.tick(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn no_age_limit_keeps_groups() {
        let mut buf: ReassemblyBuffer<Key> = ReassemblyBuffer::new(ReassemblyConfig {
            max_group_age_ticks: None,
            ..ReassemblyConfig::default()
        });
        let open = Packet {
            message_id: 1,
            fragment_index: 0,
            more_fragments: true,
            payload: Bytes::from_static(b"x"),
        };
        buf.insert(("a", 0), open).unwrap();
        for _ in 0..10_000 {
            buf.tick();
        }
        assert_eq!(buf.pending_groups(), 1);
    }

    #[test]
    fn discard_matching_drops_peer_state() {
        let mut buf = ReassemblyBuffer::default();
        let pkts = packets(b"abcd", 2, &mut MessageIdCounter::new());
        buf.insert(("a", 0), pkts[0].clone()).unwrap();
        buf.insert(("a", 1), pkts[0].clone()).unwrap();
        buf.insert(("b", 0), pkts[0].clone()).unwrap();

        assert_eq!(buf.discard_matching(|(peer, _)| *peer == "a"), 2);
        assert_eq!(buf.pending_groups(), 1);

        // A late fragment for "a" starts over instead of completing.
        assert!(buf.insert(("a", 0), pkts[1].clone()).unwrap().is_none());
    }
}
