use bytes::Bytes;

use crate::codec::{Packet, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Default upper bound on fragments per message.
pub const DEFAULT_MAX_FRAGMENTS: usize = 55;

/// Source of message ids for outbound messages.
///
/// Wraps around at `u32::MAX`; ids only need to be distinct among the
/// messages in flight on one `(peer, channel)` at a time.
#[derive(Debug, Clone, Default)]
pub struct MessageIdCounter {
    next: u32,
}

impl MessageIdCounter {
    /// Counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Take the next id.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Splits outbound messages into datagram-sized packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragmenter {
    max_payload: usize,
    max_fragments: usize,
}

impl Fragmenter {
    /// Fragmenter with an explicit per-packet payload size.
    pub fn new(max_payload: usize, max_fragments: usize) -> Result<Self> {
        if max_payload == 0 {
            return Err(FrameError::DatagramTooSmall {
                size: HEADER_SIZE,
                header: HEADER_SIZE,
            });
        }
        if max_fragments == 0 {
            return Err(FrameError::ZeroFragmentBudget);
        }
        Ok(Self {
            max_payload,
            max_fragments,
        })
    }

    /// Fragmenter sized so every encoded packet fits in `max_datagram_size`.
    pub fn for_datagram_size(max_datagram_size: usize, max_fragments: usize) -> Result<Self> {
        if max_datagram_size <= HEADER_SIZE {
            return Err(FrameError::DatagramTooSmall {
                size: max_datagram_size,
                header: HEADER_SIZE,
            });
        }
        Self::new(max_datagram_size - HEADER_SIZE, max_fragments)
    }

    /// Payload bytes carried by every non-terminal packet.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Upper bound on fragments per message.
    pub fn max_fragments(&self) -> usize {
        self.max_fragments
    }

    /// Largest message that can be sent.
    pub fn max_message_size(&self) -> usize {
        self.max_payload * self.max_fragments
    }

    /// Number of packets a message of `len` bytes becomes.
    ///
    /// An empty message still takes one (empty) packet.
    pub fn fragment_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload).max(1)
    }

    /// Split `message` into packets under a fresh id taken from `ids`.
    ///
    /// The id is only consumed when the message fits the fragment budget.
    pub fn fragment(&self, ids: &mut MessageIdCounter, message: &[u8]) -> Result<Vec<Packet>> {
        let count = self.fragment_count(message.len());
        if count > self.max_fragments {
            return Err(FrameError::TooManyFragments {
                size: message.len(),
                fragments: count,
                max: self.max_fragments,
            });
        }

        let message_id = ids.next_id();
        let message = Bytes::copy_from_slice(message);

        let packets = (0..count)
            .map(|index| {
                let start = index * self.max_payload;
                let end = (start + self.max_payload).min(message.len());
                Packet {
                    message_id,
                    fragment_index: index as u32,
                    more_fragments: index + 1 < count,
                    payload: message.slice(start..end),
                }
            })
            .collect();

        Ok(packets)
    }
}
