//! Fragmentation and reassembly for datagram channels.
//!
//! This is the core value-add layer of dgmux. Every application datagram
//! carries a 9-byte header:
//! - a 4-byte little-endian message id shared by all fragments of a message
//! - a 4-byte little-endian fragment index
//! - a 1-byte more-fragments flag
//!
//! Messages larger than one datagram are split by the [`Fragmenter`] and put
//! back together by the [`ReassemblyBuffer`], whatever order the fragments
//! arrive in.

pub mod channel;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod reassembly;

pub use channel::{internal_channel, ChannelIndex, MAX_CHANNELS};
pub use codec::{decode_packet, encode_packet, Packet, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use fragment::{Fragmenter, MessageIdCounter, DEFAULT_MAX_FRAGMENTS};
pub use reassembly::{
    CompletedMessage, ReassemblyBuffer, ReassemblyConfig, DEFAULT_MAX_GROUP_AGE_TICKS,
    DEFAULT_MAX_PENDING_GROUPS,
};
