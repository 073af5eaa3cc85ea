//! Peer-addressed datagram transport abstraction.
//!
//! This is the lowest layer of dgmux. It describes the contract dgmux needs
//! from an underlying peer-to-peer session library:
//! - discrete datagrams bounded by [`DatagramTransport::max_datagram_size`]
//! - per-channel, non-blocking receive
//! - session accept/close plus connection notifications
//!
//! [`MemoryNetwork`] is a complete in-process implementation used by tests,
//! demos and the CLI simulator.

pub mod error;
pub mod id;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use id::{PeerId, SessionId};
pub use memory::{MemoryNetwork, MemoryTransport, SentDatagram, DEFAULT_MAX_DATAGRAM_SIZE};
pub use traits::{
    ClosedReason, Datagram, DatagramTransport, Notification, Reliability, SubscriptionId,
};
