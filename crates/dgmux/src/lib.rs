//! Fragmenting, connection-oriented multiplexer for peer-to-peer datagram
//! transports.
//!
//! dgmux sits on top of any transport that moves bounded datagrams between
//! peers on numbered channels, and adds what games and realtime apps need on
//! top: a small connect/accept/disconnect handshake, message fragmentation
//! with out-of-order reassembly, and numbered connections reported as events.
//!
//! # Crate Structure
//!
//! - [`transport`]: Datagram transport contract and the in-memory network
//! - [`frame`]: Fragment header codec, fragmenter and reassembly buffer
//! - [`peer`]: Server and client roles (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use dgmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dgmux_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use dgmux_peer::*;
}
