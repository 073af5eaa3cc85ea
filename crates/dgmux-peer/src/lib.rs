//! Connection-oriented multiplexing over datagram transports.
//!
//! This is the layer applications talk to. A [`Server`] admits clients with a
//! one-byte CONNECT / ACCEPT_CONNECT / DISCONNECT handshake on a reserved
//! internal channel and hands out numbered connections; a [`Client`] connects
//! to one host. Both fragment outbound messages, reassemble inbound ones in
//! any arrival order, and report everything as [`MuxEvent`]s.
//!
//! Everything is single-threaded and tick-driven: call `poll_once` regularly,
//! or enable the `async` feature and use `run_ticker`.

pub mod client;
pub mod config;
pub mod control;
#[cfg(feature = "async")]
pub mod driver;
pub mod error;
pub mod event;
pub mod handshake;
mod node;
pub mod server;
pub mod table;
pub mod teardown;

pub use client::Client;
pub use config::{GracePolicy, MuxConfig};
pub use control::ControlMessage;
#[cfg(feature = "async")]
pub use driver::{run_ticker, EventStream};
pub use error::{MuxError, Result};
pub use event::{DisconnectReason, ErrorCode, MuxEvent};
pub use handshake::{
    ClientAction, ClientHandshake, ClientState, EndedConnection, ServerAction, ServerHandshake,
};
pub use node::{MuxEndpoint, ReassemblyKey};
pub use server::Server;
pub use table::{ConnectionId, ConnectionTable};
pub use teardown::SessionTeardown;
