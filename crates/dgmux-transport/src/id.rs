//! Opaque identifiers handed out by the underlying transport.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remote endpoint.
///
/// dgmux never mints these itself; they come from the transport (a product
/// user id, a socket address, a test name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a transport-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Name of one transport-level session (socket) with a peer.
///
/// An empty name is never a valid session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The session name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty (invalid) session name.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_display_matches_source() {
        let peer = PeerId::from("0002aa5f");
        assert_eq!(peer.to_string(), "0002aa5f");
        assert_eq!(peer.as_str(), "0002aa5f");
    }

    #[test]
    fn default_session_is_invalid() {
        assert!(SessionId::default().is_empty());
        assert!(!SessionId::from("game").is_empty());
    }
}
