use std::fmt;

/// Control message carried on the internal channel.
///
/// Wire format: exactly one byte.
/// ```text
/// ┌────────────────────┐
/// │ 0 CONNECT          │
/// │ 1 ACCEPT_CONNECT   │
/// │ 2 DISCONNECT       │
/// └────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMessage {
    /// Client asks to be admitted.
    Connect = 0,
    /// Server admitted the client.
    AcceptConnect = 1,
    /// Either side ends the connection, or the server rejects a CONNECT.
    Disconnect = 2,
}

impl ControlMessage {
    /// Map a control byte. Unknown values return `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ControlMessage::Connect),
            1 => Some(ControlMessage::AcceptConnect),
            2 => Some(ControlMessage::Disconnect),
            _ => None,
        }
    }

    /// Wire byte for this message.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a whole internal-channel datagram.
    ///
    /// Anything other than a single known byte is rejected.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match payload {
            [byte] => Self::from_byte(*byte),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlMessage::Connect => "CONNECT",
            ControlMessage::AcceptConnect => "ACCEPT_CONNECT",
            ControlMessage::Disconnect => "DISCONNECT",
        };
        f.write_str(name)
    }
}
