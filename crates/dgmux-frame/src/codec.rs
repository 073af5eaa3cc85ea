use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Fragment header: message id (4) + fragment index (4) + more flag (1) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// One fragment of an application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Id shared by every fragment of the same message.
    pub message_id: u32,
    /// Position of this fragment within the message, starting at 0.
    pub fragment_index: u32,
    /// False only on the last fragment of a message.
    pub more_fragments: bool,
    /// The fragment's slice of the message.
    pub payload: Bytes,
}

impl Packet {
    /// A single-fragment message.
    pub fn whole(message_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            fragment_index: 0,
            more_fragments: false,
            payload: payload.into(),
        }
    }

    /// The total wire size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_packet(self, &mut buf);
        buf.freeze()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────────┬───────────┬──────────────────┐
/// │ Message id   │ Fragment index │ More flag │ Payload          │
/// │ (4B LE)      │ (4B LE)        │ (1B, 0/1) │ (rest of datagram)│
/// └──────────────┴────────────────┴───────────┴──────────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) {
    dst.reserve(packet.wire_size());
    dst.put_u32_le(packet.message_id);
    dst.put_u32_le(packet.fragment_index);
    dst.put_u8(u8::from(packet.more_fragments));
    dst.put_slice(&packet.payload);
}

/// Decode a packet from one received datagram.
///
/// The payload is a zero-copy slice of `src`. Any non-zero flag byte is read
/// as "more fragments follow".
pub fn decode_packet(mut src: Bytes) -> Result<Packet> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::MalformedPacket {
            len: src.len(),
            min: HEADER_SIZE,
        });
    }

    let message_id = src.get_u32_le();
    let fragment_index = src.get_u32_le();
    let more_fragments = src.get_u8() != 0;

    Ok(Packet {
        message_id,
        fragment_index,
        more_fragments,
        payload: src,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = Packet {
            message_id: 0x0403_0201,
            fragment_index: 7,
            more_fragments: true,
            payload: Bytes::from_static(b"abc"),
        };

        let wire = packet.to_bytes();

        assert_eq!(
            wire.as_ref(),
            &[0x01, 0x02, 0x03, 0x04, 7, 0, 0, 0, 1, b'a', b'b', b'c']
        );
        assert_eq!(wire.len(), packet.wire_size());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let packet = Packet {
            message_id: 42,
            fragment_index: 3,
            more_fragments: false,
            payload: Bytes::from_static(b"hello, dgmux!"),
        };

        let decoded = decode_packet(packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_truncated_header() {
        let result = decode_packet(Bytes::from_static(&[1, 0, 0, 0, 0, 0, 0, 0]));
        assert!(matches!(
            result,
            Err(FrameError::MalformedPacket { len: 8, min: HEADER_SIZE })
        ));
    }

    #[test]
    fn test_decode_header_only() {
        let packet = decode_packet(Bytes::from_static(&[9, 0, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(packet.message_id, 9);
        assert!(!packet.more_fragments);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_nonzero_flag_means_more() {
        let packet = decode_packet(Bytes::from_static(&[0, 0, 0, 0, 1, 0, 0, 0, 0xFF])).unwrap();
        assert_eq!(packet.fragment_index, 1);
        assert!(packet.more_fragments);
    }

    #[test]
    fn test_empty_datagram() {
        assert!(decode_packet(Bytes::new()).is_err());
    }
}
