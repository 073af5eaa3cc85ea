//! Channel numbering.
//!
//! Application channels are numbered `0..N` where `N` is the number of
//! configured channels. Index `N` is reserved for handshake control bytes.

/// Index of a delivery channel on the wire.
pub type ChannelIndex = u8;

/// Maximum number of application channels. One index is kept for control.
pub const MAX_CHANNELS: usize = u8::MAX as usize - 1;

/// The reserved internal channel for a configuration with `channel_count`
/// application channels.
pub fn internal_channel(channel_count: usize) -> ChannelIndex {
    debug_assert!(channel_count <= MAX_CHANNELS);
    channel_count as ChannelIndex
}

/// Returns true if `channel` addresses one of the application channels.
pub fn is_application(channel: ChannelIndex, channel_count: usize) -> bool {
    (channel as usize) < channel_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_channel_follows_application_channels() {
        assert_eq!(internal_channel(2), 2);
        assert!(is_application(1, 2));
        assert!(!is_application(internal_channel(2), 2));
    }
}
