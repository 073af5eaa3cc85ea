use std::fmt;

use dgmux_frame::FrameError;
use dgmux_peer::MuxError;
use dgmux_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::DatagramTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::TooManyFragments { .. }
        | FrameError::MalformedPacket { .. }
        | FrameError::FragmentIndexOutOfRange { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::DatagramTooSmall { .. } | FrameError::ZeroFragmentBudget => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::InvalidConfig(_) | MuxError::Json(_) => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        MuxError::UnknownChannel { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        MuxError::NotConnected | MuxError::UnknownConnection(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_message_is_data_error() {
        let err = MuxError::Frame(FrameError::TooManyFragments {
            size: 100,
            fragments: 20,
            max: 10,
        });
        assert_eq!(mux_error("send", err).code, DATA_INVALID);
    }

    #[test]
    fn test_bad_config_maps_to_config_code() {
        let err = mux_error("config", MuxError::InvalidConfig("no channels".into()));
        assert_eq!(err.code, CONFIG_INVALID);
        assert_eq!(err.to_string(), "config: invalid configuration: no channels");
    }
}
