/// Errors that can occur while fragmenting, encoding or reassembling.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The datagram is shorter than the fixed fragment header.
    #[error("malformed packet ({len} bytes, header needs {min})")]
    MalformedPacket { len: usize, min: usize },

    /// The message would need more fragments than the configured maximum.
    #[error("message of {size} bytes needs {fragments} fragments (max {max})")]
    TooManyFragments {
        size: usize,
        fragments: usize,
        max: usize,
    },

    /// A received fragment claims an index beyond the configured maximum.
    #[error("fragment index {index} out of range (max {max} fragments)")]
    FragmentIndexOutOfRange { index: u32, max: usize },

    /// The datagram size leaves no room for payload after the header.
    #[error("datagram size {size} too small (must exceed {header} header bytes)")]
    DatagramTooSmall { size: usize, header: usize },

    /// A fragmenter was configured with a zero fragment budget.
    #[error("max fragments must be at least 1")]
    ZeroFragmentBudget,
}

pub type Result<T> = std::result::Result<T, FrameError>;
