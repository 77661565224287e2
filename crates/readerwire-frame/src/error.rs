/// Errors that can occur while accumulating, decoding or encoding messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The header declares a total length shorter than the header itself.
    #[error("invalid message length {declared} (header alone is {header_len} bytes)")]
    InvalidLength { declared: usize, header_len: usize },

    /// The header carries a protocol version this codec does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The declared or encoded message exceeds the configured maximum.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// `accumulate` was called for a key that was never started.
    #[error("no accumulation in progress for this key")]
    NotStarted,

    /// The message cannot be represented on the wire.
    #[error("cannot encode message: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
