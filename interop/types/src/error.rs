/*!
    Error type shared by every crate in the pipeline.
*/

use thiserror::Error;

/**
    Errors produced while decoding, converting or handing off frames.
*/
#[derive(Debug, Error)]
pub enum Error {
    /// A packet was submitted while the decoder still held unconsumed input or output.
    #[error("decoder ordering violation: {0}")]
    Ordering(String),

    /// The decoder rejected a packet or failed irrecoverably.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A scaler, image buffer or pool could not be set up.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("frame pool exhausted ({limit} chunks outstanding)")]
    PoolExhausted { limit: usize },

    #[error("chunk size mismatch: pool hands out {expected} bytes, {actual} requested")]
    SizeMismatch { expected: usize, actual: usize },

    /// Pixel conversion failed for a single frame.
    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("native buffer length cannot be changed")]
    FixedLength,

    #[error("stream is closed")]
    Closed,
}

impl Error {
    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::Ordering(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /**
        Returns true if the stream cannot continue after this error.

        Per-frame failures (conversion, pool exhaustion in the hot path,
        malformed frame data) leave the pipeline usable; the caller may keep
        pulling samples.
    */
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Conversion(_)
            | Self::PoolExhausted { .. }
            | Self::SizeMismatch { .. }
            | Self::InvalidData(_) => false,
            Self::Ordering(_)
            | Self::Decode(_)
            | Self::Resource(_)
            | Self::UnsupportedFormat(_)
            | Self::InvalidState(_)
            | Self::FixedLength
            | Self::Closed => true,
        }
    }
}

/**
    Result alias used across the pipeline.
*/
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_errors_are_not_fatal() {
        assert!(!Error::conversion("scaler").is_fatal());
        assert!(!Error::PoolExhausted { limit: 4 }.is_fatal());
        assert!(Error::ordering("pending input").is_fatal());
        assert!(Error::decode("bad bitstream").is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::SizeMismatch {
            expected: 100,
            actual: 96,
        };
        assert_eq!(
            err.to_string(),
            "chunk size mismatch: pool hands out 100 bytes, 96 requested"
        );
    }
}
