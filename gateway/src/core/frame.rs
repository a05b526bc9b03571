//! Shared decode errors for inbound JSON frames.

use thiserror::Error;

/// Largest text frame accepted from either side of the bridge.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Why an inbound frame could not be decoded.
///
/// Decode errors are local to one frame: the relay logs the error and moves
/// on to the next frame.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("frame of {size} bytes exceeds {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

impl FrameDecodeError {
    /// Reject frames above [`MAX_FRAME_BYTES`] before parsing.
    pub fn check_size(text: &str) -> Result<(), FrameDecodeError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(FrameDecodeError::TooLarge {
                size: text.len(),
                max: MAX_FRAME_BYTES,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_check() {
        assert!(FrameDecodeError::check_size("{}").is_ok());
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(matches!(
            FrameDecodeError::check_size(&big),
            Err(FrameDecodeError::TooLarge { .. })
        ));
    }
}
