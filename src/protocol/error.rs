//! Error types for the wire protocol.

use std::io;

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// A frame announced a length over the configured limit.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Announced frame length.
        length: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A frame contained no tag byte.
    #[error("empty frame")]
    EmptyFrame,

    /// The tag byte does not name a message.
    #[error("unknown message tag: {tag}")]
    UnknownTag {
        /// The tag that was read.
        tag: u8,
    },

    /// The payload ended before the message was complete.
    #[error("truncated {message} at offset {offset}")]
    Truncated {
        /// Message being decoded.
        message: &'static str,
        /// Offset where more bytes were expected.
        offset: usize,
    },

    /// The payload was longer than the message it encodes.
    #[error("{count} trailing bytes after {message}")]
    TrailingBytes {
        /// Message that was decoded.
        message: &'static str,
        /// Number of unread bytes.
        count: usize,
    },

    /// A field held an invalid value.
    #[error("invalid {field} in {message}: {reason}")]
    InvalidField {
        /// Message being decoded or encoded.
        message: &'static str,
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(
        message: &'static str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            message,
            field,
            reason: reason.into(),
        }
    }

    /// Whether the error is a clean end of stream between frames.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownTag { tag: 200 };
        assert_eq!(err.to_string(), "unknown message tag: 200");
    }

    #[test]
    fn eof_detection() {
        let err = ProtocolError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_eof());
        assert!(!ProtocolError::EmptyFrame.is_eof());
    }
}
