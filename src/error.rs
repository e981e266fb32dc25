//! Error types for decoding and mapping operations.
//!
//! This module provides the [`MarcError`] type for framing, decoding and
//! mapping-table failures, and the [`Result`] convenience type. Errors raised
//! by the concurrent mapper live in [`crate::mapper::MapperError`].

use thiserror::Error;

/// Error type for decoder and mapping-table operations.
///
/// Framing errors (`InvalidLeader`, `InvalidDirectory`, `InvalidField`,
/// `TruncatedRecord`) are raised by the ISO 2709 reader when fatal errors are
/// enabled; otherwise they are logged and the offending record is skipped.
#[derive(Error, Debug)]
pub enum MarcError {
    /// The 24-byte record label could not be parsed.
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// A directory entry is malformed or points outside the data block.
    #[error("Invalid directory: {0}")]
    InvalidDirectory(String),

    /// A field's content does not match its directory entry.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// The stream ended before the declared record length was reached.
    #[error("Truncated record: {0}")]
    TruncatedRecord(String),

    /// Field data could not be decoded with the configured encoding.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// A mapping table is structurally invalid.
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// A mapping table or configuration document is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MarcError {
    /// Returns true for errors caused by the shape of a record rather than
    /// by the underlying stream.
    #[must_use]
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            MarcError::InvalidLeader(_)
                | MarcError::InvalidDirectory(_)
                | MarcError::InvalidField(_)
                | MarcError::TruncatedRecord(_)
        )
    }
}

/// Convenience type alias for [`std::result::Result`] with [`MarcError`].
pub type Result<T> = std::result::Result<T, MarcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MarcError::InvalidDirectory("entry 3 exceeds data area".to_string());
        assert_eq!(err.to_string(), "Invalid directory: entry 3 exceeds data area");
    }

    #[test]
    fn test_framing_classification() {
        assert!(MarcError::TruncatedRecord("x".to_string()).is_framing_error());
        assert!(MarcError::InvalidLeader("x".to_string()).is_framing_error());
        assert!(!MarcError::InvalidMapping("x".to_string()).is_framing_error());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!MarcError::from(io).is_framing_error());
    }
}
