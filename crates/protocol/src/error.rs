//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Transport delivered no bytes at all
    #[error("Empty report")]
    Empty,

    /// Recognized report tag but fewer bytes than the report layout needs
    #[error("Truncated report with tag {tag:#04x}: needed {needed} bytes, got {available}")]
    Truncated {
        tag: u8,
        needed: usize,
        available: usize,
    },

    /// Buffer is not exactly one report long
    #[error("Invalid report length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Truncated {
            tag: 0x09,
            needed: 8,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Truncated report"));
        assert!(msg.contains("0x09"));
        assert!(msg.contains("needed 8"));
        assert!(msg.contains("got 3"));
    }

    #[test]
    fn test_invalid_length_error() {
        let err = ProtocolError::InvalidLength {
            expected: 8,
            actual: 64,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected 8"));
        assert!(msg.contains("got 64"));
    }
}
