//! Error types for cwb-ring
//!
//! Per-block problems (bad encodings, corrupt payloads, rate changes) are
//! absorbed by the span and never show up here. Only conditions a caller must
//! act on are errors.

use thiserror::Error;

/// Errors surfaced by a [`QueryRing`](crate::QueryRing)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RingError {
    /// The backing source never produced covering data within the retry budget
    #[error("data unavailable for {channel} after {attempts} attempts")]
    Unavailable {
        /// Channel that was being fetched
        channel: String,
        /// Number of fetch iterations performed
        attempts: u32,
    },

    /// The request spans more time than the ring can hold ahead of its pre-roll
    #[error("requested {requested_ms} ms but requests must be shorter than {capacity_ms} ms")]
    WindowTooLong {
        /// Length of the requested window
        requested_ms: i64,
        /// Ring length minus pre-roll; requests must be strictly shorter
        capacity_ms: i64,
    },

    /// The ring configuration is unusable
    #[error("invalid ring configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RingError::Unavailable {
            channel: "USDUG  BHZ00".to_string(),
            attempts: 120,
        };
        assert_eq!(
            err.to_string(),
            "data unavailable for USDUG  BHZ00 after 120 attempts"
        );

        let err = RingError::InvalidConfig("duration must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "invalid ring configuration: duration must be positive"
        );
    }
}
