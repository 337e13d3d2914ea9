//! # Error Types
//!
//! Every fallible operation in the library returns [`TideError`]. The variants
//! mirror the failure classes the prediction pipeline distinguishes:
//!
//! - **Invalid input**: rejected before any astronomy runs, never clamped
//! - **Integrity / corrupt payload**: a tile that must be discarded and re-fetched
//! - **Storage capacity**: a tile that cannot fit even after LRU eviction
//! - **Transport**: network, cancellation and deadline failures, which the
//!   prediction service absorbs by falling back to harmonic synthesis
//!
//! "Not found" is deliberately absent: storage lookups return `Option`.

use std::io;
use thiserror::Error;

/// Errors that can occur while predicting tides or handling tiles.
#[derive(Error, Debug)]
pub enum TideError {
    /// Caller supplied a timestamp, coordinate or identifier we refuse to use
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Checksum of a compressed payload does not match its tile record
    #[error("integrity check failed for tile {tile_id}: expected {expected}, got {actual}")]
    Integrity {
        tile_id: String,
        expected: String,
        actual: String,
    },

    /// Payload could not be inflated or parsed back into a tile
    #[error("corrupt tile payload: {0}")]
    CorruptPayload(String),

    /// Tile does not fit in the cache even after eviction
    #[error("tile of {required} bytes exceeds storage capacity ({quota} bytes available)")]
    StorageCapacity { required: u64, quota: u64 },

    /// Operation was cancelled through a [`crate::tile_fetch::CancelToken`]
    #[error("operation cancelled")]
    Cancelled,

    /// Operation did not finish before its deadline
    #[error("operation timed out")]
    Timeout,

    /// HTTP request failed (network, server, or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persistent store I/O failed
    #[error("storage IO: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport encoding of a payload was not valid base64
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl TideError {
    /// Integrity and corrupt-payload failures are handled identically.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, TideError::Integrity { .. } | TideError::CorruptPayload(_))
    }

    /// Whether the prediction service may swallow this error and fall back to
    /// direct harmonic computation. Only bad caller input is final.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TideError::InvalidInput(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_and_corruption_are_grouped() {
        let integrity = TideError::Integrity {
            tile_id: "cell_13_100".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(integrity.is_integrity_failure());
        assert!(TideError::CorruptPayload("bad zlib header".into()).is_integrity_failure());
        assert!(!TideError::Cancelled.is_integrity_failure());
    }

    #[test]
    fn invalid_input_is_not_recoverable() {
        assert!(!TideError::InvalidInput("lat".into()).is_recoverable());
        assert!(TideError::Timeout.is_recoverable());
        assert!(TideError::Cancelled.is_recoverable());
    }

    #[test]
    fn storage_failures_are_recoverable() {
        let json = serde_json::from_str::<u32>("{ not json").unwrap_err();
        assert!(TideError::Json(json).is_recoverable());
        assert!(TideError::Io(io::Error::other("disk gone")).is_recoverable());
        assert!(TideError::StorageCapacity { required: 2, quota: 1 }.is_recoverable());
    }

    #[test]
    fn messages_name_the_tile() {
        let err = TideError::Integrity {
            tile_id: "cell_7_98".into(),
            expected: "00".into(),
            actual: "ff".into(),
        };
        assert!(err.to_string().contains("cell_7_98"));
    }
}
