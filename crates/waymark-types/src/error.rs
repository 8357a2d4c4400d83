//! Error types for waymark-types.

use thiserror::Error;

/// Errors raised when decoding stored or wire-level scalar values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// App mode value outside the 0..=2 range.
    #[error("Unknown app mode: {0}")]
    UnknownAppMode(u8),

    /// Send status value outside the known range.
    #[error("Unknown send status: {0}")]
    UnknownSendStatus(i64),

    /// Log type value outside the known range.
    #[error("Unknown log type: {0}")]
    UnknownLogType(u8),
}
