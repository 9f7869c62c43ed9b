//! Wire-level error taxonomy.

use thiserror::Error;

/// Errors raised while encoding or decoding wire primitives, frames, or the
/// TSSC bitstream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame header declared more payload bytes than were actually
    /// available when the caller asked for a full decode.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the header promised.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The declared payload length exceeds the configured sanity cap.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: u32,
        /// Configured cap.
        max: u32,
    },

    /// A command byte did not map to any known `CommandCode`.
    #[error("unknown command code {0:#04x}")]
    UnknownCommand(u8),

    /// A response byte did not map to any known `ResponseCode`.
    #[error("unknown response code {0:#04x}")]
    UnknownResponse(u8),

    /// A GUID field was the wrong length or otherwise malformed.
    #[error("invalid GUID encoding")]
    InvalidGuid,

    /// A string field could not be decoded under the negotiated encoding.
    #[error("invalid string encoding")]
    InvalidEncoding,

    /// A compact-measurement timestamp field used an unrecognized width.
    #[error("invalid timestamp width {0} in compact measurement flags")]
    InvalidTimestampWidth(u8),

    /// Decoding a byte slice too short for the value being read.
    #[error("buffer underrun: need {needed} bytes, have {available}")]
    BufferUnderrun {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// TSSC decoder observed a sequence number that was neither the
    /// expected successor nor a reset (`0`).
    #[error("TSSC sequence error: expected {expected}, got {actual}")]
    TsscSequenceError {
        /// Sequence the decoder expected next.
        expected: u16,
        /// Sequence actually observed.
        actual: u16,
    },

    /// TSSC stream carried an unsupported version byte.
    #[error("unsupported TSSC version byte {0:#04x}")]
    TsscUnsupportedVersion(u8),

    /// TSSC compressed bitstream ended before a value could be fully
    /// decoded.
    #[error("TSSC bitstream exhausted")]
    TsscBitstreamExhausted,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
