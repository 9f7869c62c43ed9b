//! Session-level error taxonomy, layered over [`sttp_proto::ProtocolError`].

use thiserror::Error;

/// Errors raised by the publisher/subscriber session state machines.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// A wire-level codec or framing error.
    #[error(transparent)]
    Protocol(#[from] sttp_proto::ProtocolError),

    /// A command arrived in a state that does not accept it.
    #[error("invalid state {state}: cannot handle {operation}")]
    InvalidState {
        /// Name of the current state.
        state: &'static str,
        /// Name of the operation that was attempted.
        operation: &'static str,
    },

    /// A compact measurement or base-time update referenced before a
    /// signal-index cache was installed.
    #[error("signal-index cache not installed for this subscription")]
    CacheNotInstalled,

    /// Subscribe was rejected by policy (unknown keys, disallowed source,
    /// etc.).
    #[error("subscription denied: {0}")]
    SubscriptionDenied(String),

    /// The metadata tabular set could not be parsed or built.
    #[error("metadata malformed: {0}")]
    MetadataMalformed(String),

    /// The signal-index cache referenced an index that is not installed.
    #[error("signal-index cache mismatch: index {0} not present")]
    CacheIndexMismatch(u16),

    /// TSSC reported an out-of-sequence stream with no pending reset.
    #[error("TSSC stream desynchronized with no pending reset")]
    TsscDesynchronized,

    /// Cipher-layer failure (decrypt failure, no active key pair).
    #[error(transparent)]
    Cipher(#[from] sttp_crypto::CipherError),
}

impl SessionError {
    /// Classifies this error per §4.11/§7: transient errors should be
    /// retried/resubscribed by the caller; fatal errors must be surfaced.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(sttp_proto::ProtocolError::TsscSequenceError { .. })
                | SessionError::MetadataMalformed(_)
        )
    }
}

/// Convenience alias used throughout session code.
pub type Result<T> = std::result::Result<T, SessionError>;
