//! Server-level error taxonomy, aggregating the session/codec/cipher layers
//! plus I/O and TLS failures (§7, §10.2).

use thiserror::Error;

/// Errors that can occur in the publisher runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid bind address, missing TLS cert/key, or other startup
    /// misconfiguration. Fatal — fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or certificate-loading failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Transport-layer failure not otherwise covered by [`ServerError::Io`]
    /// (bind failure, accept-loop shutdown, stream-direction misuse).
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire-level codec or framing error.
    #[error(transparent)]
    Protocol(#[from] sttp_proto::ProtocolError),

    /// Session state-machine error.
    #[error(transparent)]
    Session(#[from] sttp_core::SessionError),

    /// Cipher-layer error.
    #[error(transparent)]
    Cipher(#[from] sttp_crypto::CipherError),
}
