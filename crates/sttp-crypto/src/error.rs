//! Cipher-layer error taxonomy.

use thiserror::Error;

/// Errors raised by the STTP payload cipher.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// Authentication tag or key mismatch during decryption.
    #[error("decryption failed: authentication check did not pass")]
    DecryptionFailed,

    /// A data packet referenced a key/IV slot (even/odd) that has never
    /// been installed.
    #[error("no active key pair installed for the requested slot")]
    NoActiveKeyPair,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CipherError>;
