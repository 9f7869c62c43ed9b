//! `ChaCha20-Poly1305` AEAD encrypt/decrypt of data-packet payloads (§4.8).
//!
//! Pure functions over an already-selected [`KeyPair`] — slot selection
//! (even/odd, grace-window tolerance) is the caller's responsibility.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::{CipherError, Result};
use crate::key_pair::KeyPair;

/// Encrypts `plaintext` under `pair`'s key/IV.
#[must_use]
pub fn encrypt(pair: &KeyPair, plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(pair.cipher_key());
    let nonce = Nonce::from_slice(pair.iv());
    cipher.encrypt(nonce, plaintext).unwrap_or_else(|_| {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid fixed-size inputs")
    })
}

/// Decrypts `ciphertext` under `pair`'s key/IV.
pub fn decrypt(pair: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(pair.cipher_key());
    let nonce = Nonce::from_slice(pair.iv());
    cipher.decrypt(nonce, ciphertext).map_err(|_| CipherError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> KeyPair {
        KeyPair::new([3u8; 32], [4u8; 12])
    }

    #[test]
    fn round_trips_plaintext() {
        let encrypted = encrypt(&pair(), b"measurement payload");
        let decrypted = decrypt(&pair(), &encrypted).unwrap();
        assert_eq!(decrypted, b"measurement payload");
    }

    #[test]
    fn empty_payload_round_trips() {
        let encrypted = encrypt(&pair(), b"");
        let decrypted = decrypt(&pair(), &encrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encrypted = encrypt(&pair(), b"secret");
        let wrong = KeyPair::new([9u8; 32], [4u8; 12]);
        let err = decrypt(&wrong, &encrypted).unwrap_err();
        assert_eq!(err, CipherError::DecryptionFailed);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let mut encrypted = encrypt(&pair(), b"secret payload");
        encrypted[0] ^= 0xFF;
        assert!(decrypt(&pair(), &encrypted).is_err());
    }
}
