//! A single symmetric key/IV pair (§3, §4.8).

use chacha20poly1305::Key;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key and nonce size for `ChaCha20-Poly1305`, in bytes.
pub const KEY_SIZE: usize = 32;
/// IV (nonce) size for `ChaCha20-Poly1305`, in bytes.
pub const IV_SIZE: usize = 12;

/// One symmetric key plus its associated IV. Zeroized on drop so a rotated-
/// out pair does not linger in process memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl KeyPair {
    /// Builds a key pair from raw bytes.
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// The key, as the `chacha20poly1305` crate's key type.
    #[must_use]
    pub fn cipher_key(&self) -> &Key {
        Key::from_slice(&self.key)
    }

    /// The 12-byte IV/nonce.
    #[must_use]
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("key", &"<redacted>").field("iv", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_key_matches_constructed_bytes() {
        let key = [7u8; KEY_SIZE];
        let iv = [9u8; IV_SIZE];
        let pair = KeyPair::new(key, iv);
        assert_eq!(pair.cipher_key().as_slice(), &key);
        assert_eq!(pair.iv(), &iv);
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let pair = KeyPair::new([1u8; KEY_SIZE], [2u8; IV_SIZE]);
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains('1'));
    }
}
