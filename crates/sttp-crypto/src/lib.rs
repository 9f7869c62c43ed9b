//! Cipher key/IV rotation and payload encryption for the Streaming
//! Telemetry Transport Protocol.
//!
//! Two `(key, iv)` pairs, indexed even/odd, are installed and rotated
//! independently so in-flight packets encrypted under the previous pair
//! remain decryptable through a grace window (§4.8).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod cipher_table;
pub mod error;
pub mod key_pair;

pub use cipher::{decrypt, encrypt};
pub use cipher_table::{CipherKeyTable, Slot};
pub use error::{CipherError, Result};
pub use key_pair::{IV_SIZE, KEY_SIZE, KeyPair};
