//! Frame headers for the reliable command channel.
//!
//! Every message on the channel carries a fixed-size header ahead of its
//! payload: 6 bytes server-to-client, 5 bytes client-to-server. Fields are
//! stored as raw big-endian byte arrays rather than native integers so the
//! struct can be cast directly onto wire bytes with [`zerocopy`] without any
//! host-endianness surprises.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Size in bytes of a [`ResponseHeader`] (server → client).
pub const RESPONSE_HEADER_SIZE: usize = 6;

/// Size in bytes of a [`CommandHeader`] (client → server).
pub const COMMAND_HEADER_SIZE: usize = 5;

/// Header prefixing every server-to-client message: `[resp][cmd][len:i32 BE]`.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ResponseHeader {
    response_code: u8,
    in_response_to: u8,
    payload_len: [u8; 4],
}

impl ResponseHeader {
    /// Builds a header for a response of `payload_len` bytes.
    #[must_use]
    pub fn new(response_code: u8, in_response_to: u8, payload_len: u32) -> Self {
        Self { response_code, in_response_to, payload_len: payload_len.to_be_bytes() }
    }

    /// The response code byte.
    #[must_use]
    pub fn response_code(&self) -> u8 {
        self.response_code
    }

    /// The command byte this response answers (or `0xFF` for unsolicited
    /// notifications such as `DataPacket`).
    #[must_use]
    pub fn in_response_to(&self) -> u8 {
        self.in_response_to
    }

    /// Declared payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        u32::from_be_bytes(self.payload_len)
    }

    /// Parses a header from exactly [`RESPONSE_HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RESPONSE_HEADER_SIZE {
            return Err(ProtocolError::BufferUnderrun {
                needed: RESPONSE_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Self::read_from_bytes(&bytes[..RESPONSE_HEADER_SIZE]).map_err(|_| ProtocolError::BufferUnderrun {
            needed: RESPONSE_HEADER_SIZE,
            available: bytes.len(),
        })
    }

    /// Serializes the header to exactly [`RESPONSE_HEADER_SIZE`] bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut out = [0u8; RESPONSE_HEADER_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

/// Header prefixing every client-to-server message: `[cmd][len:i32 BE]`.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct CommandHeader {
    command_code: u8,
    payload_len: [u8; 4],
}

impl CommandHeader {
    /// Builds a header for a command of `payload_len` bytes.
    #[must_use]
    pub fn new(command_code: u8, payload_len: u32) -> Self {
        Self { command_code, payload_len: payload_len.to_be_bytes() }
    }

    /// The command code byte.
    #[must_use]
    pub fn command_code(&self) -> u8 {
        self.command_code
    }

    /// Declared payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        u32::from_be_bytes(self.payload_len)
    }

    /// Parses a header from exactly [`COMMAND_HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMMAND_HEADER_SIZE {
            return Err(ProtocolError::BufferUnderrun {
                needed: COMMAND_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Self::read_from_bytes(&bytes[..COMMAND_HEADER_SIZE]).map_err(|_| ProtocolError::BufferUnderrun {
            needed: COMMAND_HEADER_SIZE,
            available: bytes.len(),
        })
    }

    /// Serializes the header to exactly [`COMMAND_HEADER_SIZE`] bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; COMMAND_HEADER_SIZE] {
        let mut out = [0u8; COMMAND_HEADER_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn response_header_round_trips(resp in any::<u8>(), cmd in any::<u8>(), len in any::<u32>()) {
            let header = ResponseHeader::new(resp, cmd, len);
            let bytes = header.to_bytes();
            let parsed = ResponseHeader::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed.response_code(), resp);
            prop_assert_eq!(parsed.in_response_to(), cmd);
            prop_assert_eq!(parsed.payload_len(), len);
        }

        #[test]
        fn command_header_round_trips(cmd in any::<u8>(), len in any::<u32>()) {
            let header = CommandHeader::new(cmd, len);
            let bytes = header.to_bytes();
            let parsed = CommandHeader::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed.command_code(), cmd);
            prop_assert_eq!(parsed.payload_len(), len);
        }
    }

    #[test]
    fn response_header_rejects_short_buffer() {
        let err = ResponseHeader::from_bytes(&[0x80, 0x02]).unwrap_err();
        assert_eq!(err, ProtocolError::BufferUnderrun { needed: RESPONSE_HEADER_SIZE, available: 2 });
    }

    #[test]
    fn command_header_rejects_short_buffer() {
        let err = CommandHeader::from_bytes(&[0x02]).unwrap_err();
        assert_eq!(err, ProtocolError::BufferUnderrun { needed: COMMAND_HEADER_SIZE, available: 1 });
    }

    #[test]
    fn response_header_big_endian_length() {
        let header = ResponseHeader::new(0x82, 0x02, 0x0102_0304);
        assert_eq!(header.to_bytes(), [0x82, 0x02, 0x01, 0x02, 0x03, 0x04]);
    }
}
