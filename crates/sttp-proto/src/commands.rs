//! Command/response wire codes and protocol-level constants.

use bitflags::bitflags;

use crate::errors::ProtocolError;

/// Default TCP port for the command channel.
pub const DEFAULT_COMMAND_PORT: u16 = 6165;

/// Maximum data-packet size before software fragmentation.
pub const MAX_DATA_PACKET_SIZE: usize = 32_767;

/// Default cipher-rotation period in milliseconds.
pub const DEFAULT_CIPHER_ROTATION_MS: u64 = 60_000;

/// Minimum cipher-rotation period in milliseconds.
pub const MIN_CIPHER_ROTATION_MS: u64 = 1_000;

/// Default data-loss watchdog interval, in seconds.
pub const DEFAULT_DATA_LOSS_INTERVAL_SECS: f64 = 10.0;

/// Default count of allowed parsing exceptions within the window below.
pub const DEFAULT_PARSE_EXCEPTION_THRESHOLD: u32 = 10;

/// Sliding window, in seconds, over which parsing exceptions are counted.
pub const PARSE_EXCEPTION_WINDOW_SECS: f64 = 5.0;

/// TSSC stream version byte.
pub const TSSC_VERSION: u8 = 0x55;

/// Legacy "Payload-Aware" framing marker. Recognized for documentation and
/// interop-constant parity only; see the open question in the design notes —
/// no encoder in this crate emits it and no decoder path is built around it.
pub const LEGACY_PAYLOAD_AWARE_MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

/// Commands sent client → server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandCode {
    /// No-op under the `None` transport mode; satisfied by the TLS
    /// handshake under mutual-TLS transport (see design notes §9).
    Authenticate,
    /// Request a metadata snapshot, optionally with filter expressions.
    MetadataRefresh,
    /// Subscribe to a set of signals.
    Subscribe,
    /// Tear down the active subscription.
    Unsubscribe,
    /// Ask the publisher to rotate cipher keys immediately.
    RotateCipherKeys,
    /// Change the processing interval for historical replay.
    UpdateProcessingInterval,
    /// First message on a new session; negotiates operational modes.
    DefineOperationalModes,
    /// Acknowledge a `Notify` response.
    ConfirmNotification,
    /// Acknowledge a `BufferBlock` response by sequence number.
    ConfirmBufferBlock,
    /// Publish measurements upstream on the command channel.
    PublishCommandMeasurements,
    /// Reserved user-defined commands `0xD0..=0xDF`.
    UserCommand(u8),
}

impl CommandCode {
    /// Converts to the wire byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            CommandCode::Authenticate => 0x00,
            CommandCode::MetadataRefresh => 0x01,
            CommandCode::Subscribe => 0x02,
            CommandCode::Unsubscribe => 0x03,
            CommandCode::RotateCipherKeys => 0x04,
            CommandCode::UpdateProcessingInterval => 0x05,
            CommandCode::DefineOperationalModes => 0x06,
            CommandCode::ConfirmNotification => 0x07,
            CommandCode::ConfirmBufferBlock => 0x08,
            CommandCode::PublishCommandMeasurements => 0x09,
            CommandCode::UserCommand(n) => 0xD0 + n,
        }
    }

    /// Parses from the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Ok(match byte {
            0x00 => CommandCode::Authenticate,
            0x01 => CommandCode::MetadataRefresh,
            0x02 => CommandCode::Subscribe,
            0x03 => CommandCode::Unsubscribe,
            0x04 => CommandCode::RotateCipherKeys,
            0x05 => CommandCode::UpdateProcessingInterval,
            0x06 => CommandCode::DefineOperationalModes,
            0x07 => CommandCode::ConfirmNotification,
            0x08 => CommandCode::ConfirmBufferBlock,
            0x09 => CommandCode::PublishCommandMeasurements,
            0xD0..=0xDF => CommandCode::UserCommand(byte - 0xD0),
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

/// Responses sent server → client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResponseCode {
    /// The referenced command completed successfully.
    Succeeded,
    /// The referenced command failed.
    Failed,
    /// Unsolicited measurement payload.
    DataPacket,
    /// Replace the client's signal-index cache.
    UpdateSignalIndexCache,
    /// Replace the client's base-time offset pair.
    UpdateBaseTimes,
    /// Replace (or introduce) a cipher key/IV pair.
    UpdateCipherKeys,
    /// Informational marker of the first measurement timestamp published.
    DataStartTime,
    /// Historical replay has completed.
    ProcessingComplete,
    /// A sequence-numbered reliable buffer block.
    BufferBlock,
    /// Out-of-band notification requiring client acknowledgement.
    Notify,
    /// The publisher's configuration changed; clients should refresh
    /// metadata.
    ConfigurationChanged,
    /// Reserved user-defined responses `0xE0..=0xEF`.
    UserResponse(u8),
    /// Keep-alive with no semantic payload.
    NoOp,
}

impl ResponseCode {
    /// Converts to the wire byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            ResponseCode::Succeeded => 0x80,
            ResponseCode::Failed => 0x81,
            ResponseCode::DataPacket => 0x82,
            ResponseCode::UpdateSignalIndexCache => 0x83,
            ResponseCode::UpdateBaseTimes => 0x84,
            ResponseCode::UpdateCipherKeys => 0x85,
            ResponseCode::DataStartTime => 0x86,
            ResponseCode::ProcessingComplete => 0x87,
            ResponseCode::BufferBlock => 0x88,
            ResponseCode::Notify => 0x89,
            ResponseCode::ConfigurationChanged => 0x8A,
            ResponseCode::UserResponse(n) => 0xE0 + n,
            ResponseCode::NoOp => 0xFF,
        }
    }

    /// Parses from the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Ok(match byte {
            0x80 => ResponseCode::Succeeded,
            0x81 => ResponseCode::Failed,
            0x82 => ResponseCode::DataPacket,
            0x83 => ResponseCode::UpdateSignalIndexCache,
            0x84 => ResponseCode::UpdateBaseTimes,
            0x85 => ResponseCode::UpdateCipherKeys,
            0x86 => ResponseCode::DataStartTime,
            0x87 => ResponseCode::ProcessingComplete,
            0x88 => ResponseCode::BufferBlock,
            0x89 => ResponseCode::Notify,
            0x8A => ResponseCode::ConfigurationChanged,
            0xE0..=0xEF => ResponseCode::UserResponse(byte - 0xE0),
            0xFF => ResponseCode::NoOp,
            other => return Err(ProtocolError::UnknownResponse(other)),
        })
    }
}

bitflags! {
    /// Packet-level flags carried by every `DataPacket` response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataPacketFlags: u8 {
        /// Measurements carry timestamps synchronized to a common clock.
        const SYNCHRONIZED = 0x01;
        /// Measurements use the compact wire format (§4.6) rather than the
        /// full format.
        const COMPACT = 0x02;
        /// Selects the odd cipher key/IV pair; clear selects even.
        const CIPHER_INDEX = 0x04;
        /// Payload is TSSC-compressed (§4.7).
        const COMPRESSED = 0x08;
        /// Compressed payload uses little-endian internal encoding.
        const LITTLE_ENDIAN_COMPRESSION = 0x10;
    }
}
