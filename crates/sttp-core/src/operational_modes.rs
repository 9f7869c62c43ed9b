//! 32-bit operational-modes session negotiation bitfield (§3, §4.3).

use bitflags::bitflags;

/// Mask over the low 5 bits, carrying the protocol version sub-field.
const VERSION_MASK: u32 = 0x1F;

/// The only version this implementation negotiates as "no warning".
pub const CURRENT_VERSION: u32 = 1;

bitflags! {
    /// Feature bits above the low 5 version bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct ModeFlags: u32 {
        const COMPRESS_PAYLOAD_GZIP = 0x0000_0020;
        const COMPRESS_SIGNAL_INDEX_CACHE = 0x0000_0040;
        const COMPRESS_METADATA = 0x0000_0200;
        const USE_TSSC = 0x0000_0400;
        const ENCODING_UTF16_LE = 0x0000_0800;
        const ENCODING_UTF16_BE = 0x0000_1000;
        const ENCODING_UTF8 = 0x0000_2000;
        const RECEIVE_INTERNAL_METADATA = 0x0400_0000;
        const RECEIVE_EXTERNAL_METADATA = 0x0800_0000;
    }
}

/// The session-level character encoding, chosen once by
/// `DefineOperationalModes` and governing every subsequent string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// UTF-16, little-endian.
    Utf16Le,
    /// UTF-16, big-endian.
    Utf16Be,
    /// UTF-8.
    Utf8,
}

/// Negotiated operational modes for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalModes {
    bits: u32,
}

impl OperationalModes {
    /// Builds operational modes from a raw wire value.
    #[must_use]
    pub fn from_raw(bits: u32) -> Self {
        Self { bits }
    }

    /// The raw wire value.
    #[must_use]
    pub fn to_raw(self) -> u32 {
        self.bits
    }

    /// The negotiated protocol version sub-field (low 5 bits).
    #[must_use]
    pub fn version(self) -> u32 {
        self.bits & VERSION_MASK
    }

    /// Whether the version sub-field matches [`CURRENT_VERSION`]. If not,
    /// §4.3 requires only a logged warning — the session proceeds
    /// regardless.
    #[must_use]
    pub fn is_current_version(self) -> bool {
        self.version() == CURRENT_VERSION
    }

    fn flags(self) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.bits & !VERSION_MASK)
    }

    /// Whether GZip metadata compression was requested.
    #[must_use]
    pub fn compress_metadata(self) -> bool {
        self.flags().contains(ModeFlags::COMPRESS_METADATA)
    }

    /// Whether GZip payload compression was requested.
    #[must_use]
    pub fn compress_payload(self) -> bool {
        self.flags().contains(ModeFlags::COMPRESS_PAYLOAD_GZIP)
    }

    /// Whether signal-index-cache compression was requested.
    #[must_use]
    pub fn compress_signal_index_cache(self) -> bool {
        self.flags().contains(ModeFlags::COMPRESS_SIGNAL_INDEX_CACHE)
    }

    /// Whether TSSC compression was requested.
    #[must_use]
    pub fn use_tssc(self) -> bool {
        self.flags().contains(ModeFlags::USE_TSSC)
    }

    /// Whether internally sourced metadata should be included in refreshes.
    #[must_use]
    pub fn receive_internal_metadata(self) -> bool {
        self.flags().contains(ModeFlags::RECEIVE_INTERNAL_METADATA)
    }

    /// Whether externally sourced metadata should be included in refreshes.
    #[must_use]
    pub fn receive_external_metadata(self) -> bool {
        self.flags().contains(ModeFlags::RECEIVE_EXTERNAL_METADATA)
    }

    /// The negotiated string encoding. Defaults to UTF-8 if no encoding bit
    /// is set.
    #[must_use]
    pub fn encoding(self) -> StringEncoding {
        let flags = self.flags();
        if flags.contains(ModeFlags::ENCODING_UTF16_LE) {
            StringEncoding::Utf16Le
        } else if flags.contains(ModeFlags::ENCODING_UTF16_BE) {
            StringEncoding::Utf16Be
        } else {
            StringEncoding::Utf8
        }
    }
}
