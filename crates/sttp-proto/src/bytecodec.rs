//! Big-endian primitive encode/decode and RFC-4122 GUID packing.
//!
//! Every multi-byte value on the wire is big-endian regardless of host
//! byte order, including GUIDs: the 128-bit signal identifier is always
//! emitted in RFC-4122 byte order, never in the host's native `uuid`
//! memory layout.

use crate::errors::{ProtocolError, Result};

/// Encodes a `bool` as a single `0x00`/`0x01` byte.
pub fn write_bool(dst: &mut Vec<u8>, value: bool) {
    dst.push(u8::from(value));
}

/// Decodes a single boolean byte. Any non-zero byte is `true`.
pub fn read_bool(src: &[u8]) -> Result<bool> {
    Ok(read_u8(src)? != 0)
}

/// Reads a single byte.
pub fn read_u8(src: &[u8]) -> Result<u8> {
    src.first().copied().ok_or(ProtocolError::BufferUnderrun { needed: 1, available: src.len() })
}

macro_rules! be_codec {
    ($write_name:ident, $read_name:ident, $ty:ty) => {
        #[doc = concat!("Writes a big-endian `", stringify!($ty), "`.")]
        pub fn $write_name(dst: &mut Vec<u8>, value: $ty) {
            dst.extend_from_slice(&value.to_be_bytes());
        }

        #[doc = concat!("Reads a big-endian `", stringify!($ty), "` from the front of `src`.")]
        pub fn $read_name(src: &[u8]) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            if src.len() < N {
                return Err(ProtocolError::BufferUnderrun { needed: N, available: src.len() });
            }
            let mut buf = [0u8; N];
            buf.copy_from_slice(&src[..N]);
            Ok(<$ty>::from_be_bytes(buf))
        }
    };
}

be_codec!(write_i16, read_i16, i16);
be_codec!(write_u16, read_u16, u16);
be_codec!(write_i32, read_i32, i32);
be_codec!(write_u32, read_u32, u32);
be_codec!(write_i64, read_i64, i64);
be_codec!(write_u64, read_u64, u64);
be_codec!(write_f32, read_f32, f32);
be_codec!(write_f64, read_f64, f64);

/// A 128-bit decimal value in the architecture-neutral wire order
/// `{flags, high, low, mid}`, each 32-bit component big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal128 {
    /// Sign and scale flags.
    pub flags: u32,
    /// High 32 bits of the 96-bit mantissa.
    pub high: u32,
    /// Low 32 bits of the 96-bit mantissa.
    pub low: u32,
    /// Middle 32 bits of the 96-bit mantissa.
    pub mid: u32,
}

/// Writes a [`Decimal128`] in `{flags, high, low, mid}` order.
pub fn write_decimal128(dst: &mut Vec<u8>, value: Decimal128) {
    write_u32(dst, value.flags);
    write_u32(dst, value.high);
    write_u32(dst, value.low);
    write_u32(dst, value.mid);
}

/// Reads a [`Decimal128`] in `{flags, high, low, mid}` order.
pub fn read_decimal128(src: &[u8]) -> Result<Decimal128> {
    if src.len() < 16 {
        return Err(ProtocolError::BufferUnderrun { needed: 16, available: src.len() });
    }
    Ok(Decimal128 {
        flags: read_u32(&src[0..4])?,
        high: read_u32(&src[4..8])?,
        low: read_u32(&src[8..12])?,
        mid: read_u32(&src[12..16])?,
    })
}

/// Writes a 128-bit signal identifier in RFC-4122 (big-endian) byte order.
pub fn write_guid(dst: &mut Vec<u8>, guid: &uuid::Uuid) {
    dst.extend_from_slice(guid.as_bytes());
}

/// Reads a 128-bit signal identifier in RFC-4122 (big-endian) byte order.
pub fn read_guid(src: &[u8]) -> Result<uuid::Uuid> {
    if src.len() < 16 {
        return Err(ProtocolError::BufferUnderrun { needed: 16, available: src.len() });
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&src[..16]);
    Ok(uuid::Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn bool_round_trips(b in any::<bool>()) {
            let mut buf = Vec::new();
            write_bool(&mut buf, b);
            prop_assert_eq!(read_bool(&buf).unwrap(), b);
        }

        #[test]
        fn i16_round_trips(v in any::<i16>()) {
            let mut buf = Vec::new();
            write_i16(&mut buf, v);
            prop_assert_eq!(read_i16(&buf).unwrap(), v);
        }

        #[test]
        fn u16_round_trips(v in any::<u16>()) {
            let mut buf = Vec::new();
            write_u16(&mut buf, v);
            prop_assert_eq!(read_u16(&buf).unwrap(), v);
        }

        #[test]
        fn i32_round_trips(v in any::<i32>()) {
            let mut buf = Vec::new();
            write_i32(&mut buf, v);
            prop_assert_eq!(read_i32(&buf).unwrap(), v);
        }

        #[test]
        fn u32_round_trips(v in any::<u32>()) {
            let mut buf = Vec::new();
            write_u32(&mut buf, v);
            prop_assert_eq!(read_u32(&buf).unwrap(), v);
        }

        #[test]
        fn i64_round_trips(v in any::<i64>()) {
            let mut buf = Vec::new();
            write_i64(&mut buf, v);
            prop_assert_eq!(read_i64(&buf).unwrap(), v);
        }

        #[test]
        fn u64_round_trips(v in any::<u64>()) {
            let mut buf = Vec::new();
            write_u64(&mut buf, v);
            prop_assert_eq!(read_u64(&buf).unwrap(), v);
        }

        #[test]
        fn f32_round_trips(v in any::<f32>()) {
            let mut buf = Vec::new();
            write_f32(&mut buf, v);
            let decoded = read_f32(&buf).unwrap();
            prop_assert!(v.is_nan() && decoded.is_nan() || v == decoded);
        }

        #[test]
        fn f64_round_trips(v in any::<f64>()) {
            let mut buf = Vec::new();
            write_f64(&mut buf, v);
            let decoded = read_f64(&buf).unwrap();
            prop_assert!(v.is_nan() && decoded.is_nan() || v == decoded);
        }

        #[test]
        fn decimal128_round_trips(flags in any::<u32>(), high in any::<u32>(), low in any::<u32>(), mid in any::<u32>()) {
            let value = Decimal128 { flags, high, low, mid };
            let mut buf = Vec::new();
            write_decimal128(&mut buf, value);
            prop_assert_eq!(read_decimal128(&buf).unwrap(), value);
        }

        #[test]
        fn guid_round_trips(bytes in any::<[u8; 16]>()) {
            let guid = uuid::Uuid::from_bytes(bytes);
            let mut buf = Vec::new();
            write_guid(&mut buf, &guid);
            prop_assert_eq!(buf.as_slice(), guid.as_bytes());
            prop_assert_eq!(read_guid(&buf).unwrap(), guid);
        }
    }

    #[test]
    fn short_buffer_is_underrun() {
        assert_eq!(read_u32(&[0, 1]), Err(ProtocolError::BufferUnderrun { needed: 4, available: 2 }));
    }

    #[test]
    fn guid_preserves_byte_order_exactly() {
        let bytes: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let guid = uuid::Uuid::from_bytes(bytes);
        let mut buf = Vec::new();
        write_guid(&mut buf, &guid);
        assert_eq!(buf, bytes);
    }
}
