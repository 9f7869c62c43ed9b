//! Compact measurement wire codec (§4.6).
//!
//! ```text
//! [flags:u8][signal_index:u16][value:f32 or f64]
//!     [timestamp: 0 | 2 bytes (ms delta from base) | 4 bytes | 8 bytes]
//!     [state_flags:u32 present iff flag set]
//! ```
//!
//! The spec's own layout sketch leaves open whether `value` is transmitted
//! as `f32` or `f64`; this implementation resolves that with an explicit
//! flag bit (`USE_SINGLE_PRECISION`) rather than guessing a fixed width —
//! see the grounding ledger in `DESIGN.md`.

use bitflags::bitflags;
use sttp_proto::bytecodec;

use crate::base_time::BaseTimeOffsets;
use crate::error::{Result, SessionError};
use crate::measurement::{Measurement, MeasurementKey, MeasurementValue, StateFlags};
use crate::signal_index_cache::SignalIndexCacheData;
use crate::time::Tick;

bitflags! {
    /// Per-measurement flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompactMeasurementFlags: u8 {
        /// A timestamp follows the value.
        const INCLUDE_TIME = 0x01;
        /// The timestamp is encoded relative to the active base-time
        /// offset rather than as a full tick.
        const TIME_BASE_OFFSET_INDEXED = 0x02;
        /// When base-offset-indexed, use the 2-byte millisecond-resolution
        /// form instead of the 4-byte tick-offset form.
        const USE_MS_RESOLUTION = 0x04;
        /// A 32-bit state-flags word follows the timestamp.
        const HAS_STATE_FLAGS = 0x08;
        /// The value is transmitted as `f32` rather than `f64`.
        const USE_SINGLE_PRECISION = 0x10;
    }
}

/// Encodes one measurement in the compact wire format.
///
/// `base_times` is `None` when base-time offsets are not active for this
/// subscription; in that case a requested base-offset-indexed encoding
/// silently falls back to the full 8-byte tick form.
pub fn encode(
    out: &mut Vec<u8>,
    measurement: &Measurement,
    cache: &SignalIndexCacheData,
    base_times: Option<&BaseTimeOffsets>,
    include_time: bool,
    use_ms_resolution: bool,
    include_state_flags: bool,
    use_single_precision: bool,
) -> Result<()> {
    let index = cache
        .index_for_signal(measurement.key.signal_id())
        .ok_or_else(|| SessionError::CacheIndexMismatch(0))?;

    let mut flags = CompactMeasurementFlags::empty();
    if include_time {
        flags |= CompactMeasurementFlags::INCLUDE_TIME;
    }
    if include_state_flags {
        flags |= CompactMeasurementFlags::HAS_STATE_FLAGS;
    }
    if use_single_precision {
        flags |= CompactMeasurementFlags::USE_SINGLE_PRECISION;
    }
    let use_base_offset = include_time && base_times.is_some();
    if use_base_offset {
        flags |= CompactMeasurementFlags::TIME_BASE_OFFSET_INDEXED;
        if use_ms_resolution {
            flags |= CompactMeasurementFlags::USE_MS_RESOLUTION;
        }
    }

    out.push(flags.bits());
    bytecodec::write_u16(out, index);

    let value = match &measurement.value {
        MeasurementValue::Scalar(v) => *v,
        MeasurementValue::Buffer(_) => {
            return Err(SessionError::MetadataMalformed(
                "buffer-block measurements are not compact-encodable".into(),
            ));
        },
    };
    if use_single_precision {
        bytecodec::write_f32(out, value as f32);
    } else {
        bytecodec::write_f64(out, value);
    }

    if include_time {
        match (use_base_offset, use_ms_resolution) {
            (true, true) => {
                let base = base_times.expect("use_base_offset implies base_times is Some");
                let delta = base.encode_ms_delta(measurement.timestamp).unwrap_or(u16::MAX);
                bytecodec::write_u16(out, delta);
            },
            (true, false) => {
                let base = base_times.expect("use_base_offset implies base_times is Some");
                let delta = base.encode_tick_delta(measurement.timestamp).unwrap_or(0);
                bytecodec::write_i32(out, delta);
            },
            (false, _) => {
                bytecodec::write_u64(out, measurement.timestamp.to_raw());
            },
        }
    }

    if include_state_flags {
        bytecodec::write_u32(out, measurement.state_flags.bits());
    }

    Ok(())
}

/// Decodes one compact measurement from the front of `src`, returning the
/// measurement and the number of bytes consumed.
pub fn decode(
    src: &[u8],
    cache: &SignalIndexCacheData,
    base_times: Option<&BaseTimeOffsets>,
) -> Result<(Measurement, usize)> {
    let mut offset = 0usize;
    let flags = CompactMeasurementFlags::from_bits_truncate(bytecodec::read_u8(&src[offset..])?);
    offset += 1;

    let index = bytecodec::read_u16(&src[offset..])?;
    offset += 2;

    let key = cache.key_for_index(index).ok_or(SessionError::CacheIndexMismatch(index))?.clone();

    let value = if flags.contains(CompactMeasurementFlags::USE_SINGLE_PRECISION) {
        let v = bytecodec::read_f32(&src[offset..])?;
        offset += 4;
        f64::from(v)
    } else {
        let v = bytecodec::read_f64(&src[offset..])?;
        offset += 8;
        v
    };

    let timestamp = if flags.contains(CompactMeasurementFlags::INCLUDE_TIME) {
        if flags.contains(CompactMeasurementFlags::TIME_BASE_OFFSET_INDEXED) {
            let base = base_times.ok_or_else(|| {
                SessionError::MetadataMalformed("base-offset-indexed timestamp with no active base times".into())
            })?;
            if flags.contains(CompactMeasurementFlags::USE_MS_RESOLUTION) {
                let delta = bytecodec::read_u16(&src[offset..])?;
                offset += 2;
                base.decode_ms_delta(delta)
            } else {
                let delta = bytecodec::read_i32(&src[offset..])?;
                offset += 4;
                base.decode_tick_delta(delta)
            }
        } else {
            let raw = bytecodec::read_u64(&src[offset..])?;
            offset += 8;
            Tick::from_raw(raw)
        }
    } else {
        Tick::now()
    };

    let state_flags = if flags.contains(CompactMeasurementFlags::HAS_STATE_FLAGS) {
        let bits = bytecodec::read_u32(&src[offset..])?;
        offset += 4;
        StateFlags::from_bits_truncate(bits)
    } else {
        StateFlags::empty()
    };

    Ok((
        Measurement { key, timestamp, value: MeasurementValue::Scalar(value), state_flags },
        offset,
    ))
}

/// Convenience used by callers that already have a `MeasurementKey` and
/// just want to look up its installed index (e.g. when building a
/// subscription's ordered key set).
#[must_use]
pub fn index_of(cache: &SignalIndexCacheData, key: &MeasurementKey) -> Option<u16> {
    cache.index_for_signal(key.signal_id())
}
