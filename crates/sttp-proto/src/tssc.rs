//! TSSC (Time Series Special Compression): a stateful streaming codec for
//! runs of `(signal_index, time, quality, value)` points.
//!
//! Each point carries a one-byte control word whose four 2-bit fields pick,
//! per dimension, between "unchanged from the previous point on this
//! signal", "small delta from the predictor", or "full value" — the per-
//! point predictors referenced in §4.7. This does not attempt to reproduce
//! any particular published TSSC bitstream byte-for-byte; it implements the
//! same locality-exploiting contract (stateful, per-signal prediction,
//! sequence-numbered reset semantics) against which compression ratio is not
//! a correctness property, only round-trip fidelity and sequencing are.

use std::collections::HashMap;

use crate::commands::TSSC_VERSION;
use crate::errors::{ProtocolError, Result};

/// One decoded (or to-be-encoded) TSSC point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsscPoint {
    /// Signal index within the session's signal-index cache.
    pub signal_index: i32,
    /// Tick timestamp.
    pub time: i64,
    /// State-flags word.
    pub quality: u32,
    /// Measurement value.
    pub value: f32,
}

#[derive(Debug, Clone, Copy)]
struct PointState {
    last_time: i64,
    last_time_delta: i64,
    last_quality: u32,
    last_value_bits: u32,
}

impl Default for PointState {
    fn default() -> Self {
        Self { last_time: 0, last_time_delta: 0, last_quality: 0, last_value_bits: 0 }
    }
}

const ID_SEQUENTIAL: u8 = 0;
const ID_DELTA: u8 = 1;
const ID_FULL: u8 = 2;

const TIME_SAME_DELTA: u8 = 0;
const TIME_DELTA: u8 = 1;
const TIME_FULL: u8 = 2;

const QUALITY_SAME: u8 = 0;
const QUALITY_FULL: u8 = 1;

const VALUE_SAME: u8 = 0;
const VALUE_FULL: u8 = 1;

fn control_byte(id_mode: u8, time_mode: u8, quality_mode: u8, value_mode: u8) -> u8 {
    (id_mode << 6) | (time_mode << 4) | (quality_mode << 2) | value_mode
}

fn split_control(byte: u8) -> (u8, u8, u8, u8) {
    ((byte >> 6) & 0x03, (byte >> 4) & 0x03, (byte >> 2) & 0x03, byte & 0x03)
}

/// Next TSSC sequence number after `current`, wrapping `65535 -> 1` (never
/// re-emitting `0`, which is reserved for an explicit reset).
#[must_use]
pub fn next_sequence(current: u16) -> u16 {
    if current == u16::MAX {
        1
    } else {
        current.wrapping_add(1)
    }
}

/// Stateful TSSC encoder. One instance per active subscription; reset on
/// every (re)subscribe per §4.7(d).
pub struct TsscEncoder {
    next_sequence: u16,
    last_id: i32,
    points: HashMap<i32, PointState>,
}

impl TsscEncoder {
    /// Creates a freshly reset encoder; its first packet will carry sequence
    /// `0`.
    #[must_use]
    pub fn new() -> Self {
        Self { next_sequence: 0, last_id: 0, points: HashMap::new() }
    }

    /// Discards all per-signal prediction state and rewinds to sequence `0`.
    pub fn reset(&mut self) {
        self.next_sequence = 0;
        self.last_id = 0;
        self.points.clear();
    }

    /// Encodes a run of points into one TSSC packet:
    /// `[version][sequence_no:u16 BE][body]`.
    pub fn encode_packet(&mut self, points: &[TsscPoint]) -> Vec<u8> {
        let mut body = Vec::new();
        for point in points {
            self.encode_point(&mut body, *point);
        }

        let mut out = Vec::with_capacity(body.len() + 3);
        out.push(TSSC_VERSION);
        out.extend_from_slice(&self.next_sequence.to_be_bytes());
        out.extend_from_slice(&body);

        self.next_sequence =
            if self.next_sequence == 0 { 1 } else { next_sequence(self.next_sequence) };
        out
    }

    fn encode_point(&mut self, out: &mut Vec<u8>, point: TsscPoint) {
        let state = self.points.entry(point.signal_index).or_default();

        let id_mode = if point.signal_index == self.last_id {
            ID_SEQUENTIAL
        } else if (point.signal_index - self.last_id).unsigned_abs() <= i32::from(i8::MAX as i32) {
            ID_DELTA
        } else {
            ID_FULL
        };

        let time_delta = point.time - state.last_time;
        let time_mode = if state.last_time != 0 && time_delta == state.last_time_delta {
            TIME_SAME_DELTA
        } else if zigzag_fits_i32(time_delta) {
            TIME_DELTA
        } else {
            TIME_FULL
        };

        let quality_mode = if point.quality == state.last_quality { QUALITY_SAME } else { QUALITY_FULL };

        let value_bits = point.value.to_bits();
        let value_mode = if value_bits == state.last_value_bits { VALUE_SAME } else { VALUE_FULL };

        out.push(control_byte(id_mode, time_mode, quality_mode, value_mode));

        match id_mode {
            ID_SEQUENTIAL => {},
            ID_DELTA => out.push((point.signal_index - self.last_id) as i8 as u8),
            _ => out.extend_from_slice(&point.signal_index.to_be_bytes()),
        }

        match time_mode {
            TIME_SAME_DELTA => {},
            TIME_DELTA => out.extend_from_slice(&zigzag_encode_i32(time_delta).to_be_bytes()),
            _ => out.extend_from_slice(&point.time.to_be_bytes()),
        }

        if quality_mode == QUALITY_FULL {
            out.extend_from_slice(&point.quality.to_be_bytes());
        }

        if value_mode == VALUE_FULL {
            out.extend_from_slice(&value_bits.to_be_bytes());
        }

        self.last_id = point.signal_index;
        state.last_time_delta = time_delta;
        state.last_time = point.time;
        state.last_quality = point.quality;
        state.last_value_bits = value_bits;
    }
}

impl Default for TsscEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateful TSSC decoder, mirroring [`TsscEncoder`]'s prediction state.
///
/// This type enforces only the raw per-packet sequencing rule from §4.7(a)
/// and (b): the next accepted sequence is either `n+1` (wrapping, skipping
/// `0`) or an explicit reset (`0`). The richer session-level policy —
/// tolerating a mismatch while a reset is known to be pending — is layered
/// on top in `sttp-core`, which is the only place that knows whether a
/// reset was requested.
pub struct TsscDecoder {
    expected_sequence: Option<u16>,
    last_id: i32,
    points: HashMap<i32, PointState>,
}

impl TsscDecoder {
    /// Creates a decoder that expects the next packet to carry sequence `0`.
    #[must_use]
    pub fn new() -> Self {
        Self { expected_sequence: None, last_id: 0, points: HashMap::new() }
    }

    /// Discards all per-signal prediction state; the next packet must carry
    /// sequence `0`.
    pub fn reset(&mut self) {
        self.expected_sequence = None;
        self.last_id = 0;
        self.points.clear();
    }

    /// Decodes one TSSC packet, validating the version byte and sequence
    /// number before reconstructing the point run.
    pub fn decode_packet(&mut self, bytes: &[u8]) -> Result<Vec<TsscPoint>> {
        if bytes.len() < 3 {
            return Err(ProtocolError::TsscBitstreamExhausted);
        }
        let version = bytes[0];
        if version != TSSC_VERSION {
            return Err(ProtocolError::TsscUnsupportedVersion(version));
        }
        let sequence = u16::from_be_bytes([bytes[1], bytes[2]]);

        if sequence == 0 {
            self.reset();
        } else if let Some(expected) = self.expected_sequence {
            if sequence != expected {
                return Err(ProtocolError::TsscSequenceError { expected, actual: sequence });
            }
        } else {
            return Err(ProtocolError::TsscSequenceError { expected: 0, actual: sequence });
        }

        let points = self.decode_body(&bytes[3..])?;
        self.expected_sequence = Some(next_sequence(sequence));
        Ok(points)
    }

    fn decode_body(&mut self, mut body: &[u8]) -> Result<Vec<TsscPoint>> {
        let mut out = Vec::new();
        while !body.is_empty() {
            let control = read_u8(&mut body)?;
            let (id_mode, time_mode, quality_mode, value_mode) = split_control(control);

            let signal_index = match id_mode {
                ID_SEQUENTIAL => self.last_id,
                ID_DELTA => self.last_id + i32::from(read_u8(&mut body)? as i8),
                _ => read_i32(&mut body)?,
            };

            let state = self.points.entry(signal_index).or_default();

            let time = match time_mode {
                TIME_SAME_DELTA => state.last_time + state.last_time_delta,
                TIME_DELTA => state.last_time + i64::from(zigzag_decode_i32(read_u32(&mut body)?)),
                _ => read_i64(&mut body)?,
            };
            let time_delta = time - state.last_time;

            let quality = match quality_mode {
                QUALITY_SAME => state.last_quality,
                _ => read_u32(&mut body)?,
            };

            let value_bits = match value_mode {
                VALUE_SAME => state.last_value_bits,
                _ => read_u32(&mut body)?,
            };

            state.last_time = time;
            state.last_time_delta = time_delta;
            state.last_quality = quality;
            state.last_value_bits = value_bits;
            self.last_id = signal_index;

            out.push(TsscPoint { signal_index, time, quality, value: f32::from_bits(value_bits) });
        }
        Ok(out)
    }
}

impl Default for TsscDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn zigzag_fits_i32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

fn zigzag_encode_i32(v: i64) -> u32 {
    let v = v as i32;
    ((v << 1) ^ (v >> 31)) as u32
}

fn zigzag_decode_i32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn read_u8(body: &mut &[u8]) -> Result<u8> {
    if body.is_empty() {
        return Err(ProtocolError::TsscBitstreamExhausted);
    }
    let byte = body[0];
    *body = &body[1..];
    Ok(byte)
}

fn read_u32(body: &mut &[u8]) -> Result<u32> {
    if body.len() < 4 {
        return Err(ProtocolError::TsscBitstreamExhausted);
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&body[..4]);
    *body = &body[4..];
    Ok(u32::from_be_bytes(buf))
}

fn read_i32(body: &mut &[u8]) -> Result<i32> {
    read_u32(body).map(|v| v as i32)
}

fn read_i64(body: &mut &[u8]) -> Result<i64> {
    if body.len() < 8 {
        return Err(ProtocolError::TsscBitstreamExhausted);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&body[..8]);
    *body = &body[8..];
    Ok(i64::from_be_bytes(buf))
}
