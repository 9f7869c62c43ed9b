//! 64-bit tick timestamps: 100-nanosecond intervals since `0001-01-01 UTC`,
//! with leap-second flag bits in the top two bits of the word.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One tick is 100 nanoseconds.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Ticks between `0001-01-01 00:00:00 UTC` and the Unix epoch
/// (`1970-01-01 00:00:00 UTC`).
pub const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

/// Bit 63: this timestamp marks a leap second (second 60).
const LEAP_SECOND_BIT: u64 = 1 << 63;
/// Bit 62: leap second direction (set = negative/deleted leap second).
const LEAP_SECOND_DIRECTION_BIT: u64 = 1 << 62;
/// Mask covering the 62 value bits.
const VALUE_MASK: u64 = !(LEAP_SECOND_BIT | LEAP_SECOND_DIRECTION_BIT);

/// A 64-bit STTP tick timestamp.
///
/// Bits 1–62 hold the 100-ns interval count since `0001-01-01 UTC`; bit 63
/// marks a leap second; bit 62 marks negative leap direction. The direction
/// bit is only meaningful when the leap-second bit is set — constructing a
/// [`Tick`] through [`Tick::new`] enforces that invariant by ignoring the
/// direction bit unless the leap flag is also passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u64);

impl Tick {
    /// Builds a tick from a raw 100-ns value and optional leap-second
    /// flags. `value` must fit in 62 bits; higher bits are masked off.
    #[must_use]
    pub fn new(value: u64, leap_second: bool, negative_leap: bool) -> Self {
        let mut bits = value & VALUE_MASK;
        if leap_second {
            bits |= LEAP_SECOND_BIT;
            if negative_leap {
                bits |= LEAP_SECOND_DIRECTION_BIT;
            }
        }
        Self(bits)
    }

    /// Wraps a raw wire value verbatim (used when decoding from the wire,
    /// where the flag bits are already packed in).
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit wire value.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// The 100-ns interval count, with flag bits masked off.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0 & VALUE_MASK
    }

    /// Whether this timestamp marks a leap second.
    #[must_use]
    pub fn is_leap_second(self) -> bool {
        self.0 & LEAP_SECOND_BIT != 0
    }

    /// Whether the leap second is negative (deleted). Only meaningful when
    /// [`Tick::is_leap_second`] is `true`.
    #[must_use]
    pub fn is_negative_leap(self) -> bool {
        self.0 & LEAP_SECOND_DIRECTION_BIT != 0
    }

    /// Converts to a Unix timestamp, discarding leap-second flag bits.
    #[must_use]
    pub fn to_unix_nanos(self) -> i64 {
        let ticks = self.value() as i64 - UNIX_EPOCH_TICKS as i64;
        ticks * 100
    }

    /// Builds a tick from a Unix nanosecond timestamp (no leap-second
    /// flags set).
    #[must_use]
    pub fn from_unix_nanos(nanos: i64) -> Self {
        let ticks = (nanos / 100) + UNIX_EPOCH_TICKS as i64;
        Self::new(ticks as u64, false, false)
    }

    /// Builds a tick from the system wall clock (no leap-second flags set).
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self::from_unix_nanos(since_epoch.as_nanos() as i64)
    }

    /// Adds a millisecond delta, used when applying base-time offsets.
    #[must_use]
    pub fn checked_add_millis(self, millis: u64) -> Option<Self> {
        self.value().checked_add(millis.checked_mul(10_000)?).map(|v| Self::new(v, false, false))
    }

    /// Subtracts another tick's value in whole milliseconds, truncating
    /// sub-millisecond precision, per §4.6's ms-resolution rounding rule.
    #[must_use]
    pub fn saturating_sub_millis(self, base: Tick) -> u64 {
        self.value().saturating_sub(base.value()) / 10_000
    }
}
