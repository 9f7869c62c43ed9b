//! Base-time offset pairs used to shrink compact-measurement timestamps
//! (§3, §4.6).

use crate::time::Tick;

/// A pair of tick offsets plus the currently active selector.
///
/// Compact measurements subtract `offsets[active_index]` before
/// transmission and the receiver adds it back on receipt. The active index
/// travels in packet-level flags, not per-measurement, so both sides must
/// agree on it out of band via `UpdateBaseTimes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseTimeOffsets {
    offsets: [Tick; 2],
    active_index: u8,
}

impl BaseTimeOffsets {
    /// Builds an offset pair with index `0` active.
    #[must_use]
    pub fn new(first: Tick, second: Tick) -> Self {
        Self { offsets: [first, second], active_index: 0 }
    }

    /// The currently active offset.
    #[must_use]
    pub fn active(&self) -> Tick {
        self.offsets[usize::from(self.active_index)]
    }

    /// The active selector (`0` or `1`).
    #[must_use]
    pub fn active_index(&self) -> u8 {
        self.active_index
    }

    /// Both offsets, in `[first, second]` order, for `UpdateBaseTimes`
    /// serialization.
    #[must_use]
    pub fn offsets(&self) -> [Tick; 2] {
        self.offsets
    }

    /// Installs a new offset in the *inactive* slot and flips the selector.
    ///
    /// This is the only way base times change once established — see the
    /// open-question resolution in the design notes: base times are never
    /// silently re-derived on a timer, only via this explicit call.
    pub fn rotate(&mut self, new_offset: Tick) {
        let inactive = 1 - self.active_index;
        self.offsets[usize::from(inactive)] = new_offset;
        self.active_index = inactive;
    }

    /// Encodes `timestamp` relative to the active base time as a 16-bit
    /// millisecond delta, or `None` if it does not fit in `[0, 65535]` ms.
    #[must_use]
    pub fn encode_ms_delta(&self, timestamp: Tick) -> Option<u16> {
        let delta_ms = timestamp.saturating_sub_millis(self.active());
        u16::try_from(delta_ms).ok()
    }

    /// Decodes a 16-bit millisecond delta back into a full tick timestamp.
    #[must_use]
    pub fn decode_ms_delta(&self, delta_ms: u16) -> Tick {
        self.active().checked_add_millis(u64::from(delta_ms)).unwrap_or(self.active())
    }

    /// Encodes `timestamp` relative to the active base time as a 32-bit
    /// tick delta, or `None` if it overflows.
    #[must_use]
    pub fn encode_tick_delta(&self, timestamp: Tick) -> Option<i32> {
        let delta = timestamp.value() as i64 - self.active().value() as i64;
        i32::try_from(delta).ok()
    }

    /// Decodes a 32-bit tick delta back into a full tick timestamp.
    #[must_use]
    pub fn decode_tick_delta(&self, delta: i32) -> Tick {
        let value = (self.active().value() as i64 + i64::from(delta)).max(0);
        Tick::new(value as u64, false, false)
    }
}
