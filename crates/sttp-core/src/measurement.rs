//! Measurement keys, the process-wide intern table, and measurement values.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;
use uuid::Uuid;

bitflags! {
    /// 32-bit state-flags bitfield. Layout is part of the wire contract
    /// (§3) — bit positions must never be renumbered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u32 {
        /// Value failed a quality check.
        const DATA_RANGE_BAD = 0x0000_0001;
        /// Value is suspect but not yet confirmed bad.
        const DATA_RANGE_SUSPECT = 0x0000_0002;
        /// Value fell outside its configured range.
        const OUT_OF_RANGE = 0x0000_0004;
        /// Value is in an alarm condition.
        const ALARM = 0x0000_0008;
        /// Value has not changed across a flat-line detection window.
        const FLATLINE = 0x0000_0010;
        /// Rate-of-change exceeded its configured limit.
        const ROC_EXCEEDED = 0x0000_0020;
        /// Timestamp failed a quality check.
        const TIME_RANGE_BAD = 0x0000_0100;
        /// Timestamp is suspect.
        const TIME_RANGE_SUSPECT = 0x0000_0200;
        /// Timestamp arrived later than its configured lag tolerance.
        const LATE_TIME = 0x0000_0400;
        /// Timestamp is ahead of local clock beyond tolerance.
        const FUTURE_TIME = 0x0000_0800;
        /// Sampling rate exceeded the expected rate.
        const UP_SAMPLED = 0x0000_1000;
        /// Sampling rate fell below the expected rate.
        const DOWN_SAMPLED = 0x0000_2000;
        /// Value should be discarded by downstream consumers.
        const DISCARDED = 0x0000_4000;
        /// Reserved for user-defined quality semantics.
        const USER_DEFINED = 0x0010_0000;
        /// A non-fatal system warning applies to this sample.
        const SYSTEM_WARNING = 0x4000_0000;
        /// A system error applies to this sample.
        const SYSTEM_ERROR = 0x8000_0000;
    }
}

/// Immutable metadata attached to an interned [`MeasurementKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMetadata {
    /// Human-readable tag (point name).
    pub tag: String,
    /// Additive calibration constant.
    pub adder: f64,
    /// Multiplicative calibration constant.
    pub multiplier: f64,
}

impl Default for KeyMetadata {
    fn default() -> Self {
        Self { tag: String::new(), adder: 0.0, multiplier: 1.0 }
    }
}

/// Process-wide interned measurement identity: `(signal_id, source,
/// numeric_id)`.
///
/// Two keys are equal iff they were produced by the same intern-table entry
/// — comparisons are by identity (`Arc` pointer equality on the metadata
/// slot plus the immutable id triple), matching the "each signal_id maps to
/// at most one live key" invariant in §3.
#[derive(Debug, Clone)]
pub struct MeasurementKey {
    signal_id: Uuid,
    source: Arc<str>,
    numeric_id: u64,
    metadata: Arc<RwLock<Arc<KeyMetadata>>>,
}

impl MeasurementKey {
    /// The signal's globally unique identifier.
    #[must_use]
    pub fn signal_id(&self) -> Uuid {
        self.signal_id
    }

    /// The originating source/device acronym.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The source-scoped numeric point id.
    #[must_use]
    pub fn numeric_id(&self) -> u64 {
        self.numeric_id
    }

    /// A snapshot of the key's current metadata.
    #[must_use]
    pub fn metadata(&self) -> Arc<KeyMetadata> {
        // Lock poisoning here would indicate a panic while holding the
        // write lock in `update_metadata`; there is no recognized code
        // path that panics there, so the caller can trust this succeeds.
        Arc::clone(&self.metadata.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Atomically swaps in new metadata for this key.
    pub fn update_metadata(&self, metadata: KeyMetadata) {
        let mut slot = self.metadata.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(metadata);
    }
}

impl PartialEq for MeasurementKey {
    fn eq(&self, other: &Self) -> bool {
        self.signal_id == other.signal_id
            && self.source == other.source
            && self.numeric_id == other.numeric_id
    }
}
impl Eq for MeasurementKey {}

/// The `("__", u64::MAX)` sentinel identity denoting "undefined".
#[must_use]
pub fn undefined_source() -> &'static str {
    "__"
}

/// Process-wide intern table mapping `signal_id` and `(source, numeric_id)`
/// to a single live [`MeasurementKey`].
///
/// Lookups take a read lock (effectively lock-free under read contention);
/// only `get_or_intern` for a genuinely new key takes the write lock, per
/// the "single lock on write; lookups are lock-free" design note in §9.
pub struct InternTable {
    inner: RwLock<InternTableInner>,
}

struct InternTableInner {
    by_signal_id: HashMap<Uuid, MeasurementKey>,
    by_source_numeric: HashMap<(Arc<str>, u64), MeasurementKey>,
}

impl InternTable {
    /// Creates an empty intern table with the "Undefined" sentinel
    /// pre-installed.
    #[must_use]
    pub fn new() -> Self {
        let table = Self {
            inner: RwLock::new(InternTableInner {
                by_signal_id: HashMap::new(),
                by_source_numeric: HashMap::new(),
            }),
        };
        table.get_or_intern(Uuid::nil(), undefined_source(), u64::MAX);
        table
    }

    /// Looks up an existing key by signal id.
    #[must_use]
    pub fn lookup_by_signal_id(&self, signal_id: Uuid) -> Option<MeasurementKey> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).by_signal_id.get(&signal_id).cloned()
    }

    /// Looks up an existing key by `(source, numeric_id)`.
    #[must_use]
    pub fn lookup_by_source_numeric(&self, source: &str, numeric_id: u64) -> Option<MeasurementKey> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_source_numeric
            .get(&(Arc::from(source), numeric_id))
            .cloned()
    }

    /// Returns the existing key for `signal_id`, creating one (with default
    /// metadata) if none exists yet.
    pub fn get_or_intern(&self, signal_id: Uuid, source: &str, numeric_id: u64) -> MeasurementKey {
        if let Some(existing) = self.lookup_by_signal_id(signal_id) {
            return existing;
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.by_signal_id.get(&signal_id) {
            return existing.clone();
        }

        let source: Arc<str> = Arc::from(source);
        let key = MeasurementKey {
            signal_id,
            source: Arc::clone(&source),
            numeric_id,
            metadata: Arc::new(RwLock::new(Arc::new(KeyMetadata::default()))),
        };
        inner.by_signal_id.insert(signal_id, key.clone());
        inner.by_source_numeric.insert((source, numeric_id), key.clone());
        key
    }

    /// Number of interned keys (including the "Undefined" sentinel).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).by_signal_id.len()
    }

    /// Whether only the sentinel key is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Either a scalar sample or an opaque reliable byte payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementValue {
    /// A scalar floating-point sample.
    Scalar(f64),
    /// An opaque buffer-block payload (§4.9).
    Buffer(bytes::Bytes),
}

/// One measurement sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// The interned identity of the measured quantity.
    pub key: MeasurementKey,
    /// Sample timestamp.
    pub timestamp: crate::time::Tick,
    /// Sample value.
    pub value: MeasurementValue,
    /// Quality/state flags.
    pub state_flags: StateFlags,
}

impl Measurement {
    /// The adjusted value (`value * multiplier + adder`), or `None` for
    /// buffer-block measurements.
    #[must_use]
    pub fn adjusted_value(&self) -> Option<f64> {
        match &self.value {
            MeasurementValue::Scalar(raw) => {
                let metadata = self.key.metadata();
                Some(raw * metadata.multiplier + metadata.adder)
            },
            MeasurementValue::Buffer(_) => None,
        }
    }
}
