//! Bijection between runtime 16-bit signal indices and measurement keys,
//! installed atomically (§3, §5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use uuid::Uuid;

use crate::measurement::MeasurementKey;

/// An immutable signal-index cache snapshot.
///
/// Indices are dense but not required to be consecutive; index `0` is a
/// valid index. Once built, a `SignalIndexCacheData` is never mutated —
/// updates build a new instance and install it via
/// [`SignalIndexCache::install`].
#[derive(Debug, Default)]
pub struct SignalIndexCacheData {
    index_to_key: HashMap<u16, MeasurementKey>,
    key_to_index: HashMap<Uuid, u16>,
    authorized: HashSet<Uuid>,
    unauthorized: HashSet<Uuid>,
}

impl SignalIndexCacheData {
    /// Builds a cache snapshot from an ordered set of `(index, key)` pairs
    /// plus the authorized/unauthorized signal-id sets.
    #[must_use]
    pub fn new(
        entries: Vec<(u16, MeasurementKey)>,
        authorized: HashSet<Uuid>,
        unauthorized: HashSet<Uuid>,
    ) -> Self {
        let mut index_to_key = HashMap::new();
        let mut key_to_index = HashMap::new();
        for (index, key) in entries {
            key_to_index.insert(key.signal_id(), index);
            index_to_key.insert(index, key);
        }
        Self { index_to_key, key_to_index, authorized, unauthorized }
    }

    /// Resolves an index to its measurement key.
    #[must_use]
    pub fn key_for_index(&self, index: u16) -> Option<&MeasurementKey> {
        self.index_to_key.get(&index)
    }

    /// Resolves a signal id to its current index, if installed.
    #[must_use]
    pub fn index_for_signal(&self, signal_id: Uuid) -> Option<u16> {
        self.key_to_index.get(&signal_id).copied()
    }

    /// Whether the signal is in the authorized set.
    #[must_use]
    pub fn is_authorized(&self, signal_id: Uuid) -> bool {
        self.authorized.contains(&signal_id)
    }

    /// Whether the signal is in the unauthorized set.
    #[must_use]
    pub fn is_unauthorized(&self, signal_id: Uuid) -> bool {
        self.unauthorized.contains(&signal_id)
    }

    /// Number of indices installed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index_to_key.len()
    }

    /// Whether no indices are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index_to_key.is_empty()
    }

    /// Iterates `(index, key)` pairs in ascending index order, used when
    /// serializing `UpdateSignalIndexCache`.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &MeasurementKey)> {
        let mut items: Vec<_> = self.index_to_key.iter().map(|(i, k)| (*i, k)).collect();
        items.sort_by_key(|(i, _)| *i);
        items.into_iter()
    }
}

/// A pointer-swapped holder for the currently installed
/// [`SignalIndexCacheData`].
///
/// Per §5: "the signal-index cache is installed atomically (pointer-swap
/// semantics). Reads during installation see either the old or new cache,
/// never a mix." A monotonic generation counter lets callers detect when a
/// cache observed at the start of a parse is still current (§8 invariant 6).
pub struct SignalIndexCache {
    current: ArcSwap<SignalIndexCacheData>,
    generation: AtomicU64,
}

impl SignalIndexCache {
    /// Creates a cache with no indices installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(SignalIndexCacheData::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the currently installed snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<SignalIndexCacheData> {
        self.current.load_full()
    }

    /// Atomically replaces the installed snapshot.
    pub fn install(&self, data: SignalIndexCacheData) {
        self.current.store(Arc::new(data));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// A monotonic counter bumped on every [`SignalIndexCache::install`],
    /// usable to detect whether the cache changed mid-parse.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether any indices have ever been installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.generation() > 0
    }
}

impl Default for SignalIndexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::InternTable;

    #[test]
    fn fresh_cache_reports_not_installed() {
        let cache = SignalIndexCache::new();
        assert!(!cache.is_installed());
        assert_eq!(cache.current().len(), 0);
    }

    #[test]
    fn install_replaces_snapshot_and_bumps_generation() {
        let table = InternTable::new();
        let key = table.get_or_intern(Uuid::from_u128(1), "DEV1", 1);
        let cache = SignalIndexCache::new();

        cache.install(SignalIndexCacheData::new(
            vec![(0, key.clone())],
            HashSet::new(),
            HashSet::new(),
        ));
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.current().key_for_index(0), Some(&key));

        cache.install(SignalIndexCacheData::default());
        assert_eq!(cache.generation(), 2);
        assert_eq!(cache.current().len(), 0);
    }

    #[test]
    fn readers_see_old_or_new_never_mixed() {
        let table = InternTable::new();
        let key = table.get_or_intern(Uuid::from_u128(2), "DEV1", 1);
        let cache = SignalIndexCache::new();
        cache.install(SignalIndexCacheData::new(
            vec![(0, key.clone())],
            HashSet::new(),
            HashSet::new(),
        ));

        let snapshot = cache.current();
        cache.install(SignalIndexCacheData::default());

        // The handle taken before the second install still sees the first
        // snapshot in full, not a partially-updated view.
        assert_eq!(snapshot.key_for_index(0), Some(&key));
    }

    #[test]
    fn index_zero_is_a_valid_index() {
        let table = InternTable::new();
        let key = table.get_or_intern(Uuid::from_u128(3), "DEV1", 1);
        let data = SignalIndexCacheData::new(vec![(0, key.clone())], HashSet::new(), HashSet::new());
        assert_eq!(data.key_for_index(0), Some(&key));
    }
}
