//! Rotating even/odd cipher key-pair table (§3, §4.8, §5).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use arc_swap::ArcSwapOption;

use crate::key_pair::KeyPair;

/// Which of the two key/IV slots a data packet's `CipherIndex` flag selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// `CipherIndex` bit clear.
    Even,
    /// `CipherIndex` bit set.
    Odd,
}

impl Slot {
    fn as_index(self) -> usize {
        match self {
            Slot::Even => 0,
            Slot::Odd => 1,
        }
    }

    /// The slot selected by a data packet's `CIPHER_INDEX` flag bit.
    #[must_use]
    pub fn from_flag(cipher_index_bit: bool) -> Self {
        if cipher_index_bit { Slot::Odd } else { Slot::Even }
    }
}

/// Holds both key/IV slots, each independently pointer-swapped, plus an
/// atomic selector flag for which slot newly encrypted packets use.
///
/// Per §5: "The cipher key table uses the same atomic swap [as the
/// signal-index cache]; the selector flag is updated last" — so a reader
/// can never observe the selector pointing at a slot that has not yet been
/// installed.
pub struct CipherKeyTable {
    slots: [ArcSwapOption<KeyPair>; 2],
    active: AtomicU8,
}

impl CipherKeyTable {
    /// Creates a table with no key pairs installed and `Even` active.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: [ArcSwapOption::empty(), ArcSwapOption::empty()], active: AtomicU8::new(0) }
    }

    /// The currently active slot, used when encrypting new outbound
    /// payloads.
    #[must_use]
    pub fn active_slot(&self) -> Slot {
        if self.active.load(Ordering::SeqCst) == 0 { Slot::Even } else { Slot::Odd }
    }

    /// Fetches the installed key pair for a slot, if any.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<Arc<KeyPair>> {
        self.slots[slot.as_index()].load_full()
    }

    /// Installs `pair` into the currently *inactive* slot, then flips the
    /// active selector to point at it.
    ///
    /// The receiver-side grace window ("accept either pair for at least one
    /// rotation period") is a session/watchdog-timer policy layered above
    /// this table, not enforced here: this type only ever evicts a slot
    /// when a new pair is installed into it.
    pub fn rotate(&self, pair: KeyPair) -> Slot {
        let inactive = match self.active_slot() {
            Slot::Even => Slot::Odd,
            Slot::Odd => Slot::Even,
        };
        self.slots[inactive.as_index()].store(Some(Arc::new(pair)));
        self.active.store(inactive.as_index() as u8, Ordering::SeqCst);
        inactive
    }
}

impl Default for CipherKeyTable {
    fn default() -> Self {
        Self::new()
    }
}
