//! Buffer-block reliable delivery (§4.9): gapless, sequence-numbered,
//! retransmission-tolerant ordered reassembly of arbitrary byte payloads.

use std::collections::VecDeque;

use bytes::Bytes;

/// Outcome of feeding one received buffer block into a
/// [`BufferBlockReassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The block (and any now-contiguous cached blocks) should be delivered,
    /// in order.
    Ready(Vec<Bytes>),
    /// The block arrived early and was cached; nothing to deliver yet.
    Cached,
    /// The block's sequence number is below `expected` (a retransmission of
    /// an already-delivered block) and was dropped.
    DroppedRetransmission,
}

/// Reassembles an ordered stream of buffer blocks out of an unordered
/// arrival sequence.
///
/// Every accepted block (including dropped retransmissions) is acknowledged
/// by the caller via `ConfirmBufferBlock`; this type only tracks ordering,
/// not the acknowledgment wire exchange.
#[derive(Debug, Default)]
pub struct BufferBlockReassembler {
    expected: u32,
    cache: VecDeque<Option<Bytes>>,
}

impl BufferBlockReassembler {
    /// Creates a reassembler expecting sequence number `0` first.
    #[must_use]
    pub fn new() -> Self {
        Self { expected: 0, cache: VecDeque::new() }
    }

    /// The next sequence number this reassembler expects.
    #[must_use]
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Resets `expected` to `0` and discards any cached out-of-order blocks.
    ///
    /// Called on resubscribe (§4.9): the publisher starts a fresh
    /// buffer-block sequence space for the new subscription.
    pub fn reset(&mut self) {
        self.expected = 0;
        self.cache.clear();
    }

    /// Feeds one received `(seq, payload)` pair.
    pub fn receive(&mut self, seq: u32, payload: Bytes) -> Delivery {
        if seq < self.expected {
            return Delivery::DroppedRetransmission;
        }

        if seq == self.expected {
            let mut ready = vec![payload];
            self.expected = self.expected.wrapping_add(1);
            while let Some(front) = self.cache.front_mut() {
                match front.take() {
                    Some(cached) => {
                        self.cache.pop_front();
                        ready.push(cached);
                        self.expected = self.expected.wrapping_add(1);
                    },
                    None => break,
                }
            }
            return Delivery::Ready(ready);
        }

        let offset = (seq - self.expected) as usize;
        if self.cache.len() < offset {
            self.cache.resize(offset, None);
        }
        if offset > 0 {
            self.cache[offset - 1] = Some(payload);
        }
        Delivery::Cached
    }
}
