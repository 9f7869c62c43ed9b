//! Abstraction over wall-clock time and randomness.
//!
//! Every timer-driven behavior in this crate — the cipher-rotation timer,
//! the data-loss watchdog, the command-channel restart backoff — is written
//! against this trait rather than against `std::time`/`getrandom` directly.
//! Production code supplies a `SystemEnv`-style implementation; tests and
//! the simulation harness supply a deterministic one.

use std::future::Future;
use std::ops::Sub;
use std::time::Duration;

/// Supplies time and randomness to Sans-IO session state machines.
///
/// Generic callers are written against `E: Environment`, parameterizing
/// session types over `E::Instant` so the same state machine compiles
/// against `std::time::Instant` in production and a simulated instant under
/// test.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type this environment hands out. Must support duration
    /// subtraction so elapsed-time checks (timeouts, watchdogs) work
    /// uniformly regardless of the underlying clock.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Suspends the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills `buf` with cryptographically secure random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Convenience: a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        self.random_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    /// Convenience: a random `u128`, used for signal IDs in tests/fixtures.
    fn random_u128(&self) -> u128 {
        let mut buf = [0u8; 16];
        self.random_bytes(&mut buf);
        u128::from_le_bytes(buf)
    }
}
