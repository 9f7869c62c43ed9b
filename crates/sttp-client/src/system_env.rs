//! Production [`Environment`] implementation using system time and a
//! cryptographic RNG, mirroring `sttp-server`'s `SystemEnv`.

use std::time::Duration;

use sttp_core::Environment;

/// Production environment: `std::time::Instant`, `tokio::time::sleep`, and
/// `getrandom` for session material.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Creates a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        getrandom::fill(buf).expect("OS RNG failure is unrecoverable for a cryptographic session");
    }
}
