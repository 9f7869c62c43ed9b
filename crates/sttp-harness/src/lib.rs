//! Deterministic end-to-end simulation harness for Streaming Telemetry
//! Transport Protocol scenarios.
//!
//! Tests in this crate run a publisher and subscriber session against
//! `turmoil`'s simulated network, driving `sttp-core`'s sans-IO session
//! state machines directly (rather than the `sttp-server`/`sttp-client`
//! binaries, which own real Tokio sockets) so scenarios stay deterministic
//! and reproducible from a seed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;

pub use sim_env::SimEnv;
