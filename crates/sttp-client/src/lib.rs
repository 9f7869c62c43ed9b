//! Streaming Telemetry Transport Protocol subscriber runtime.
//!
//! This crate provides production "glue" that wraps `sttp-core`'s
//! action-based [`sttp_core::SubscriberSession`] with real I/O. [`driver`]
//! drives the session over a TCP (optionally TLS) command channel using
//! Tokio, including connect/handshake/subscribe sequencing and automatic
//! reconnect.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
mod error;
mod system_env;
mod transport;

pub use error::ClientError;
pub use system_env::SystemEnv;
