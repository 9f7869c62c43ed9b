//! Session state machines and domain model for the Streaming Telemetry
//! Transport Protocol.
//!
//! Layered on top of `sttp-proto` (pure wire codec) and `sttp-crypto`
//! (cipher key rotation and payload encryption): this crate owns measurement
//! identity, the signal-index cache, base-time offsets, metadata exchange,
//! buffer-block reassembly, and the publisher/subscriber session state
//! machines. Like `sttp-proto`, session state machines here do no socket
//! I/O — the `sttp-server`/`sttp-client` binaries own the transport and
//! drive these types via their action-pattern APIs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base_time;
pub mod buffer_block;
pub mod compact_measurement;
pub mod connection_string;
pub mod env;
pub mod error;
pub mod measurement;
pub mod metadata;
pub mod operational_modes;
pub mod publisher_session;
pub mod signal_index_cache;
pub mod subscriber_session;
pub mod time;

pub use base_time::BaseTimeOffsets;
pub use buffer_block::{BufferBlockReassembler, Delivery};
pub use env::Environment;
pub use error::{Result, SessionError};
pub use measurement::{InternTable, KeyMetadata, Measurement, MeasurementKey, MeasurementValue, StateFlags};
pub use metadata::{FilterExpression, Table, TabularDataSet, Value};
pub use operational_modes::{OperationalModes, StringEncoding};
pub use publisher_session::{PublisherAction, PublisherSession, PublisherState};
pub use signal_index_cache::{SignalIndexCache, SignalIndexCacheData};
pub use subscriber_session::{ReconnectPolicy, SubscriberAction, SubscriberSession, SubscriberState};
pub use time::Tick;
