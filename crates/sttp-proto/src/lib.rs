//! Wire codec for the Streaming Telemetry Transport Protocol.
//!
//! This crate is pure codec and framing logic: big-endian primitive
//! encode/decode, GUID packing, frame header parsing and reassembly,
//! command/response wire codes, and the TSSC streaming compressor. It does
//! no I/O and knows nothing about sessions, subscriptions, or measurement
//! semantics — those live in `sttp-core`, layered on top of this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bytecodec;
pub mod commands;
pub mod errors;
pub mod frame;
pub mod header;
pub mod tssc;

pub use commands::{CommandCode, DataPacketFlags, ResponseCode};
pub use errors::{ProtocolError, Result};
pub use frame::{CommandFrame, Frame, FrameAccumulator, HeaderKind, ResponseFrame};
pub use header::{CommandHeader, ResponseHeader};
pub use tssc::{TsscDecoder, TsscEncoder, TsscPoint};
