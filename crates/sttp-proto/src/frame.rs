//! Length-prefixed frame reassembly over the reliable command channel.
//!
//! [`FrameAccumulator`] is fed raw bytes as they arrive from the socket and
//! yields exactly one [`Frame`] at a time once a full frame is present. It
//! never commits to a payload length before the header bytes are fully
//! buffered, and it never hands back a partial frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};
use crate::header::{CommandHeader, ResponseHeader, COMMAND_HEADER_SIZE, RESPONSE_HEADER_SIZE};

/// Default cap on a declared frame payload length, per §7 of the protocol
/// error-handling design: 16 MiB. Guards against a corrupt or hostile length
/// field driving an unbounded allocation.
pub const DEFAULT_MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

/// A fixed-size frame header that can be parsed from the front of a byte
/// buffer and that declares how many payload bytes follow it.
pub trait HeaderKind: Copy {
    /// Size of the header in bytes.
    const SIZE: usize;

    /// Parses a header from the first `Self::SIZE` bytes of `bytes`.
    fn parse(bytes: &[u8]) -> Result<Self>;

    /// Declared payload length in bytes.
    fn declared_payload_len(&self) -> u32;

    /// Serializes the header back to bytes.
    fn write_to(&self, dst: &mut impl BufMut);
}

impl HeaderKind for ResponseHeader {
    const SIZE: usize = RESPONSE_HEADER_SIZE;

    fn parse(bytes: &[u8]) -> Result<Self> {
        ResponseHeader::from_bytes(bytes)
    }

    fn declared_payload_len(&self) -> u32 {
        self.payload_len()
    }

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.to_bytes());
    }
}

impl HeaderKind for CommandHeader {
    const SIZE: usize = COMMAND_HEADER_SIZE;

    fn parse(bytes: &[u8]) -> Result<Self> {
        CommandHeader::from_bytes(bytes)
    }

    fn declared_payload_len(&self) -> u32 {
        self.payload_len()
    }

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.to_bytes());
    }
}

/// A header plus its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<H> {
    /// The frame header.
    pub header: H,
    /// The frame payload, exactly `header.declared_payload_len()` bytes.
    pub payload: Bytes,
}

impl<H: HeaderKind> Frame<H> {
    /// Builds a frame, computing the header's payload length from `payload`.
    pub fn new(header_without_len: impl FnOnce(u32) -> H, payload: Bytes) -> Result<Self> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge { size: u32::MAX, max: DEFAULT_MAX_FRAME_PAYLOAD })?;
        Ok(Self { header: header_without_len(len), payload })
    }

    /// Encodes the header followed by the payload into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        self.header.write_to(dst);
        dst.put_slice(&self.payload);
    }
}

/// Accumulates raw socket bytes and reassembles exactly one frame at a time.
///
/// Per §4.2: bytes accumulate across reads into a growing buffer; the header
/// is only inspected once at least `H::SIZE` bytes are present; a frame is
/// only produced once the full declared length is buffered, and producing it
/// consumes exactly that many bytes, leaving any residual bytes (the start
/// of the next frame) untouched.
pub struct FrameAccumulator<H> {
    buf: BytesMut,
    max_payload: u32,
    _header: std::marker::PhantomData<H>,
}

impl<H: HeaderKind> FrameAccumulator<H> {
    /// Creates an accumulator with the default 16 MiB payload cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_FRAME_PAYLOAD)
    }

    /// Creates an accumulator with an explicit payload cap.
    #[must_use]
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self { buf: BytesMut::new(), max_payload, _header: std::marker::PhantomData }
    }

    /// Appends freshly read bytes to the accumulator.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered (for diagnostics/tests).
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to reassemble one frame.
    ///
    /// Returns `Ok(None)` when insufficient bytes have arrived yet. Returns
    /// `Err` (and leaves the accumulator's buffered bytes untouched) if the
    /// header is malformed or the declared length exceeds the configured
    /// cap — the caller should treat this as a framing error and typically
    /// reset the connection rather than retry.
    pub fn try_take_frame(&mut self) -> Result<Option<Frame<H>>> {
        if self.buf.len() < H::SIZE {
            return Ok(None);
        }
        let header = H::parse(&self.buf[..H::SIZE])?;
        let payload_len = header.declared_payload_len();
        if payload_len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge { size: payload_len, max: self.max_payload });
        }
        let total = H::SIZE + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let frame_bytes = self.buf.split_to(total);
        let payload = Bytes::copy_from_slice(&frame_bytes[H::SIZE..]);
        Ok(Some(Frame { header, payload }))
    }
}

impl<H: HeaderKind> Default for FrameAccumulator<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// A server-to-client frame.
pub type ResponseFrame = Frame<ResponseHeader>;
/// A client-to-server frame.
pub type CommandFrame = Frame<CommandHeader>;

impl ResponseFrame {
    /// Builds a response frame.
    pub fn response(response_code: u8, in_response_to: u8, payload: Bytes) -> Result<Self> {
        Self::new(|len| ResponseHeader::new(response_code, in_response_to, len), payload)
    }
}

impl CommandFrame {
    /// Builds a command frame.
    pub fn command(command_code: u8, payload: Bytes) -> Result<Self> {
        Self::new(|len| CommandHeader::new(command_code, len), payload)
    }
}
