//! Binary frame codec.
//!
//! Every WebSocket message carries one frame: a 16-byte big-endian header
//! followed by a body.
//!
//! ```text
//!  0               4       6       8               12              16
//! +---------------+-------+-------+---------------+---------------+
//! |  total length |header | ver-  |   operation   |   sequence    |
//! |   (u32, BE)   |length | sion  |   (u32, BE)   |   (u32, BE)   |
//! +---------------+-------+-------+---------------+---------------+
//! |                     body (total - header)                     |
//! +---------------------------------------------------------------+
//! ```
//!
//! Bodies with version [`Version::Zlib`] or [`Version::Brotli`] inflate to a
//! concatenation of complete child frames, which [`unpack`] splits into one
//! [`Packet`] each.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::ProtocolError;

/// Length of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 16;

/// Sequence number written into every outgoing frame. The server ignores it.
pub const SEQUENCE: u32 = 1;

/// Upper bound on the inflated size of one compressed body (16 MiB).
pub const MAX_DECOMPRESSED_LEN: usize = 16 * 1024 * 1024;

/// How many compressed layers a single frame may wrap.
const MAX_NESTING: usize = 4;

/// Brotli internal buffer size.
const BROTLI_BUFFER: usize = 4096;

// ---------------------------------------------------------------------------
// Header fields
// ---------------------------------------------------------------------------

/// Body encoding, carried in the header's version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// Plain UTF-8 JSON.
    Plain,
    /// Control traffic (heartbeats, popularity counters).
    Control,
    /// Zlib-compressed child frames. Deprecated by the server but still seen.
    Zlib,
    /// Brotli-compressed child frames.
    Brotli,
    /// A version this codec does not know. Passed through untouched.
    Unknown(u16),
}

impl From<u16> for Version {
    fn from(raw: u16) -> Self {
        match raw {
            0 => Self::Plain,
            1 => Self::Control,
            2 => Self::Zlib,
            3 => Self::Brotli,
            other => Self::Unknown(other),
        }
    }
}

impl From<Version> for u16 {
    fn from(version: Version) -> Self {
        match version {
            Version::Plain => 0,
            Version::Control => 1,
            Version::Zlib => 2,
            Version::Brotli => 3,
            Version::Unknown(raw) => raw,
        }
    }
}

/// What a frame means, carried in the header's operation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Client keep-alive.
    Heartbeat,
    /// Server keep-alive reply; body is a 4-byte popularity counter.
    HeartbeatReply,
    /// A JSON command (chat line, gift, room event...).
    Message,
    /// Client join-room request.
    JoinRoom,
    /// Server accepted the join-room request.
    JoinRoomReply,
    /// Anything else.
    Unknown(u32),
}

impl From<u32> for Operation {
    fn from(raw: u32) -> Self {
        match raw {
            2 => Self::Heartbeat,
            3 => Self::HeartbeatReply,
            5 => Self::Message,
            7 => Self::JoinRoom,
            8 => Self::JoinRoomReply,
            other => Self::Unknown(other),
        }
    }
}

impl From<Operation> for u32 {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Heartbeat => 2,
            Operation::HeartbeatReply => 3,
            Operation::Message => 5,
            Operation::JoinRoom => 7,
            Operation::JoinRoomReply => 8,
            Operation::Unknown(raw) => raw,
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus body length.
    pub total_len: u32,
    /// Header length; 16 for every frame the server sends today.
    pub header_len: u16,
    pub version: Version,
    pub operation: Operation,
    pub sequence: u32,
}

impl FrameHeader {
    /// Parses and validates the header at the start of `buf`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Framing`] if `buf` is shorter than
    /// [`HEADER_LEN`], if the declared header length is shorter than
    /// [`HEADER_LEN`], if the total length is shorter than the header, or if
    /// the total length runs past the end of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::framing(format!(
                "need {HEADER_LEN} header bytes, got {}",
                buf.len()
            )));
        }
        let header = Self {
            total_len: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            header_len: u16::from_be_bytes([buf[4], buf[5]]),
            version: u16::from_be_bytes([buf[6], buf[7]]).into(),
            operation: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]).into(),
            sequence: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        };

        let header_len = usize::from(header.header_len);
        let total_len = header.total_len as usize;
        if header_len < HEADER_LEN {
            return Err(ProtocolError::framing(format!(
                "declared header length {header_len} is below {HEADER_LEN}"
            )));
        }
        if total_len < header_len {
            return Err(ProtocolError::framing(format!(
                "total length {total_len} is shorter than header length {header_len}"
            )));
        }
        if total_len > buf.len() {
            return Err(ProtocolError::framing(format!(
                "declared length {total_len} exceeds buffer of {} bytes",
                buf.len()
            )));
        }
        Ok(header)
    }

    /// Length of the body that follows the header.
    pub fn body_len(&self) -> usize {
        self.total_len as usize - usize::from(self.header_len)
    }
}

/// A single decoded frame borrowing its body from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub body: &'a [u8],
}

impl Frame<'_> {
    pub fn operation(&self) -> Operation {
        self.header.operation
    }
}

/// A logical (operation, body) unit after any decompression and splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub operation: Operation,
    pub body: Vec<u8>,
}

impl Packet {
    /// The room popularity carried by a heartbeat reply, if this is one.
    pub fn popularity(&self) -> Option<u32> {
        if self.operation != Operation::HeartbeatReply {
            return None;
        }
        let bytes: [u8; 4] = self.body.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Total frame length for a body of `body_len` bytes.
fn frame_len(body_len: usize) -> Result<u32, ProtocolError> {
    HEADER_LEN
        .checked_add(body_len)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(ProtocolError::TooLarge(body_len))
}

/// Builds one frame: a 16-byte header followed by `body`.
///
/// # Errors
/// [`ProtocolError::TooLarge`] if the frame would not fit the length field.
pub fn encode(version: Version, operation: Operation, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total_len = frame_len(body.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(&(HEADER_LEN as u16).to_be_bytes());
    buf.extend_from_slice(&u16::from(version).to_be_bytes());
    buf.extend_from_slice(&u32::from(operation).to_be_bytes());
    buf.extend_from_slice(&SEQUENCE.to_be_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Decodes the frame at the start of `buf` without decompressing it.
///
/// The returned body is exactly `total_len - header_len` bytes; anything past
/// the declared total length is left for the caller.
///
/// # Errors
/// See [`FrameHeader::parse`].
pub fn decode(buf: &[u8]) -> Result<Frame<'_>, ProtocolError> {
    let header = FrameHeader::parse(buf)?;
    let body = &buf[usize::from(header.header_len)..header.total_len as usize];
    Ok(Frame { header, body })
}

/// Splits one raw WebSocket message into packets.
///
/// Plain, control and unknown versions yield exactly one packet. Compressed
/// versions are inflated and every child frame becomes a packet, in order.
/// Any framing or decompression failure is logged and yields an empty `Vec`;
/// partial results are never returned.
pub fn unpack(buf: &[u8]) -> Vec<Packet> {
    match try_unpack(buf) {
        Ok(packets) => packets,
        Err(e) => {
            tracing::warn!(error = %e, len = buf.len(), "dropping undecodable frame");
            Vec::new()
        }
    }
}

/// Like [`unpack`] but reports why a buffer could not be split.
///
/// # Errors
/// Returns [`ProtocolError::Framing`] or [`ProtocolError::Decompression`].
pub fn try_unpack(buf: &[u8]) -> Result<Vec<Packet>, ProtocolError> {
    let mut packets = Vec::new();
    unpack_into(buf, 0, &mut packets)?;
    Ok(packets)
}

fn unpack_into(buf: &[u8], depth: usize, out: &mut Vec<Packet>) -> Result<(), ProtocolError> {
    let frame = decode(buf)?;
    match frame.header.version {
        Version::Zlib | Version::Brotli => {
            if depth >= MAX_NESTING {
                return Err(ProtocolError::Decompression(format!(
                    "more than {MAX_NESTING} nested compressed frames"
                )));
            }
            let inflated = decompress(frame.header.version, frame.body)?;
            let mut rest = inflated.as_slice();
            while !rest.is_empty() {
                let child_len = FrameHeader::parse(rest)?.total_len as usize;
                unpack_into(&rest[..child_len], depth + 1, out)?;
                rest = &rest[child_len..];
            }
        }
        Version::Plain | Version::Control | Version::Unknown(_) => out.push(Packet {
            operation: frame.operation(),
            body: frame.body.to_vec(),
        }),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Inflates a zlib or brotli body, refusing output above
/// [`MAX_DECOMPRESSED_LEN`].
fn decompress(version: Version, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let limit = MAX_DECOMPRESSED_LEN as u64 + 1;
    let mut out = Vec::with_capacity(body.len() * 4);
    let result = match version {
        Version::Zlib => ZlibDecoder::new(body).take(limit).read_to_end(&mut out),
        Version::Brotli => brotli::Decompressor::new(body, BROTLI_BUFFER)
            .take(limit)
            .read_to_end(&mut out),
        other => {
            return Err(ProtocolError::Decompression(format!(
                "version {other:?} is not compressed"
            )));
        }
    };
    result.map_err(|e| ProtocolError::Decompression(e.to_string()))?;
    if out.len() > MAX_DECOMPRESSED_LEN {
        return Err(ProtocolError::Decompression(format!(
            "inflated body exceeds {MAX_DECOMPRESSED_LEN} bytes"
        )));
    }
    Ok(out)
}

/// Compresses `data` for the given version. Uncompressed versions return a
/// copy of `data`.
pub fn compress(version: Version, data: &[u8]) -> io::Result<Vec<u8>> {
    match version {
        Version::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Version::Brotli => {
            let mut writer = brotli::CompressorWriter::new(Vec::new(), BROTLI_BUFFER, 5, 22);
            writer.write_all(data)?;
            writer.flush()?;
            Ok(writer.into_inner())
        }
        Version::Plain | Version::Control | Version::Unknown(_) => Ok(data.to_vec()),
    }
}

/// Wraps already-encoded child frames into one compressed outer frame, the
/// way the server batches bursts of commands.
pub fn encode_compressed(
    version: Version,
    operation: Operation,
    children: &[Vec<u8>],
) -> io::Result<Vec<u8>> {
    let body = compress(version, &children.concat())?;
    encode(version, operation, &body).map_err(io::Error::other)
}
