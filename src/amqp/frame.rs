//! Frame codec
//!
//! Wire layout (all integers big-endian):
//! ```text
//! ┌──────┬─────────┬──────────┬──────────┬───────────┬─────────┬─────────┐
//! │ type │ channel │ size     │ class id │ method id │ payload │ end     │
//! │ 1 B  │ 2 B     │ 4 B      │ 2 B      │ 2 B       │ var     │ 1 B     │
//! │      │ u16     │ u32      │ u16      │ u16       │         │ 0xCE    │
//! └──────┴─────────┴──────────┴──────────┴───────────┴─────────┴─────────┘
//! ```
//!
//! On encode `size` counts every byte between the header and the end
//! marker; on decode it is read but not validated. Only
//! method frames are decoded; header, body and heartbeat frames are
//! recognised and rejected without consuming their payload.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Cursor, Read, Write};

use super::error::{FrameError, Result};
use super::method::Message;

/// Frame header size in bytes (type + channel + size)
pub const HEADER_SIZE: usize = 7;

/// Frame-end sentinel
pub const FRAME_END: u8 = 0xCE;

/// Frame type byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Method,
    Header,
    Body,
    Heartbeat,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Method),
            2 => Some(Self::Header),
            3 => Some(Self::Body),
            8 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Method => 1,
            Self::Header => 2,
            Self::Body => 3,
            Self::Heartbeat => 8,
        }
    }
}

/// A method frame: an RPC-like (class, method) invocation on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFrame {
    pub channel: u16,
    pub class_id: u16,
    pub method_id: u16,
    pub message: Message,
}

impl MethodFrame {
    /// Build a method frame whose ids match `message`
    pub fn new(channel: u16, message: Message) -> Self {
        let (class_id, method_id) = message.id();
        Self {
            channel,
            class_id,
            method_id,
            message,
        }
    }

    fn body_len(&self) -> usize {
        4 + self.message.encoded_len()
    }
}

/// A decoded frame
///
/// Only method frames carry a decodable payload in this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Method(MethodFrame),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Method(_) => FrameType::Method,
        }
    }

    pub fn channel(&self) -> u16 {
        match self {
            Self::Method(mf) => mf.channel,
        }
    }

    /// Decode a chunk that must hold exactly one frame
    ///
    /// Bytes left over after the end marker reject the chunk, so a caller
    /// that forwards the re-encoded frame never drops data.
    pub fn decode(chunk: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(chunk);
        let frame = read_frame(&mut cursor)?;

        let remaining = chunk.len() - cursor.position() as usize;
        if remaining != 0 {
            return Err(FrameError::TrailingBytes(remaining));
        }

        Ok(frame)
    }

    /// Encode into a freshly allocated buffer
    pub fn encode(&self) -> Result<Bytes> {
        let mut writer = BytesMut::with_capacity(self.encoded_len()).writer();
        write_frame(self, &mut writer)?;
        Ok(writer.into_inner().freeze())
    }

    /// Total encoded length including header and end marker
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Method(mf) => HEADER_SIZE + mf.body_len() + 1,
        }
    }
}

/// Read one frame from `r`
///
/// Consumes only the bytes belonging to the frame being parsed (or fewer on
/// error). Resynchronisation after an error is the caller's concern.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    r.read_exact(&mut header).map_err(FrameError::from_read)?;

    let typ = header[0];
    let channel = u16::from_be_bytes([header[1], header[2]]);
    // header[3..7] (size) is not validated; the body length follows from
    // the (class, method) pair

    let frame = match FrameType::from_byte(typ) {
        Some(FrameType::Method) => Frame::Method(read_method_frame(r, channel)?),
        Some(other) => return Err(FrameError::IgnoredFrameType(other)),
        None => return Err(FrameError::UnparseableFrameType(typ)),
    };

    let end = read_u8(r)?;
    if end != FRAME_END {
        return Err(FrameError::MissingFrameEnd(end));
    }

    Ok(frame)
}

fn read_method_frame<R: Read>(r: &mut R, channel: u16) -> Result<MethodFrame> {
    let class_id = read_u16(r)?;
    let method_id = read_u16(r)?;
    let message = Message::read(class_id, method_id, r)?;

    Ok(MethodFrame {
        channel,
        class_id,
        method_id,
        message,
    })
}

/// Write one frame to `w`: header, class/method/payload, end marker
pub fn write_frame<W: Write>(frame: &Frame, w: &mut W) -> Result<()> {
    let Frame::Method(mf) = frame;

    let mut payload = BytesMut::with_capacity(mf.body_len());
    let (class_id, method_id) = mf.message.id();
    payload.put_u16(class_id);
    payload.put_u16(method_id);
    mf.message.write(&mut payload);

    let size =
        u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FrameType::Method.as_byte();
    header[1..3].copy_from_slice(&mf.channel.to_be_bytes());
    header[3..7].copy_from_slice(&size.to_be_bytes());

    w.write_all(&header)?;
    w.write_all(&payload)?;
    w.write_all(&[FRAME_END])?;

    Ok(())
}

pub(crate) fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(FrameError::from_read)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(FrameError::from_read)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(FrameError::from_read)?;
    Ok(u64::from_be_bytes(buf))
}
