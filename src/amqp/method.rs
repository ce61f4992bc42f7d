//! Method message catalog
//!
//! Only the two basic-class acknowledgement methods are modelled:
//!
//! | Message    | class | method | payload                               |
//! |------------|-------|--------|---------------------------------------|
//! | BasicAck   | 60    | 80     | delivery tag (u64 BE) + flags (bit0)  |
//! | BasicNack  | 60    | 120    | delivery tag (u64 BE) + flags (bit0,1)|
//!
//! Flags are packed least-significant-bit first into one trailing byte.

use bytes::BufMut;
use std::io::Read;

use super::error::{FrameError, Result};
use super::frame::{read_u64, read_u8};

/// Basic class identifier
pub const CLASS_BASIC: u16 = 60;
/// basic.ack method identifier
pub const METHOD_BASIC_ACK: u16 = 80;
/// basic.nack method identifier
pub const METHOD_BASIC_NACK: u16 = 120;

const FLAG_MULTIPLE: u8 = 1 << 0;
const FLAG_REQUEUE: u8 = 1 << 1;

/// Classification of a raw (class, method) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    BasicAck,
    BasicNack,
    /// Pair outside the catalog, kept for diagnostics
    Unsupported { class_id: u16, method_id: u16 },
}

impl MethodKind {
    pub fn classify(class_id: u16, method_id: u16) -> Self {
        match (class_id, method_id) {
            (CLASS_BASIC, METHOD_BASIC_ACK) => Self::BasicAck,
            (CLASS_BASIC, METHOD_BASIC_NACK) => Self::BasicNack,
            _ => Self::Unsupported {
                class_id,
                method_id,
            },
        }
    }
}

/// Decoded method payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    BasicAck {
        delivery_tag: u64,
        multiple: bool,
    },
    BasicNack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
}

impl Message {
    /// Wire (class, method) identifiers for this message
    pub fn id(&self) -> (u16, u16) {
        match self {
            Self::BasicAck { .. } => (CLASS_BASIC, METHOD_BASIC_ACK),
            Self::BasicNack { .. } => (CLASS_BASIC, METHOD_BASIC_NACK),
        }
    }

    /// Encoded payload length in bytes (excluding class/method ids)
    pub fn encoded_len(&self) -> usize {
        // delivery tag + flags byte
        9
    }

    /// Read the field-level payload for the given (class, method) pair
    pub fn read<R: Read>(class_id: u16, method_id: u16, r: &mut R) -> Result<Self> {
        match MethodKind::classify(class_id, method_id) {
            MethodKind::BasicAck => {
                let delivery_tag = read_u64(r)?;
                let bits = read_u8(r)?;
                Ok(Self::BasicAck {
                    delivery_tag,
                    multiple: bits & FLAG_MULTIPLE != 0,
                })
            }
            MethodKind::BasicNack => {
                let delivery_tag = read_u64(r)?;
                let bits = read_u8(r)?;
                Ok(Self::BasicNack {
                    delivery_tag,
                    multiple: bits & FLAG_MULTIPLE != 0,
                    requeue: bits & FLAG_REQUEUE != 0,
                })
            }
            MethodKind::Unsupported {
                class_id,
                method_id,
            } => Err(FrameError::UnknownMethod {
                class_id,
                method_id,
            }),
        }
    }

    /// Append the field-level payload to `buf`
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        match *self {
            Self::BasicAck {
                delivery_tag,
                multiple,
            } => {
                buf.put_u64(delivery_tag);
                let mut bits = 0u8;
                if multiple {
                    bits |= FLAG_MULTIPLE;
                }
                buf.put_u8(bits);
            }
            Self::BasicNack {
                delivery_tag,
                multiple,
                requeue,
            } => {
                buf.put_u64(delivery_tag);
                let mut bits = 0u8;
                if multiple {
                    bits |= FLAG_MULTIPLE;
                }
                if requeue {
                    bits |= FLAG_REQUEUE;
                }
                buf.put_u8(bits);
            }
        }
    }
}
