//! AMQP-like frame codec and in-flight rewriting
//!
//! This module provides:
//! - A frame reader/writer for method frames (`frame`)
//! - The supported method message catalog (`method`)
//! - basic.ack -> basic.nack rewriting (`rewrite`)
//!
//! Header, body and heartbeat frames are recognised but rejected; the
//! proxy forwards such traffic untouched.

pub mod error;
pub mod frame;
pub mod method;
pub mod rewrite;

// Re-export main types
pub use error::FrameError;
pub use frame::{read_frame, write_frame, Frame, FrameType, MethodFrame, FRAME_END, HEADER_SIZE};
pub use method::{Message, MethodKind};
pub use rewrite::{ack_to_nack, AckRewriter};
