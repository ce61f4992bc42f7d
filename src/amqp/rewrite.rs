//! basic.ack -> basic.nack rewriting
//!
//! Turns every acknowledgement flowing through the proxy into a negative
//! acknowledgement with the same delivery tag and `multiple` flag. Useful
//! for exercising consumer/broker redelivery paths without touching either
//! side.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use super::frame::{Frame, MethodFrame};
use super::method::{Message, METHOD_BASIC_NACK};

/// Rewriter settings
#[derive(Debug, Clone, Default)]
pub struct AckRewriter {
    /// `requeue` flag set on every produced nack
    pub requeue: bool,
    /// Upper bound of the random delay injected before a rewrite
    pub max_delay: Option<Duration>,
}

impl AckRewriter {
    pub fn new(requeue: bool, max_delay: Option<Duration>) -> Self {
        Self { requeue, max_delay }
    }

    /// Rewrite `frame` if it carries a basic.ack, after the optional delay
    ///
    /// Returns the frame and whether it was rewritten.
    pub async fn maybe_rewrite(&self, frame: Frame) -> (Frame, bool) {
        if !is_basic_ack(&frame) {
            return (frame, false);
        }

        if let Some(delay) = self.random_delay() {
            debug!(delay_ms = delay.as_millis() as u64, "delaying ack rewrite");
            tokio::time::sleep(delay).await;
        }

        ack_to_nack(frame, self.requeue)
    }

    fn random_delay(&self) -> Option<Duration> {
        let max = self.max_delay?;
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return None;
        }
        let ms = rand::thread_rng().gen_range(0..max_ms);
        Some(Duration::from_millis(ms))
    }
}

fn is_basic_ack(frame: &Frame) -> bool {
    matches!(
        frame,
        Frame::Method(MethodFrame {
            message: Message::BasicAck { .. },
            ..
        })
    )
}

/// Replace a basic.ack with the equivalent basic.nack
///
/// Any other frame is returned unchanged. The boolean reports whether a
/// rewrite happened.
pub fn ack_to_nack(frame: Frame, requeue: bool) -> (Frame, bool) {
    match frame {
        Frame::Method(mut mf) => match mf.message {
            Message::BasicAck {
                delivery_tag,
                multiple,
            } => {
                mf.method_id = METHOD_BASIC_NACK;
                mf.message = Message::BasicNack {
                    delivery_tag,
                    multiple,
                    requeue,
                };
                (Frame::Method(mf), true)
            }
            _ => (Frame::Method(mf), false),
        },
    }
}
