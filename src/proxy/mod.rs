//! Per-connection relay
//!
//! - `engine` - connection lifecycle (dial, relay, teardown)
//! - `pipe` - one direction of the relay
//! - `latch` - single-fire failure signal
//! - `conn` - stream abstraction with optional Nagle control

pub mod conn;
pub mod engine;
pub mod latch;
pub mod pipe;

pub use conn::{disable_nagle, Connection, NoDelay};
pub use engine::{ConnectionProxy, MirrorAddrs, ProxyOutcome, ProxySettings, ProxySummary};
pub use latch::FailureLatch;
pub use pipe::{Direction, CHUNK_SIZE, MIRROR_WRITE_TIMEOUT};
