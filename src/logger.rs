//! Leveled logging contract used by the connection proxy
//!
//! The engine only ever talks to a [`Logger`]. [`NullLogger`] is the default
//! and discards everything; [`TracingLogger`] forwards to `tracing` tagged
//! with the connection it belongs to.

use std::fmt;
use std::sync::Arc;

/// Four-level logger taking pre-formatted arguments
///
/// Call with `format_args!`, e.g. `log.warn(format_args!("Read failed '{}'", e))`.
pub trait Logger: Send + Sync {
    fn trace(&self, args: fmt::Arguments<'_>);
    fn debug(&self, args: fmt::Arguments<'_>);
    fn info(&self, args: fmt::Arguments<'_>);
    fn warn(&self, args: fmt::Arguments<'_>);
}

pub type SharedLogger = Arc<dyn Logger>;

/// A logger that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn trace(&self, _args: fmt::Arguments<'_>) {}
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn warn(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards to the `tracing` macros
///
/// Level filtering (verbose / very verbose) is left to the subscriber.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    connection: Option<String>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger whose lines carry `connection = "#NNN"`
    pub fn for_connection(id: u64) -> Self {
        Self {
            connection: Some(format!("#{:03}", id)),
        }
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }
}

impl Logger for TracingLogger {
    fn trace(&self, args: fmt::Arguments<'_>) {
        match &self.connection {
            Some(conn) => tracing::trace!(connection = %conn, "{}", args),
            None => tracing::trace!("{}", args),
        }
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        match &self.connection {
            Some(conn) => tracing::debug!(connection = %conn, "{}", args),
            None => tracing::debug!("{}", args),
        }
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        match &self.connection {
            Some(conn) => tracing::info!(connection = %conn, "{}", args),
            None => tracing::info!("{}", args),
        }
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        match &self.connection {
            Some(conn) => tracing::warn!(connection = %conn, "{}", args),
            None => tracing::warn!("{}", args),
        }
    }
}
