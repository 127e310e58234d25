//! MCP transport abstraction and implementations
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - `fake::FakeTransport` -- in-process fake used by unit tests.
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings, one per logical message. Framing is the
//! implementation's job.
//!
//! The `receive_err` stream carries transport-level diagnostics such as a
//! server's stderr. Diagnostic output is never an error condition.

use std::pin::Pin;

use anyhow::Result;
use futures::Stream;

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>` by
/// [`crate::mcp::session::Session`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete JSON-RPC message to the peer.
    ///
    /// # Errors
    ///
    /// [`crate::error::SessionError::Transport`] if the underlying I/O is
    /// gone.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound JSON-RPC message strings. Ends when the peer
    /// disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Stream of diagnostic lines. May never yield.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the peer. For a subprocess this terminates and reaps it.
    /// Calling `close` more than once is a no-op.
    async fn close(&self) -> Result<()>;
}

pub mod stdio;

#[cfg(test)]
pub mod fake;
