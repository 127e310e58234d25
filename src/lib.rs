//! mcp-testkit - testing toolkit for Model Context Protocol servers
//!
//! This library helps authors of stdio MCP servers test them from Rust:
//! it launches the server as a subprocess, negotiates a session, and
//! exposes the server's tools, resources and prompts through a typed
//! client with assertion helpers.
//!
//! # Architecture
//!
//! - `test_client`: [`McpTestClient`], the connection lifecycle, request
//!   façade and `expect_*` helpers
//! - `matchers`: `assert_*` predicates over a client or pre-fetched lists
//! - `snapshot`: snapshot files with volatile-field stripping
//! - `validation`: checks on server responses at the ingestion boundary
//! - `config`: [`ClientConfig`], environment merge and coverage propagation
//! - `logger`: stderr-only tracing setup and exclusive protocol stdout
//! - `error`: the [`McpTestError`] taxonomy
//! - `mcp`: the JSON-RPC session layer over a stdio transport
//!
//! # Example
//!
//! ```no_run
//! use mcp_testkit::{ClientConfig, McpTestClient};
//!
//! #[tokio::main]
//! async fn main() -> mcp_testkit::Result<()> {
//!     let mut client = McpTestClient::new(
//!         ClientConfig::builder("node").arg("dist/server.js").build(),
//!     );
//!     client.connect().await?;
//!
//!     let tool = client.expect_tool_exists("echo").await?;
//!     println!("found {}", tool.name);
//!
//!     client.disconnect().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod logger;
pub mod matchers;
pub mod mcp;
pub mod snapshot;
pub mod test_client;
pub mod validation;

// Re-export commonly used types
pub use config::ClientConfig;
pub use error::{ErrorCode, ErrorContext, McpTestError, Result};
pub use logger::{init_logging, DebugLogger, LoggingConfig, ProtocolStdout};
pub use snapshot::{SnapshotOptions, SnapshotStore};
pub use test_client::{with_connected, McpTestClient, ToolPayload};

#[cfg(test)]
pub mod test_utils;
