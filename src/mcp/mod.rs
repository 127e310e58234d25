//! MCP session layer used by the test client
//!
//! Targets protocol revision **2025-11-25** and accepts the older revisions
//! listed in [`types::SUPPORTED_PROTOCOL_VERSIONS`].
//!
//! # Module Layout
//!
//! - `types`     -- protocol types and JSON-RPC primitives
//! - `client`    -- transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `transport` -- `Transport` trait, stdio implementation, test fake
//! - `session`   -- binds a transport, the read loop and the handshake
//!
//! Everything here reports failures as `anyhow::Error` carrying a
//! [`crate::error::SessionError`].

pub mod client;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
