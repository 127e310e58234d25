//! Error types for mcp-testkit
//!
//! Two layers of errors live here:
//!
//! - [`McpTestError`] -- the closed, public taxonomy every test-client
//!   operation reports. Each variant carries a human-readable message and an
//!   [`ErrorContext`] map with diagnostic metadata (the tool name, the URI,
//!   the original error, a `suggestion` string).
//! - [`SessionError`] -- failures raised inside the protocol session layer
//!   (`crate::mcp`). That layer returns `anyhow::Result`; the test client
//!   downcasts to `SessionError` in [`classify`] so raw transport errors never
//!   reach a caller unwrapped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned by every façade method when no session exists.
pub const NOT_CONNECTED_MESSAGE: &str = "Not connected to server. Call connect() first.";

/// Message returned by `connect()` when a session already exists.
pub const ALREADY_CONNECTED_MESSAGE: &str = "Already connected to server. Call disconnect() first.";

/// Stable error codes, one per failure category.
///
/// Serialized as `SCREAMING_SNAKE_CASE` so the codes match their wire and
/// log representation (`"TOOL_CALL_FAILED"`).
///
/// # Examples
///
/// ```
/// use mcp_testkit::error::ErrorCode;
///
/// assert_eq!(ErrorCode::NotConnected.as_str(), "NOT_CONNECTED");
/// assert_eq!(ErrorCode::ToolCallFailed.to_string(), "TOOL_CALL_FAILED");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    InitializationFailed,
    ToolNotFound,
    ToolCallFailed,
    ValidationFailed,
    AssertionFailed,
    Timeout,
    NotConnected,
    AlreadyConnected,
    ResourceNotFound,
    PromptNotFound,
}

impl ErrorCode {
    /// The canonical string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::InitializationFailed => "INITIALIZATION_FAILED",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::ToolCallFailed => "TOOL_CALL_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::AssertionFailed => "ASSERTION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::AlreadyConnected => "ALREADY_CONNECTED",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::PromptNotFound => "PROMPT_NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open key-value metadata attached to an [`McpTestError`].
///
/// Keys are kept in sorted order so `Debug` output and serialized context are
/// deterministic across runs.
///
/// # Examples
///
/// ```
/// use mcp_testkit::error::ErrorContext;
///
/// let ctx = ErrorContext::new()
///     .with("toolName", "echo")
///     .with("suggestion", "Check the tool name");
/// assert_eq!(ctx.get_str("toolName"), Some("echo"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorContext(BTreeMap<String, serde_json::Value>);

impl ErrorContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, consuming and returning the context.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Look up a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// The actionable suggestion, if one was attached.
    pub fn suggestion(&self) -> Option<&str> {
        self.get_str("suggestion")
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The closed set of failures reported by the test client, matchers, and
/// snapshot helpers.
///
/// `Display` yields the message alone; tests assert on substrings of it, so
/// the wording of each message is part of the contract.
#[derive(Error, Debug, Clone)]
pub enum McpTestError {
    /// The server process could not be spawned or the transport broke.
    #[error("{message}")]
    ConnectionFailed {
        message: String,
        context: ErrorContext,
    },

    /// The `initialize` handshake failed.
    #[error("{message}")]
    InitializationFailed {
        message: String,
        context: ErrorContext,
    },

    /// A tool lookup found no tool with the requested name.
    #[error("{message}")]
    ToolNotFound {
        message: String,
        context: ErrorContext,
    },

    /// A `tools/call` was rejected or returned `isError: true`.
    #[error("{message}")]
    ToolCallFailed {
        message: String,
        context: ErrorContext,
    },

    /// A server response did not have the expected shape.
    #[error("{message}")]
    ValidationFailed {
        message: String,
        context: ErrorContext,
    },

    /// A test expectation did not hold.
    #[error("{message}")]
    AssertionFailed {
        message: String,
        context: ErrorContext,
    },

    /// The server did not answer within the configured timeout.
    #[error("{message}")]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    /// A request was issued before `connect()`.
    #[error("{message}")]
    NotConnected {
        message: String,
        context: ErrorContext,
    },

    /// `connect()` was called while a session already exists.
    #[error("{message}")]
    AlreadyConnected {
        message: String,
        context: ErrorContext,
    },

    /// A resource read failed or a resource lookup found nothing.
    #[error("{message}")]
    ResourceNotFound {
        message: String,
        context: ErrorContext,
    },

    /// A prompt fetch failed or a prompt lookup found nothing.
    #[error("{message}")]
    PromptNotFound {
        message: String,
        context: ErrorContext,
    },
}

impl McpTestError {
    /// Build an error of the given category.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_testkit::error::{ErrorCode, ErrorContext, McpTestError};
    ///
    /// let err = McpTestError::new(
    ///     ErrorCode::ToolNotFound,
    ///     "Tool 'x' not found",
    ///     ErrorContext::new().with("toolName", "x"),
    /// );
    /// assert_eq!(err.code(), ErrorCode::ToolNotFound);
    /// assert_eq!(err.to_string(), "Tool 'x' not found");
    /// ```
    pub fn new(code: ErrorCode, message: impl Into<String>, context: ErrorContext) -> Self {
        let message = message.into();
        match code {
            ErrorCode::ConnectionFailed => Self::ConnectionFailed { message, context },
            ErrorCode::InitializationFailed => Self::InitializationFailed { message, context },
            ErrorCode::ToolNotFound => Self::ToolNotFound { message, context },
            ErrorCode::ToolCallFailed => Self::ToolCallFailed { message, context },
            ErrorCode::ValidationFailed => Self::ValidationFailed { message, context },
            ErrorCode::AssertionFailed => Self::AssertionFailed { message, context },
            ErrorCode::Timeout => Self::Timeout { message, context },
            ErrorCode::NotConnected => Self::NotConnected { message, context },
            ErrorCode::AlreadyConnected => Self::AlreadyConnected { message, context },
            ErrorCode::ResourceNotFound => Self::ResourceNotFound { message, context },
            ErrorCode::PromptNotFound => Self::PromptNotFound { message, context },
        }
    }

    /// The error raised by every façade method when no session exists.
    pub fn not_connected() -> Self {
        Self::new(
            ErrorCode::NotConnected,
            NOT_CONNECTED_MESSAGE,
            ErrorContext::new().with("suggestion", "Call connect() before issuing requests"),
        )
    }

    /// The error raised by `connect()` when a session already exists.
    pub fn already_connected() -> Self {
        Self::new(
            ErrorCode::AlreadyConnected,
            ALREADY_CONNECTED_MESSAGE,
            ErrorContext::new().with(
                "suggestion",
                "Call disconnect() before connecting again, or create a new client",
            ),
        )
    }

    /// An assertion failure with the given message and context.
    pub fn assertion(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorCode::AssertionFailed, message, context)
    }

    /// An ingestion-time validation failure.
    pub fn validation(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorCode::ValidationFailed, message, context)
    }

    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::InitializationFailed { .. } => ErrorCode::InitializationFailed,
            Self::ToolNotFound { .. } => ErrorCode::ToolNotFound,
            Self::ToolCallFailed { .. } => ErrorCode::ToolCallFailed,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::AssertionFailed { .. } => ErrorCode::AssertionFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::NotConnected { .. } => ErrorCode::NotConnected,
            Self::AlreadyConnected { .. } => ErrorCode::AlreadyConnected,
            Self::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,
            Self::PromptNotFound { .. } => ErrorCode::PromptNotFound,
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        let (message, _) = self.parts();
        message
    }

    /// The diagnostic context map.
    pub fn context(&self) -> &ErrorContext {
        let (_, context) = self.parts();
        context
    }

    fn parts(&self) -> (&str, &ErrorContext) {
        match self {
            Self::ConnectionFailed { message, context }
            | Self::InitializationFailed { message, context }
            | Self::ToolNotFound { message, context }
            | Self::ToolCallFailed { message, context }
            | Self::ValidationFailed { message, context }
            | Self::AssertionFailed { message, context }
            | Self::Timeout { message, context }
            | Self::NotConnected { message, context }
            | Self::AlreadyConnected { message, context }
            | Self::ResourceNotFound { message, context }
            | Self::PromptNotFound { message, context } => (message, context),
        }
    }
}

/// Failures inside the protocol session layer (`crate::mcp`).
///
/// These travel as `anyhow::Error` through the session layer and are
/// reclassified into [`McpTestError`] by [`classify`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// Process spawn, pipe, or channel failure.
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// No response arrived within the request timeout.
    #[error("MCP timeout waiting for response to '{method}' after {timeout_ms}ms")]
    Timeout {
        /// The JSON-RPC method that timed out.
        method: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The server answered with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Server-supplied error message.
        message: String,
    },

    /// The server selected a protocol revision this client does not speak.
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    ProtocolVersion {
        /// The versions this client accepts.
        expected: Vec<String>,
        /// The version the server selected.
        got: String,
    },

    /// A message could not be serialized or a response did not deserialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for test-client operations.
pub type Result<T> = std::result::Result<T, McpTestError>;

/// Reclassify a session-layer failure into the public taxonomy.
///
/// Timeouts always become [`ErrorCode::Timeout`] and malformed responses
/// [`ErrorCode::ValidationFailed`]; everything else takes `fallback`. The
/// original error text is kept under `originalError` and, for RPC errors,
/// the JSON-RPC code under `rpcCode`.
///
/// # Examples
///
/// ```
/// use mcp_testkit::error::{classify, ErrorCode, ErrorContext, SessionError};
///
/// let raw = anyhow::Error::from(SessionError::Timeout {
///     method: "tools/list".into(),
///     timeout_ms: 50,
/// });
/// let err = classify(
///     raw,
///     ErrorCode::ConnectionFailed,
///     "Failed to list tools",
///     ErrorContext::new(),
/// );
/// assert_eq!(err.code(), ErrorCode::Timeout);
/// assert!(err.to_string().contains("Failed to list tools"));
/// ```
pub fn classify(
    error: anyhow::Error,
    fallback: ErrorCode,
    prefix: &str,
    context: ErrorContext,
) -> McpTestError {
    let original = error.to_string();
    let mut context = context.with("originalError", original.clone());

    let code = match error.downcast_ref::<SessionError>() {
        Some(SessionError::Timeout { method, timeout_ms }) => {
            context = context
                .with("method", method.clone())
                .with("timeoutMs", *timeout_ms)
                .with(
                    "suggestion",
                    "Increase the client timeout or check that the server is responsive",
                );
            ErrorCode::Timeout
        }
        Some(SessionError::Serialization(_)) => {
            context = context.with(
                "suggestion",
                "The server response does not match the MCP schema",
            );
            ErrorCode::ValidationFailed
        }
        Some(SessionError::Rpc { code, .. }) => {
            context = context.with("rpcCode", *code);
            fallback
        }
        _ => fallback,
    };

    McpTestError::new(code, format!("{prefix}: {original}"), context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_message_is_fixed() {
        let err = McpTestError::not_connected();
        assert_eq!(err.code(), ErrorCode::NotConnected);
        assert_eq!(err.to_string(), NOT_CONNECTED_MESSAGE);
        assert!(err.context().suggestion().is_some());
    }

    #[test]
    fn test_already_connected_message_contains_contract_text() {
        let err = McpTestError::already_connected();
        assert_eq!(err.code(), ErrorCode::AlreadyConnected);
        assert!(err.to_string().contains("Already connected to server"));
    }

    #[test]
    fn test_new_maps_every_code_to_matching_variant() {
        let codes = [
            ErrorCode::ConnectionFailed,
            ErrorCode::InitializationFailed,
            ErrorCode::ToolNotFound,
            ErrorCode::ToolCallFailed,
            ErrorCode::ValidationFailed,
            ErrorCode::AssertionFailed,
            ErrorCode::Timeout,
            ErrorCode::NotConnected,
            ErrorCode::AlreadyConnected,
            ErrorCode::ResourceNotFound,
            ErrorCode::PromptNotFound,
        ];
        for code in codes {
            let err = McpTestError::new(code, "msg", ErrorContext::new());
            assert_eq!(err.code(), code);
            assert_eq!(err.message(), "msg");
        }
    }

    #[test]
    fn test_error_code_serializes_screaming_snake_case() {
        let s = serde_json::to_string(&ErrorCode::PromptNotFound).unwrap();
        assert_eq!(s, "\"PROMPT_NOT_FOUND\"");
        assert_eq!(ErrorCode::PromptNotFound.as_str(), "PROMPT_NOT_FOUND");
    }

    #[test]
    fn test_context_is_sorted_and_typed() {
        let ctx = ErrorContext::new().with("b", 2).with("a", "one");
        let keys: Vec<&String> = ctx.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(ctx.get_str("a"), Some("one"));
        assert_eq!(ctx.get("b"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_classify_timeout_overrides_fallback() {
        let raw = anyhow::Error::from(SessionError::Timeout {
            method: "tools/call".into(),
            timeout_ms: 100,
        });
        let err = classify(
            raw,
            ErrorCode::ToolCallFailed,
            "Tool 'slow' call failed",
            ErrorContext::new().with("toolName", "slow"),
        );
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.context().get_str("toolName"), Some("slow"));
        assert_eq!(err.context().get_str("method"), Some("tools/call"));
    }

    #[test]
    fn test_classify_rpc_error_keeps_fallback_and_original_message() {
        let raw = anyhow::Error::from(SessionError::Rpc {
            code: -32602,
            message: "Unknown tool: nope".into(),
        });
        let err = classify(
            raw,
            ErrorCode::ToolCallFailed,
            "Tool 'nope' call failed",
            ErrorContext::new(),
        );
        assert_eq!(err.code(), ErrorCode::ToolCallFailed);
        assert!(err.to_string().contains("Unknown tool: nope"));
        assert_eq!(err.context().get("rpcCode"), Some(&serde_json::json!(-32602)));
        assert!(err
            .context()
            .get_str("originalError")
            .unwrap()
            .contains("Unknown tool: nope"));
    }

    #[test]
    fn test_classify_serialization_is_validation_failure() {
        let json_error = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let raw = anyhow::Error::from(SessionError::from(json_error));
        let err = classify(
            raw,
            ErrorCode::ConnectionFailed,
            "Failed to list tools",
            ErrorContext::new(),
        );
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[test]
    fn test_classify_foreign_error_uses_fallback() {
        let raw = anyhow::anyhow!("something else broke");
        let err = classify(
            raw,
            ErrorCode::ConnectionFailed,
            "Failed",
            ErrorContext::new(),
        );
        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
        assert_eq!(err.to_string(), "Failed: something else broke");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpTestError>();
        assert_send_sync::<SessionError>();
    }
}
