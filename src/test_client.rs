//! Test client for stdio MCP servers
//!
//! [`McpTestClient`] owns one server subprocess at a time. It spawns the
//! configured command, performs the MCP handshake, and exposes the server's
//! tools, resources and prompts as typed async methods.
//!
//! Every failure is reported as an [`McpTestError`] with a stable
//! [`ErrorCode`]; raw session errors never escape. The original error text is
//! kept in the error context under `originalError`.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |                  |
//!      +------- failure ----------+                  |
//!      +------------------ disconnect() -------------+
//! ```
//!
//! `connect` and `disconnect` take `&mut self`, so two lifecycle calls can
//! never overlap on one client. Request methods take `&self` and may run
//! concurrently; responses are correlated by request id.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{classify, ErrorCode, ErrorContext, McpTestError, Result};
use crate::mcp::session::Session;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolResult, ContentItem, GetPromptResult, Implementation, Prompt, ReadResourceResult,
    Resource, ResourceTemplate, ServerCapabilities, Tool,
};
use crate::validation;

/// Where a client is in its lifecycle.
#[derive(Debug, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// A `connect()` call is spawning the server or negotiating.
    Connecting,
    Connected(Box<Connected>),
}

/// Holds the client in `Connecting` and falls back to `Disconnected` when
/// the handshake future is dropped before it settles.
struct ConnectingGuard<'a> {
    state: &'a mut ConnectionState,
}

impl<'a> ConnectingGuard<'a> {
    fn enter(state: &'a mut ConnectionState) -> Self {
        *state = ConnectionState::Connecting;
        Self { state }
    }

    fn settle(self, next: ConnectionState) {
        *self.state = next;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if matches!(self.state, ConnectionState::Connecting) {
            *self.state = ConnectionState::Disconnected;
        }
    }
}

/// State held while a session is live. Populated all at once when the
/// handshake succeeds.
#[derive(Debug)]
pub struct Connected {
    session: Session,
    server_info: Implementation,
    server_capabilities: ServerCapabilities,
}

impl Connected {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server_capabilities
    }
}

/// What [`McpTestClient::expect_tool_call_success`] extracted from a result.
///
/// Extraction is a best-effort convenience: when the result holds exactly
/// one text item whose first character is `{` or `[`, the text is parsed as
/// JSON. Text that fails to parse is returned unchanged. Any other shape
/// yields the whole result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Json(Value),
    Text(String),
    Result(CallToolResult),
}

impl ToolPayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ToolPayload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolPayload::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&CallToolResult> {
        match self {
            ToolPayload::Result(r) => Some(r),
            _ => None,
        }
    }

    fn extract(result: CallToolResult) -> Self {
        if let [ContentItem::Text { text }] = result.content.as_slice() {
            if text.starts_with('{') || text.starts_with('[') {
                if let Ok(json) = serde_json::from_str::<Value>(text) {
                    return ToolPayload::Json(json);
                }
            }
            return ToolPayload::Text(text.clone());
        }
        ToolPayload::Result(result)
    }
}

/// A client driving one MCP server subprocess.
///
/// # Examples
///
/// ```no_run
/// use mcp_testkit::config::ClientConfig;
/// use mcp_testkit::test_client::McpTestClient;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_testkit::error::Result<()> {
/// let mut client = McpTestClient::new(
///     ClientConfig::builder("node").arg("dist/server.js").build(),
/// );
/// client.connect().await?;
///
/// client.expect_tool_exists("echo").await?;
/// let result = client
///     .call_tool("echo", Some(serde_json::json!({ "message": "Hello" })))
///     .await?;
/// assert_eq!(result.first_text(), Some("Hello"));
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct McpTestClient {
    config: ClientConfig,
    state: ConnectionState,
}

impl McpTestClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Server identity from the handshake. `None` while disconnected.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.connected().map(|c| &c.server_info)
    }

    /// Server capabilities from the handshake. `None` while disconnected.
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.connected().map(|c| &c.server_capabilities)
    }

    fn connected(&self) -> Option<&Connected> {
        match &self.state {
            ConnectionState::Connected(c) => Some(c),
            _ => None,
        }
    }

    /// The live session, for protocol details the façade does not cover.
    pub fn session(&self) -> Result<&Session> {
        self.connected()
            .map(|c| &c.session)
            .ok_or_else(McpTestError::not_connected)
    }

    /// Spawn the server and perform the handshake.
    ///
    /// # Errors
    ///
    /// - `ALREADY_CONNECTED` when a session is live
    /// - `VALIDATION_FAILED` when the configuration is unusable
    /// - `CONNECTION_FAILED` when the process cannot be spawned
    /// - `INITIALIZATION_FAILED` when the handshake is rejected
    /// - `TIMEOUT` when the handshake does not finish in time
    ///
    /// On failure the client is back in `Disconnected` and no child process
    /// is left running.
    pub async fn connect(&mut self) -> Result<()> {
        if !matches!(self.state, ConnectionState::Disconnected) {
            return Err(McpTestError::already_connected());
        }
        self.config.validate()?;

        let spawned = StdioTransport::spawn(
            self.config.command(),
            self.config.args(),
            self.config.effective_env(),
            self.config.working_dir(),
        );
        let transport = match spawned {
            Ok(t) => t,
            Err(e) => {
                return Err(classify(
                    e,
                    ErrorCode::ConnectionFailed,
                    "Failed to connect to MCP server",
                    self.command_context().with(
                        "suggestion",
                        "Check that the server command exists and is executable",
                    ),
                ));
            }
        };

        self.attach(Arc::new(transport)).await
    }

    /// Negotiate a session over an already opened transport.
    pub(crate) async fn attach(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        let connecting = ConnectingGuard::enter(&mut self.state);
        let started = Session::start(
            transport,
            self.config.client_info().clone(),
            self.config.capabilities().clone(),
            self.config.timeout(),
        )
        .await;

        match started {
            Ok(session) => {
                let connected = Connected {
                    server_info: session.server_info().clone(),
                    server_capabilities: session.server_capabilities().clone(),
                    session,
                };
                tracing::info!(
                    command = %self.config.command(),
                    server = %connected.server_info.name,
                    version = %connected.server_info.version,
                    "connected to MCP server"
                );
                connecting.settle(ConnectionState::Connected(Box::new(connected)));
                Ok(())
            }
            Err(e) => {
                connecting.settle(ConnectionState::Disconnected);
                Err(classify(
                    e,
                    ErrorCode::InitializationFailed,
                    "Failed to initialize MCP session",
                    self.command_context().with(
                        "suggestion",
                        "Check that the server speaks MCP over stdio and writes nothing else to stdout",
                    ),
                ))
            }
        }
    }

    fn command_context(&self) -> ErrorContext {
        ErrorContext::new()
            .with("command", self.config.command())
            .with("args", self.config.args().to_vec())
    }

    /// Close the session and terminate the server.
    ///
    /// Safe to call when already disconnected. Errors while closing are
    /// logged and swallowed; the child is always reaped.
    pub async fn disconnect(&mut self) -> Result<()> {
        let state = std::mem::take(&mut self.state);
        let ConnectionState::Connected(connected) = state else {
            tracing::debug!("disconnect called without a live session");
            return Ok(());
        };

        let Connected {
            session,
            server_info,
            ..
        } = *connected;
        if let Err(e) = session.close().await {
            tracing::warn!(
                server = %server_info.name,
                error = %e,
                "error while closing MCP session"
            );
        }
        tracing::info!(server = %server_info.name, "disconnected from MCP server");
        Ok(())
    }

    /// All tools the server declares, in server order.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let session = self.session()?;
        let tools = session.protocol().list_tools().await.map_err(|e| {
            classify(e, ErrorCode::ConnectionFailed, "Failed to list tools", ErrorContext::new())
        })?;
        validation::validate_tools(&tools)?;
        tracing::debug!(count = tools.len(), "listed tools");
        Ok(tools)
    }

    /// Invoke a tool. `params` defaults to `{}`.
    ///
    /// # Errors
    ///
    /// `TOOL_CALL_FAILED` when the request fails or the server answers with
    /// `isError: true`. A returned result never has `isError` set.
    pub async fn call_tool(&self, name: &str, params: Option<Value>) -> Result<CallToolResult> {
        let params = params.unwrap_or_else(|| serde_json::json!({}));
        let result = self.invoke_tool(name, &params).await?;

        if result.is_error() {
            let text = result.joined_text();
            return Err(McpTestError::new(
                ErrorCode::ToolCallFailed,
                format!("Tool '{}' returned an error: {}", name, text),
                ErrorContext::new()
                    .with("toolName", name)
                    .with("params", params)
                    .with("errorText", text)
                    .with("suggestion", "Inspect the tool's error content for the cause"),
            ));
        }
        Ok(result)
    }

    /// `tools/call` with transport failures classified and `isError`
    /// results passed through.
    async fn invoke_tool(&self, name: &str, params: &Value) -> Result<CallToolResult> {
        let session = self.session()?;
        tracing::debug!(tool = %name, "calling tool");
        session
            .protocol()
            .call_tool(name, params.clone())
            .await
            .map_err(|e| {
                classify(
                    e,
                    ErrorCode::ToolCallFailed,
                    &format!("Tool '{}' call failed", name),
                    ErrorContext::new()
                        .with("toolName", name)
                        .with("params", params.clone())
                        .with("suggestion", "Check the tool name and its input schema"),
                )
            })
    }

    /// All resources the server declares, in server order.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let session = self.session()?;
        let resources = session.protocol().list_resources().await.map_err(|e| {
            classify(
                e,
                ErrorCode::ConnectionFailed,
                "Failed to list resources",
                ErrorContext::new(),
            )
        })?;
        validation::validate_resources(&resources)?;
        Ok(resources)
    }

    /// All resource templates the server declares, in server order.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let session = self.session()?;
        session
            .protocol()
            .list_resource_templates()
            .await
            .map_err(|e| {
                classify(
                    e,
                    ErrorCode::ConnectionFailed,
                    "Failed to list resource templates",
                    ErrorContext::new(),
                )
            })
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let session = self.session()?;
        tracing::debug!(%uri, "reading resource");
        session.protocol().read_resource(uri).await.map_err(|e| {
            classify(
                e,
                ErrorCode::ResourceNotFound,
                &format!("Failed to read resource '{}'", uri),
                ErrorContext::new()
                    .with("uri", uri)
                    .with("suggestion", "Check the URI against list_resources()"),
            )
        })
    }

    /// All prompts the server declares, in server order.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let session = self.session()?;
        let prompts = session.protocol().list_prompts().await.map_err(|e| {
            classify(
                e,
                ErrorCode::ConnectionFailed,
                "Failed to list prompts",
                ErrorContext::new(),
            )
        })?;
        validation::validate_prompts(&prompts)?;
        Ok(prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        let session = self.session()?;
        tracing::debug!(prompt = %name, "getting prompt");
        session
            .protocol()
            .get_prompt(name, arguments)
            .await
            .map_err(|e| {
                classify(
                    e,
                    ErrorCode::PromptNotFound,
                    &format!("Failed to get prompt '{}'", name),
                    ErrorContext::new()
                        .with("promptName", name)
                        .with("suggestion", "Check the prompt name and required arguments"),
                )
            })
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        let session = self.session()?;
        session.protocol().ping().await.map_err(|e| {
            classify(e, ErrorCode::ConnectionFailed, "Ping failed", ErrorContext::new())
        })
    }

    /// Find a tool by exact name.
    ///
    /// # Errors
    ///
    /// `TOOL_NOT_FOUND` with message
    /// `Tool '<name>' not found. Available tools: a, b` (or `none`).
    pub async fn expect_tool_exists(&self, name: &str) -> Result<Tool> {
        let tools = self.list_tools().await?;
        find_or_report(
            tools,
            |t| t.name.as_str(),
            name,
            ErrorCode::ToolNotFound,
            "Tool",
            "tools",
            "toolName",
        )
    }

    /// Find a resource by exact URI.
    pub async fn expect_resource_exists(&self, uri: &str) -> Result<Resource> {
        let resources = self.list_resources().await?;
        find_or_report(
            resources,
            |r| r.uri.as_str(),
            uri,
            ErrorCode::ResourceNotFound,
            "Resource",
            "resources",
            "uri",
        )
    }

    /// Find a prompt by exact name.
    pub async fn expect_prompt_exists(&self, name: &str) -> Result<Prompt> {
        let prompts = self.list_prompts().await?;
        find_or_report(
            prompts,
            |p| p.name.as_str(),
            name,
            ErrorCode::PromptNotFound,
            "Prompt",
            "prompts",
            "promptName",
        )
    }

    /// Call a tool that is expected to succeed and extract its payload.
    ///
    /// # Errors
    ///
    /// `ASSERTION_FAILED` when the server answers with `isError: true`;
    /// `TOOL_CALL_FAILED` or `TIMEOUT` when the call itself fails.
    pub async fn expect_tool_call_success(
        &self,
        name: &str,
        params: Option<Value>,
    ) -> Result<ToolPayload> {
        let params = params.unwrap_or_else(|| serde_json::json!({}));
        let result = self.invoke_tool(name, &params).await?;

        if result.is_error() {
            return Err(McpTestError::assertion(
                format!(
                    "Expected tool '{}' to succeed, but it returned an error: {}",
                    name,
                    result.joined_text()
                ),
                ErrorContext::new()
                    .with("toolName", name)
                    .with("params", params)
                    .with("result", serde_json::to_value(&result).unwrap_or(Value::Null)),
            ));
        }
        Ok(ToolPayload::extract(result))
    }

    /// Call a tool that is expected to fail and return the failure.
    ///
    /// Any error from [`McpTestClient::call_tool`] counts as the expected
    /// failure. That includes `isError: true` results, which `call_tool`
    /// already raises as `TOOL_CALL_FAILED`.
    ///
    /// # Errors
    ///
    /// `ASSERTION_FAILED` with message
    /// `Expected tool '<name>' to fail, but it succeeded` when the call
    /// succeeds.
    pub async fn expect_tool_call_error(
        &self,
        name: &str,
        params: Option<Value>,
    ) -> Result<McpTestError> {
        let params = params.unwrap_or_else(|| serde_json::json!({}));
        match self.call_tool(name, Some(params.clone())).await {
            Err(e) => Ok(e),
            Ok(result) => Err(McpTestError::assertion(
                format!("Expected tool '{}' to fail, but it succeeded", name),
                ErrorContext::new()
                    .with("toolName", name)
                    .with("params", params)
                    .with("result", serde_json::to_value(&result).unwrap_or(Value::Null)),
            )),
        }
    }
}

/// Linear search by exact key; on a miss, list every available key in
/// declaration order.
fn find_or_report<T>(
    items: Vec<T>,
    key: impl Fn(&T) -> &str,
    wanted: &str,
    code: ErrorCode,
    noun: &str,
    plural: &str,
    context_key: &str,
) -> Result<T> {
    let position = items.iter().position(|item| key(item) == wanted);
    match position {
        Some(index) => {
            let mut items = items;
            Ok(items.swap_remove(index))
        }
        None => {
            let available: Vec<String> = items.iter().map(|i| key(i).to_string()).collect();
            let listed = if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            };
            Err(McpTestError::new(
                code,
                format!(
                    "{} '{}' not found. Available {}: {}",
                    noun, wanted, plural, listed
                ),
                ErrorContext::new()
                    .with(context_key, wanted)
                    .with("available", available)
                    .with("suggestion", format!("Use one of the declared {}", plural)),
            ))
        }
    }
}

/// Connect a fresh client, run `body`, and always disconnect.
///
/// # Examples
///
/// ```no_run
/// use mcp_testkit::config::ClientConfig;
/// use mcp_testkit::test_client::with_connected;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_testkit::error::Result<()> {
/// let names = with_connected(ClientConfig::new("./my-server"), |client| {
///     Box::pin(async move {
///         let tools = client.list_tools().await?;
///         Ok(tools.into_iter().map(|t| t.name).collect::<Vec<_>>())
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_connected<T, F>(config: ClientConfig, body: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a McpTestClient) -> BoxFuture<'a, Result<T>>,
{
    let mut client = McpTestClient::new(config);
    client.connect().await?;
    let outcome = body(&client).await;
    client.disconnect().await?;
    outcome
}
