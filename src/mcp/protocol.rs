//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! Two types represent the two phases of a session:
//!
//! - [`McpProtocol`] -- not yet negotiated. [`McpProtocol::initialize`]
//!   performs the `initialize` / `notifications/initialized` handshake.
//! - [`InitializedMcpProtocol`] -- negotiated. Exposes `tools/*`,
//!   `resources/*`, `prompts/*` and `ping` as typed async methods.
//!
//! List methods follow `nextCursor` until the server stops returning one and
//! hand back the accumulated items in wire order.
//!
//! Neither type owns a transport; [`crate::mcp::session::Session`] wires one
//! up and passes the resulting [`JsonRpcClient`] into [`McpProtocol::new`].

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::error::SessionError;
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResult, ClientCapabilities, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResponse, ListPromptsResponse,
    ListResourceTemplatesResponse, ListResourcesResponse, ListToolsResponse, PaginatedParams,
    Prompt, ReadResourceParams, ReadResourceResult, Resource, ResourceTemplate, Tool,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_RESOURCES_TEMPLATES_LIST, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Identifies a capability a server may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    Tools,
    Resources,
    Prompts,
    Logging,
    Completions,
    Experimental,
}

impl ServerCapabilityFlag {
    /// The key under which the capability appears in `capabilities`.
    pub fn key(self) -> &'static str {
        match self {
            ServerCapabilityFlag::Tools => "tools",
            ServerCapabilityFlag::Resources => "resources",
            ServerCapabilityFlag::Prompts => "prompts",
            ServerCapabilityFlag::Logging => "logging",
            ServerCapabilityFlag::Completions => "completions",
            ServerCapabilityFlag::Experimental => "experimental",
        }
    }
}

/// One page of a paginated list response.
trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListToolsResponse {
    type Item = Tool;
    fn into_parts(self) -> (Vec<Tool>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Page for ListResourcesResponse {
    type Item = Resource;
    fn into_parts(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

impl Page for ListResourceTemplatesResponse {
    type Item = ResourceTemplate;
    fn into_parts(self) -> (Vec<ResourceTemplate>, Option<String>) {
        (self.resource_templates, self.next_cursor)
    }
}

impl Page for ListPromptsResponse {
    type Item = Prompt;
    fn into_parts(self) -> (Vec<Prompt>, Option<String>) {
        (self.prompts, self.next_cursor)
    }
}

/// An MCP session that has not completed the handshake.
///
/// # Examples
///
/// ```
/// use tokio::sync::mpsc;
/// use mcp_testkit::mcp::client::JsonRpcClient;
/// use mcp_testkit::mcp::protocol::McpProtocol;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _proto = McpProtocol::new(JsonRpcClient::new(tx));
/// ```
#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
}

impl McpProtocol {
    /// Wrap a channel-wired client. The caller must already have started
    /// [`crate::mcp::client::start_read_loop`] on a shared clone.
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// Requests [`LATEST_PROTOCOL_VERSION`] and accepts any version in
    /// [`SUPPORTED_PROTOCOL_VERSIONS`].
    ///
    /// # Errors
    ///
    /// [`SessionError::ProtocolVersion`] when the server selects an
    /// unsupported revision; otherwise whatever [`JsonRpcClient::request`]
    /// raises.
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                None,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(SessionError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        tracing::debug!(
            server = %response.server_info.name,
            version = %response.server_info.version,
            protocol = %response.protocol_version,
            "handshake complete"
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: JsonRpcClient,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Whether the server advertised `capability` during the handshake.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        self.initialize_response.capabilities.has(capability.key())
    }

    async fn collect_pages<P: Page>(&self, method: &str) -> Result<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let page: P = self
                .client
                .request(method, PaginatedParams { cursor }, None)
                .await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);

            match next {
                Some(c) if !c.is_empty() => {
                    if !seen.insert(c.clone()) {
                        return Err(SessionError::Transport(format!(
                            "server repeated pagination cursor '{}' for {}",
                            c, method
                        ))
                        .into());
                    }
                    cursor = Some(c);
                }
                _ => break,
            }
        }

        Ok(items)
    }

    /// All tools, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.collect_pages::<ListToolsResponse>(METHOD_TOOLS_LIST)
            .await
    }

    /// Invoke a named tool. The result is returned as-is, including
    /// `isError: true` results.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                    meta: None,
                },
                None,
            )
            .await
    }

    /// All resources, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.collect_pages::<ListResourcesResponse>(METHOD_RESOURCES_LIST)
            .await
    }

    /// All resource templates, following pagination.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        self.collect_pages::<ListResourceTemplatesResponse>(METHOD_RESOURCES_TEMPLATES_LIST)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await
    }

    /// All prompts, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.collect_pages::<ListPromptsResponse>(METHOD_PROMPTS_LIST)
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.client
            .request(
                METHOD_PROMPTS_GET,
                GetPromptParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Send a `ping` and wait for the empty reply.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(METHOD_PING, serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}
