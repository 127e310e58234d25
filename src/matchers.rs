//! Assertion predicates for MCP tests
//!
//! Each predicate accepts either a connected [`McpTestClient`] or a list
//! fetched earlier, through the [`ToolSource`], [`ResourceSource`] and
//! [`PromptSource`] traits. Failures are returned as
//! [`ErrorCode::AssertionFailed`](crate::error::ErrorCode) errors, so a test
//! can use `?` or `unwrap()` as it prefers.
//!
//! ```no_run
//! use mcp_testkit::matchers::{assert_has_tool, assert_tool_result_contains};
//! # async fn demo(client: &mcp_testkit::test_client::McpTestClient) -> mcp_testkit::error::Result<()> {
//! assert_has_tool(client, "echo").await?;
//!
//! let tools = client.list_tools().await?;
//! assert_has_tool(&tools, "add").await?;
//!
//! let result = client.call_tool("echo", Some(serde_json::json!({ "message": "hi" }))).await?;
//! assert_tool_result_contains(&result, "hi")?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::{ErrorContext, McpTestError, Result};
use crate::mcp::types::{CallToolResult, ContentItem, Prompt, Resource, Tool};
use crate::test_client::McpTestClient;

/// Anything that can produce a tool list.
#[async_trait]
pub trait ToolSource: Sync {
    async fn tools(&self) -> Result<Vec<Tool>>;
}

/// Anything that can produce a resource list.
#[async_trait]
pub trait ResourceSource: Sync {
    async fn resources(&self) -> Result<Vec<Resource>>;
}

/// Anything that can produce a prompt list.
#[async_trait]
pub trait PromptSource: Sync {
    async fn prompts(&self) -> Result<Vec<Prompt>>;
}

#[async_trait]
impl ToolSource for McpTestClient {
    async fn tools(&self) -> Result<Vec<Tool>> {
        self.list_tools().await
    }
}

#[async_trait]
impl ToolSource for [Tool] {
    async fn tools(&self) -> Result<Vec<Tool>> {
        Ok(self.to_vec())
    }
}

#[async_trait]
impl ToolSource for Vec<Tool> {
    async fn tools(&self) -> Result<Vec<Tool>> {
        Ok(self.clone())
    }
}

#[async_trait]
impl ResourceSource for McpTestClient {
    async fn resources(&self) -> Result<Vec<Resource>> {
        self.list_resources().await
    }
}

#[async_trait]
impl ResourceSource for [Resource] {
    async fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.to_vec())
    }
}

#[async_trait]
impl ResourceSource for Vec<Resource> {
    async fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.clone())
    }
}

#[async_trait]
impl PromptSource for McpTestClient {
    async fn prompts(&self) -> Result<Vec<Prompt>> {
        self.list_prompts().await
    }
}

#[async_trait]
impl PromptSource for [Prompt] {
    async fn prompts(&self) -> Result<Vec<Prompt>> {
        Ok(self.to_vec())
    }
}

#[async_trait]
impl PromptSource for Vec<Prompt> {
    async fn prompts(&self) -> Result<Vec<Prompt>> {
        Ok(self.clone())
    }
}

fn names_or_none<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let joined = names.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

/// The tool named `name`.
pub async fn assert_has_tool<S>(source: &S, name: &str) -> Result<Tool>
where
    S: ToolSource + ?Sized,
{
    let tools = source.tools().await?;
    let available = names_or_none(tools.iter().map(|t| t.name.as_str()));
    tools.into_iter().find(|t| t.name == name).ok_or_else(|| {
        McpTestError::assertion(
            format!("Expected tool '{}' to exist. Available tools: {}", name, available),
            ErrorContext::new().with("toolName", name),
        )
    })
}

/// Every name in `names` is declared. Reports all missing names at once.
pub async fn assert_has_tools<S>(source: &S, names: &[&str]) -> Result<()>
where
    S: ToolSource + ?Sized,
{
    let tools = source.tools().await?;
    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| !tools.iter().any(|t| t.name == *n))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(McpTestError::assertion(
        format!(
            "Expected tools to exist: {}. Available tools: {}",
            missing.join(", "),
            names_or_none(tools.iter().map(|t| t.name.as_str()))
        ),
        ErrorContext::new().with("missing", missing),
    ))
}

/// No tool named `name` is declared.
pub async fn assert_lacks_tool<S>(source: &S, name: &str) -> Result<()>
where
    S: ToolSource + ?Sized,
{
    let tools = source.tools().await?;
    if tools.iter().any(|t| t.name == name) {
        return Err(McpTestError::assertion(
            format!("Expected tool '{}' not to exist", name),
            ErrorContext::new().with("toolName", name),
        ));
    }
    Ok(())
}

/// The tool's input schema lists `param` under `properties`.
pub fn assert_tool_has_param(tool: &Tool, param: &str) -> Result<()> {
    if tool.has_param(param) {
        return Ok(());
    }
    Err(McpTestError::assertion(
        format!("Expected tool '{}' to accept parameter '{}'", tool.name, param),
        ErrorContext::new()
            .with("toolName", tool.name.clone())
            .with("param", param)
            .with("inputSchema", tool.input_schema.clone()),
    ))
}

/// The tool's input schema marks `param` as required.
pub fn assert_tool_requires_param(tool: &Tool, param: &str) -> Result<()> {
    if tool.required_params().contains(&param) {
        return Ok(());
    }
    Err(McpTestError::assertion(
        format!("Expected tool '{}' to require parameter '{}'", tool.name, param),
        ErrorContext::new()
            .with("toolName", tool.name.clone())
            .with("param", param)
            .with("required", tool.required_params()),
    ))
}

/// The resource with URI `uri`.
pub async fn assert_has_resource<S>(source: &S, uri: &str) -> Result<Resource>
where
    S: ResourceSource + ?Sized,
{
    let resources = source.resources().await?;
    let available = names_or_none(resources.iter().map(|r| r.uri.as_str()));
    resources.into_iter().find(|r| r.uri == uri).ok_or_else(|| {
        McpTestError::assertion(
            format!(
                "Expected resource '{}' to exist. Available resources: {}",
                uri, available
            ),
            ErrorContext::new().with("uri", uri),
        )
    })
}

/// The prompt named `name`.
pub async fn assert_has_prompt<S>(source: &S, name: &str) -> Result<Prompt>
where
    S: PromptSource + ?Sized,
{
    let prompts = source.prompts().await?;
    let available = names_or_none(prompts.iter().map(|p| p.name.as_str()));
    prompts.into_iter().find(|p| p.name == name).ok_or_else(|| {
        McpTestError::assertion(
            format!(
                "Expected prompt '{}' to exist. Available prompts: {}",
                name, available
            ),
            ErrorContext::new().with("promptName", name),
        )
    })
}

/// The result is not an error and its joined text contains `expected`.
pub fn assert_tool_result_contains(result: &CallToolResult, expected: &str) -> Result<()> {
    let text = result.joined_text();
    if result.is_error() {
        return Err(McpTestError::assertion(
            format!("Expected successful tool result, but got error: {}", text),
            ErrorContext::new().with("text", text),
        ));
    }
    if !text.contains(expected) {
        return Err(McpTestError::assertion(
            format!(
                "Expected tool result to contain '{}', but got '{}'",
                expected, text
            ),
            ErrorContext::new().with("expected", expected).with("text", text),
        ));
    }
    Ok(())
}

/// The result has `isError: true` and its joined text contains `expected`.
pub fn assert_tool_result_error(result: &CallToolResult, expected: &str) -> Result<()> {
    let text = result.joined_text();
    if !result.is_error() {
        return Err(McpTestError::assertion(
            "Expected error tool result, but got success",
            ErrorContext::new().with("text", text),
        ));
    }
    if !text.contains(expected) {
        return Err(McpTestError::assertion(
            format!(
                "Expected error message to contain '{}', but got '{}'",
                expected, text
            ),
            ErrorContext::new().with("expected", expected).with("text", text),
        ));
    }
    Ok(())
}

/// Every content item has the wire type `kind` (`"text"`, `"image"`, ...).
pub fn assert_content_kind(result: &CallToolResult, kind: &str) -> Result<()> {
    let kinds: Vec<&str> = result.content.iter().map(ContentItem::kind).collect();
    if !kinds.is_empty() && kinds.iter().all(|k| *k == kind) {
        return Ok(());
    }
    Err(McpTestError::assertion(
        format!(
            "Expected all content items to be '{}', but got [{}]",
            kind,
            kinds.join(", ")
        ),
        ErrorContext::new().with("kinds", kinds),
    ))
}
