//! Response validation at the ingestion boundary
//!
//! Deserialization already guarantees the shape of every list response. The
//! checks here cover what serde cannot express: a tool's `inputSchema` must
//! describe an object, resource URIs must be absolute URIs, and names must be
//! unique within one listing.
//!
//! All failures are [`ErrorCode::ValidationFailed`](crate::error::ErrorCode).

use std::collections::HashSet;

use url::Url;

use crate::error::{ErrorContext, McpTestError, Result};
use crate::mcp::types::{Prompt, Resource, Tool};

/// Validate one tool definition.
///
/// # Examples
///
/// ```
/// use mcp_testkit::mcp::types::Tool;
/// use mcp_testkit::validation::validate_tool;
///
/// let tool: Tool = serde_json::from_value(serde_json::json!({
///     "name": "echo",
///     "inputSchema": { "type": "object", "properties": { "message": { "type": "string" } } }
/// })).unwrap();
/// assert!(validate_tool(&tool).is_ok());
/// ```
pub fn validate_tool(tool: &Tool) -> Result<()> {
    if tool.name.trim().is_empty() {
        return Err(McpTestError::validation(
            "Tool name cannot be empty",
            ErrorContext::new().with("suggestion", "Every tool must declare a non-empty name"),
        ));
    }

    let schema_error = |detail: &str| {
        McpTestError::validation(
            format!("Tool '{}' has an invalid inputSchema: {}", tool.name, detail),
            ErrorContext::new()
                .with("toolName", tool.name.clone())
                .with("inputSchema", tool.input_schema.clone())
                .with(
                    "suggestion",
                    "inputSchema must be a JSON Schema object with \"type\": \"object\"",
                ),
        )
    };

    let schema = tool
        .input_schema
        .as_object()
        .ok_or_else(|| schema_error("expected a JSON object"))?;

    if let Some(kind) = schema.get("type") {
        if kind != "object" {
            return Err(schema_error("\"type\" must be \"object\""));
        }
    }

    if let Some(properties) = schema.get("properties") {
        if !properties.is_object() {
            return Err(schema_error("\"properties\" must be an object"));
        }
    }

    if let Some(required) = schema.get("required") {
        let all_strings = required
            .as_array()
            .map(|items| items.iter().all(|v| v.is_string()))
            .unwrap_or(false);
        if !all_strings {
            return Err(schema_error("\"required\" must be an array of strings"));
        }
    }

    Ok(())
}

/// Validate a `tools/list` result.
pub fn validate_tools(tools: &[Tool]) -> Result<()> {
    ensure_unique("tool", tools.iter().map(|t| t.name.as_str()))?;
    tools.iter().try_for_each(validate_tool)
}

/// Parse `uri` as an absolute URI.
///
/// # Examples
///
/// ```
/// use mcp_testkit::validation::validate_resource_uri;
///
/// assert!(validate_resource_uri("file:///tmp/a.txt").is_ok());
/// assert!(validate_resource_uri("relative/path").is_err());
/// ```
pub fn validate_resource_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| {
        McpTestError::validation(
            format!("Resource URI '{}' is invalid: {}", uri, e),
            ErrorContext::new()
                .with("uri", uri)
                .with("originalError", e.to_string())
                .with(
                    "suggestion",
                    "Resource URIs must be absolute, e.g. file:///path or scheme://id",
                ),
        )
    })
}

/// Validate a `resources/list` result.
pub fn validate_resources(resources: &[Resource]) -> Result<()> {
    ensure_unique("resource", resources.iter().map(|r| r.uri.as_str()))?;
    for resource in resources {
        validate_resource_uri(&resource.uri)?;
    }
    Ok(())
}

/// Validate a `prompts/list` result.
pub fn validate_prompts(prompts: &[Prompt]) -> Result<()> {
    ensure_unique("prompt", prompts.iter().map(|p| p.name.as_str()))?;
    for prompt in prompts {
        if prompt.name.trim().is_empty() {
            return Err(McpTestError::validation(
                "Prompt name cannot be empty",
                ErrorContext::new()
                    .with("suggestion", "Every prompt must declare a non-empty name"),
            ));
        }
        if let Some(arguments) = &prompt.arguments {
            ensure_unique(
                &format!("argument of prompt '{}'", prompt.name),
                arguments.iter().map(|a| a.name.as_str()),
            )?;
        }
    }
    Ok(())
}

fn ensure_unique<'a>(kind: &str, keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(McpTestError::validation(
                format!("Duplicate {} '{}' in server response", kind, key),
                ErrorContext::new()
                    .with("key", key)
                    .with("suggestion", "The server must not declare the same name twice"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn tool(name: &str, schema: serde_json::Value) -> Tool {
        serde_json::from_value(json!({ "name": name, "inputSchema": schema })).unwrap()
    }

    #[test]
    fn test_minimal_object_schema_is_valid() {
        assert!(validate_tool(&tool("t", json!({ "type": "object" }))).is_ok());
        assert!(validate_tool(&tool("t", json!({}))).is_ok());
    }

    #[test]
    fn test_non_object_schema_rejected() {
        let err = validate_tool(&tool("t", json!("string"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(err.to_string().contains("Tool 't' has an invalid inputSchema"));

        let err = validate_tool(&tool("t", json!({ "type": "array" }))).unwrap_err();
        assert!(err.to_string().contains("\"type\" must be \"object\""));
    }

    #[test]
    fn test_required_must_list_strings() {
        let err =
            validate_tool(&tool("t", json!({ "type": "object", "required": [1] }))).unwrap_err();
        assert!(err.to_string().contains("required"));
        assert_eq!(err.context().get_str("toolName"), Some("t"));
    }

    #[test]
    fn test_empty_tool_name_rejected() {
        assert!(validate_tool(&tool(" ", json!({}))).is_err());
    }

    #[test]
    fn test_duplicate_tool_names_rejected() {
        let tools = vec![tool("a", json!({})), tool("b", json!({})), tool("a", json!({}))];
        let err = validate_tools(&tools).unwrap_err();
        assert!(err.to_string().contains("Duplicate tool 'a'"));
    }

    #[test]
    fn test_resource_uris_must_be_absolute() {
        let ok: Vec<Resource> = serde_json::from_value(json!([
            { "uri": "test://static/greeting", "name": "greeting" },
            { "uri": "file:///tmp/data.txt", "name": "data" }
        ]))
        .unwrap();
        assert!(validate_resources(&ok).is_ok());

        let bad: Vec<Resource> =
            serde_json::from_value(json!([{ "uri": "not a uri", "name": "x" }])).unwrap();
        let err = validate_resources(&bad).unwrap_err();
        assert_eq!(err.context().get_str("uri"), Some("not a uri"));
        assert!(err.context().get_str("originalError").is_some());
    }

    #[test]
    fn test_duplicate_prompt_arguments_rejected() {
        let prompts: Vec<Prompt> = serde_json::from_value(json!([{
            "name": "greet",
            "arguments": [{ "name": "who" }, { "name": "who" }]
        }]))
        .unwrap();
        let err = validate_prompts(&prompts).unwrap_err();
        assert!(err.to_string().contains("argument of prompt 'greet'"));
    }
}
