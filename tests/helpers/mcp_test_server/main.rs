//! MCP test server binary for integration tests
//!
//! A small stdio MCP server. Each line of stdin is one JSON-RPC message and
//! each response is one line on stdout, written through
//! [`ProtocolStdout`]. Diagnostics go to stderr through [`DebugLogger`].
//!
//! # Tools
//!
//! `tools/list` is split into two pages to exercise pagination.
//!
//! - `echo {message}`: the message as a single text item
//! - `add {a, b}`: the sum as text
//! - `fail {message?}`: a result with `isError: true`
//! - `slow {ms?}`: sleeps, then answers `done`
//! - `json`: a JSON object as text, including volatile fields
//! - `env {name}`: the value of an environment variable, or `<unset>`
//! - `multi`: two text items
//!
//! # Resources and prompts
//!
//! - `test://static/greeting` (text), `test://static/config` (JSON)
//! - template `test://items/{id}`
//! - prompts `greet {name}` and `summarize {text?}`
//!
//! # Modes
//!
//! `MCP_TEST_SERVER_MODE` changes the server's behavior:
//!
//! - `bad_version`: answers `initialize` with an unsupported protocol version
//! - `silent`: never answers `initialize`
//! - `crash`: exits before reading anything
//! - `repeat_cursor`: the last `tools/list` page points back at itself

use std::io::{self, BufRead};
use std::time::Duration;

use mcp_testkit::logger::{DebugLogger, ProtocolStdout};
use serde_json::{json, Value};

const MODE_VAR: &str = "MCP_TEST_SERVER_MODE";

const TOOLS_PAGE_CURSOR: &str = "page-2";

fn main() {
    let log = DebugLogger::new("mcp-test-server");
    let mode = std::env::var(MODE_VAR).unwrap_or_default();

    if mode == "crash" {
        log.error("crash mode: exiting immediately");
        std::process::exit(3);
    }

    let mut out = match ProtocolStdout::open() {
        Ok(out) => out,
        Err(e) => {
            log.error(format_args!("cannot claim stdout: {}", e));
            std::process::exit(1);
        }
    };
    let label = if mode.is_empty() { "normal" } else { mode.as_str() };
    log.info(format_args!("started (mode: {})", label));

    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                log.warn(format_args!("parse error: {}", e));
                let response = error_response(&Value::Null, -32700, "Parse error");
                if out.write_message(&response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        log.debug(format_args!("<- {} (id {})", method, id));

        // Notifications and responses to our own requests need no answer.
        if id.is_null() || method.is_empty() {
            continue;
        }

        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let response = match method {
            "initialize" if mode == "silent" => continue,
            "initialize" => initialize(&id, &mode),
            "ping" => result_response(&id, json!({})),
            "tools/list" => tools_list(&id, &params, &mode),
            "tools/call" => tools_call(&id, &params),
            "resources/list" => resources_list(&id),
            "resources/templates/list" => resource_templates_list(&id),
            "resources/read" => resources_read(&id, &params),
            "prompts/list" => prompts_list(&id),
            "prompts/get" => prompts_get(&id, &params),
            _ => error_response(&id, -32601, &format!("Method not found: {}", method)),
        };

        if let Err(e) = out.write_message(&response) {
            log.error(format_args!("failed to write response: {}", e));
            break;
        }
    }

    log.info("stdin closed; shutting down");
    if let Err(e) = out.close() {
        log.error(format_args!("failed to flush stdout: {}", e));
    }
}

fn result_response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

fn initialize(id: &Value, mode: &str) -> Value {
    let version = if mode == "bad_version" {
        "1999-01-01"
    } else {
        "2025-11-25"
    };
    result_response(
        id,
        json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": {},
                "prompts": {}
            },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" },
            "instructions": "Test server for mcp-testkit"
        }),
    )
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

fn tools_list(id: &Value, params: &Value, mode: &str) -> Value {
    let second_page = params.get("cursor").and_then(Value::as_str) == Some(TOOLS_PAGE_CURSOR);

    if !second_page {
        return result_response(
            id,
            json!({
                "tools": [
                    tool(
                        "echo",
                        "Echoes input",
                        json!({ "message": { "type": "string" } }),
                        &["message"],
                    ),
                    tool(
                        "add",
                        "Adds two numbers",
                        json!({ "a": { "type": "number" }, "b": { "type": "number" } }),
                        &["a", "b"],
                    ),
                    tool("fail", "Always fails", json!({ "message": { "type": "string" } }), &[]),
                    tool(
                        "slow",
                        "Sleeps before answering",
                        json!({ "ms": { "type": "integer" } }),
                        &[],
                    ),
                ],
                "nextCursor": TOOLS_PAGE_CURSOR
            }),
        );
    }

    let mut page = json!({
        "tools": [
            tool("json", "Returns a JSON document", json!({}), &[]),
            tool(
                "env",
                "Reads an environment variable",
                json!({ "name": { "type": "string" } }),
                &["name"],
            ),
            tool("multi", "Returns two text items", json!({}), &[]),
        ]
    });
    if mode == "repeat_cursor" {
        page["nextCursor"] = json!(TOOLS_PAGE_CURSOR);
    }
    result_response(id, page)
}

fn tools_call(id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let result = match name {
        "echo" => text_result(args.get("message").and_then(Value::as_str).unwrap_or("")),
        "add" => {
            let a = args.get("a").and_then(Value::as_f64);
            let b = args.get("b").and_then(Value::as_f64);
            match (a, b) {
                (Some(a), Some(b)) => text_result((a + b).to_string()),
                _ => return error_response(id, -32602, "add requires numeric 'a' and 'b'"),
            }
        }
        "fail" => json!({
            "content": [{
                "type": "text",
                "text": args.get("message").and_then(Value::as_str).unwrap_or("Intentional failure")
            }],
            "isError": true
        }),
        "slow" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(2_000);
            std::thread::sleep(Duration::from_millis(ms));
            text_result("done")
        }
        "json" => {
            let document = json!({
                "status": "ok",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "requestId": id,
                "items": [
                    { "id": 1, "name": "alpha" },
                    { "id": 2, "name": "beta" }
                ]
            });
            text_result(document.to_string())
        }
        "env" => {
            let var = args.get("name").and_then(Value::as_str).unwrap_or("");
            text_result(std::env::var(var).unwrap_or_else(|_| "<unset>".to_string()))
        }
        "multi" => json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "text", "text": "second" }
            ]
        }),
        _ => return error_response(id, -32602, &format!("Unknown tool: {}", name)),
    };

    result_response(id, result)
}

fn resources_list(id: &Value) -> Value {
    result_response(
        id,
        json!({
            "resources": [
                {
                    "uri": "test://static/greeting",
                    "name": "greeting",
                    "description": "A static greeting",
                    "mimeType": "text/plain"
                },
                {
                    "uri": "test://static/config",
                    "name": "config",
                    "mimeType": "application/json"
                }
            ]
        }),
    )
}

fn resource_templates_list(id: &Value) -> Value {
    result_response(
        id,
        json!({
            "resourceTemplates": [
                { "uriTemplate": "test://items/{id}", "name": "item" }
            ]
        }),
    )
}

fn resources_read(id: &Value, params: &Value) -> Value {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or("");
    let contents = match uri {
        "test://static/greeting" => json!({
            "uri": uri,
            "mimeType": "text/plain",
            "text": "Hello from resource"
        }),
        "test://static/config" => json!({
            "uri": uri,
            "mimeType": "application/json",
            "text": json!({ "debug": false }).to_string()
        }),
        _ if uri.starts_with("test://items/") => json!({
            "uri": uri,
            "text": format!("item {}", &uri["test://items/".len()..])
        }),
        _ => return error_response(id, -32002, &format!("Resource not found: {}", uri)),
    };
    result_response(id, json!({ "contents": [contents] }))
}

fn prompts_list(id: &Value) -> Value {
    result_response(
        id,
        json!({
            "prompts": [
                {
                    "name": "greet",
                    "description": "Greets someone",
                    "arguments": [{ "name": "name", "required": true }]
                },
                {
                    "name": "summarize",
                    "arguments": [{ "name": "text", "required": false }]
                }
            ]
        }),
    )
}

fn prompts_get(id: &Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arg = |key: &str| {
        params
            .get("arguments")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let text = match name {
        "greet" => match arg("name") {
            Some(who) => format!("Hello, {}!", who),
            None => return error_response(id, -32602, "Missing required argument: name"),
        },
        "summarize" => format!(
            "Summarize: {}",
            arg("text").unwrap_or_else(|| "(nothing)".to_string())
        ),
        _ => return error_response(id, -32602, &format!("Unknown prompt: {}", name)),
    };

    result_response(
        id,
        json!({
            "description": format!("The {} prompt", name),
            "messages": [
                { "role": "user", "content": { "type": "text", "text": text } }
            ]
        }),
    )
}
