//! Snapshot testing for tool results
//!
//! Results are normalized before comparison: fields that change from run to
//! run (timestamps, request ids, timings, cache keys) are removed at any
//! depth, along with any caller-supplied paths. Paths are dot-separated globs
//! over object keys and array indices: `items.*.id` removes `id` from every
//! element of `items`, `**.etag` removes `etag` everywhere.
//!
//! [`SnapshotStore`] keeps one pretty-printed JSON file per snapshot,
//! `<dir>/<name>.snap.json`. A missing file is written on first use. With
//! `MCP_TESTKIT_UPDATE_SNAPSHOTS=1` every snapshot is rewritten. Otherwise a
//! mismatch fails with a unified diff.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use similar::TextDiff;

use crate::error::{ErrorContext, McpTestError, Result};
use crate::mcp::types::CallToolResult;

/// Field names removed at any depth unless disabled.
pub const DEFAULT_VOLATILE_FIELDS: &[&str] = &[
    "timestamp",
    "requestId",
    "request_id",
    "executionTime",
    "execution_time",
    "cacheKey",
    "cache_key",
];

/// Set to `1` or `true` to rewrite snapshots instead of comparing.
pub const UPDATE_ENV_VAR: &str = "MCP_TESTKIT_UPDATE_SNAPSHOTS";

/// What to strip before comparing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    volatile_fields: Vec<String>,
    ignored_paths: Vec<String>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            volatile_fields: DEFAULT_VOLATILE_FIELDS.iter().map(|s| s.to_string()).collect(),
            ignored_paths: Vec::new(),
        }
    }
}

impl SnapshotOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also remove values at `path` (dot-separated glob).
    pub fn ignore_path(mut self, path: impl Into<String>) -> Self {
        self.ignored_paths.push(path.into());
        self
    }

    /// Also remove every field named `name`, at any depth.
    pub fn volatile_field(mut self, name: impl Into<String>) -> Self {
        self.volatile_fields.push(name.into());
        self
    }

    /// Drop the built-in volatile field list.
    pub fn without_default_fields(mut self) -> Self {
        self.volatile_fields
            .retain(|f| !DEFAULT_VOLATILE_FIELDS.contains(&f.as_str()));
        self
    }

    fn is_ignored(&self, key: &str, path: &str) -> bool {
        self.volatile_fields.iter().any(|f| f == key)
            || self
                .ignored_paths
                .iter()
                .any(|p| glob_match::glob_match(&to_glob(p), path))
    }
}

fn to_glob(dotted: &str) -> String {
    dotted.replace('.', "/")
}

/// Copy `value` with volatile fields and ignored paths removed.
///
/// # Examples
///
/// ```
/// use mcp_testkit::snapshot::{strip_volatile, SnapshotOptions};
/// use serde_json::json;
///
/// let raw = json!({
///     "timestamp": "2026-01-01T00:00:00Z",
///     "items": [{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }]
/// });
/// let stripped = strip_volatile(&raw, &SnapshotOptions::new().ignore_path("items.*.id"));
/// assert_eq!(stripped, json!({ "items": [{ "name": "a" }, { "name": "b" }] }));
/// ```
pub fn strip_volatile(value: &Value, options: &SnapshotOptions) -> Value {
    let mut copy = value.clone();
    strip_in_place(&mut copy, "", options);
    copy
}

fn strip_in_place(value: &mut Value, path: &str, options: &SnapshotOptions) {
    let join = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", path, segment)
        }
    };

    match value {
        Value::Object(map) => {
            map.retain(|key, _| !options.is_ignored(key, &join(key)));
            for (key, child) in map.iter_mut() {
                strip_in_place(child, &join(key), options);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                strip_in_place(child, &join(&index.to_string()), options);
            }
        }
        _ => {}
    }
}

/// Result of a snapshot assertion that passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No file existed; it has been written.
    Created,
    Matched,
    /// Update mode rewrote a differing file.
    Updated,
}

/// A directory of JSON snapshots.
///
/// # Examples
///
/// ```
/// use mcp_testkit::snapshot::{SnapshotOutcome, SnapshotStore};
/// use serde_json::json;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = SnapshotStore::new(dir.path()).with_update(false);
///
/// let first = store.assert_json("greeting", &json!({ "text": "hi", "requestId": 1 })).unwrap();
/// assert_eq!(first, SnapshotOutcome::Created);
///
/// let second = store.assert_json("greeting", &json!({ "text": "hi", "requestId": 2 })).unwrap();
/// assert_eq!(second, SnapshotOutcome::Matched);
///
/// assert!(store.assert_json("greeting", &json!({ "text": "bye" })).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    update: bool,
    options: SnapshotOptions,
}

impl SnapshotStore {
    /// A store under `dir`. Update mode follows [`UPDATE_ENV_VAR`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let update = std::env::var(UPDATE_ENV_VAR)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);
        Self {
            dir: dir.into(),
            update,
            options: SnapshotOptions::default(),
        }
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_options(mut self, options: SnapshotOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds snapshot `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(McpTestError::validation(
                format!("Invalid snapshot name '{}'", name),
                ErrorContext::new().with("name", name).with(
                    "suggestion",
                    "Use letters, digits, '-', '_' or '.' and do not start with '.'",
                ),
            ));
        }
        Ok(self.dir.join(format!("{}.snap.json", name)))
    }

    /// Compare a tool result against snapshot `name`.
    pub fn assert_tool_result(
        &self,
        name: &str,
        result: &CallToolResult,
    ) -> Result<SnapshotOutcome> {
        let value = serde_json::to_value(result).map_err(|e| {
            McpTestError::validation(
                format!("Tool result for snapshot '{}' is not serializable: {}", name, e),
                ErrorContext::new().with("name", name),
            )
        })?;
        self.assert_json(name, &value)
    }

    /// Compare `value`, after stripping, against snapshot `name`.
    pub fn assert_json(&self, name: &str, value: &Value) -> Result<SnapshotOutcome> {
        let path = self.path_for(name)?;
        let actual = strip_volatile(value, &self.options);
        let rendered = render(&actual);

        let existing = match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_failure("read", &path, e)),
        };

        let Some(existing) = existing else {
            self.write(&path, &rendered)?;
            tracing::info!(snapshot = %name, path = %path.display(), "snapshot created");
            return Ok(SnapshotOutcome::Created);
        };

        let expected: Result<Value> = serde_json::from_str(&existing).map_err(|e| {
            McpTestError::assertion(
                format!("Snapshot '{}' is not valid JSON: {}", name, e),
                ErrorContext::new()
                    .with("path", path.display().to_string())
                    .with("suggestion", format!("Delete the file or set {}=1", UPDATE_ENV_VAR)),
            )
        });

        if let Ok(expected) = &expected {
            if *expected == actual {
                return Ok(SnapshotOutcome::Matched);
            }
        }

        if self.update {
            self.write(&path, &rendered)?;
            tracing::info!(snapshot = %name, "snapshot updated");
            return Ok(SnapshotOutcome::Updated);
        }

        let expected = expected?;
        let diff = TextDiff::from_lines(&render(&expected), &rendered)
            .unified_diff()
            .context_radius(3)
            .header("snapshot", "actual")
            .to_string();

        Err(McpTestError::assertion(
            format!("Snapshot '{}' does not match:\n{}", name, diff),
            ErrorContext::new()
                .with("path", path.display().to_string())
                .with("diff", diff)
                .with(
                    "suggestion",
                    format!("Run with {}=1 to accept the new output", UPDATE_ENV_VAR),
                ),
        ))
    }

    fn write(&self, path: &Path, rendered: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| io_failure("create", &self.dir, e))?;
        fs::write(path, rendered).map_err(|e| io_failure("write", path, e))
    }
}

fn render(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

fn io_failure(action: &str, path: &Path, error: std::io::Error) -> McpTestError {
    McpTestError::assertion(
        format!("Failed to {} snapshot '{}': {}", action, path.display(), error),
        ErrorContext::new()
            .with("path", path.display().to_string())
            .with("originalError", error.to_string()),
    )
}
