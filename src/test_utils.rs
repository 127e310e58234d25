//! Test utilities for mcp-testkit
//!
//! Temporary directories, config files, and error assertions shared by the
//! unit tests.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::error::{ErrorCode, McpTestError, Result};

/// Create a temporary directory that is removed when dropped.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Write `content` to `dir/name` and return the path.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that `result` failed with `code` and a message containing
/// `expected`. Returns the error for further checks.
///
/// # Panics
///
/// Panics if the result is `Ok`, the code differs, or the message does not
/// contain `expected`.
pub fn assert_error<T: std::fmt::Debug>(
    result: Result<T>,
    code: ErrorCode,
    expected: &str,
) -> McpTestError {
    let err = match result {
        Ok(value) => panic!(
            "Expected {} error containing '{}' but got Ok({:?})",
            code, expected, value
        ),
        Err(e) => e,
    };
    assert_eq!(err.code(), code, "unexpected error: {}", err);
    assert!(
        err.to_string().contains(expected),
        "Error message '{}' does not contain '{}'",
        err,
        expected
    );
    err
}

/// A complete client config file.
pub fn test_config_yaml() -> String {
    r#"
command: node
args:
  - server.js
env:
  LOG_LEVEL: debug
timeout_ms: 1500
client_name: suite
client_version: 2.0.0
propagate_coverage: false
"#
    .to_string()
}
