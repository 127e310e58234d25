use std::path::PathBuf;
use std::time::Duration;

use mcp_testkit::ClientConfig;

/// Path to the `mcp_test_server` binary built alongside the tests.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Some(p) = option_env!("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("mcp_test_server")
}

/// Client config for the test server in its normal mode.
#[allow(dead_code)]
pub fn server_config() -> ClientConfig {
    ClientConfig::builder(test_server_exe().display().to_string())
        .timeout(Duration::from_secs(10))
        .build()
}

/// Client config for the test server in `mode` (see the server's docs).
#[allow(dead_code)]
pub fn server_config_with_mode(mode: &str, timeout: Duration) -> ClientConfig {
    ClientConfig::builder(test_server_exe().display().to_string())
        .env("MCP_TEST_SERVER_MODE", mode)
        .timeout(timeout)
        .build()
}
