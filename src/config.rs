//! Test client configuration
//!
//! [`ClientConfig`] describes how to launch and talk to one server under
//! test. It is built once, either with [`ClientConfig::builder`] or from a
//! YAML file with [`ClientConfig::load`], and never changes afterwards.
//!
//! The child's environment is computed at build time from three layers,
//! later layers winning on conflict:
//!
//! 1. a small allowlist inherited from the parent ([`INHERITED_ENV_VARS`])
//! 2. coverage variables, when the parent is collecting coverage
//! 3. the caller's own `env`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, McpTestError, Result};
use crate::mcp::types::{ClientCapabilities, Implementation};

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where V8 coverage is written when coverage is active but the parent did
/// not name a directory.
pub const DEFAULT_COVERAGE_DIR: &str = "./coverage/tmp";

/// Parent variables every child inherits.
#[cfg(not(windows))]
pub const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Parent variables every child inherits.
#[cfg(windows)]
pub const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

const NODE_V8_COVERAGE: &str = "NODE_V8_COVERAGE";
const NYC_CONFIG: &str = "NYC_CONFIG";
const COVERAGE: &str = "COVERAGE";
const LLVM_PROFILE_FILE: &str = "LLVM_PROFILE_FILE";

/// Environment variable overriding the configured command in [`ClientConfig::load`].
pub const ENV_COMMAND: &str = "MCP_TESTKIT_COMMAND";
/// Environment variable overriding the configured timeout in [`ClientConfig::load`].
pub const ENV_TIMEOUT_MS: &str = "MCP_TESTKIT_TIMEOUT_MS";

/// Default identity sent in `initialize`.
pub fn default_client_info() -> Implementation {
    Implementation::new("mcp-testkit", env!("CARGO_PKG_VERSION"))
}

/// Whether `parent` indicates that coverage is being collected.
///
/// True when `NODE_V8_COVERAGE` or `NYC_CONFIG` is set, or when `COVERAGE`
/// is `1`, `true` or `yes` (case-insensitive).
pub fn coverage_active(parent: &HashMap<String, String>) -> bool {
    parent.contains_key(NODE_V8_COVERAGE)
        || parent.contains_key(NYC_CONFIG)
        || parent
            .get(COVERAGE)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
}

/// Coverage variables to inject into the child, given the parent's env.
///
/// Empty when coverage is not active.
pub fn coverage_env(parent: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if !coverage_active(parent) {
        return env;
    }

    let dir = parent
        .get(NODE_V8_COVERAGE)
        .cloned()
        .unwrap_or_else(|| DEFAULT_COVERAGE_DIR.to_string());
    env.insert(NODE_V8_COVERAGE.to_string(), dir);

    if let Some(profile) = parent.get(LLVM_PROFILE_FILE) {
        env.insert(LLVM_PROFILE_FILE.to_string(), profile.clone());
    }
    env
}

/// The current process environment. Entries that are not valid Unicode
/// are skipped.
pub fn parent_environment() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Merge the three environment layers. `user` wins on conflict.
pub fn merge_environment(
    parent: &HashMap<String, String>,
    user: &HashMap<String, String>,
    propagate_coverage: bool,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| parent.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect();

    if propagate_coverage {
        env.extend(coverage_env(parent));
    }

    env.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// How to launch and talk to one server under test.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mcp_testkit::config::ClientConfig;
///
/// let config = ClientConfig::builder("node")
///     .arg("dist/server.js")
///     .env("LOG_LEVEL", "debug")
///     .timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(config.command(), "node");
/// assert_eq!(config.effective_env().get("LOG_LEVEL").map(String::as_str), Some("debug"));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    client_info: Implementation,
    capabilities: ClientCapabilities,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    propagate_coverage: bool,
    effective_env: HashMap<String, String>,
}

impl ClientConfig {
    /// Start building a configuration for `command`.
    pub fn builder(command: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(command)
    }

    /// A configuration with every default applied.
    pub fn new(command: impl Into<String>) -> Self {
        Self::builder(command).build()
    }

    /// Load from a YAML file, then apply `MCP_TESTKIT_*` overrides.
    ///
    /// # Errors
    ///
    /// `VALIDATION_FAILED` when the file cannot be read or parsed, or the
    /// result fails [`ClientConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = ClientConfigFile::from_file(path.as_ref())?;
        file.apply_env_vars();
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The caller-supplied variables only.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// The complete environment the child is started with.
    pub fn effective_env(&self) -> &HashMap<String, String> {
        &self.effective_env
    }

    pub fn client_info(&self) -> &Implementation {
        &self.client_info
    }

    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    pub fn propagate_coverage(&self) -> bool {
        self.propagate_coverage
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(McpTestError::validation(
                "Server command cannot be empty",
                ErrorContext::new().with("suggestion", "Set the command used to launch the server"),
            ));
        }

        if self.timeout.is_zero() {
            return Err(McpTestError::validation(
                "timeout must be greater than 0",
                ErrorContext::new().with("command", self.command.clone()),
            ));
        }

        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    client_info: Implementation,
    capabilities: ClientCapabilities,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    propagate_coverage: bool,
}

impl ClientConfigBuilder {
    fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            client_info: default_client_info(),
            capabilities: ClientCapabilities::default(),
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
            propagate_coverage: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Disable or enable coverage propagation (enabled by default).
    pub fn propagate_coverage(mut self, enabled: bool) -> Self {
        self.propagate_coverage = enabled;
        self
    }

    /// Freeze the configuration, computing the child environment from the
    /// current process environment.
    pub fn build(self) -> ClientConfig {
        self.build_with_parent_env(&parent_environment())
    }

    /// Like [`build`](Self::build) with an explicit parent environment.
    pub fn build_with_parent_env(self, parent: &HashMap<String, String>) -> ClientConfig {
        let effective_env = merge_environment(parent, &self.env, self.propagate_coverage);
        ClientConfig {
            command: self.command,
            args: self.args,
            env: self.env,
            client_info: self.client_info,
            capabilities: self.capabilities,
            timeout: self.timeout,
            working_dir: self.working_dir,
            propagate_coverage: self.propagate_coverage,
            effective_env,
        }
    }
}

/// On-disk form of a [`ClientConfig`].
///
/// ```yaml
/// command: node
/// args: ["dist/server.js"]
/// env:
///   LOG_LEVEL: debug
/// timeout_ms: 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfigFile {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_client_version")]
    pub client_version: String,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_propagate_coverage")]
    pub propagate_coverage: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_client_name() -> String {
    default_client_info().name
}

fn default_client_version() -> String {
    default_client_info().version
}

fn default_propagate_coverage() -> bool {
    true
}

impl ClientConfigFile {
    fn from_file(path: &Path) -> Result<Self> {
        let context = || ErrorContext::new().with("path", path.display().to_string());
        let contents = std::fs::read_to_string(path).map_err(|e| {
            McpTestError::validation(format!("Failed to read config file: {}", e), context())
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            McpTestError::validation(format!("Failed to parse config: {}", e), context())
        })
    }

    fn apply_env_vars(&mut self) {
        if let Ok(command) = std::env::var(ENV_COMMAND) {
            self.command = command;
        }

        if let Ok(timeout) = std::env::var(ENV_TIMEOUT_MS) {
            match timeout.parse() {
                Ok(value) => self.timeout_ms = value,
                Err(_) => tracing::warn!("Invalid {}: {}", ENV_TIMEOUT_MS, timeout),
            }
        }
    }

    fn into_config(self) -> ClientConfig {
        let mut builder = ClientConfig::builder(self.command)
            .args(self.args)
            .envs(self.env)
            .client_info(Implementation::new(self.client_name, self.client_version))
            .timeout(Duration::from_millis(self.timeout_ms))
            .propagate_coverage(self.propagate_coverage);
        if let Some(dir) = self.working_dir {
            builder = builder.working_dir(dir);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_utils::{assert_error, create_test_file, temp_dir, test_config_yaml};
    use serial_test::serial;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder("node").build_with_parent_env(&HashMap::new());
        assert_eq!(config.command(), "node");
        assert!(config.args().is_empty());
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.client_info().name, "mcp-testkit");
        assert!(config.propagate_coverage());
        assert!(config.effective_env().is_empty());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_build_skips_non_unicode_parent_vars() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let key = "MCP_TESTKIT_NON_UNICODE";
        std::env::set_var(key, OsStr::from_bytes(&[0xff, 0xfe]));
        let parent = parent_environment();
        let config = ClientConfig::builder("node").env("KEEP", "1").build();
        std::env::remove_var(key);

        assert!(!parent.contains_key(key));
        assert_eq!(config.effective_env().get("KEEP").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_only_allowlisted_parent_vars_inherited() {
        let parent = vars(&[("PATH", "/bin"), ("SECRET_TOKEN", "x")]);
        let config = ClientConfig::builder("node").build_with_parent_env(&parent);
        assert_eq!(config.effective_env().get("PATH").map(String::as_str), Some("/bin"));
        assert!(!config.effective_env().contains_key("SECRET_TOKEN"));
    }

    #[test]
    fn test_coverage_inactive_injects_nothing() {
        let parent = vars(&[("COVERAGE", "0")]);
        assert!(!coverage_active(&parent));
        assert!(coverage_env(&parent).is_empty());
    }

    #[test]
    fn test_coverage_flag_is_case_insensitive() {
        for value in ["1", "true", "TRUE", "Yes"] {
            let parent = vars(&[("COVERAGE", value)]);
            assert!(coverage_active(&parent), "COVERAGE={value}");
        }
    }

    #[test]
    fn test_coverage_flag_uses_default_directory() {
        let parent = vars(&[("COVERAGE", "true")]);
        let env = coverage_env(&parent);
        assert_eq!(
            env.get("NODE_V8_COVERAGE").map(String::as_str),
            Some(DEFAULT_COVERAGE_DIR)
        );
    }

    #[test]
    fn test_parent_coverage_directory_forwarded() {
        let parent = vars(&[("NODE_V8_COVERAGE", "/tmp/cov")]);
        let config = ClientConfig::builder("node").build_with_parent_env(&parent);
        assert_eq!(
            config.effective_env().get("NODE_V8_COVERAGE").map(String::as_str),
            Some("/tmp/cov")
        );
    }

    #[test]
    fn test_nyc_config_activates_coverage() {
        let parent = vars(&[("NYC_CONFIG", "{}")]);
        assert!(coverage_active(&parent));
    }

    #[test]
    fn test_llvm_profile_file_forwarded_when_coverage_active() {
        let parent = vars(&[("COVERAGE", "1"), ("LLVM_PROFILE_FILE", "/tmp/%p.profraw")]);
        let env = coverage_env(&parent);
        assert_eq!(
            env.get("LLVM_PROFILE_FILE").map(String::as_str),
            Some("/tmp/%p.profraw")
        );
    }

    #[test]
    fn test_user_env_overrides_coverage() {
        let parent = vars(&[("NODE_V8_COVERAGE", "/tmp/cov")]);
        let config = ClientConfig::builder("node")
            .env("NODE_V8_COVERAGE", "/mine")
            .build_with_parent_env(&parent);
        assert_eq!(
            config.effective_env().get("NODE_V8_COVERAGE").map(String::as_str),
            Some("/mine")
        );
    }

    #[test]
    fn test_user_env_overrides_inherited() {
        let parent = vars(&[("PATH", "/bin")]);
        let config = ClientConfig::builder("node")
            .env("PATH", "/opt/bin")
            .build_with_parent_env(&parent);
        assert_eq!(config.effective_env().get("PATH").map(String::as_str), Some("/opt/bin"));
    }

    #[test]
    fn test_propagation_can_be_disabled() {
        let parent = vars(&[("NODE_V8_COVERAGE", "/tmp/cov")]);
        let config = ClientConfig::builder("node")
            .propagate_coverage(false)
            .build_with_parent_env(&parent);
        assert!(!config.effective_env().contains_key("NODE_V8_COVERAGE"));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        assert_error(
            ClientConfig::new("  ").validate(),
            ErrorCode::ValidationFailed,
            "command cannot be empty",
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = ClientConfig::builder("node")
            .timeout(Duration::ZERO)
            .build()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        std::env::remove_var(ENV_COMMAND);
        std::env::remove_var(ENV_TIMEOUT_MS);

        let dir = temp_dir();
        let path = create_test_file(&dir, "mcp-testkit.yaml", &test_config_yaml());

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.command(), "node");
        assert_eq!(config.args(), &["server.js".to_string()]);
        assert_eq!(config.env().get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.client_info().name, "suite");
        assert_eq!(config.client_info().version, "2.0.0");
        assert!(!config.propagate_coverage());
    }

    #[test]
    #[serial]
    fn test_env_vars_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command: node\ntimeout_ms: 1500").unwrap();

        std::env::set_var(ENV_COMMAND, "deno");
        std::env::set_var(ENV_TIMEOUT_MS, "250");
        let config = ClientConfig::load(file.path());
        std::env::remove_var(ENV_COMMAND);
        std::env::remove_var(ENV_TIMEOUT_MS);

        let config = config.unwrap();
        assert_eq!(config.command(), "deno");
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_override_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command: node\ntimeout_ms: 1500").unwrap();

        std::env::remove_var(ENV_COMMAND);
        std::env::set_var(ENV_TIMEOUT_MS, "soon");
        let config = ClientConfig::load(file.path());
        std::env::remove_var(ENV_TIMEOUT_MS);

        assert_eq!(config.unwrap().timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_load_missing_file_is_validation_error() {
        let err = ClientConfig::load("/nonexistent/mcp-testkit.yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(err.context().get_str("path").is_some());
    }

    #[test]
    fn test_load_malformed_yaml_is_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "args: [unterminated").unwrap();
        let err = ClientConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
