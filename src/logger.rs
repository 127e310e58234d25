//! Stdio-safe logging
//!
//! A stdio MCP server owns its stdout: every byte there must be a protocol
//! frame. This module keeps diagnostics off that stream.
//!
//! - [`init_logging`] installs a `tracing` subscriber whose console layer
//!   writes to **stderr**, with an optional file layer.
//! - [`DebugLogger`] is an explicit logger instance for code that wants
//!   timestamped, prefixed lines without a subscriber. It writes to an
//!   injected sink, stderr by default.
//! - [`ProtocolStdout`] claims the process stdout for protocol frames.
//!   Only one claim may be held at a time; [`ProtocolStdout::close`] flushes
//!   and releases it.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{
    fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment variable that enables debug-level output of [`DebugLogger`].
pub const DEBUG_ENV_VAR: &str = "MCP_DEBUG";

/// Failures of the logging utilities.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("stdout is already claimed for protocol output")]
    StdoutInUse,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),
}

/// Subscriber settings for [`init_logging`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json_format: bool,

    /// Also append events to this file.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_level() -> String {
    "mcp_testkit=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Console output always goes to stderr. `RUST_LOG` takes precedence over
/// `config.level`. Returns `Ok(false)` when a global subscriber was already
/// installed, which lets every test call this freely.
///
/// # Examples
///
/// ```
/// use mcp_testkit::logger::{init_logging, LoggingConfig};
///
/// init_logging(&LoggingConfig::default()).unwrap();
/// assert!(!init_logging(&LoggingConfig::default()).unwrap());
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<bool, LoggerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggerError::Filter(e.to_string()))?;

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let json = config.json_format;

    let console_json = json.then(|| {
        tracing_fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
    });
    let console_human = (!json).then(|| {
        tracing_fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(io::stderr)
    });
    let file_json = file.clone().filter(|_| json).map(|f| {
        tracing_fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(f)
    });
    let file_human = file.filter(|_| !json).map(|f| {
        tracing_fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(f)
    });

    Ok(tracing_subscriber::registry()
        .with(env_filter)
        .with(console_json)
        .with(console_human)
        .with(file_json)
        .with(file_human)
        .try_init()
        .is_ok())
}

/// Severity of a [`DebugLogger`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Explicit, stdio-safe logger instance.
///
/// Lines look like `[2026-01-01T00:00:00.000Z] [my-server] [INFO] started`.
/// Debug lines are written only when the logger is enabled, which by
/// default follows [`DEBUG_ENV_VAR`]. Write failures are ignored.
///
/// # Examples
///
/// ```
/// use mcp_testkit::logger::DebugLogger;
///
/// let logger = DebugLogger::new("my-server").with_enabled(true);
/// logger.info("listening on stdio");
/// logger.debug("only when enabled");
/// ```
#[derive(Clone)]
pub struct DebugLogger {
    prefix: String,
    enabled: bool,
    sink: Sink,
}

impl fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLogger")
            .field("prefix", &self.prefix)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl DebugLogger {
    /// A logger writing to stderr, enabled when `MCP_DEBUG` is truthy.
    pub fn new(prefix: impl Into<String>) -> Self {
        let enabled = std::env::var(DEBUG_ENV_VAR)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);
        Self {
            prefix: prefix.into(),
            enabled,
            sink: Arc::new(Mutex::new(Box::new(io::stderr()))),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replace the output sink.
    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sink = Arc::new(Mutex::new(Box::new(sink)));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Write one line at `level`.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if level == LogLevel::Debug && !self.enabled {
            return;
        }
        let line = format!(
            "[{}] [{}] [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.prefix,
            level,
            message
        );
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
            let _ = sink.flush();
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Writes newline-delimited JSON-RPC frames to any writer, flushing each.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize `message` as one line and flush.
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), LoggerError> {
        let line = serde_json::to_string(message)?;
        self.write_line(&line)
    }

    /// Write an already serialized frame. Embedded newlines are rejected
    /// since they would split the frame.
    pub fn write_line(&mut self, line: &str) -> Result<(), LoggerError> {
        if line.contains('\n') {
            return Err(LoggerError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "protocol frame contains a newline",
            )));
        }
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

static STDOUT_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive handle on the process stdout for protocol frames.
///
/// # Examples
///
/// ```no_run
/// use mcp_testkit::logger::ProtocolStdout;
///
/// let mut out = ProtocolStdout::open()?;
/// out.write_message(&serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": {} }))?;
/// out.close()?;
/// # Ok::<(), mcp_testkit::logger::LoggerError>(())
/// ```
#[derive(Debug)]
pub struct ProtocolStdout {
    writer: FrameWriter<io::Stdout>,
}

impl ProtocolStdout {
    /// Claim stdout.
    ///
    /// # Errors
    ///
    /// [`LoggerError::StdoutInUse`] while another handle is open.
    pub fn open() -> Result<Self, LoggerError> {
        if STDOUT_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LoggerError::StdoutInUse);
        }
        Ok(Self {
            writer: FrameWriter::new(io::stdout()),
        })
    }

    /// Whether a handle is currently open.
    pub fn is_claimed() -> bool {
        STDOUT_CLAIMED.load(Ordering::SeqCst)
    }

    pub fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), LoggerError> {
        self.writer.write_message(message)
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), LoggerError> {
        self.writer.write_line(line)
    }

    /// Flush and release the claim.
    pub fn close(mut self) -> Result<(), LoggerError> {
        self.writer.inner.flush()?;
        Ok(())
    }
}

impl Drop for ProtocolStdout {
    fn drop(&mut self) {
        STDOUT_CLAIMED.store(false, Ordering::SeqCst);
    }
}
