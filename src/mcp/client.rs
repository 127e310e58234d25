//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] is a channel-backed JSON-RPC 2.0 client that knows
//! nothing about the underlying transport. Callers wire up two
//! [`tokio::sync::mpsc`] channels (one for outbound serialized messages, one
//! for inbound serialized messages) and then call [`start_read_loop`] to
//! process responses and notifications concurrently.
//!
//! - Outbound messages are written to `outbound_tx` as newline-free JSON
//!   strings. The transport owns framing.
//! - The read loop classifies each inbound message as a response, a
//!   server-initiated request, or a notification and dispatches it.
//! - In-flight requests are tracked in a `pending` map keyed by `u64` request
//!   ID. Each entry is a `oneshot::Sender` that receives the `result` or
//!   `error` value when the matching response arrives.
//! - Cancelling the read loop drops every pending sender, so awaiting callers
//!   fail with a transport error instead of hanging.
//! - A request future that is dropped before its response arrives removes
//!   its own pending entry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Timeout applied to requests when the client was built without one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

type ServerRequestHandler =
    Box<dyn Fn(serde_json::Value) -> BoxFuture<'static, serde_json::Value> + Send + Sync + 'static>;

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Removes a request's pending entry when the awaiting future finishes or
/// is dropped.
struct PendingSlot {
    pending: Arc<Mutex<PendingMap>>,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.id);
            return;
        }
        let pending = Arc::clone(&self.pending);
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcp_testkit::mcp::client::{JsonRpcClient, start_read_loop};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new(out_tx));
///     let _handle = start_read_loop(in_rx, token, Arc::clone(&client));
///     Ok(())
/// }
/// ```
pub struct JsonRpcClient {
    /// Monotonically increasing request ID counter.
    pub(crate) next_id: Arc<AtomicU64>,
    /// In-flight requests waiting for a response.
    pub(crate) pending: Arc<Mutex<PendingMap>>,
    /// Channel used to send serialized JSON-RPC messages to the transport.
    pub(crate) outbound_tx: mpsc::UnboundedSender<String>,
    /// Timeout used when `request` is called without one.
    pub(crate) default_timeout: Duration,
    pub(crate) notification_handlers: Arc<Mutex<HashMap<String, NotificationHandler>>>,
    pub(crate) server_request_handlers: Arc<Mutex<HashMap<String, ServerRequestHandler>>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client that uses [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use mcp_testkit::mcp::client::JsonRpcClient;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new(tx);
    /// ```
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self::with_timeout(outbound_tx, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests time out after `timeout` unless the
    /// caller passes an explicit one.
    pub fn with_timeout(outbound_tx: mpsc::UnboundedSender<String>, timeout: Duration) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            default_timeout: timeout,
            notification_handlers: Arc::new(Mutex::new(HashMap::new())),
            server_request_handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a client that shares all internal state with `self`.
    ///
    /// A read loop started with an `Arc<JsonRpcClient>` resolves responses
    /// for requests issued through the returned value, since both operate on
    /// the same pending map. This is how `McpProtocol` (which owns its
    /// client) is wired to [`start_read_loop`] (which takes an `Arc`).
    pub fn clone_shared(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
            default_timeout: self.default_timeout,
            notification_handlers: Arc::clone(&self.notification_handlers),
            server_request_handlers: Arc::clone(&self.server_request_handlers),
        }
    }

    /// The timeout applied when `request` receives `None`.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::Transport`] if the outbound channel is
    /// closed or the read loop exits before the response arrives,
    /// [`SessionError::Timeout`] if nothing arrives in time,
    /// [`SessionError::Rpc`] if the server answers with an error object, and
    /// [`SessionError::Serialization`] if the result does not deserialize
    /// into `R`.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response can never beat the slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let _slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            id,
        };

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params).map_err(SessionError::from)?),
        })
        .map_err(SessionError::from)?;

        tracing::trace!(id, method, "sending request");

        if self.outbound_tx.send(message).is_err() {
            return Err(SessionError::Transport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            SessionError::Transport("read loop exited before response arrived".to_string())
        })?;

        let value = rpc_result.map_err(|e| SessionError::Rpc {
            code: e.code,
            message: e.message,
        })?;

        Ok(serde_json::from_value(value).map_err(SessionError::from)?)
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio::sync::mpsc;
    /// use mcp_testkit::mcp::client::JsonRpcClient;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new(tx);
    /// client.notify("notifications/initialized", serde_json::json!({})).unwrap();
    /// ```
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params).map_err(SessionError::from)?
        }))
        .map_err(SessionError::from)?;

        self.outbound_tx
            .send(message)
            .map_err(|_| SessionError::Transport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server-sent notification.
    ///
    /// Registering a second handler for the same method replaces the first.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }

    /// Register a handler for a server-initiated request.
    ///
    /// The handler's return value is sent back as the `result` field of a
    /// JSON-RPC response. Requests without a handler receive `-32601`.
    pub async fn on_server_request(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) -> BoxFuture<'static, serde_json::Value>
            + Send
            + Sync
            + 'static,
    ) {
        self.server_request_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// Messages with an `id` and a `result`/`error` resolve the matching pending
/// request. Messages with an `id` and a `method` are server-initiated
/// requests and get a response on `outbound_tx`. Messages with only a
/// `method` are notifications.
///
/// When `cancellation` fires, or the inbound channel closes because the
/// server exited, every pending sender is dropped and the loop ends.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    client.pending.lock().await.clear();
                    tracing::debug!("read loop cancelled");
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let Some(raw) = maybe_msg else {
                        client.pending.lock().await.clear();
                        tracing::debug!("inbound channel closed; read loop exiting");
                        break;
                    };
                    dispatch_message(&raw, &client).await;
                }
            }
        }
    })
}

async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse inbound JSON; ignoring");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client).await;
    } else if has_method {
        handle_notification(value, client).await;
    } else {
        tracing::debug!(
            has_id,
            has_method,
            has_result,
            has_error,
            "unclassifiable message; ignoring"
        );
    }
}

async fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!(id = %id_val, "response has non-integer id");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(id, "response for unknown id; ignoring");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: -32603,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

async fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()).map(str::to_string) else {
        return;
    };
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    // Drop the lock before awaiting the handler.
    let handler_future = {
        let handlers = client.server_request_handlers.lock().await;
        handlers.get(&method).map(|h| h(params))
    };

    let response = match handler_future {
        Some(future) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(future.await),
            error: None,
        },
        None => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        },
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

async fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let handlers = client.notification_handlers.lock().await;
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!(method, "no handler for notification; ignoring"),
    }
}
