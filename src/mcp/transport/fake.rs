//! In-process transport for unit tests
//!
//! [`FakeTransport::new`] returns the transport half, which the code under
//! test owns, and a [`FakeTransportHandle`] for the test side. The handle
//! either exposes the raw channels or, through [`FakeTransportHandle::serve`],
//! runs a scripted server that answers each request from a closure.
//!
//! ```text
//! Transport::send ------> handle.outbound_rx
//! handle.inbound_tx ----> Transport::receive
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::error::SessionError;
use crate::mcp::transport::Transport;

/// What a scripted server does with one request.
pub enum Reply {
    /// Answer with `result`.
    Result(Value),
    /// Answer with a JSON-RPC error object.
    Error(i64, String),
    /// Never answer.
    Silent,
}

/// Transport half backed by in-memory channels.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: AtomicBool,
}

/// Test half of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Everything the client sent, in order.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Lines pushed here arrive on the client's `receive()` stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        (
            Self {
                outbound_tx,
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
                closed: AtomicBool::new(false),
            },
            FakeTransportHandle {
                outbound_rx,
                inbound_tx,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FakeTransportHandle {
    /// Next outbound message, parsed. `None` once the transport is gone.
    pub async fn next_message(&mut self) -> Option<Value> {
        let raw = self.outbound_rx.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// Answer the request with `id`.
    pub fn reply(&self, id: &Value, reply: Reply) -> bool {
        let body = match reply {
            Reply::Result(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Reply::Error(code, message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message }
            }),
            Reply::Silent => return true,
        };
        self.inbound_tx.send(body.to_string()).is_ok()
    }

    /// Run a scripted server on a background task.
    ///
    /// `respond` sees the method and params of every request; notifications
    /// are skipped. The task ends when either side goes away.
    pub fn serve<F>(mut self, respond: F)
    where
        F: Fn(&str, &Value) -> Reply + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(message) = self.next_message().await {
                let Some(id) = message.get("id").filter(|id| !id.is_null()).cloned() else {
                    continue;
                };
                let method = message["method"].as_str().unwrap_or_default();
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                if !self.reply(&id, respond(method, &params)) {
                    break;
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Transport("fake transport is closed".into()).into());
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| SessionError::Transport("fake transport peer dropped".into()))?;
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_rx.lock().await.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    async fn next_line(transport: &FakeTransport) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), transport.receive().next())
            .await
            .expect("timed out waiting for inbound line")
    }

    #[tokio::test]
    async fn test_channels_are_wired_both_ways() {
        let (transport, mut handle) = FakeTransport::new();

        transport.send("out-1".to_string()).await.unwrap();
        transport.send("out-2".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.as_deref(), Some("out-1"));
        assert_eq!(handle.outbound_rx.recv().await.as_deref(), Some("out-2"));

        handle.inbound_tx.send("in-1".to_string()).unwrap();
        assert_eq!(next_line(&transport).await.as_deref(), Some("in-1"));
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_skips_notifications() {
        let (transport, handle) = FakeTransport::new();
        handle.serve(|method, params| match method {
            "echo" => Reply::Result(params.clone()),
            "hang" => Reply::Silent,
            _ => Reply::Error(-32601, format!("Method not found: {}", method)),
        });

        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.into())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"hang"}"#.into())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":2,"method":"echo","params":{"x":1}}"#.into())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":3,"method":"nope"}"#.into())
            .await
            .unwrap();

        let echoed: Value = serde_json::from_str(&next_line(&transport).await.unwrap()).unwrap();
        assert_eq!(echoed["id"], 2);
        assert_eq!(echoed["result"], json!({ "x": 1 }));

        let missing: Value = serde_json::from_str(&next_line(&transport).await.unwrap()).unwrap();
        assert_eq!(missing["id"], 3);
        assert_eq!(missing["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_send_fails_once_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        assert!(transport.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_sends_and_ends_receive() {
        let (transport, _handle) = FakeTransport::new();
        transport.close().await.unwrap();

        assert!(transport.is_closed());
        assert!(transport.send("late".to_string()).await.is_err());
        assert!(next_line(&transport).await.is_none());
    }

    #[tokio::test]
    async fn test_receive_err_is_empty() {
        let (transport, _handle) = FakeTransport::new();
        assert!(transport.receive_err().next().await.is_none());
    }
}
