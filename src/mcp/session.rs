//! One negotiated MCP session bound to a transport
//!
//! [`Session::start`] wires a [`Transport`] to a [`JsonRpcClient`] through two
//! bridge tasks, starts the read loop, and performs the handshake. The
//! resulting [`Session`] owns everything it started; [`Session::close`]
//! releases it in order: read loop, bridges, then the transport.
//!
//! If the handshake fails, `start` tears the partial session down before
//! returning, so a failed start never leaves a child process behind.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    ClientCapabilities, Implementation, ServerCapabilities, METHOD_PING, NOTIF_MESSAGE,
};

/// A live, initialized MCP session.
#[derive(Debug)]
pub struct Session {
    protocol: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    cancellation: CancellationToken,
    read_loop: Option<JoinHandle<()>>,
    bridges: Vec<JoinHandle<()>>,
}

impl Session {
    /// Bind `transport`, start the read loop, and perform the handshake.
    ///
    /// Every request on the session, the handshake included, times out after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Whatever [`McpProtocol::initialize`] raises. The transport has been
    /// closed by the time the error is returned.
    pub async fn start(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        timeout: Duration,
    ) -> Result<Self> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let cancellation = CancellationToken::new();

        let shared = Arc::new(JsonRpcClient::with_timeout(out_tx, timeout));
        shared
            .on_server_request(METHOD_PING, |_| Box::pin(async { serde_json::json!({}) }))
            .await;
        shared
            .on_notification(NOTIF_MESSAGE, |params| {
                tracing::debug!(target: "mcp_testkit::server_log", %params, "server log message");
            })
            .await;
        let read_loop = start_read_loop(in_rx, cancellation.clone(), Arc::clone(&shared));

        let writer_transport = Arc::clone(&transport);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = writer_transport.send(msg).await {
                    tracing::debug!(error = %e, "outbound bridge stopped");
                    break;
                }
            }
        });

        let reader_transport = Arc::clone(&transport);
        let reader = tokio::spawn(async move {
            let mut stream = reader_transport.receive();
            while let Some(msg) = stream.next().await {
                if in_tx.send(msg).is_err() {
                    break;
                }
            }
            tracing::debug!("inbound bridge reached end of stream");
        });

        let client_name = client_info.name.clone();
        let handshake = McpProtocol::new(shared.clone_shared())
            .initialize(client_info, capabilities)
            .await;

        let mut session_parts = Parts {
            transport,
            cancellation,
            read_loop: Some(read_loop),
            bridges: vec![writer, reader],
        };

        match handshake {
            Ok(protocol) => {
                tracing::info!(
                    client = %client_name,
                    server = %protocol.initialize_response.server_info.name,
                    "MCP session established"
                );
                Ok(session_parts.into_session(protocol))
            }
            Err(e) => {
                tracing::debug!(error = %e, "handshake failed; tearing down");
                if let Err(close_err) = session_parts.shutdown().await {
                    tracing::warn!(error = %close_err, "cleanup after failed handshake");
                }
                Err(e)
            }
        }
    }

    /// The negotiated protocol, for issuing requests.
    pub fn protocol(&self) -> &InitializedMcpProtocol {
        &self.protocol
    }

    pub fn server_info(&self) -> &Implementation {
        &self.protocol.initialize_response.server_info
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.protocol.initialize_response.capabilities
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol.initialize_response.protocol_version
    }

    pub fn instructions(&self) -> Option<&str> {
        self.protocol.initialize_response.instructions.as_deref()
    }

    /// Stop the read loop and bridges, then close the transport.
    ///
    /// Requests still waiting for a response fail with a transport error.
    /// The read loop and bridges are always stopped; only the transport's
    /// own close error is returned.
    pub async fn close(mut self) -> Result<()> {
        let mut parts = Parts {
            transport: Arc::clone(&self.transport),
            cancellation: self.cancellation.clone(),
            read_loop: self.read_loop.take(),
            bridges: std::mem::take(&mut self.bridges),
        };
        parts.shutdown().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancellation.cancel();
        for bridge in &self.bridges {
            bridge.abort();
        }
    }
}

/// Resources acquired by `start`, before and after the handshake.
struct Parts {
    transport: Arc<dyn Transport>,
    cancellation: CancellationToken,
    read_loop: Option<JoinHandle<()>>,
    bridges: Vec<JoinHandle<()>>,
}

impl Parts {
    fn into_session(mut self, protocol: InitializedMcpProtocol) -> Session {
        Session {
            protocol,
            transport: Arc::clone(&self.transport),
            cancellation: self.cancellation.clone(),
            read_loop: self.read_loop.take(),
            bridges: std::mem::take(&mut self.bridges),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.cancellation.cancel();
        for bridge in self.bridges.drain(..) {
            bridge.abort();
        }
        if let Some(read_loop) = self.read_loop.take() {
            if let Err(e) = read_loop.await {
                tracing::warn!(error = %e, "read loop task failed");
            }
        }
        self.transport.close().await
    }
}
