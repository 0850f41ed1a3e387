//! JSON-RPC request correlation for the MCP client.
//!
//! The [`Correlator`] owns the pending-request table for one connection manager.
//! It handles:
//!
//! - Correlation id allocation
//! - Registration of pending requests with their originating server
//! - Resolution of responses by id, in any order
//! - Timeouts, including discarding responses that arrive late
//!
//! # Resolution Discipline
//!
//! Each pending request has a oneshot rendezvous. Two writers race to complete it: the
//! response path and the timeout path. Both remove the table entry under the table lock,
//! and only the writer that removes the entry completes the rendezvous, so a request is
//! resolved exactly once and the entry never outlives its resolution.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_hub::mcp::jsonrpc::Correlator;
//! use mcp_hub::mcp::transport::memory::MemoryTransport;
//! use std::time::Duration;
//!
//! async fn example() {
//!     let correlator = Correlator::new(Duration::from_secs(30));
//!     let (channel, _peer) = MemoryTransport::pair();
//!
//!     // Resolves once the peer answers, or fails with RequestTimeout after 30 seconds
//!     let result = correlator
//!         .call("demo", channel.transport.as_ref(), "tools/list", None)
//!         .await;
//!     println!("{:?}", result);
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, instrument, warn};

use crate::mcp::transport::Transport;
use crate::mcp::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::telemetry;
use crate::utils::error::{McpError, McpResult};

/// Default deadline for a correlated call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Completion = oneshot::Sender<McpResult<JsonRpcResponse>>;

/// An in-flight request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    /// Originating server id
    pub server_id: String,
    /// Request method, kept for diagnostics
    pub method: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
    completion: Completion,
}

/// Pending-request table and id allocator
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field(
                "pending_requests_count",
                &format!(
                    "{} pending",
                    self.pending.try_lock().map(|p| p.len()).unwrap_or(0)
                ),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Correlator {
    /// Creates a correlator whose calls time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// The per-call deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocates a fresh correlation id, unique for the lifetime of this correlator
    pub fn next_id(&self) -> RequestId {
        RequestId::String(self.next_id.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Sends a request through `transport` and waits for its correlated response.
    ///
    /// The returned value is the response's `result` payload verbatim. A response
    /// carrying `error` fails with `RemoteOperationFailed`; no response within the
    /// deadline fails with `RequestTimeout`.
    #[instrument(skip(self, transport, params), fields(server = %server_id, method = %method))]
    pub async fn call(
        &self,
        server_id: &str,
        transport: &dyn Transport,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<Value> {
        let _guard = telemetry::span_duration("correlated_call");
        let id = self.next_id();
        let request = JsonRpcRequest::new(method, params, id.clone());
        self.send_request(server_id, transport, request)
            .await?
            .into_result()
    }

    /// Registers and sends a prepared request, returning the raw response
    pub async fn send_request(
        &self,
        server_id: &str,
        transport: &dyn Transport,
        request: JsonRpcRequest,
    ) -> McpResult<JsonRpcResponse> {
        let key = request.id.key();
        let method = request.method.clone();
        let rx = self.register(server_id, &key, &method).await?;

        let message = JsonRpcMessage::Request(request);
        if let Err(e) = transport.send(&message).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }
        debug!("Sent request {} ({})", key, method);

        self.wait(&key, &method, rx).await
    }

    /// Sends a notification. No pending request is created.
    pub async fn notify(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<()> {
        let message = JsonRpcMessage::Notification(JsonRpcNotification::new(method, params));
        transport.send(&message).await
    }

    async fn register(
        &self,
        server_id: &str,
        key: &str,
        method: &str,
    ) -> McpResult<oneshot::Receiver<McpResult<JsonRpcResponse>>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(key) {
            return Err(McpError::InvalidMessage(format!(
                "Correlation id {} is already in flight",
                key
            )));
        }
        pending.insert(
            key.to_string(),
            PendingRequest {
                server_id: server_id.to_string(),
                method: method.to_string(),
                created_at: Utc::now(),
                completion: tx,
            },
        );
        Ok(rx)
    }

    async fn wait(
        &self,
        key: &str,
        method: &str,
        mut rx: oneshot::Receiver<McpResult<JsonRpcResponse>>,
    ) -> McpResult<JsonRpcResponse> {
        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed(format!(
                "Request {} was dropped before completion",
                key
            ))),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if pending.remove(key).is_some() {
                    warn!("Request {} ({}) timed out after {:?}", key, method, self.timeout);
                    telemetry::add_metric("request_timeouts", 1.0, &[("method", method.to_string())]);
                    return Err(McpError::RequestTimeout {
                        id: key.to_string(),
                        method: method.to_string(),
                    });
                }
                drop(pending);
                // The response path removed the entry first and completed the rendezvous.
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(McpError::RequestTimeout {
                        id: key.to_string(),
                        method: method.to_string(),
                    }),
                }
            }
        }
    }

    /// Delivers a response from `server_id` to the matching pending request.
    ///
    /// Returns false when no request of that server is pending under the response's
    /// id, which is the case for late responses after a timeout; those are discarded.
    /// A response naming another server's request leaves that request pending.
    pub async fn resolve(&self, server_id: &str, response: JsonRpcResponse) -> bool {
        let key = response.id.key();
        let mut pending = self.pending.lock().await;
        match pending.get(&key) {
            Some(entry) if entry.server_id != server_id => {
                warn!(
                    "Discarding response {} from '{}': request belongs to '{}'",
                    key, server_id, entry.server_id
                );
                false
            }
            Some(_) => {
                if let Some(entry) = pending.remove(&key) {
                    if entry.completion.send(Ok(response)).is_err() {
                        debug!("Caller for request {} went away before resolution", key);
                    }
                }
                true
            }
            None => {
                debug!("Discarding response with no pending request: id={}", key);
                false
            }
        }
    }

    /// Rejects every pending request that originated from `server_id`
    pub async fn fail_server(&self, server_id: &str, reason: &str) -> usize {
        let mut pending = self.pending.lock().await;
        let keys: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| entry.server_id == server_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(entry) = pending.remove(key) {
                let _ = entry
                    .completion
                    .send(Err(McpError::ConnectionClosed(reason.to_string())));
            }
        }
        keys.len()
    }

    /// Number of requests currently in flight
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of requests in flight for one server
    pub async fn pending_for(&self, server_id: &str) -> usize {
        self.pending
            .lock()
            .await
            .values()
            .filter(|entry| entry.server_id == server_id)
            .count()
    }

    /// Drops every pending request. Waiting callers observe `ConnectionClosed`.
    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }
}
