//! WebSocket RPC client for the Sarah gateway control plane.
//!
//! One socket carries all traffic: request/response pairs correlated by id,
//! and named server-push events delivered to a single subscriber per name.
//! After a transport drop the client reconnects on its own at a fixed delay,
//! indefinitely, until [`GatewayClient::disconnect`] is called or the handle
//! is dropped.

mod config;
mod conn;
mod error;

pub use {
    config::{ConnectionStatus, GatewayConfig},
    error::{ClientError, Result},
};

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    tokio::sync::{Mutex, mpsc, oneshot, watch},
    tokio_tungstenite::tungstenite::Message,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use sarah_protocol::{GatewayFrame, RequestFrame, ResponseFrame};

type EventHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

// ── Shared state ─────────────────────────────────────────────────────────────

/// State shared between the public handle and the connection task.
pub(crate) struct Shared {
    pub(crate) config: GatewayConfig,
    /// Pending request table: id → single-use resolver. An entry is created
    /// before its frame is sent and removed when the matching response
    /// arrives, times out, or the resolver's caller goes away.
    pub(crate) pending: Mutex<HashMap<String, oneshot::Sender<ResponseFrame>>>,
    /// Event subscription table: event name → the one registered handler.
    pub(crate) handlers: Mutex<HashMap<String, EventHandler>>,
    /// Sender feeding the current connection's write loop, when one exists.
    pub(crate) outbound: Mutex<Option<mpsc::Sender<Message>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    started: AtomicBool,
}

impl Shared {
    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Issue one request frame and await the matching response.
    ///
    /// The resolver is registered BEFORE the frame is handed to the write
    /// loop so a fast response cannot race the table entry. A request issued
    /// while the transport is down stays parked in the table; the reconnect
    /// cycle or the deadline settles it.
    pub(crate) async fn request_inner(
        &self,
        method: &str,
        params: serde_json::Value,
        deadline: std::time::Duration,
    ) -> Result<ResponseFrame> {
        let id = uuid::Uuid::new_v4().to_string();
        let wire = GatewayFrame::Request(RequestFrame::new(id.as_str(), method, params)).to_wire()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let sender = self.outbound.lock().await.clone();
        match sender {
            Some(sender) => {
                if sender.send(Message::Text(wire.into())).await.is_err() {
                    debug!(method, "write loop gone, request parked until reconnect");
                }
            },
            None => debug!(method, "transport down, request parked until reconnect"),
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Resolver dropped without firing: a deliberate disconnect
            // cleared the table.
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout {
                    method: method.to_string(),
                })
            },
        }
    }

    /// Drop table entries whose caller already gave up (timed out requests
    /// race their own cleanup, abandoned handshakes do not clean up at all).
    pub(crate) async fn prune_pending(&self) {
        self.pending.lock().await.retain(|_, tx| !tx.is_closed());
    }
}

// ── Public handle ────────────────────────────────────────────────────────────

/// Handle to the gateway connection. Owns the socket and both lookup tables
/// exclusively; all interaction goes through [`connect`](Self::connect),
/// [`request`](Self::request) and [`on_event`](Self::on_event).
///
/// Dropping the handle stops the connection task.
pub struct GatewayClient {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                status_tx,
                started: AtomicBool::new(false),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Open the socket and perform the `connect` handshake.
    ///
    /// Resolves once the gateway accepts the handshake; rejects on a socket
    /// failure, a closed connection, or an `ok: false` handshake answer.
    /// Whatever the first attempt's outcome, the connection task keeps
    /// retrying at the configured delay until the handle goes away.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(conn::run(
            Arc::clone(&self.shared),
            self.shutdown.clone(),
            ready_tx,
        ));
        ready_rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Fire one RPC call and await its response, whichever order responses
    /// arrive in. Times out with [`ClientError::Timeout`] after the
    /// configured deadline.
    pub async fn request(&self, method: &str, params: serde_json::Value) -> Result<ResponseFrame> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }
        self.shared
            .request_inner(method, params, self.shared.config.request_timeout)
            .await
    }

    /// Register `handler` for future events named `event`, replacing any
    /// previously registered handler for that name. At most one handler per
    /// name; there is no unsubscribe.
    pub async fn on_event<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .lock()
            .await
            .insert(event.into(), Arc::new(handler));
    }

    /// Subscribe to connection state changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    /// Deliberately close the connection and suppress the scheduled
    /// reconnect. Requests still in flight fail with [`ClientError::Closed`].
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        *self.shared.outbound.lock().await = None;
        self.shared.pending.lock().await.clear();
        self.shared.set_status(ConnectionStatus::Disconnected);
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
