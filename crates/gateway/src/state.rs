use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tokio::sync::{RwLock, mpsc};

use sarah_protocol::{ConnectParams, EventFrame, GatewayFrame};

use crate::agent::AgentService;

/// Outbound frames buffered per client before slow consumers start losing
/// broadcasts.
pub const CLIENT_BUFFER_FRAMES: usize = 256;

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket client currently connected to the gateway.
pub struct ConnectedClient {
    pub conn_id: String,
    pub connect_params: ConnectParams,
    /// Bounded channel feeding this client's write loop.
    pub sender: mpsc::Sender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Send a serialized JSON frame to this client.
    ///
    /// Uses `try_send` so a slow consumer cannot stall the broadcast path;
    /// the frame is dropped instead.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.try_send(frame.to_string()).is_ok()
    }
}

// ── Mutable runtime state ────────────────────────────────────────────────────

pub struct GatewayInner {
    /// All connected WebSocket clients, keyed by conn_id.
    pub clients: HashMap<String, ConnectedClient>,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in `Arc` for use across async tasks.
///
/// Immutable fields and atomics live directly on this struct; mutable
/// runtime state sits in [`GatewayInner`] behind a single `RwLock`.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    /// Bearer token clients must present in the handshake. `None` runs the
    /// gateway open, accepting every client.
    pub token: Option<String>,
    /// The service answering `agent.chat`.
    pub agent: Arc<dyn AgentService>,
    /// Monotonic process start timestamp.
    pub started_at: Instant,
    /// Monotonically increasing sequence counter for broadcast events.
    seq: AtomicU64,
    pub inner: RwLock<GatewayInner>,
}

impl GatewayState {
    pub fn new(token: Option<String>, agent: Arc<dyn AgentService>) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            token,
            agent,
            started_at: Instant::now(),
            seq: AtomicU64::new(0),
            inner: RwLock::new(GatewayInner {
                clients: HashMap::new(),
            }),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a new client connection, returning the new client count.
    pub async fn register_client(&self, client: ConnectedClient) -> usize {
        let mut inner = self.inner.write().await;
        inner.clients.insert(client.conn_id.clone(), client);
        inner.clients.len()
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.inner.write().await.clients.remove(conn_id)
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Broadcast an event frame to every connected client.
    pub async fn broadcast(&self, event: &str, payload: serde_json::Value) {
        let frame = GatewayFrame::Event(EventFrame::new(event, payload, self.next_seq()));
        let Ok(json) = frame.to_wire() else {
            return;
        };
        let inner = self.inner.read().await;
        for client in inner.clients.values() {
            if !client.send(&json) {
                tracing::debug!(conn_id = %client.conn_id, event, "dropped frame for slow consumer");
            }
        }
    }
}
