//! Gateway WebSocket/RPC protocol definitions.
//!
//! Protocol version 3. All communication uses JSON text frames over a single
//! WebSocket, one frame object per message.
//!
//! Frame types:
//! - `RequestFrame`  — client → gateway RPC call
//! - `ResponseFrame` — gateway → client RPC result, correlated by `id`
//! - `EventFrame`    — gateway → client server-push

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 3;
pub const DEFAULT_PORT: u16 = 18789;
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:18789/ws";
pub const RECONNECT_DELAY_MS: u64 = 5_000;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const REQUEST_TIMEOUT_MS: u64 = 30_000; // 30s

// ── Method names ─────────────────────────────────────────────────────────────

pub mod methods {
    /// Mandatory first request on every connection.
    pub const CONNECT: &str = "connect";
    /// Ask the agent for a chat reply.
    pub const AGENT_CHAT: &str = "agent.chat";
}

// ── Event names ──────────────────────────────────────────────────────────────

pub mod events {
    /// Agent started working on a request; payload carries a `status` string.
    pub const AGENT_THINKING: &str = "agent.thinking";
    /// Agent produced a reply; payload carries a `text` string.
    pub const AGENT_RESPONSE: &str = "agent.response";
}

pub const KNOWN_EVENTS: &[&str] = &[events::AGENT_THINKING, events::AGENT_RESPONSE];

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Gateway → client RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Gateway → client server-push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        }
    }
}

/// Discriminated union of all frame types, used for inbound dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrame),
    #[serde(rename = "res")]
    Response(ResponseFrame),
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl GatewayFrame {
    /// Serialize for the wire. Frames are plain JSON objects; serialization
    /// only fails on non-string map keys, which none of the frame types have.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single inbound text message.
    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters sent by the client in the initial `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

impl ConnectParams {
    /// Handshake parameters with both protocol bounds pinned to v3.
    pub fn v3(client: ClientInfo, token: Option<String>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            auth: token.map(|token| ConnectAuth { token: Some(token) }),
        }
    }

    /// Whether the advertised protocol range includes [`PROTOCOL_VERSION`].
    pub fn supports_current_protocol(&self) -> bool {
        self.min_protocol <= PROTOCOL_VERSION && self.max_protocol >= PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
