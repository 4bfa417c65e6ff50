use std::time::Duration;

use sarah_protocol::{
    ClientInfo, DEFAULT_GATEWAY_URL, HANDSHAKE_TIMEOUT_MS, RECONNECT_DELAY_MS, REQUEST_TIMEOUT_MS,
};

/// Connection settings for a [`crate::GatewayClient`].
///
/// `Default` targets a local gateway with no auth token configured.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket address of the gateway control plane.
    pub url: String,
    /// Identity sent in the `connect` handshake.
    pub client: ClientInfo,
    /// Bearer token for the handshake. `None` when the gateway runs open.
    pub token: Option<String>,
    /// Deadline for an individual `request()` call.
    pub request_timeout: Duration,
    /// Deadline for the `connect` handshake after the socket opens.
    pub handshake_timeout: Duration,
    /// Fixed delay between a transport drop and the next connection attempt.
    pub reconnect_delay: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.into(),
            client: ClientInfo {
                id: "sarah-client".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                platform: "cli".into(),
            },
            token: None,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// Connection lifecycle as observed through [`crate::GatewayClient::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
