#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket failed to open or errored at the transport level.
    #[error(transparent)]
    ConnectionFailed(Box<tokio_tungstenite::tungstenite::Error>),
    /// Gateway closed the connection before the handshake was answered.
    #[error("gateway closed the connection before the handshake completed")]
    ConnectionDropped,
    /// Gateway answered the `connect` handshake with `ok: false`.
    #[error("handshake rejected: {message}")]
    HandshakeRejected { message: String },
    /// No response arrived within the configured deadline.
    #[error("request '{method}' timed out")]
    Timeout { method: String },
    /// `connect()` was called on a client that is already running.
    #[error("client already started")]
    AlreadyStarted,
    /// The client was deliberately disconnected while the call was in flight.
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::ConnectionFailed(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
