//! Per-connection WebSocket handling: handshake first, then RPC dispatch.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use sarah_protocol::{
    ConnectParams, GatewayFrame, HANDSHAKE_TIMEOUT_MS, RequestFrame, ResponseFrame, events, methods,
};

use crate::state::{CLIENT_BUFFER_FRAMES, ConnectedClient, GatewayState};

pub(crate) async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();

    // The first frame must be a `connect` request inside the handshake
    // window; anything else closes the connection.
    let first = tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        stream.next(),
    )
    .await;
    let Ok(Some(Ok(Message::Text(text)))) = first else {
        debug!(%addr, "connection ended before handshake");
        return;
    };

    let connect = match GatewayFrame::from_wire(text.as_str()) {
        Ok(GatewayFrame::Request(req)) if req.method == methods::CONNECT => req,
        Ok(_) | Err(_) => {
            debug!(%addr, "first frame was not a connect request");
            return;
        },
    };

    let params = match check_handshake(&state, &connect) {
        Ok(params) => params,
        Err(reason) => {
            warn!(%addr, reason, "handshake refused");
            let refusal = GatewayFrame::Response(ResponseFrame::err(connect.id, reason));
            if let Ok(json) = refusal.to_wire() {
                let _ = sink.send(Message::Text(json.into())).await;
            }
            return;
        },
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_BUFFER_FRAMES);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    info!(%conn_id, client = %params.client.id, platform = %params.client.platform, "client connected");
    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            connect_params: params,
            sender: tx.clone(),
            connected_at: Instant::now(),
        })
        .await;

    respond(
        &tx,
        ResponseFrame::ok(connect.id, serde_json::json!({"status": "connected"})),
    )
    .await;

    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => handle_frame(&state, &tx, text.as_str()).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {},
        }
    }

    state.remove_client(&conn_id).await;
    info!(%conn_id, "client disconnected");
    writer.abort();
}

/// Validate connect params: shape, protocol range, token.
fn check_handshake(
    state: &GatewayState,
    connect: &RequestFrame,
) -> Result<ConnectParams, &'static str> {
    let params: ConnectParams = connect
        .params
        .clone()
        .and_then(|p| serde_json::from_value(p).ok())
        .ok_or("invalid connect params")?;

    if !params.supports_current_protocol() {
        return Err("unsupported protocol version");
    }
    if let Some(expected) = state.token.as_deref() {
        let presented = params
            .auth
            .as_ref()
            .and_then(|auth| auth.token.as_deref())
            .unwrap_or("");
        if presented != expected {
            return Err("token mismatch");
        }
    }
    Ok(params)
}

/// Route one inbound text message. Malformed input drops the message, not
/// the connection.
async fn handle_frame(state: &Arc<GatewayState>, tx: &mpsc::Sender<String>, raw: &str) {
    let frame = match GatewayFrame::from_wire(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "dropping malformed frame");
            return;
        },
    };
    let GatewayFrame::Request(req) = frame else {
        debug!("ignoring non-request frame from client");
        return;
    };

    match req.method.as_str() {
        // A repeated connect on a live connection is tolerated and answered
        // the same way as the handshake.
        methods::CONNECT => {
            respond(
                tx,
                ResponseFrame::ok(req.id, serde_json::json!({"status": "connected"})),
            )
            .await;
        },
        methods::AGENT_CHAT => handle_chat(state, tx, req).await,
        other => {
            debug!(method = other, "unknown method");
            respond(tx, ResponseFrame::err(req.id, format!("unknown method '{other}'"))).await;
        },
    }
}

async fn handle_chat(state: &Arc<GatewayState>, tx: &mpsc::Sender<String>, req: RequestFrame) {
    let message = req
        .params
        .as_ref()
        .and_then(|p| p.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();

    state
        .broadcast(
            events::AGENT_THINKING,
            serde_json::json!({"status": "Sarah is processing..."}),
        )
        .await;

    match state.agent.chat(&message).await {
        Ok(text) => {
            respond(
                tx,
                ResponseFrame::ok(req.id, serde_json::json!({"response": text})),
            )
            .await;
            state
                .broadcast(events::AGENT_RESPONSE, serde_json::json!({"text": text}))
                .await;
        },
        Err(e) => {
            warn!(error = %e, "agent chat failed");
            respond(tx, ResponseFrame::err(req.id, e)).await;
        },
    }
}

async fn respond(tx: &mpsc::Sender<String>, response: ResponseFrame) {
    if let Ok(json) = GatewayFrame::Response(response).to_wire() {
        let _ = tx.send(json).await;
    }
}
