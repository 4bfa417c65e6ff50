//! Connection supervisor: one socket per cycle, fixed-delay reconnect.
//!
//! Each cycle opens the socket, runs the `connect` handshake, then pumps
//! inbound frames until the transport drops. The delay between cycles is
//! unconditional: a clean close schedules a reconnect exactly like a
//! network failure. Only a deliberate shutdown breaks the loop.

use std::sync::Arc;

use {
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use sarah_protocol::{ConnectParams, GatewayFrame, methods};

use crate::{ClientError, ConnectionStatus, Shared};

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER_FRAMES: usize = 256;

type Ready = Option<oneshot::Sender<Result<(), ClientError>>>;

fn notify(ready: &mut Ready, result: Result<(), ClientError>) {
    if let Some(tx) = ready.take() {
        let _ = tx.send(result);
    }
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    ready_tx: oneshot::Sender<Result<(), ClientError>>,
) {
    let mut ready: Ready = Some(ready_tx);
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        attempt(&shared, &shutdown, &mut ready).await;
        // Entries whose caller is still waiting survive the cycle and settle
        // at their own deadline; abandoned resolvers (a dropped handshake
        // among them) are swept here.
        shared.prune_pending().await;
        if shutdown.is_cancelled() {
            break;
        }

        debug!(
            delay_ms = shared.config.reconnect_delay.as_millis() as u64,
            "gateway disconnected, reconnect scheduled"
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {},
        }
    }
    shared.set_status(ConnectionStatus::Disconnected);
}

/// One connection cycle: open, handshake, pump until the transport drops.
async fn attempt(shared: &Arc<Shared>, shutdown: &CancellationToken, ready: &mut Ready) {
    shared.set_status(ConnectionStatus::Connecting);

    let stream = tokio::select! {
        _ = shutdown.cancelled() => return,
        opened = connect_async(shared.config.url.as_str()) => match opened {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(url = %shared.config.url, error = %e, "gateway socket failed to open");
                notify(ready, Err(e.into()));
                shared.set_status(ConnectionStatus::Disconnected);
                return;
            },
        },
    };

    let (mut sink, mut stream) = stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER_FRAMES);
    *shared.outbound.lock().await = Some(out_tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    shared.set_status(ConnectionStatus::Authenticating);

    // The handshake is an ordinary request; it shares the pending table and
    // the write loop with caller traffic and must run concurrently with the
    // inbound pump below, which delivers its response.
    let handshake = async {
        let params = serde_json::to_value(ConnectParams::v3(
            shared.config.client.clone(),
            shared.config.token.clone(),
        ))?;
        let response = shared
            .request_inner(methods::CONNECT, params, shared.config.handshake_timeout)
            .await?;
        if response.ok {
            Ok(())
        } else {
            Err(ClientError::HandshakeRejected {
                message: response
                    .error
                    .unwrap_or_else(|| "gateway refused the handshake".into()),
            })
        }
    };
    tokio::pin!(handshake);
    let mut authenticated = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = &mut handshake, if !authenticated => match outcome {
                Ok(()) => {
                    authenticated = true;
                    shared.set_status(ConnectionStatus::Connected);
                    info!(url = %shared.config.url, "gateway connected");
                    notify(ready, Ok(()));
                },
                Err(e) => {
                    warn!(error = %e, "gateway handshake failed");
                    notify(ready, Err(e));
                    break;
                },
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => dispatch(shared, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                // Binary frames are not part of the protocol; ping/pong is
                // answered by the transport.
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!(error = %e, "gateway socket error");
                    break;
                },
            },
        }
    }

    if !authenticated {
        notify(ready, Err(ClientError::ConnectionDropped));
    }

    *shared.outbound.lock().await = None;
    writer.abort();
    shared.set_status(ConnectionStatus::Disconnected);
}

/// Route one inbound text message. A frame that fails to parse is fatal for
/// that message, never for the connection.
async fn dispatch(shared: &Shared, raw: &str) {
    let frame = match GatewayFrame::from_wire(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        },
    };

    match frame {
        GatewayFrame::Response(response) => {
            let resolver = shared.pending.lock().await.remove(&response.id);
            match resolver {
                // The receiver may have timed out in the meantime; a failed
                // send is the same no-op as an unknown id.
                Some(tx) => {
                    let _ = tx.send(response);
                },
                None => debug!(id = %response.id, "response for unknown or settled request"),
            }
        },
        GatewayFrame::Event(event) => {
            let handler = shared.handlers.lock().await.get(&event.event).cloned();
            match handler {
                Some(handler) => handler(event.payload.unwrap_or(serde_json::Value::Null)),
                None => debug!(event = %event.event, "event with no subscriber"),
            }
        },
        GatewayFrame::Request(request) => {
            debug!(method = %request.method, "ignoring server-initiated request");
        },
    }
}
