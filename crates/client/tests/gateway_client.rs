//! Integration tests driving a `GatewayClient` against an in-process
//! WebSocket server, one scripted connection per test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::net::{TcpListener, TcpStream},
    tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message},
};

use {
    sarah_client::{ClientError, ConnectionStatus, GatewayClient, GatewayConfig},
    sarah_protocol::{EventFrame, GatewayFrame, RequestFrame, ResponseFrame, events, methods},
};

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, format!("ws://127.0.0.1:{port}/ws"))
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (tcp, _) = listener.accept().await.expect("accept");
    accept_async(tcp).await.expect("ws accept")
}

/// Read inbound frames until a request arrives.
async fn next_request(server: &mut ServerWs) -> RequestFrame {
    loop {
        let msg = server.next().await.expect("stream ended").expect("frame");
        if let Message::Text(text) = msg
            && let Ok(GatewayFrame::Request(req)) = GatewayFrame::from_wire(text.as_str())
        {
            return req;
        }
    }
}

async fn send_frame(server: &mut ServerWs, frame: GatewayFrame) {
    server
        .send(Message::Text(frame.to_wire().expect("serialize").into()))
        .await
        .expect("send");
}

/// Consume the `connect` request and answer it `ok: true`.
async fn answer_handshake(server: &mut ServerWs) {
    let req = next_request(server).await;
    assert_eq!(req.method, methods::CONNECT);
    send_frame(
        server,
        GatewayFrame::Response(ResponseFrame::ok(
            req.id,
            serde_json::json!({"status": "connected"}),
        )),
    )
    .await;
}

fn test_config(url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new(url);
    config.request_timeout = Duration::from_secs(5);
    config.handshake_timeout = Duration::from_secs(5);
    config.reconnect_delay = Duration::from_millis(100);
    config
}

/// Connect a client and a scripted server over a fresh listener.
async fn connected_pair() -> (TcpListener, GatewayClient, ServerWs) {
    let (listener, url) = bind().await;
    let client = GatewayClient::new(test_config(&url));
    let (connected, server) = tokio::join!(client.connect(), async {
        let mut server = accept(&listener).await;
        answer_handshake(&mut server).await;
        server
    });
    connected.expect("connect");
    (listener, client, server)
}

// ── Handshake ────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_resolves_on_handshake_ok() {
    let (_listener, client, _server) = connected_pair().await;
    assert_eq!(client.current_status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn connect_sends_protocol_bounds_and_token() {
    let (listener, url) = bind().await;
    let client = GatewayClient::new(test_config(&url).with_token("sovereign-ui-token"));

    let (connected, handshake) = tokio::join!(client.connect(), async {
        let mut server = accept(&listener).await;
        let req = next_request(&mut server).await;
        send_frame(
            &mut server,
            GatewayFrame::Response(ResponseFrame::ok(req.id.as_str(), serde_json::json!({}))),
        )
        .await;
        (req, server)
    });
    connected.expect("connect");

    let (req, _server) = handshake;
    let params = req.params.unwrap();
    assert_eq!(params["minProtocol"], 3);
    assert_eq!(params["maxProtocol"], 3);
    assert_eq!(params["auth"]["token"], "sovereign-ui-token");
    assert!(params["client"]["id"].is_string());
}

#[tokio::test]
async fn connect_rejects_on_handshake_error() {
    let (listener, url) = bind().await;
    let client = GatewayClient::new(test_config(&url));

    let (connected, _server) = tokio::join!(client.connect(), async {
        let mut server = accept(&listener).await;
        let req = next_request(&mut server).await;
        send_frame(
            &mut server,
            GatewayFrame::Response(ResponseFrame::err(req.id, "token mismatch")),
        )
        .await;
        server
    });

    match connected {
        Err(ClientError::HandshakeRejected { message }) => assert_eq!(message, "token mismatch"),
        other => panic!("expected HandshakeRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_fails_when_nothing_listens() {
    let (listener, url) = bind().await;
    drop(listener);

    let client = GatewayClient::new(test_config(&url));
    match client.connect().await {
        Err(ClientError::ConnectionFailed(_)) => {},
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn second_connect_is_refused() {
    let (_listener, client, _server) = connected_pair().await;
    match client.connect().await {
        Err(ClientError::AlreadyStarted) => {},
        other => panic!("expected AlreadyStarted, got {other:?}"),
    }
}

// ── Request/response correlation ─────────────────────────────────────────

#[tokio::test]
async fn request_resolves_with_matching_response() {
    let (_listener, client, mut server) = connected_pair().await;

    let (response, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "hi"})),
        async {
            let req = next_request(&mut server).await;
            assert_eq!(req.method, methods::AGENT_CHAT);
            assert_eq!(req.params.unwrap()["message"], "hi");
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(
                    req.id,
                    serde_json::json!({"text": "hello"}),
                )),
            )
            .await;
        }
    );

    let response = response.expect("request");
    assert!(response.ok);
    assert_eq!(response.payload.unwrap()["text"], "hello");
}

#[tokio::test]
async fn out_of_order_responses_match_by_id() {
    let (_listener, client, mut server) = connected_pair().await;
    let client = Arc::new(client);

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .request(methods::AGENT_CHAT, serde_json::json!({"message": "first"}))
                .await
        }
    });
    let req_a = next_request(&mut server).await;

    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .request(methods::AGENT_CHAT, serde_json::json!({"message": "second"}))
                .await
        }
    });
    let req_b = next_request(&mut server).await;

    // Answer in reverse order.
    send_frame(
        &mut server,
        GatewayFrame::Response(ResponseFrame::ok(req_b.id.as_str(), serde_json::json!({"n": 2}))),
    )
    .await;
    send_frame(
        &mut server,
        GatewayFrame::Response(ResponseFrame::ok(req_a.id.as_str(), serde_json::json!({"n": 1}))),
    )
    .await;

    let first = first.await.unwrap().expect("first request");
    let second = second.await.unwrap().expect("second request");
    assert_eq!(first.payload.unwrap()["n"], 1);
    assert_eq!(second.payload.unwrap()["n"], 2);
}

#[tokio::test]
async fn unknown_response_id_is_a_no_op() {
    let (_listener, client, mut server) = connected_pair().await;

    send_frame(
        &mut server,
        GatewayFrame::Response(ResponseFrame::ok("ghost", serde_json::json!({}))),
    )
    .await;

    // The connection survives and later traffic still correlates.
    let (response, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "still here"})),
        async {
            let req = next_request(&mut server).await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(req.id, serde_json::json!({}))),
            )
            .await;
        }
    );
    assert!(response.expect("request").ok);
}

#[tokio::test]
async fn duplicate_response_resolves_only_once() {
    let (_listener, client, mut server) = connected_pair().await;

    let (response, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "once"})),
        async {
            let req = next_request(&mut server).await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(
                    req.id.as_str(),
                    serde_json::json!({"take": 1}),
                )),
            )
            .await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(
                    req.id.as_str(),
                    serde_json::json!({"take": 2}),
                )),
            )
            .await;
        }
    );
    assert_eq!(response.expect("request").payload.unwrap()["take"], 1);

    // The duplicate was dropped silently; the client still answers.
    let (followup, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "again"})),
        async {
            let req = next_request(&mut server).await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(req.id, serde_json::json!({}))),
            )
            .await;
        }
    );
    assert!(followup.expect("followup").ok);
}

#[tokio::test]
async fn request_times_out_when_never_answered() {
    let (listener, url) = bind().await;
    let mut config = test_config(&url);
    config.request_timeout = Duration::from_millis(300);
    let client = GatewayClient::new(config);

    let (connected, mut server) = tokio::join!(client.connect(), async {
        let mut server = accept(&listener).await;
        answer_handshake(&mut server).await;
        server
    });
    connected.expect("connect");

    let started = tokio::time::Instant::now();
    let (result, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "void"})),
        async {
            // Swallow the request, never answer.
            let _ = next_request(&mut server).await;
        }
    );
    match result {
        Err(ClientError::Timeout { method }) => {
            assert_eq!(method, methods::AGENT_CHAT);
            assert!(started.elapsed() >= Duration::from_millis(300));
        },
        other => panic!("expected Timeout, got {other:?}"),
    }
}

// ── Event subscriptions ──────────────────────────────────────────────────

#[tokio::test]
async fn event_handler_receives_payload() {
    let (_listener, client, mut server) = connected_pair().await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client
        .on_event(events::AGENT_THINKING, move |payload| {
            let _ = tx.send(payload);
        })
        .await;

    send_frame(
        &mut server,
        GatewayFrame::Event(EventFrame::new(
            events::AGENT_THINKING,
            serde_json::json!({"status": "PROCESSING"}),
            1,
        )),
    )
    .await;

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event delivered")
        .unwrap();
    assert_eq!(payload["status"], "PROCESSING");
    assert!(rx.try_recv().is_err(), "handler invoked exactly once");
}

#[tokio::test]
async fn second_handler_replaces_first() {
    let (_listener, client, mut server) = connected_pair().await;

    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    client
        .on_event(events::AGENT_RESPONSE, move |payload| {
            let _ = tx_a.send(payload);
        })
        .await;
    client
        .on_event(events::AGENT_RESPONSE, move |payload| {
            let _ = tx_b.send(payload);
        })
        .await;

    send_frame(
        &mut server,
        GatewayFrame::Event(EventFrame::new(
            events::AGENT_RESPONSE,
            serde_json::json!({"text": "hello"}),
            1,
        )),
    )
    .await;

    let payload = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
        .await
        .expect("replacement handler invoked")
        .unwrap();
    assert_eq!(payload["text"], "hello");
    assert!(rx_a.try_recv().is_err(), "replaced handler never invoked");
}

#[tokio::test]
async fn unsubscribed_event_is_ignored() {
    let (_listener, client, mut server) = connected_pair().await;

    send_frame(
        &mut server,
        GatewayFrame::Event(EventFrame::new(
            "presence",
            serde_json::json!({"who": "nobody"}),
            1,
        )),
    )
    .await;

    // Still alive afterwards.
    let (response, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "ping"})),
        async {
            let req = next_request(&mut server).await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(req.id, serde_json::json!({}))),
            )
            .await;
        }
    );
    assert!(response.expect("request").ok);
}

// ── Malformed input ──────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_frame_does_not_kill_the_connection() {
    let (_listener, client, mut server) = connected_pair().await;

    server
        .send(Message::Text("not json".into()))
        .await
        .expect("send garbage");

    let (response, _) = tokio::join!(
        client.request(methods::AGENT_CHAT, serde_json::json!({"message": "after"})),
        async {
            let req = next_request(&mut server).await;
            send_frame(
                &mut server,
                GatewayFrame::Response(ResponseFrame::ok(req.id, serde_json::json!({}))),
            )
            .await;
        }
    );
    assert!(response.expect("request").ok);
}

// ── Reconnection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (listener, client, server) = connected_pair().await;
    drop(server);

    let mut status = client.status();
    // A second connection arrives and completes a fresh handshake.
    let mut server = tokio::time::timeout(Duration::from_secs(2), accept(&listener))
        .await
        .expect("reconnect attempt");
    answer_handshake(&mut server).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("status settles")
    .expect("status channel");
}

#[tokio::test]
async fn close_before_handshake_still_schedules_reconnect() {
    let (listener, url) = bind().await;
    let client = GatewayClient::new(test_config(&url));

    let (connected, _) = tokio::join!(client.connect(), async {
        let mut server = accept(&listener).await;
        // Read the connect request, then vanish without answering.
        let _ = next_request(&mut server).await;
        drop(server);
    });
    match connected {
        Err(ClientError::ConnectionDropped) => {},
        other => panic!("expected ConnectionDropped, got {other:?}"),
    }

    // The retry cycle completes the handshake on the next connection.
    let mut server = tokio::time::timeout(Duration::from_secs(2), accept(&listener))
        .await
        .expect("reconnect attempt");
    answer_handshake(&mut server).await;

    let mut status = client.status();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("status settles")
    .expect("status channel");
}

#[tokio::test]
async fn pending_requests_survive_a_drop_unresolved() {
    let (listener, client, mut server) = connected_pair().await;
    let client = Arc::new(client);

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .request(methods::AGENT_CHAT, serde_json::json!({"message": "a"}))
                .await
        }
    });
    let _ = next_request(&mut server).await;
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .request(methods::AGENT_CHAT, serde_json::json!({"message": "b"}))
                .await
        }
    });
    let _ = next_request(&mut server).await;

    drop(server);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Neither call settled: no resolution, no error, no crash.
    assert!(!first.is_finished());
    assert!(!second.is_finished());

    // And a reconnect was scheduled.
    let mut server = tokio::time::timeout(Duration::from_secs(2), accept(&listener))
        .await
        .expect("reconnect attempt");
    answer_handshake(&mut server).await;

    first.abort();
    second.abort();
}

// ── Deliberate disconnect ────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_suppresses_reconnect() {
    let (listener, client, server) = connected_pair().await;

    client.disconnect().await;
    drop(server);
    assert_eq!(client.current_status(), ConnectionStatus::Disconnected);

    // Well past the 100ms reconnect delay: nothing dials back in.
    let redial = tokio::time::timeout(Duration::from_millis(400), accept(&listener)).await;
    assert!(redial.is_err(), "deliberate close must not reconnect");
}

#[tokio::test]
async fn disconnect_fails_in_flight_requests() {
    let (_listener, client, mut server) = connected_pair().await;
    let client = Arc::new(client);

    let pending = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .request(methods::AGENT_CHAT, serde_json::json!({"message": "doomed"}))
                .await
        }
    });
    let _ = next_request(&mut server).await;

    client.disconnect().await;

    match pending.await.unwrap() {
        Err(ClientError::Closed) => {},
        other => panic!("expected Closed, got {other:?}"),
    }
}
