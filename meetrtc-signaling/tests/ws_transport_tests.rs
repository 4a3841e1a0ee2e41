//! Integration tests for the WebSocket signaling transport
//!
//! Each test runs a small scripted room server on `127.0.0.1:0` and drives it
//! through a [`SignalingChannel`] backed by [`WebSocketTransport`].

use futures::{SinkExt, StreamExt};
use meetrtc_core::MeetRtcError;
use meetrtc_signaling::{ChannelConfig, ChannelEvent, SignalingChannel, WebSocketTransport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Start a server that answers requests and pushes one notification
///
/// `fail` requests are rejected, `bye` makes the server close the socket
/// after answering, and `slow` is never answered.
async fn start_room_server() -> String {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        ws.send(Message::Text(
            json!({"type": "notification", "method": "roomReady", "data": {"turnServers": []}})
                .to_string(),
        ))
        .await
        .unwrap();

        while let Some(Ok(message)) = ws.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            let id = frame["id"].clone();
            let method = frame["method"].as_str().unwrap_or_default().to_string();

            let reply = match method.as_str() {
                "fail" => json!({"type": "response", "id": id, "ok": false, "error": "forbidden"}),
                "slow" => continue,
                _ => json!({"type": "response", "id": id, "ok": true, "data": frame["data"]}),
            };
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            if method == "bye" {
                ws.close(None).await.unwrap();
                // Drain until the client acknowledges the close
                while let Some(Ok(_)) = ws.next().await {}
                break;
            }
        }
    });

    format!("ws://{}/?peerId=peer-1&roomId=room-1", addr)
}

fn channel() -> SignalingChannel {
    let config = ChannelConfig::default()
        .with_request_timeout(Duration::from_millis(200))
        .with_request_retries(2);
    SignalingChannel::new(Arc::new(WebSocketTransport::new()), config)
}

async fn next_event(events: &mut meetrtc_core::EventStream<ChannelEvent>) -> ChannelEvent {
    timeout(Duration::from_secs(5), events.next())
        .await
        .expect("event timeout")
        .expect("event stream closed")
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_request_response_round_trip() {
    let url = start_room_server().await;
    let channel = channel();
    channel.connect(&url).await.unwrap();

    let data = json!({"displayName": "Alice", "picture": ""});
    let response = channel.send_request("join", data.clone()).await.unwrap();
    assert_eq!(response, data);

    channel.disconnect().await;
}

#[tokio::test]
async fn test_server_error_response() {
    let url = start_room_server().await;
    let channel = channel();
    channel.connect(&url).await.unwrap();

    let err = channel.send_request("fail", json!({})).await.unwrap_err();
    match err {
        MeetRtcError::Server { method, error } => {
            assert_eq!(method, "fail");
            assert_eq!(error, json!("forbidden"));
        }
        other => panic!("expected server error, got {other}"),
    }
    assert_eq!(channel.stats().attempts, 1);
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let url = start_room_server().await;
    let channel = channel();
    channel.connect(&url).await.unwrap();

    let err = channel.send_request("slow", json!({})).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(channel.stats().attempts, 2);
}

// ============================================================================
// Notifications and connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_notification_and_server_close() {
    let url = start_room_server().await;
    let channel = channel();
    let mut events = channel.subscribe();
    channel.connect(&url).await.unwrap();

    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    match next_event(&mut events).await {
        ChannelEvent::Notification(n) => assert_eq!(n.method, "roomReady"),
        other => panic!("unexpected event: {other:?}"),
    }

    channel.send_request("bye", json!({})).await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Disconnected);
    assert!(!channel.is_connected());

    let err = channel.send_request("join", json!({})).await.unwrap_err();
    assert!(matches!(err, MeetRtcError::NotConnected));
}

#[tokio::test]
async fn test_client_disconnect() {
    let url = start_room_server().await;
    let channel = channel();
    let mut events = channel.subscribe();
    channel.connect(&url).await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

    channel.disconnect().await;

    loop {
        match next_event(&mut events).await {
            ChannelEvent::Notification(_) => continue,
            event => {
                assert_eq!(event, ChannelEvent::Disconnected);
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = channel();
    let err = channel
        .connect(&format!("ws://{}/", addr))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert!(!channel.is_connected());
}
