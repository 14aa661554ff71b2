//! End-to-end uplink tests against a real WebSocket backend.

use futures_util::{SinkExt, StreamExt};
use remi::uplink::{StreamKind, StreamUplink, TransportConnector, WsConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Minimal stand-in for the transcription backend: records binary frames
/// and plays a scripted set of text frames to each client on connect.
async fn spawn_backend(
    greeting_frames: Vec<String>,
) -> (String, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let frames = greeting_frames.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                for frame in frames {
                    ws.send(Message::Text(frame)).await.unwrap();
                }
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Binary(payload) = message {
                        let _ = tx.send(payload);
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), rx)
}

fn uplink_for(base_url: &str) -> StreamUplink {
    let connector: Arc<dyn TransportConnector> =
        Arc::new(WsConnector::new(base_url, Duration::from_secs(2)));
    StreamUplink::new(StreamKind::Microphone, connector, 100)
}

#[tokio::test]
async fn chunks_arrive_in_send_order() {
    let (base_url, mut received) = spawn_backend(Vec::new()).await;
    let uplink = uplink_for(&base_url);

    uplink.connect().await.unwrap();
    uplink.send(vec![1, 1]).await;
    uplink.send(vec![2, 2]).await;
    uplink.send(vec![3, 3]).await;

    assert_eq!(received.recv().await.unwrap(), vec![1, 1]);
    assert_eq!(received.recv().await.unwrap(), vec![2, 2]);
    assert_eq!(received.recv().await.unwrap(), vec![3, 3]);

    uplink.close().await;
}

#[tokio::test]
async fn queued_chunks_flush_on_connect() {
    // Queue while nothing is reachable yet.
    let dead = uplink_for("ws://127.0.0.1:9");
    drop(dead);

    let (base_url, mut received) = spawn_backend(Vec::new()).await;
    let uplink = uplink_for(&base_url);

    // send() before any connect: the chunk is queued, then the lazy
    // background connect flushes it.
    uplink.send(vec![b'q']).await;
    uplink.send(vec![b'r']).await;

    assert_eq!(received.recv().await.unwrap(), vec![b'q']);
    assert_eq!(received.recv().await.unwrap(), vec![b'r']);

    uplink.close().await;
}

#[tokio::test]
async fn only_transcription_frames_reach_the_handler() {
    let (base_url, _received) = spawn_backend(vec![
        "garbage".to_string(),
        r#"{"type":"keepalive"}"#.to_string(),
        r#"{"type":"transcription","text":"hello from the backend","timestamp":"2024-01-01T00:00:00Z","stream":"mic"}"#
            .to_string(),
    ])
    .await;
    let uplink = uplink_for(&base_url);

    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    uplink
        .on_message(move |message| {
            let _ = message_tx.send(message);
        })
        .await;

    uplink.connect().await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(2), message_rx.recv())
        .await
        .expect("timed out waiting for transcription")
        .unwrap();
    assert_eq!(message.text, "hello from the backend");
    assert_eq!(message.stream, StreamKind::Microphone);

    // The two junk frames produced no handler calls.
    assert!(message_rx.try_recv().is_err());

    uplink.close().await;
}

#[tokio::test]
async fn connect_to_unreachable_backend_fails_and_send_keeps_queueing() {
    let uplink = uplink_for("ws://127.0.0.1:9");

    assert!(uplink.connect().await.is_err());
    assert!(!uplink.is_connected().await);

    uplink.send(vec![0]).await;
    uplink.send(vec![1]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Chunks stay queued for the next lazy reconnect.
    assert_eq!(uplink.queued_len().await, 2);

    uplink.close().await;
    assert_eq!(uplink.queued_len().await, 0);
}
