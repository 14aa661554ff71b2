//! Stream uplink state machine.
//!
//! Connection lifecycle is Closed → Connecting → Open with reconnect on
//! demand: a `send` while disconnected queues the chunk and kicks off a
//! connect in the background. At most one handshake is ever in flight per
//! uplink; concurrent callers await the same attempt through a list of
//! pending waiters resolved when it settles.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::queue::ChunkQueue;
use super::transport::{FrameSink, FrameStream, TransportConnector, TransportError};
use super::StreamKind;

/// Inbound frame surfaced to the message handler. Only frames with
/// `type == "transcription"` are ever delivered; everything else on the
/// wire is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionMessage {
    pub text: String,
    pub timestamp: String,
    pub stream: StreamKind,
}

type MessageHandler = Arc<dyn Fn(TranscriptionMessage) + Send + Sync>;

enum ConnectionState {
    Closed,
    Connecting {
        attempt: u64,
        waiters: Vec<oneshot::Sender<Result<(), TransportError>>>,
    },
    Open {
        sink: Box<dyn FrameSink>,
    },
}

struct Inner {
    state: ConnectionState,
    queue: ChunkQueue,
    handler: Option<MessageHandler>,
    reader: Option<JoinHandle<()>>,
    // Bumped when a connect attempt takes ownership. Tags the Connecting
    // state so an attempt that settles late can never consume a newer
    // attempt's state, and tags the reader task so a stale reader can
    // never tear down a newer connection.
    generation: u64,
}

/// Cloneable handle to one logical audio uplink.
#[derive(Clone)]
pub struct StreamUplink {
    kind: StreamKind,
    connector: Arc<dyn TransportConnector>,
    inner: Arc<Mutex<Inner>>,
}

impl StreamUplink {
    pub fn new(
        kind: StreamKind,
        connector: Arc<dyn TransportConnector>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            kind,
            connector,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Closed,
                queue: ChunkQueue::new(queue_capacity),
                handler: None,
                reader: None,
                generation: 0,
            })),
        }
    }

    /// Register the handler for inbound transcription messages. One
    /// handler per uplink; registering again replaces the previous one.
    pub async fn on_message<F>(&self, handler: F)
    where
        F: Fn(TranscriptionMessage) + Send + Sync + 'static,
    {
        self.inner.lock().await.handler = Some(Arc::new(handler));
    }

    /// Open the connection if it is not already open.
    ///
    /// If a handshake is already in flight this awaits that attempt
    /// instead of starting a second one. On success any queued chunks are
    /// flushed oldest-first before the call resolves.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (pending, attempt) = {
            let mut inner = self.inner.lock().await;
            match &mut inner.state {
                ConnectionState::Open { .. } => return Ok(()),
                ConnectionState::Connecting { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    (Some(rx), 0)
                }
                ConnectionState::Closed => {
                    inner.generation += 1;
                    let attempt = inner.generation;
                    inner.state = ConnectionState::Connecting {
                        attempt,
                        waiters: Vec::new(),
                    };
                    (None, attempt)
                }
            }
        };

        // Another caller owns the attempt; wait for it to settle.
        if let Some(rx) = pending {
            return rx.await.unwrap_or(Err(TransportError::Closed));
        }

        // We own the attempt. Handshake without holding the lock so
        // producers can keep queueing chunks meanwhile.
        let result = self.connector.connect(self.kind).await;

        let mut inner = self.inner.lock().await;
        let waiters = match std::mem::replace(&mut inner.state, ConnectionState::Closed) {
            ConnectionState::Connecting {
                attempt: current,
                waiters,
            } if current == attempt => waiters,
            other => {
                // close() raced the handshake, or a newer attempt owns
                // the state now. Leave it alone and release whatever we
                // opened.
                inner.state = other;
                if let Ok((mut sink, _stream)) = result {
                    sink.close().await;
                }
                return Err(TransportError::Closed);
            }
        };

        match result {
            Ok((sink, stream)) => {
                inner.state = ConnectionState::Open { sink };
                debug!("Uplink {} connected", self.kind);

                if flush_queue(&mut inner, self.kind).await {
                    inner.reader = Some(self.spawn_reader(stream, attempt));
                }
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Closed;
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    /// Submit one audio chunk.
    ///
    /// Disconnected: the chunk is queued (evicting the oldest on overflow)
    /// and a connect is kicked off in the background; a connect failure
    /// leaves the chunk queued for the next `send`. Connected: queued
    /// chunks are flushed first, then the chunk goes out directly. A
    /// transmit failure loses the chunk; it is logged, never re-queued.
    pub async fn send(&self, chunk: Vec<u8>) {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, ConnectionState::Open { .. }) {
            if inner.queue.push(chunk).is_some() {
                warn!("Uplink {} queue full, dropping oldest chunk", self.kind);
            }
            drop(inner);

            let uplink = self.clone();
            tokio::spawn(async move {
                if let Err(e) = uplink.connect().await {
                    debug!(
                        "Uplink {} connect failed, chunks stay queued: {}",
                        uplink.kind, e
                    );
                }
            });
            return;
        }

        // Queued chunks go out before the current one to keep FIFO order.
        if !flush_queue(&mut inner, self.kind).await {
            warn!(
                "Uplink {}: connection lost mid-flush, dropping current chunk",
                self.kind
            );
            return;
        }

        if let ConnectionState::Open { sink } = &mut inner.state {
            if let Err(e) = sink.send_chunk(chunk).await {
                warn!("Uplink {}: failed to send chunk: {}", self.kind, e);
                drop_connection(&mut inner).await;
            }
        }
    }

    /// Close the connection and discard all queued chunks. Idempotent.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        drop_connection(&mut inner).await;
        inner.queue.clear();
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.inner.lock().await.state, ConnectionState::Open { .. })
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    fn spawn_reader(&self, mut stream: Box<dyn FrameStream>, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let kind = self.kind;
        tokio::spawn(async move {
            while let Some(raw) = stream.next_text().await {
                let handler = inner.lock().await.handler.clone();
                match decode_frame(&raw) {
                    FrameDecode::Transcription(message) => {
                        if let Some(handler) = handler {
                            handler(message);
                        }
                    }
                    FrameDecode::Ignored => {}
                    FrameDecode::Invalid(err) => {
                        warn!("Uplink {}: dropping undecodable frame: {}", kind, err);
                    }
                }
            }

            // Remote close or receive error.
            let mut guard = inner.lock().await;
            if guard.generation == generation
                && matches!(guard.state, ConnectionState::Open { .. })
            {
                debug!("Uplink {}: connection closed by remote", kind);
                if let ConnectionState::Open { mut sink } =
                    std::mem::replace(&mut guard.state, ConnectionState::Closed)
                {
                    sink.close().await;
                }
                guard.reader = None;
            }
        })
    }

    #[cfg(test)]
    async fn queue_snapshot(&self) -> Vec<Vec<u8>> {
        self.inner.lock().await.queue.snapshot()
    }
}

/// Drain the queue oldest-first into the open sink. Returns false if the
/// connection died along the way; the chunk whose transmit failed is lost
/// and the unflushed remainder stays queued.
async fn flush_queue(inner: &mut Inner, kind: StreamKind) -> bool {
    loop {
        let chunk = match inner.queue.pop() {
            Some(chunk) => chunk,
            None => return true,
        };
        let result = match &mut inner.state {
            ConnectionState::Open { sink } => sink.send_chunk(chunk).await,
            _ => return false,
        };
        if let Err(e) = result {
            warn!("Uplink {}: failed to flush chunk: {}", kind, e);
            drop_connection(inner).await;
            return false;
        }
    }
}

async fn drop_connection(inner: &mut Inner) {
    match std::mem::replace(&mut inner.state, ConnectionState::Closed) {
        ConnectionState::Open { mut sink } => sink.close().await,
        ConnectionState::Connecting { waiters, .. } => {
            for waiter in waiters {
                let _ = waiter.send(Err(TransportError::Closed));
            }
        }
        ConnectionState::Closed => {}
    }
    if let Some(reader) = inner.reader.take() {
        reader.abort();
    }
}

enum FrameDecode {
    Transcription(TranscriptionMessage),
    Ignored,
    Invalid(String),
}

fn decode_frame(raw: &str) -> FrameDecode {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return FrameDecode::Invalid(e.to_string()),
    };
    if value.get("type").and_then(|t| t.as_str()) != Some("transcription") {
        return FrameDecode::Ignored;
    }
    match serde_json::from_value(value) {
        Ok(message) => FrameDecode::Transcription(message),
        Err(e) => FrameDecode::Invalid(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockConnector {
        attempts: AtomicUsize,
        fail_connect: AtomicBool,
        fail_send: Arc<AtomicBool>,
        handshake_delay_ms: u64,
        // Optional per-attempt (delay_ms, fail) overrides, consumed in
        // order; exhausted entries fall back to the fields above.
        plan: StdMutex<VecDeque<(u64, bool)>>,
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        frames: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl MockConnector {
        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn push_frame(&self, frame: &str) {
            let guard = self.frames.lock().unwrap();
            guard
                .as_ref()
                .expect("not connected")
                .send(frame.to_string())
                .unwrap();
        }
    }

    #[async_trait]
    impl TransportConnector for MockConnector {
        async fn connect(
            &self,
            _kind: StreamKind,
        ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let planned = self.plan.lock().unwrap().pop_front();
            let delay_ms = planned.map_or(self.handshake_delay_ms, |(delay, _)| delay);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            let fail = planned
                .map_or_else(|| self.fail_connect.load(Ordering::SeqCst), |(_, fail)| fail);
            if fail {
                return Err(TransportError::Connect("mock refused".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.frames.lock().unwrap() = Some(tx);
            Ok((
                Box::new(MockSink {
                    sent: Arc::clone(&self.sent),
                    fail: Arc::clone(&self.fail_send),
                }),
                Box::new(MockStream { rx }),
            ))
        }
    }

    struct MockSink {
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_chunk(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Send("mock sink error".into()));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct MockStream {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameStream for MockStream {
        async fn next_text(&mut self) -> Option<String> {
            self.rx.recv().await
        }
    }

    fn uplink_with(connector: Arc<MockConnector>, capacity: usize) -> StreamUplink {
        StreamUplink::new(StreamKind::Microphone, connector, capacity)
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_handshake() {
        let connector = Arc::new(MockConnector {
            handshake_delay_ms: 50,
            ..Default::default()
        });
        let uplink = uplink_with(Arc::clone(&connector), 10);

        let (a, b, c) = tokio::join!(uplink.connect(), uplink.connect(), uplink.connect());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(uplink.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_failure_wakes_all_waiters() {
        let connector = Arc::new(MockConnector {
            handshake_delay_ms: 50,
            ..Default::default()
        });
        connector.fail_connect.store(true, Ordering::SeqCst);
        let uplink = uplink_with(Arc::clone(&connector), 10);

        let (a, b) = tokio::join!(uplink.connect(), uplink.connect());
        assert!(a.is_err() && b.is_err());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(!uplink.is_connected().await);
    }

    #[tokio::test]
    async fn test_late_settling_connect_cannot_consume_newer_attempt() {
        // First attempt: slow and doomed. Second: slower but healthy.
        let connector = Arc::new(MockConnector::default());
        connector
            .plan
            .lock()
            .unwrap()
            .extend([(80, true), (250, false)]);
        let uplink = uplink_with(Arc::clone(&connector), 10);

        let first = {
            let uplink = uplink.clone();
            tokio::spawn(async move { uplink.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        uplink.close().await;

        // The first handshake is still in flight when this one starts;
        // its late failure must not leak into this attempt's outcome.
        let second = uplink.connect().await;
        assert!(second.is_ok());
        assert!(uplink.is_connected().await);
        assert!(first.await.unwrap().is_err());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_queues_drop_oldest() {
        let connector = Arc::new(MockConnector::default());
        connector.fail_connect.store(true, Ordering::SeqCst);
        let uplink = uplink_with(Arc::clone(&connector), 3);

        uplink.send(vec![b'a']).await;
        uplink.send(vec![b'b']).await;
        uplink.send(vec![b'c']).await;
        uplink.send(vec![b'd']).await;

        assert_eq!(
            uplink.queue_snapshot().await,
            vec![vec![b'b'], vec![b'c'], vec![b'd']]
        );

        // Failed background connects must leave the queue untouched.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(uplink.queued_len().await, 3);
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_queued_chunks_flush_in_fifo_order() {
        let connector = Arc::new(MockConnector::default());
        connector.fail_connect.store(true, Ordering::SeqCst);
        let uplink = uplink_with(Arc::clone(&connector), 10);

        uplink.send(vec![1]).await;
        uplink.send(vec![2]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        connector.fail_connect.store(false, Ordering::SeqCst);
        uplink.connect().await.unwrap();
        uplink.send(vec![3]).await;

        assert_eq!(connector.sent(), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(uplink.queued_len().await, 0);
    }

    #[tokio::test]
    async fn test_handler_receives_only_transcription_frames() {
        let connector = Arc::new(MockConnector::default());
        let uplink = uplink_with(Arc::clone(&connector), 10);

        let received: Arc<StdMutex<Vec<TranscriptionMessage>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        uplink
            .on_message(move |message| sink.lock().unwrap().push(message))
            .await;

        uplink.connect().await.unwrap();
        connector.push_frame("not json at all");
        connector.push_frame(r#"{"type":"status","ok":true}"#);
        connector.push_frame(
            r#"{"type":"transcription","text":"hello","timestamp":"t1","stream":"mic"}"#,
        );
        connector.push_frame(
            r#"{"type":"transcription","text":"world","timestamp":"t2","stream":"mic"}"#,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].text, "hello");
        assert_eq!(received[1].text, "world");
        assert_eq!(received[0].stream, StreamKind::Microphone);
    }

    #[tokio::test]
    async fn test_send_failure_loses_chunk_and_closes() {
        let connector = Arc::new(MockConnector::default());
        let uplink = uplink_with(Arc::clone(&connector), 10);

        uplink.connect().await.unwrap();
        connector.fail_send.store(true, Ordering::SeqCst);
        uplink.send(vec![9]).await;

        assert!(connector.sent().is_empty());
        assert!(!uplink.is_connected().await);
        // Lost, not re-queued.
        assert_eq!(uplink.queued_len().await, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_discards_queue() {
        let connector = Arc::new(MockConnector::default());
        connector.fail_connect.store(true, Ordering::SeqCst);
        let uplink = uplink_with(Arc::clone(&connector), 10);

        uplink.send(vec![1]).await;
        uplink.send(vec![2]).await;
        uplink.close().await;
        uplink.close().await;

        assert_eq!(uplink.queued_len().await, 0);
        assert!(!uplink.is_connected().await);
    }

    #[tokio::test]
    async fn test_remote_close_transitions_to_closed() {
        let connector = Arc::new(MockConnector::default());
        let uplink = uplink_with(Arc::clone(&connector), 10);

        uplink.connect().await.unwrap();
        assert!(uplink.is_connected().await);

        // Dropping the frame sender ends the inbound stream.
        connector.frames.lock().unwrap().take();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!uplink.is_connected().await);
    }

    #[test]
    fn test_decode_frame_shapes() {
        assert!(matches!(decode_frame("{"), FrameDecode::Invalid(_)));
        assert!(matches!(
            decode_frame(r#"{"type":"ping"}"#),
            FrameDecode::Ignored
        ));
        assert!(matches!(decode_frame(r#"{"no":"type"}"#), FrameDecode::Ignored));
        // Right type but missing fields is a decode error, not an ignore.
        assert!(matches!(
            decode_frame(r#"{"type":"transcription"}"#),
            FrameDecode::Invalid(_)
        ));
        match decode_frame(
            r#"{"type":"transcription","text":"hi","timestamp":"now","stream":"system"}"#,
        ) {
            FrameDecode::Transcription(message) => {
                assert_eq!(message.text, "hi");
                assert_eq!(message.stream, StreamKind::SystemAudio);
            }
            _ => panic!("expected transcription frame"),
        }
    }
}
