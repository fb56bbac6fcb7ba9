/*
[INPUT]:  Test scenarios that need a scriptable transport
[OUTPUT]: In-memory connector, peer handles and client fixtures
[POS]:    Test infrastructure - shared across integration test modules
[UPDATE]: When the Connector seam or default config changes
*/

//! Common test utilities for tradedash-realtime tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{sink, stream};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use tradedash_realtime::{
    Connector, RealtimeClient, RealtimeConfig, Transport, TransportError,
};

/// A connection attempt waiting for the test to decide its fate
pub struct PendingDial {
    pub url: String,
    respond: oneshot::Sender<Result<Transport, TransportError>>,
}

impl PendingDial {
    /// Open the transport and hand back the server side
    pub fn accept(self) -> MockPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Result<String, TransportError>>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        let frames = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let writes = sink::unfold(outbound_tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });

        let _ = self
            .respond
            .send(Ok(Transport::new(Box::pin(writes), Box::pin(frames))));

        MockPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        }
    }

    pub fn reject(self, reason: &str) {
        let _ = self
            .respond
            .send(Err(TransportError::Connect(reason.to_string())));
    }
}

/// Server side of an accepted mock transport
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Push a frame to the client
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Ok(frame.into()));
        }
    }

    pub fn push_json(&self, value: Value) {
        self.push(value.to_string());
    }

    /// Close from the server side
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Next frame the client wrote, skipping heartbeat pings
    pub async fn next_frame(&mut self) -> Option<Value> {
        loop {
            let raw = self.outbound.recv().await?;
            let value: Value = serde_json::from_str(&raw).expect("client wrote valid json");
            if value["type"] != "PING" {
                return Some(value);
            }
        }
    }

    /// Next frame including pings
    pub async fn next_raw(&mut self) -> Option<Value> {
        let raw = self.outbound.recv().await?;
        Some(serde_json::from_str(&raw).expect("client wrote valid json"))
    }

    /// `type` tags of `count` frames, skipping pings
    pub async fn frame_types(&mut self, count: usize) -> Vec<String> {
        let mut kinds = Vec::with_capacity(count);
        for _ in 0..count {
            let frame = self.next_frame().await.expect("client frame");
            kinds.push(frame["type"].as_str().unwrap_or_default().to_string());
        }
        kinds
    }

    /// Frames already written, without waiting
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&raw).expect("client wrote valid json"));
        }
        frames
    }
}

/// Connector whose dials are answered by the test
pub struct MockConnector {
    dials: mpsc::UnboundedSender<PendingDial>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingDial>) {
        let (dials, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                dials,
                attempts: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// How many transports the client has asked for
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (respond, outcome) = oneshot::channel();
        self.dials
            .send(PendingDial {
                url: url.to_string(),
                respond,
            })
            .map_err(|_| TransportError::Connect("test harness gone".to_string()))?;
        outcome
            .await
            .unwrap_or_else(|_| Err(TransportError::Connect("dial dropped".to_string())))
    }
}

/// Hands out transports that fail every write for the first `broken` dials,
/// then defers to a [`MockConnector`]
pub struct BrokenWriteConnector {
    broken: AtomicUsize,
    fallback: Arc<MockConnector>,
}

impl BrokenWriteConnector {
    pub fn new(broken: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<PendingDial>) {
        let (fallback, dials) = MockConnector::new();
        (
            Arc::new(Self {
                broken: AtomicUsize::new(broken),
                fallback,
            }),
            dials,
        )
    }
}

#[async_trait]
impl Connector for BrokenWriteConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let take_broken = self
            .broken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !take_broken {
            return self.fallback.connect(url).await;
        }

        let writes = sink::unfold((), |(), _frame: String| async move {
            Err::<(), _>(TransportError::Socket("write refused".to_string()))
        });
        let frames = stream::pending::<Result<String, TransportError>>();
        Ok(Transport::new(Box::pin(writes), Box::pin(frames)))
    }
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig::with_url("ws://dashboard.test/ws")
}

/// Client over a fresh mock connector
pub fn mock_client() -> (
    RealtimeClient,
    Arc<MockConnector>,
    mpsc::UnboundedReceiver<PendingDial>,
) {
    let (connector, dials) = MockConnector::new();
    let client = RealtimeClient::with_connector(test_config(), connector.clone())
        .expect("valid test config");
    (client, connector, dials)
}

/// Records payloads delivered to a callback
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn callback(&self) -> Box<dyn Fn(&Value) + Send + Sync> {
        let seen = Arc::clone(&self.seen);
        Box::new(move |payload: &Value| seen.lock().unwrap().push(payload.clone()))
    }

    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

/// Callback that forwards payloads into a channel the test can await
pub fn channel_callback() -> (
    Box<dyn Fn(&Value) + Send + Sync>,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |payload: &Value| {
        let _ = tx.send(payload.clone());
    };
    (Box::new(callback), rx)
}
