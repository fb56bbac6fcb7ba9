/*
[INPUT]:  RealtimeConfig, a Connector, outbound envelopes and topic callbacks
[OUTPUT]: One self-healing WebSocket connection multiplexed across topics
[POS]:    WebSocket layer - connection manager (state machine, queue, heartbeat, dispatch)
[UPDATE]: When changing reconnection policy, queueing, or dispatch semantics
*/

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, Result};
use crate::ws::message::{ClientCommand, Envelope, topic};
use crate::ws::registry::{SubscriberRegistry, SubscriptionId};
use crate::ws::transport::{Connector, Transport, WsConnector};

const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Lifecycle of the managed connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No transport; initial state and after `disconnect`
    Idle,
    /// An attempt is in flight
    Connecting,
    /// Transport open; queue flushed and heartbeat running
    Open,
    /// Transport lost; a reconnect decision follows immediately
    Closed,
    /// Waiting `delay` before attempt number `attempt + 1`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted
    Failed,
}

/// Shared outcome of one connection attempt; every clone resolves identically
pub type ConnectOutcome = future::Shared<BoxFuture<'static, Result<()>>>;

#[derive(Debug)]
enum CloseReason {
    Local,
    Remote,
    Error(String),
}

/// Encoded frame travelling to the transport task with the envelope it came from
struct Outbound {
    envelope: Envelope,
    frame: String,
}

struct Inner {
    state: ConnectionState,
    attempts: u32,
    /// Bumped on every attempt and on `disconnect`; tags background work
    generation: u64,
    connection_id: Option<Uuid>,
    last_ping: Option<DateTime<Utc>>,
    writer: Option<mpsc::UnboundedSender<Outbound>>,
    queue: VecDeque<Envelope>,
    registry: SubscriberRegistry,
    pending: Option<ConnectOutcome>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct ClientCore {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Realtime connection manager.
///
/// Cheap to clone; all clones drive the same connection. Construct one per
/// process and hand it to the consumers that need it.
#[derive(Clone)]
pub struct RealtimeClient {
    core: Arc<ClientCore>,
}

/// Handle returned by [`RealtimeClient::subscribe`].
///
/// Dropping the handle keeps the callback registered.
#[derive(Debug, Clone)]
pub struct Subscription {
    core: Weak<ClientCore>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove exactly this callback. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let removed = core.lock().registry.remove(&self.topic, self.id);
        if removed {
            debug!(topic = %self.topic, subscription = ?self.id, "ws unsubscribed");
        }
        removed
    }
}

impl RealtimeClient {
    /// Create a manager that connects with `tokio-tungstenite`
    pub fn new(config: RealtimeConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a manager over a custom transport
    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let (state_tx, _rx) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            core: Arc::new(ClientCore {
                config,
                connector,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    attempts: 0,
                    generation: 0,
                    connection_id: None,
                    last_ping: None,
                    writer: None,
                    queue: VecDeque::new(),
                    registry: SubscriberRegistry::default(),
                    pending: None,
                    heartbeat: None,
                    reconnect_timer: None,
                }),
                state_tx,
            }),
        })
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.core.config
    }

    /// Start (or join) a connection attempt.
    ///
    /// The attempt runs in the background whether or not the returned future
    /// is awaited. Every caller that arrives while an attempt is in flight
    /// gets the same outcome.
    pub fn connect(&self) -> ConnectOutcome {
        let mut inner = self.core.lock();
        self.core.start_connect(&mut inner)
    }

    /// Send `message`, or queue it until the connection opens.
    ///
    /// Returns whether the frame was handed to an open transport. Never
    /// blocks; from `Idle` or `Failed` it also starts a connection attempt.
    pub fn send(&self, message: impl Into<Envelope>) -> bool {
        let message = message.into();
        let mut inner = self.core.lock();

        if inner.state == ConnectionState::Open {
            return match transmit(&inner, message) {
                Ok(()) => true,
                Err(message) => {
                    inner.queue.push_back(message);
                    false
                }
            };
        }

        debug!(kind = %message.kind, queued = inner.queue.len() + 1, "ws message queued");
        inner.queue.push_back(message);

        if matches!(inner.state, ConnectionState::Idle | ConnectionState::Failed) {
            drop(self.core.start_connect(&mut inner));
        }
        false
    }

    /// Register `callback` for frames whose `type` equals `topic`
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.core.lock().registry.insert(topic, Arc::new(callback));
        debug!(topic, subscription = ?id, "ws subscribed");
        Subscription {
            core: Arc::downgrade(&self.core),
            topic: topic.to_string(),
            id,
        }
    }

    /// Drop every callback for `topic`; returns how many were removed
    pub fn unsubscribe_all(&self, topic: &str) -> usize {
        let removed = self.core.lock().registry.remove_topic(topic);
        debug!(topic, removed, "ws topic cleared");
        removed
    }

    /// Tear everything down and return to `Idle`.
    ///
    /// Stops the heartbeat, cancels a pending reconnect, tells the server we
    /// are leaving if open, closes the transport, and clears subscribers and
    /// the outbound queue.
    pub fn disconnect(&self) {
        let mut inner = self.core.lock();
        inner.generation += 1;

        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        if inner.state == ConnectionState::Open
            && transmit(&inner, ClientCommand::Disconnect.into()).is_err()
        {
            debug!("ws disconnect notice not delivered");
        }

        let connection_id = inner.connection_id.take();
        inner.last_ping = None;
        let dropped = inner.queue.len();
        inner.writer = None;
        inner.pending = None;
        inner.attempts = 0;
        inner.queue.clear();
        inner.registry.clear();
        self.core.set_state(&mut inner, ConnectionState::Idle);

        info!(?connection_id, dropped_messages = dropped, "ws disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.core.lock().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    /// Consecutive failed attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.lock().attempts
    }

    pub fn queued_len(&self) -> usize {
        self.core.lock().queue.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.core.lock().registry.count(topic)
    }

    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.core.lock().last_ping
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.core.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        inner.state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn start_connect(self: &Arc<Self>, inner: &mut Inner) -> ConnectOutcome {
        if inner.state == ConnectionState::Open {
            return ready(Ok(()));
        }
        if let Some(pending) = &inner.pending {
            return pending.clone();
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("RealtimeClient used without Tokio runtime; connection not started");
            return ready(Err(RealtimeError::NoRuntime));
        }
        if inner.state == ConnectionState::Failed {
            inner.attempts = 0;
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        self.begin_attempt(inner)
    }

    fn begin_attempt(self: &Arc<Self>, inner: &mut Inner) -> ConnectOutcome {
        inner.generation += 1;
        let generation = inner.generation;
        self.set_state(inner, ConnectionState::Connecting);

        let core = Arc::clone(self);
        let handle = tokio::spawn(async move { core.run_attempt(generation).await });
        let pending = async move {
            handle.await.unwrap_or_else(|err| {
                Err(RealtimeError::Transport(format!("connection task failed: {err}")))
            })
        }
        .boxed()
        .shared();

        inner.pending = Some(pending.clone());
        pending
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) -> Result<()> {
        let url = &self.config.url;
        info!(%url, generation, "connecting realtime websocket");

        let outcome =
            match tokio::time::timeout(self.config.connect_timeout(), self.connector.connect(url))
                .await
            {
                Ok(Ok(transport)) => Ok(transport),
                Ok(Err(err)) => Err(RealtimeError::Transport(err.to_string())),
                Err(_) => Err(RealtimeError::Timeout {
                    duration_ms: self.config.connect_timeout_ms,
                }),
            };

        match outcome {
            Ok(transport) => self.on_open(generation, transport),
            Err(err) => {
                self.on_attempt_failed(generation, &err);
                Err(err)
            }
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, transport: Transport) -> Result<()> {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, "ws transport from superseded attempt discarded");
            return Err(RealtimeError::Cancelled);
        }

        let connection_id = Uuid::new_v4();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        inner.pending = None;
        inner.attempts = 0;
        inner.connection_id = Some(connection_id);
        inner.writer = Some(writer_tx);
        self.set_state(&mut inner, ConnectionState::Open);

        tokio::spawn(run_transport(
            Arc::downgrade(self),
            generation,
            connection_id,
            transport,
            writer_rx,
        ));
        inner.heartbeat = Some(self.spawn_heartbeat(generation));

        let flushed = flush_queue(&mut inner);
        if transmit(&inner, ClientCommand::GetInitialState.into()).is_err() {
            debug!(%connection_id, "initial state request not delivered");
        }

        info!(%connection_id, flushed, still_queued = inner.queue.len(), "realtime websocket open");
        Ok(())
    }

    fn on_attempt_failed(self: &Arc<Self>, generation: u64, err: &RealtimeError) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, error = %err, "ws attempt failed after being superseded");
            return;
        }
        inner.pending = None;
        warn!(error = %err, attempt = inner.attempts + 1, "realtime websocket connect failed");

        self.set_state(&mut inner, ConnectionState::Closed);
        let failed_after = self.schedule_reconnect(&mut inner);
        drop(inner);

        if let Some(attempts) = failed_after {
            self.emit_connection_failed(attempts, &err.to_string());
        }
    }

    fn on_transport_closed(
        self: &Arc<Self>,
        generation: u64,
        connection_id: Uuid,
        reason: CloseReason,
        unsent: Vec<Envelope>,
    ) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Open {
            debug!(%connection_id, ?reason, unsent = unsent.len(), "ws transport closed after teardown");
            return;
        }

        let restored = requeue_front(&mut inner.queue, unsent);
        if restored > 0 {
            info!(%connection_id, restored, "ws unsent frames requeued");
        }

        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.abort();
        }
        inner.writer = None;
        inner.connection_id = None;
        warn!(%connection_id, ?reason, queued = inner.queue.len(), "realtime websocket closed");

        self.set_state(&mut inner, ConnectionState::Closed);
        let failed_after = self.schedule_reconnect(&mut inner);
        drop(inner);

        if let Some(attempts) = failed_after {
            self.emit_connection_failed(attempts, &format!("{reason:?}"));
        }
    }

    /// Count a failure and arm the backoff timer, or give up.
    ///
    /// Returns the attempt count when the budget is exhausted.
    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) -> Option<u32> {
        inner.attempts = inner.attempts.saturating_add(1);
        let attempt = inner.attempts;
        let policy = &self.config.reconnect;

        if policy.is_exhausted(attempt) {
            warn!(attempt, max_attempts = policy.max_attempts, "realtime websocket gave up reconnecting");
            self.set_state(inner, ConnectionState::Failed);
            return Some(attempt);
        }

        let delay = policy.delay_for(attempt);
        self.set_state(inner, ConnectionState::Reconnecting { attempt, delay });
        info!(attempt, delay_ms = delay.as_millis() as u64, "realtime websocket reconnect scheduled");

        let generation = inner.generation;
        let core = Arc::downgrade(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = core.upgrade() {
                core.on_reconnect_due(generation);
            }
        }));
        None
    }

    fn on_reconnect_due(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation
            || !matches!(inner.state, ConnectionState::Reconnecting { .. })
        {
            return;
        }
        // This is the timer task itself; detach rather than abort.
        inner.reconnect_timer = None;
        drop(self.begin_attempt(&mut inner));
    }

    fn spawn_heartbeat(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let core = Arc::downgrade(self);
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(core) = core.upgrade() else {
                    break;
                };
                if !core.send_ping(generation) {
                    break;
                }
            }
        })
    }

    fn send_ping(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Open {
            return false;
        }
        let now = Utc::now();
        inner.last_ping = Some(now);
        let ping = ClientCommand::Ping {
            timestamp: now.timestamp_millis(),
        };
        if transmit(&inner, ping.into()).is_err() {
            debug!("ws ping not delivered");
        }
        true
    }

    fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                log_parse_fail_once(&err, text);
                return;
            }
        };

        if envelope.kind == topic::PONG {
            debug!("ws pong received");
            return;
        }

        let payload = envelope.payload.unwrap_or(Value::Null);
        self.dispatch(&envelope.kind, &payload);
    }

    /// Deliver `payload` to every live subscriber of `topic`.
    ///
    /// Runs without the lock held so callbacks may call back into the client.
    /// A callback removed mid-dispatch is skipped if it has not started yet.
    fn dispatch(&self, topic: &str, payload: &Value) {
        let callbacks = self.lock().registry.snapshot(topic);
        if callbacks.is_empty() {
            debug!(topic, "ws message without subscribers dropped");
            return;
        }

        for (id, callback) in callbacks {
            let live = self.lock().registry.contains(topic, id);
            if !live {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                warn!(topic, subscription = ?id, "ws subscriber callback panicked");
            }
        }
    }

    fn emit_connection_failed(&self, attempts: u32, error: &str) {
        let payload = json!({ "attempts": attempts, "error": error });
        self.dispatch(topic::CONNECTION_FAILED, &payload);
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
    }
}

async fn run_transport(
    core: Weak<ClientCore>,
    generation: u64,
    connection_id: Uuid,
    transport: Transport,
    mut writer_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;
    let mut unsent = Vec::new();

    let reason = loop {
        tokio::select! {
            outbound = writer_rx.recv() => {
                match outbound {
                    Some(Outbound { envelope, frame }) => {
                        if let Err(err) = sink.send(frame).await {
                            unsent.push(envelope);
                            break CloseReason::Error(err.to_string());
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break CloseReason::Local;
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(text)) => {
                        let Some(core) = core.upgrade() else {
                            break CloseReason::Local;
                        };
                        core.handle_frame(&text);
                    }
                    Some(Err(err)) => break CloseReason::Error(err.to_string()),
                    None => break CloseReason::Remote,
                }
            }
        }
    };

    // Frames accepted by `transmit` but never written go back to the queue.
    // Closing first makes later `transmit` calls requeue on their own.
    writer_rx.close();
    while let Ok(outbound) = writer_rx.try_recv() {
        unsent.push(outbound.envelope);
    }

    debug!(%connection_id, ?reason, unsent = unsent.len(), "ws transport task finished");
    if let Some(core) = core.upgrade() {
        core.on_transport_closed(generation, connection_id, reason, unsent);
    }
}

/// Hand one envelope to the open transport, giving it back on failure
fn transmit(inner: &Inner, message: Envelope) -> std::result::Result<(), Envelope> {
    let Some(writer) = inner.writer.as_ref() else {
        return Err(message);
    };
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(kind = %message.kind, error = %err, "ws message serialization failed; requeued");
            return Err(message);
        }
    };
    if let Err(mpsc::error::SendError(outbound)) = writer.send(Outbound {
        envelope: message,
        frame,
    }) {
        warn!(kind = %outbound.envelope.kind, "ws writer closed; message requeued");
        return Err(outbound.envelope);
    }
    Ok(())
}

/// Put `unsent` back at the head of the queue in its original order.
///
/// Heartbeat pings are dropped; a fresh one is sent on the next open.
fn requeue_front(queue: &mut VecDeque<Envelope>, unsent: Vec<Envelope>) -> usize {
    let ping = ClientCommand::Ping { timestamp: 0 }.kind();
    let mut restored = 0;
    for envelope in unsent.into_iter().rev() {
        if envelope.kind == ping {
            continue;
        }
        queue.push_front(envelope);
        restored += 1;
    }
    restored
}

fn flush_queue(inner: &mut Inner) -> usize {
    let mut flushed = 0;
    while let Some(message) = inner.queue.pop_front() {
        if let Err(message) = transmit(inner, message) {
            inner.queue.push_front(message);
            break;
        }
        flushed += 1;
    }
    flushed
}

fn ready(outcome: Result<()>) -> ConnectOutcome {
    future::ready(outcome).boxed().shared()
}

fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
