/*
[INPUT]:  RealtimeClient, StreamConfig, shutdown token
[OUTPUT]: Logged dashboard frames until shutdown or permanent connection failure
[POS]:    Runtime layer - drives one realtime connection for the binary
[UPDATE]: When adding stream selections or changing exit conditions
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tradedash_realtime::{ConnectionState, RealtimeClient, Subscription};

use crate::config::StreamConfig;

/// Why the monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Shutdown was requested
    Shutdown,
    /// The client exhausted its reconnect budget
    ConnectionFailed,
}

/// Logs every selected stream of one client
pub struct StreamMonitor {
    client: RealtimeClient,
    subscriptions: Vec<Subscription>,
    received: Arc<AtomicU64>,
}

impl StreamMonitor {
    /// Register callbacks and backend selections described by `config`.
    ///
    /// Must be called inside a tokio runtime; the first outbound message
    /// starts the connection.
    pub fn attach(client: RealtimeClient, config: &StreamConfig) -> Self {
        let received = Arc::new(AtomicU64::new(0));
        let mut subscriptions = Vec::new();

        subscriptions.push(client.on_connection_failed(|payload| {
            warn!(payload = %payload, "realtime connection gave up");
        }));
        subscriptions.push(client.on_initial_state(counting(received.clone(), |payload| {
            info!(bytes = payload.to_string().len(), "initial state received");
        })));

        for topic in &config.topics {
            let name = topic.clone();
            subscriptions.push(client.subscribe(
                topic,
                counting(received.clone(), move |payload| {
                    info!(topic = %name, payload = %payload, "frame received");
                }),
            ));
        }

        if let Some(chart) = &config.chart {
            let seen = Arc::clone(&received);
            subscriptions.push(client.subscribe_to_chart(&chart.symbol, &chart.interval, move |update| {
                seen.fetch_add(1, Ordering::Relaxed);
                info!(
                    symbol = %update.symbol,
                    interval = %update.interval,
                    time = update.candle.time,
                    close = %update.candle.close,
                    "candle"
                );
            }));
        }
        if config.positions {
            subscriptions.push(client.subscribe_to_positions(counting(received.clone(), |payload| {
                info!(payload = %payload, "positions update");
            })));
        }
        if config.signals {
            subscriptions.push(client.subscribe_to_signals(counting(received.clone(), |payload| {
                info!(payload = %payload, "signal received");
            })));
        }
        if config.smart_grid {
            subscriptions.push(client.subscribe_to_smart_grid(counting(received.clone(), |payload| {
                info!(payload = %payload, "smart grid update");
            })));
        }

        if let Some(exchange) = &config.exchange {
            client.set_exchange(exchange);
        }
        if let Some(pair) = &config.trading_pair {
            client.set_trading_pair(pair);
        }
        // Starts the connection even when nothing was selected.
        drop(client.connect());

        debug!(subscriptions = subscriptions.len(), "stream monitor attached");
        Self {
            client,
            subscriptions,
            received,
        }
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    /// Frames delivered to monitor callbacks so far
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Wait for shutdown or permanent failure, then disconnect
    pub async fn run(self, shutdown: CancellationToken) -> MonitorExit {
        let mut states = self.client.subscribe_connection_state();
        let exit = loop {
            let state = states.borrow_and_update().clone();
            debug!(?state, "connection state");
            if state == ConnectionState::Failed {
                break MonitorExit::ConnectionFailed;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break MonitorExit::Shutdown,
                changed = states.changed() => {
                    if changed.is_err() {
                        break MonitorExit::Shutdown;
                    }
                }
            }
        };

        self.client.disconnect();
        info!(
            ?exit,
            frames_received = self.received(),
            subscriptions = self.subscriptions.len(),
            "stream monitor stopped"
        );
        exit
    }
}

fn counting<F>(received: Arc<AtomicU64>, log: F) -> impl Fn(&Value) + Send + Sync + 'static
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    move |payload: &Value| {
        received.fetch_add(1, Ordering::Relaxed);
        log(payload);
    }
}
