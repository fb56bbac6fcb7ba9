/*
[INPUT]:  Dashboard feature subscriptions (chart, positions, signals, smart grid)
[OUTPUT]: Topic callbacks plus the matching server-side subscription requests
[POS]:    WebSocket layer - typed convenience API over RealtimeClient
[UPDATE]: When the backend adds channels or changes payload shapes
*/

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::ws::client::{RealtimeClient, Subscription};
use crate::ws::message::{ChartUpdate, ClientCommand, topic};

// Server subscriptions are requested once here; they are not replayed after a
// reconnect.
impl RealtimeClient {
    /// Chart candles for `symbol`/`interval`
    pub fn subscribe_to_chart<F>(&self, symbol: &str, interval: &str, callback: F) -> Subscription
    where
        F: Fn(&ChartUpdate) + Send + Sync + 'static,
    {
        let subscription = self.subscribe(topic::CHART_UPDATE, move |payload| {
            match ChartUpdate::deserialize(payload) {
                Ok(update) => callback(&update),
                Err(err) => debug!(error = %err, "chart update payload rejected"),
            }
        });
        self.send(ClientCommand::SubscribeToChart {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        });
        subscription
    }

    pub fn subscribe_to_positions<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let subscription = self.subscribe(topic::POSITIONS_UPDATE, callback);
        self.send(ClientCommand::SubscribeToPositions);
        subscription
    }

    pub fn subscribe_to_signals<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let subscription = self.subscribe(topic::SIGNAL_RECEIVED, callback);
        self.send(ClientCommand::SubscribeToSignals);
        subscription
    }

    pub fn subscribe_to_smart_grid<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let subscription = self.subscribe(topic::SMART_GRID_UPDATE, callback);
        self.send(ClientCommand::SubscribeToSmartGrid);
        subscription
    }

    /// Snapshot pushed after every successful open
    pub fn on_initial_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(topic::INITIAL_STATE, callback)
    }

    /// Fired once when the reconnect budget is exhausted
    pub fn on_connection_failed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(topic::CONNECTION_FAILED, callback)
    }

    pub fn request_initial_state(&self) -> bool {
        self.send(ClientCommand::GetInitialState)
    }

    pub fn set_trading_pair(&self, pair: &str) -> bool {
        self.send(ClientCommand::SetTradingPair {
            pair: pair.to_string(),
        })
    }

    pub fn set_exchange(&self, exchange: &str) -> bool {
        self.send(ClientCommand::SetExchange {
            exchange: exchange.to_string(),
        })
    }
}
