/*
[INPUT]:  Raw WebSocket text frames and outbound client commands
[OUTPUT]: Envelope structs, typed commands and typed inbound payloads
[POS]:    WebSocket layer - message framing and payload types
[UPDATE]: When adding new message types or changing format
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Inbound and synthetic topic names
pub mod topic {
    pub const PONG: &str = "PONG";
    pub const INITIAL_STATE: &str = "INITIAL_STATE";
    pub const CHART_UPDATE: &str = "CHART_UPDATE";
    pub const POSITIONS_UPDATE: &str = "POSITIONS_UPDATE";
    pub const SIGNAL_RECEIVED: &str = "SIGNAL_RECEIVED";
    pub const SMART_GRID_UPDATE: &str = "SMART_GRID_UPDATE";
    /// Emitted locally once the reconnect budget is exhausted
    pub const CONNECTION_FAILED: &str = "connection_failed";
}

/// Wire envelope: `{ "type": ..., "payload"?: ... }`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse a text frame. Frames without a string `type` are rejected.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages the dashboard sends to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Ping { timestamp: i64 },
    GetInitialState,
    SetTradingPair { pair: String },
    SetExchange { exchange: String },
    SubscribeToChart { symbol: String, interval: String },
    SubscribeToPositions,
    SubscribeToSignals,
    SubscribeToSmartGrid,
    Disconnect,
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::Ping { .. } => "PING",
            ClientCommand::GetInitialState => "GET_INITIAL_STATE",
            ClientCommand::SetTradingPair { .. } => "SET_TRADING_PAIR",
            ClientCommand::SetExchange { .. } => "SET_EXCHANGE",
            ClientCommand::SubscribeToChart { .. } => "SUBSCRIBE_TO_CHART",
            ClientCommand::SubscribeToPositions => "SUBSCRIBE_TO_POSITIONS",
            ClientCommand::SubscribeToSignals => "SUBSCRIBE_TO_SIGNALS",
            ClientCommand::SubscribeToSmartGrid => "SUBSCRIBE_TO_SMART_GRID",
            ClientCommand::Disconnect => "DISCONNECT",
        }
    }
}

impl From<ClientCommand> for Envelope {
    fn from(command: ClientCommand) -> Self {
        let envelope = Envelope::new(command.kind());
        match command {
            ClientCommand::Ping { timestamp } => envelope.with_payload(json!({ "timestamp": timestamp })),
            ClientCommand::SetTradingPair { pair } => envelope.with_payload(json!({ "pair": pair })),
            ClientCommand::SetExchange { exchange } => {
                envelope.with_payload(json!({ "exchange": exchange }))
            }
            ClientCommand::SubscribeToChart { symbol, interval } => {
                envelope.with_payload(json!({ "symbol": symbol, "interval": interval }))
            }
            ClientCommand::GetInitialState
            | ClientCommand::SubscribeToPositions
            | ClientCommand::SubscribeToSignals
            | ClientCommand::SubscribeToSmartGrid
            | ClientCommand::Disconnect => envelope,
        }
    }
}

/// `CHART_UPDATE` payload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChartUpdate {
    pub symbol: String,
    pub interval: String,
    pub candle: Candle,
}

/// OHLCV candle; prices accept JSON numbers or strings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wire(command: ClientCommand) -> Value {
        let text = Envelope::from(command).encode().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn commands_encode_to_wire_table() {
        assert_eq!(
            wire(ClientCommand::Ping { timestamp: 1700000000000 }),
            json!({ "type": "PING", "payload": { "timestamp": 1700000000000i64 } })
        );
        assert_eq!(
            wire(ClientCommand::GetInitialState),
            json!({ "type": "GET_INITIAL_STATE" })
        );
        assert_eq!(
            wire(ClientCommand::SetTradingPair { pair: "BTC/USDT".into() }),
            json!({ "type": "SET_TRADING_PAIR", "payload": { "pair": "BTC/USDT" } })
        );
        assert_eq!(
            wire(ClientCommand::SetExchange { exchange: "binance".into() }),
            json!({ "type": "SET_EXCHANGE", "payload": { "exchange": "binance" } })
        );
        assert_eq!(
            wire(ClientCommand::SubscribeToChart {
                symbol: "BTCUSDT".into(),
                interval: "1m".into(),
            }),
            json!({ "type": "SUBSCRIBE_TO_CHART", "payload": { "symbol": "BTCUSDT", "interval": "1m" } })
        );
        assert_eq!(
            wire(ClientCommand::SubscribeToSmartGrid),
            json!({ "type": "SUBSCRIBE_TO_SMART_GRID" })
        );
        assert_eq!(wire(ClientCommand::Disconnect), json!({ "type": "DISCONNECT" }));
    }

    #[test]
    fn decode_accepts_missing_payload() {
        let envelope = Envelope::decode(r#"{"type":"PONG"}"#).unwrap();
        assert_eq!(envelope.kind, topic::PONG);
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn decode_rejects_untyped_frames() {
        assert!(Envelope::decode(r#"{"payload":{}}"#).is_err());
        assert!(Envelope::decode(r#"{"type":42}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn chart_update_accepts_numbers_and_strings() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "interval": "1m",
            "candle": {
                "time": 1700000000,
                "open": 100.5,
                "high": "101.25",
                "low": 99,
                "close": "100.75",
                "volume": 12
            }
        });
        let update: ChartUpdate = serde_json::from_value(payload).unwrap();
        assert_eq!(update.candle.high, Decimal::from_str("101.25").unwrap());
        assert_eq!(update.candle.low, Decimal::from(99));
        assert_eq!(update.candle.close, Decimal::from_str("100.75").unwrap());
    }
}
