/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public tradedash realtime crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod config;
pub mod error;
pub mod ws;

pub use config::{RealtimeConfig, ReconnectPolicy};
pub use error::{RealtimeError, Result};

// Re-export commonly used types from ws
pub use ws::{
    Candle,
    ChartUpdate,
    ClientCommand,
    ConnectOutcome,
    ConnectionState,
    Connector,
    Envelope,
    RealtimeClient,
    Subscription,
    SubscriptionId,
    Transport,
    TransportError,
    WsConnector,
    topic,
};
