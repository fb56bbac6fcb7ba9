/*
[INPUT]:  Realtime configuration, transport connector and topic subscriptions
[OUTPUT]: Connection manager, wire messages and transport seam
[POS]:    WebSocket layer - real-time dashboard stream
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
pub mod message;
pub mod registry;
pub mod topics;
pub mod transport;

pub use client::{ConnectOutcome, ConnectionState, RealtimeClient, Subscription};
pub use message::{Candle, ChartUpdate, ClientCommand, Envelope, topic};
pub use registry::{Callback, SubscriptionId};
pub use transport::{Connector, FrameSink, FrameStream, Transport, TransportError, WsConnector};
