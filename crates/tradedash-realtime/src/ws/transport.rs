/*
[INPUT]:  Endpoint URL
[OUTPUT]: Open transport as a text-frame sink + stream pair
[POS]:    WebSocket layer - transport seam between manager and socket library
[UPDATE]: When changing socket library or frame handling
*/

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

/// Outbound half of an open transport
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open transport; ends when the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("transport closed")]
    Closed,
}

/// An open, exclusively owned connection
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports for the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

/// `tokio-tungstenite` backed connector
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|err| TransportError::Socket(err.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(WsMessage::Text(text.into()))));

        let stream = read
            .take_while(|incoming| future::ready(!matches!(incoming, Ok(WsMessage::Close(_)))))
            .filter_map(|incoming| future::ready(text_frame(incoming)));

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn text_frame(
    incoming: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match incoming {
        Ok(WsMessage::Text(text)) => Some(Ok(text.to_string())),
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                debug!(bytes = bytes.len(), "ws binary frame is not utf-8; dropped");
                None
            }
        },
        Ok(_) => None,
        Err(err) => Some(Err(TransportError::Socket(err.to_string()))),
    }
}
