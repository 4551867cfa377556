//! Socket abstraction between the connection manager and the network.
//!
//! [`Connector`] is the seam: production uses [`WsConnector`] over `tokio-tungstenite`,
//! tests use the scripted connector in [`crate::mock`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use livecap_core::CaptureError;
use livecap_settings::ProviderSettings;

/// A WebSocket frame, independent of the socket library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close with the peer's reason, if it gave one.
    Close(Option<String>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = CaptureError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, CaptureError>> + Send>>;

/// Both halves of an open socket.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens sockets to the provider.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, CaptureError>;
}

/// `tokio-tungstenite` backed connector (TLS via rustls).
#[derive(Clone, Copy, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// `connect_timeout` bounds the TCP connect, TLS and WebSocket handshake together.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(settings.connect_timeout())
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, CaptureError> {
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                CaptureError::Transport(format!("connect timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| CaptureError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(|e| CaptureError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, CaptureError>(to_message(frame))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_message(msg).map(Ok),
                Err(e) => Some(Err(CaptureError::Transport(e.to_string()))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close(_) => Message::Close(None),
    }
}

fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
        Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
        Message::Close(close) => Some(Frame::Close(
            close
                .map(|c| c.reason.as_str().to_owned())
                .filter(|reason| !reason.is_empty()),
        )),
        // Raw frames only surface when writing; never on read.
        Message::Frame(_) => None,
    }
}
