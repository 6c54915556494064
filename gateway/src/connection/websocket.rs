//! WebSocket channel to a node.

use super::{Connector, FrameSink, FrameStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Opens `ws://` / `wss://` channels with tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", self.url, e)))?;
        debug!("WebSocket connected to {}", self.url);

        let (ws_sender, ws_receiver) = ws_stream.split();

        let sink = ws_sender
            .sink_map_err(|e| Error::Connection(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text))));

        let stream = ws_receiver.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes).map_err(|_| Error::decode("binary frame is not UTF-8")),
                ),
                Ok(Message::Close(frame)) => Some(Err(Error::Connection(format!(
                    "closed by node: {:?}",
                    frame
                )))),
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(Error::Connection(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
