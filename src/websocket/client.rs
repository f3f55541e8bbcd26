//! Single FTX WebSocket connection
//!
//! Channels are not part of the URL; they are requested with control frames
//! once the socket is open.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::protocol::OutboundFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebSocketClient {
    endpoint: String,
    stream: Option<WsStream>,
}

impl WebSocketClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            stream: None,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Opening FTX stream");

        let (stream, response) = timeout(HANDSHAKE_TIMEOUT, connect_async(self.endpoint.as_str()))
            .await
            .map_err(|_| MarketDataError::ConnectionTimeout)?
            .map_err(|e| MarketDataError::WebSocketConnection(format!("handshake failed: {}", e)))?;

        info!(status = %response.status(), "FTX stream open");
        self.stream = Some(stream);
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut WsStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| MarketDataError::WebSocketConnection("not connected".to_string()))
    }

    /// Next text payload.
    ///
    /// Transport pings are answered inline and never surface; a close frame or
    /// end of stream drops the connection and returns an error.
    pub async fn read_text(&mut self) -> Result<String> {
        loop {
            let next = self.stream()?.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes).map_err(|e| {
                        let reason = format!("binary frame is not UTF-8: {}", e);
                        MarketDataError::WebSocketMessage(reason)
                    })
                }
                Some(Ok(Message::Ping(payload))) => {
                    debug!("Answering transport ping");
                    self.stream()?
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    let reason = match frame {
                        Some(frame) if frame.code != CloseCode::Normal => {
                            format!("closed by venue ({}): {}", frame.code, frame.reason)
                        }
                        _ => "closed by venue".to_string(),
                    };
                    warn!(reason = %reason, "Stream closed");
                    return Err(MarketDataError::WebSocketConnection(reason));
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    self.stream = None;
                    return Err(MarketDataError::WebSocketConnection("Stream ended".to_string()));
                }
            }
        }
    }

    /// Serialize and write one control frame
    pub async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<()> {
        let text = frame.to_json()?;
        debug!(frame = %text, "Sending control frame");
        self.stream()?
            .send(Message::Text(text))
            .await
            .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }
}
