//! Outbound side of the transport as seen by the session

use tokio::sync::mpsc;

use crate::error::{MarketDataError, Result};
use crate::protocol::OutboundFrame;

/// Accepts control frames for delivery to the venue.
///
/// Must not block: the session calls it while handling inbound frames.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &OutboundFrame) -> Result<()>;
}

/// Queues frames for the connection task to write
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        self.tx.send(frame.clone()).map_err(|_| {
            MarketDataError::WebSocketConnection("outbound channel closed".to_string())
        })
    }
}
