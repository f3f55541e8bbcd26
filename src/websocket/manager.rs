//! WebSocket connection manager
//!
//! Handles reconnection, keep-alive and dispatch of inbound frames to the session.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use super::WebSocketClient;
use crate::error::{MarketDataError, Result};
use crate::protocol::OutboundFrame;
use crate::session::now_ms;
use crate::AppState;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;

/// Why a connection ended without a transport error
enum Disconnect {
    /// Venue announced a restart
    Restart,
    /// Outbound queue closed, nothing left to do
    Shutdown,
}

/// Owns the socket; forwards inbound text to the session and writes queued frames
pub struct WebSocketManager {
    state: Arc<AppState>,
    client: WebSocketClient,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    pub fn new(state: Arc<AppState>, outbound: mpsc::UnboundedReceiver<OutboundFrame>) -> Self {
        let client = WebSocketClient::new(&state.config.ws_endpoint);

        Self {
            state,
            client,
            outbound,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run until the outbound queue closes, reconnecting with backoff
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting WebSocket manager");

        loop {
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            let outcome = self.connect_and_process().await;
            self.client.close().await;

            match outcome {
                Ok(Disconnect::Shutdown) => {
                    info!("Outbound queue closed, stopping WebSocket manager");
                    self.reset_session(&MarketDataError::SubscriptionClosed).await;
                    return Ok(());
                }
                Ok(Disconnect::Restart) => {
                    let error = MarketDataError::WebSocketConnection(
                        "Venue restarting".to_string(),
                    );
                    self.reset_session(&error).await;
                    sleep(Duration::from_millis(self.state.config.reconnect_delay_ms)).await;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    self.reset_session(&e).await;
                    self.reconnect_attempts += 1;

                    let base_delay = self.state.config.reconnect_delay_ms
                        * 2u64.pow(self.reconnect_attempts.min(6));
                    let delay = Duration::from_millis(base_delay.min(MAX_BACKOFF_MS));

                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Fail pending watchers and discard frames queued for the dead connection
    async fn reset_session(&mut self, error: &MarketDataError) {
        self.state.session.lock().await.on_disconnect(error);
        let mut stale = 0usize;
        while self.outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            warn!(frames = stale, "Discarded frames queued before disconnect");
        }
    }

    async fn connect_and_process(&mut self) -> Result<Disconnect> {
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;
        let connected_at = now_ms();

        let keepalive_ms = self.state.config.keepalive_ms;
        let max_pong_misses = i64::from(self.state.config.max_pong_misses.max(1));
        let max_silence_ms = keepalive_ms as i64 * max_pong_misses;
        let mut keepalive = interval(Duration::from_millis(keepalive_ms));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        keepalive.tick().await;

        loop {
            tokio::select! {
                inbound = self.client.read_text() => {
                    let text = inbound?;
                    let mut session = self.state.session.lock().await;
                    if let Err(e) = session.handle_text(&text) {
                        warn!(error = %e, "Failed to decode frame");
                    }
                    if session.take_reconnect_request() {
                        info!("Reconnecting on venue request");
                        return Ok(Disconnect::Restart);
                    }
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return Ok(Disconnect::Shutdown);
                    };
                    self.client.send_frame(&frame).await?;
                }
                _ = keepalive.tick() => {
                    let (ping, last_pong) = {
                        let session = self.state.session.lock().await;
                        (session.ping_frame(), session.last_pong())
                    };
                    let last_seen = last_pong.unwrap_or(connected_at).max(connected_at);
                    if now_ms() - last_seen > max_silence_ms {
                        warn!(last_seen, "No pong within keep-alive window");
                        return Err(MarketDataError::ConnectionTimeout);
                    }
                    self.client.send_frame(&ping).await?;
                }
            }
        }
    }
}
