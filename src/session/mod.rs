//! Client session
//!
//! Owns every piece of per-connection state: order books, bounded caches,
//! subscriptions, the login handshake and the liveness marker. Inbound frames
//! are routed through [`Session::handle_message`]; watchers register through
//! [`Session::watch_public`] and [`Session::watch_private`].

mod auth;
mod handlers;
mod sink;
mod topics;

pub use auth::{wait_authenticated, AuthHandle, Credential, AUTHENTICATE, LOGIN};
#[cfg(test)]
pub use sink::MockFrameSink;
pub use sink::{ChannelSink, FrameSink};
pub use topics::{StreamUpdate, TopicRegistry, Waiter};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::cache::{filter_by_symbol_since_limit, ArrayCache, ArrayCacheById};
use crate::config::SessionConfig;
use crate::error::{MarketDataError, Result};
use crate::markets::Markets;
use crate::metrics::Metrics;
use crate::orderbook::{OrderBookManager, OrderBookState};
use crate::parser::{Envelope, Order, Ticker, Trade};
use crate::protocol::{private_topic, public_topic, Channel, MessageType, OutboundFrame};

/// Milliseconds since epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// State of one connection to the venue
pub struct Session {
    config: SessionConfig,
    markets: Markets,
    credential: Option<Credential>,
    sink: Box<dyn FrameSink>,
    metrics: Arc<Metrics>,
    topics: TopicRegistry,
    /// Subscribe hashes already sent, plus the handshake flag
    subscriptions: HashSet<String>,
    /// Shared handshake outcomes by handshake name
    handshakes: HashMap<String, AuthHandle>,
    order_books: OrderBookManager,
    tickers: HashMap<String, Ticker>,
    trades: HashMap<String, ArrayCache<Trade>>,
    orders: Option<ArrayCacheById<Order>>,
    fills: Option<ArrayCacheById<Trade>>,
    last_pong: Option<i64>,
    reconnect_requested: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        markets: Markets,
        sink: Box<dyn FrameSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let order_books = OrderBookManager::with_depth(config.orderbook_depth);
        Self {
            config,
            markets,
            credential: None,
            sink,
            metrics,
            topics: TopicRegistry::new(),
            subscriptions: HashSet::new(),
            handshakes: HashMap::new(),
            order_books,
            tickers: HashMap::new(),
            trades: HashMap::new(),
            orders: None,
            fills: None,
            last_pong: None,
            reconnect_requested: false,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn markets(&self) -> &Markets {
        &self.markets
    }

    /// Subscribe to a public channel for `symbol` and wait on `channel:marketId`
    pub fn watch_public(&mut self, channel: Channel, symbol: &str) -> Result<Waiter> {
        let market_id = self.markets.market(symbol)?.id.clone();
        let topic = public_topic(channel, &market_id);
        let frame = OutboundFrame::subscribe(channel, Some(&market_id));
        self.send_and_register(&topic, &topic, &frame)
    }

    /// Subscribe to a private channel and wait on `channel` or `channel:marketId`.
    ///
    /// Callers await [`Session::authenticate`] first.
    pub fn watch_private(&mut self, channel: Channel, symbol: Option<&str>) -> Result<Waiter> {
        let market_id = match symbol {
            Some(symbol) => Some(self.markets.market(symbol)?.id.clone()),
            None => None,
        };
        let topic = private_topic(channel, market_id.as_deref());
        let frame = OutboundFrame::subscribe(channel, None);
        self.send_and_register(&topic, channel.as_str(), &frame)
    }

    /// Register a waiter on `topic`, sending `frame` the first time `subscribe_hash` is seen
    pub fn send_and_register(
        &mut self,
        topic: &str,
        subscribe_hash: &str,
        frame: &OutboundFrame,
    ) -> Result<Waiter> {
        let waiter = self.topics.register(topic);
        if self.subscriptions.insert(subscribe_hash.to_string()) {
            if let Err(e) = self.sink.send_frame(frame) {
                self.subscriptions.remove(subscribe_hash);
                return Err(e);
            }
            debug!(topic = %topic, "Subscribe frame sent");
        }
        Ok(waiter)
    }

    /// Start the login handshake once per session and hand out its shared outcome
    pub fn authenticate(&mut self) -> Result<AuthHandle> {
        if !self.subscriptions.contains(AUTHENTICATE) {
            let credential = self
                .credential
                .as_ref()
                .ok_or(MarketDataError::MissingCredentials)?;
            let frame = OutboundFrame::Login {
                args: credential.login_args(now_ms())?,
            };

            self.sink.send_frame(&frame)?;
            self.subscriptions.insert(AUTHENTICATE.to_string());

            let (tx, rx) = oneshot::channel();
            // no reply ever comes for login
            let _ = tx.send(Ok(()));
            self.handshakes.insert(LOGIN.to_string(), rx.shared());
            info!(api_key = %credential.api_key(), "Login frame sent");
        }

        self.handshakes
            .get(LOGIN)
            .cloned()
            .ok_or(MarketDataError::SubscriptionClosed)
    }

    pub fn is_authenticating(&self) -> bool {
        self.subscriptions.contains(AUTHENTICATE)
    }

    /// Route one decoded inbound frame.
    ///
    /// Unknown discriminators and unresolvable instruments are dropped silently.
    pub fn handle_message(&mut self, frame: &Value) {
        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                self.metrics.dropped("malformed");
                return;
            }
        };

        let Some(kind) = envelope.kind.as_deref().and_then(MessageType::parse) else {
            trace!(kind = ?envelope.kind, "Unknown message type");
            self.metrics.dropped("unknown_type");
            return;
        };
        self.metrics.frame(kind.as_str());

        let outcome = match kind {
            MessageType::Partial => self.handle_partial(&envelope),
            MessageType::Update => self.handle_update(&envelope),
            MessageType::Subscribed => {
                self.handle_subscription_status(&envelope);
                Ok(())
            }
            MessageType::Unsubscribed => {
                self.handle_unsubscription_status(&envelope);
                Ok(())
            }
            MessageType::Info => {
                self.handle_info(&envelope);
                Ok(())
            }
            MessageType::Error => {
                self.handle_error(&envelope);
                Ok(())
            }
            MessageType::Pong => {
                self.handle_pong();
                Ok(())
            }
        };

        if let Err(e) = outcome {
            debug!(
                channel = ?envelope.channel,
                market = ?envelope.market,
                error = %e,
                "Dropping unparseable payload"
            );
            self.metrics.dropped("parse_error");
        }
    }

    /// Decode and route a text frame
    pub fn handle_text(&mut self, raw: &str) -> Result<()> {
        let frame: Value = serde_json::from_str(raw)?;
        self.handle_message(&frame);
        Ok(())
    }

    fn handle_partial(&mut self, envelope: &Envelope) -> Result<()> {
        match envelope.channel.as_deref().and_then(Channel::parse) {
            Some(Channel::Orderbook) => self.handle_order_book_snapshot(envelope),
            // trades and tickers are documented as partial but arrive as update
            Some(channel) => self.dispatch_update(channel, envelope),
            None => {
                self.drop_unknown_channel(envelope);
                Ok(())
            }
        }
    }

    fn handle_update(&mut self, envelope: &Envelope) -> Result<()> {
        match envelope.channel.as_deref().and_then(Channel::parse) {
            Some(channel) => self.dispatch_update(channel, envelope),
            None => {
                self.drop_unknown_channel(envelope);
                Ok(())
            }
        }
    }

    fn dispatch_update(&mut self, channel: Channel, envelope: &Envelope) -> Result<()> {
        match channel {
            Channel::Ticker => self.handle_ticker(envelope),
            Channel::Trades => self.handle_trades(envelope),
            Channel::Orderbook => self.handle_order_book_update(envelope),
            Channel::Orders => self.handle_order(envelope),
            Channel::Fills => self.handle_my_trade(envelope),
        }
    }

    fn drop_unknown_channel(&self, envelope: &Envelope) {
        trace!(channel = ?envelope.channel, "Unknown channel");
        self.metrics.dropped("unknown_channel");
    }

    /// Keep-alive payload for the transport scheduler
    pub fn ping_frame(&self) -> OutboundFrame {
        OutboundFrame::Ping
    }

    /// Receive time of the last pong (ms)
    pub fn last_pong(&self) -> Option<i64> {
        self.last_pong
    }

    /// Whether the venue asked for a reconnect since the last call
    pub fn take_reconnect_request(&mut self) -> bool {
        std::mem::take(&mut self.reconnect_requested)
    }

    /// Fail every pending waiter and forget all subscriptions after a connection loss
    pub fn on_disconnect(&mut self, error: &MarketDataError) {
        let rejected = self.topics.reject_all(error);
        self.metrics.rejected(rejected);
        self.subscriptions.clear();
        self.handshakes.clear();
        info!(rejected, error = %error, "Session reset after disconnect");
    }

    pub fn is_subscribed(&self, subscribe_hash: &str) -> bool {
        self.subscriptions.contains(subscribe_hash)
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.topics.pending(topic)
    }

    pub fn ticker(&self, symbol: &str) -> Option<&Ticker> {
        self.tickers.get(symbol)
    }

    /// Top `limit` levels of the book for `symbol`
    pub fn order_book(&self, symbol: &str, limit: Option<usize>) -> Option<OrderBookState> {
        self.order_books.get(symbol).map(|book| book.limit(limit))
    }

    /// Trades for `symbol`, honoring new-updates mode
    pub fn read_trades(
        &mut self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Trade> {
        let new_updates = self.config.new_updates;
        let Some(cache) = self.trades.get_mut(symbol) else {
            return Vec::new();
        };
        let limit = if new_updates {
            cache.effective_limit(Some(symbol), limit)
        } else {
            limit
        };
        filter_by_symbol_since_limit(cache.iter(), None, since, limit)
    }

    /// Account orders, optionally for one symbol, honoring new-updates mode
    pub fn read_orders(
        &mut self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Order> {
        let new_updates = self.config.new_updates;
        let Some(cache) = self.orders.as_mut() else {
            return Vec::new();
        };
        let limit = if new_updates {
            cache.effective_limit(symbol, limit)
        } else {
            limit
        };
        filter_by_symbol_since_limit(cache.iter(), symbol, since, limit)
    }

    /// Account fills, optionally for one symbol, honoring new-updates mode
    pub fn read_fills(
        &mut self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Trade> {
        let new_updates = self.config.new_updates;
        let Some(cache) = self.fills.as_mut() else {
            return Vec::new();
        };
        let limit = if new_updates {
            cache.effective_limit(symbol, limit)
        } else {
            limit
        };
        filter_by_symbol_since_limit(cache.iter(), symbol, since, limit)
    }
}

#[cfg(test)]
mod tests;
