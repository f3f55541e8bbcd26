//! Async watch surface
//!
//! Each call subscribes (once per subscribe hash), waits for the next delivery
//! on its topic and then returns the view. The session lock is never held
//! across an await on the stream.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{MarketDataError, Result};
use crate::orderbook::OrderBookState;
use crate::parser::{Order, Ticker, Trade};
use crate::protocol::Channel;
use crate::session::{wait_authenticated, Session, StreamUpdate};

/// Cloneable handle for awaiting stream updates
#[derive(Clone)]
pub struct Watcher {
    session: Arc<Mutex<Session>>,
}

impl Watcher {
    pub fn new(session: Arc<Mutex<Session>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Mutex<Session>> {
        &self.session
    }

    /// Next ticker for `symbol`
    pub async fn watch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let waiter = self.session.lock().await.watch_public(Channel::Ticker, symbol)?;
        match waiter.await? {
            StreamUpdate::Ticker(ticker) => Ok(ticker),
            other => Err(unexpected(Channel::Ticker, &other)),
        }
    }

    /// Trades for `symbol` after the next delivery.
    ///
    /// With new-updates mode on, only trades received since the previous read
    /// are returned.
    pub async fn watch_trades(
        &self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>> {
        let waiter = self.session.lock().await.watch_public(Channel::Trades, symbol)?;
        match waiter.await? {
            StreamUpdate::Trades(_) => {}
            other => return Err(unexpected(Channel::Trades, &other)),
        }
        Ok(self.session.lock().await.read_trades(symbol, since, limit))
    }

    /// Order book for `symbol` after the next snapshot or delta, truncated to `limit` levels
    pub async fn watch_order_book(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<OrderBookState> {
        let waiter = self.session.lock().await.watch_public(Channel::Orderbook, symbol)?;
        match waiter.await? {
            StreamUpdate::OrderBook(mut state) => {
                if let Some(limit) = limit {
                    state.bids.truncate(limit);
                    state.asks.truncate(limit);
                }
                Ok(state)
            }
            other => Err(unexpected(Channel::Orderbook, &other)),
        }
    }

    /// Account orders after the next order update, optionally for one symbol
    pub async fn watch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Order>> {
        self.watch_private(Channel::Orders, symbol).await?;
        Ok(self.session.lock().await.read_orders(symbol, since, limit))
    }

    /// Account fills after the next fill, optionally for one symbol
    pub async fn watch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>> {
        self.watch_private(Channel::Fills, symbol).await?;
        Ok(self.session.lock().await.read_fills(symbol, since, limit))
    }

    async fn watch_private(&self, channel: Channel, symbol: Option<&str>) -> Result<()> {
        let handshake = self.session.lock().await.authenticate()?;
        wait_authenticated(handshake).await?;

        let waiter = self.session.lock().await.watch_private(channel, symbol)?;
        debug!(topic = %waiter.topic(), "Waiting on private topic");
        match (channel, waiter.await?) {
            (Channel::Orders, StreamUpdate::Orders(_))
            | (Channel::Fills, StreamUpdate::Fills(_)) => Ok(()),
            (channel, other) => Err(unexpected(channel, &other)),
        }
    }
}

fn unexpected(channel: Channel, update: &StreamUpdate) -> MarketDataError {
    let kind = match update {
        StreamUpdate::Ticker(_) => "ticker",
        StreamUpdate::Trades(_) => "trades",
        StreamUpdate::OrderBook(_) => "orderbook",
        StreamUpdate::Orders(_) => "orders",
        StreamUpdate::Fills(_) => "fills",
    };
    MarketDataError::ParseError(format!("{} watcher received a {} update", channel, kind))
}
