//! Feed and control-frame handlers
//!
//! Every feed handler resolves its own topic keys: public feeds use
//! `channel:marketId`, private feeds resolve `channel` and then
//! `channel:marketId`.

use tracing::{debug, info, trace, warn};

use super::auth::{AUTHENTICATE, LOGIN};
use super::{now_ms, Session, StreamUpdate};
use crate::cache::{ArrayCache, ArrayCacheById};
use crate::error::{MarketDataError, Result};
use crate::markets::Market;
use crate::parser::{
    parse_payload, parse_ticker, parse_trades, Envelope, OrderBookSnapshot, WireFill, WireOrder,
};
use crate::protocol::{private_topic, public_topic, Channel};

/// `info` code announcing a server restart
const INFO_SERVER_RESTART: i64 = 20001;

impl Session {
    /// Market of a public frame, or `None` when the id is missing or unknown
    fn public_market(&self, envelope: &Envelope) -> Option<Market> {
        let market_id = envelope.market.as_deref()?;
        let market = self.markets.by_id(market_id).cloned();
        if market.is_none() {
            trace!(market = %market_id, "Dropping frame for unknown market");
            self.metrics.dropped("unknown_market");
        }
        market
    }

    fn private_market(&self, market_id: &str) -> Option<Market> {
        let market = self.markets.by_id(market_id).cloned();
        if market.is_none() {
            trace!(market = %market_id, "Dropping private update for unknown market");
            self.metrics.dropped("unknown_market");
        }
        market
    }

    pub(super) fn handle_ticker(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(market) = self.public_market(envelope) else {
            return Ok(());
        };

        let tickers = match &envelope.data {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| parse_ticker(item, &market))
                .collect::<Result<Vec<_>>>()?,
            data => vec![parse_ticker(data, &market)?],
        };
        let Some(ticker) = tickers.into_iter().last() else {
            return Ok(());
        };

        self.tickers.insert(market.symbol.clone(), ticker.clone());
        let topics = [public_topic(Channel::Ticker, &market.id)];
        let resolved = self.topics.resolve_with(&topics, || StreamUpdate::Ticker(ticker));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_trades(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(market) = self.public_market(envelope) else {
            return Ok(());
        };

        let trades = parse_trades(&envelope.data, &market)?;
        let limit = self.config.trades_limit;
        let cache = self
            .trades
            .entry(market.symbol.clone())
            .or_insert_with(|| ArrayCache::new(limit));
        for trade in trades {
            cache.append(trade);
        }

        let topics = [public_topic(Channel::Trades, &market.id)];
        let resolved = self
            .topics
            .resolve_with(&topics, || StreamUpdate::Trades(cache.to_vec()));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_order_book_snapshot(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(market) = self.public_market(envelope) else {
            return Ok(());
        };

        let snapshot: OrderBookSnapshot = parse_payload(&envelope.data)?;
        let book = self.order_books.reset_book(&market.symbol, &snapshot);
        debug!(
            market = %market.id,
            bids = book.bid_levels(),
            asks = book.ask_levels(),
            "Order book snapshot applied"
        );

        let topics = [public_topic(Channel::Orderbook, &market.id)];
        let resolved = self
            .topics
            .resolve_with(&topics, || StreamUpdate::OrderBook(book.state()));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_order_book_update(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(market) = self.public_market(envelope) else {
            return Ok(());
        };

        let update: OrderBookSnapshot = parse_payload(&envelope.data)?;
        let Some(book) = self.order_books.apply_update(&market.symbol, &update) else {
            debug!(market = %market.id, "Ignoring order book delta without snapshot");
            self.metrics.dropped("no_snapshot");
            return Ok(());
        };

        let topics = [public_topic(Channel::Orderbook, &market.id)];
        let resolved = self
            .topics
            .resolve_with(&topics, || StreamUpdate::OrderBook(book.state()));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_order(&mut self, envelope: &Envelope) -> Result<()> {
        let wire: WireOrder = parse_payload(&envelope.data)?;
        let Some(market) = self.private_market(&wire.market) else {
            return Ok(());
        };

        let order = wire.into_order(&market)?;
        let limit = self.config.orders_limit;
        let orders = self.orders.get_or_insert_with(|| ArrayCacheById::new(limit));
        orders.append(order);

        let topics = [
            private_topic(Channel::Orders, None),
            private_topic(Channel::Orders, Some(&market.id)),
        ];
        let resolved = self
            .topics
            .resolve_with(&topics, || StreamUpdate::Orders(orders.to_vec()));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_my_trade(&mut self, envelope: &Envelope) -> Result<()> {
        let wire: WireFill = parse_payload(&envelope.data)?;
        let Some(market) = self.private_market(&wire.market) else {
            return Ok(());
        };

        let fill = wire.into_trade(&market)?;
        let limit = self.config.fills_limit;
        let fills = self.fills.get_or_insert_with(|| ArrayCacheById::new(limit));
        fills.append(fill);

        let topics = [
            private_topic(Channel::Fills, None),
            private_topic(Channel::Fills, Some(&market.id)),
        ];
        let resolved = self
            .topics
            .resolve_with(&topics, || StreamUpdate::Fills(fills.to_vec()));
        self.metrics.resolved(resolved);
        Ok(())
    }

    pub(super) fn handle_subscription_status(&self, envelope: &Envelope) {
        debug!(channel = ?envelope.channel, market = ?envelope.market, "Subscribed");
    }

    /// Forget the subscribe hash so the next watch subscribes again
    pub(super) fn handle_unsubscription_status(&mut self, envelope: &Envelope) {
        let Some(channel) = envelope.channel.as_deref() else {
            return;
        };
        let subscribe_hash = match envelope.market.as_deref() {
            Some(market) => format!("{}:{}", channel, market),
            None => channel.to_string(),
        };
        if self.subscriptions.remove(&subscribe_hash) {
            info!(subscription = %subscribe_hash, "Unsubscribed");
        }
    }

    pub(super) fn handle_info(&mut self, envelope: &Envelope) {
        if envelope.code == Some(INFO_SERVER_RESTART) {
            warn!(msg = ?envelope.msg, "Venue is restarting, reconnect requested");
            self.reconnect_requested = true;
        } else {
            info!(code = ?envelope.code, msg = ?envelope.msg, "Venue info");
        }
    }

    /// Map a venue error onto the topics it concerns.
    ///
    /// Classified errors fail every private topic, channel-wide and per market.
    /// Authentication errors additionally clear the handshake. Unclassified errors
    /// fail only the topic named by the frame itself.
    pub(super) fn handle_error(&mut self, envelope: &Envelope) {
        let msg = envelope.msg.as_deref().unwrap_or("unknown error");
        let error = MarketDataError::from_venue_message(msg);
        warn!(
            code = ?envelope.code,
            channel = ?envelope.channel,
            market = ?envelope.market,
            error = %error,
            "Venue reported an error"
        );

        if error.is_classified() {
            if error.is_authentication() {
                self.subscriptions.remove(AUTHENTICATE);
                self.handshakes.remove(LOGIN);
                self.subscriptions.remove(Channel::Fills.as_str());
                self.subscriptions.remove(Channel::Orders.as_str());
            }
            let rejected = self.topics.reject_channel(Channel::Fills.as_str(), &error)
                + self.topics.reject_channel(Channel::Orders.as_str(), &error);
            self.metrics.rejected(rejected);
            return;
        }

        let topic = match (envelope.channel.as_deref(), envelope.market.as_deref()) {
            (Some(channel), Some(market)) => format!("{}:{}", channel, market),
            (Some(channel), None) => channel.to_string(),
            _ => return,
        };
        let rejected = self.topics.reject(&topic, &error);
        self.metrics.rejected(rejected);
    }

    pub(super) fn handle_pong(&mut self) {
        self.last_pong = Some(now_ms());
        trace!("Pong received");
    }
}
