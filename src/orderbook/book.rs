//! Price-level book for one market
//!
//! Bids are keyed by `Reverse(price)` so both sides iterate best-first.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{Level, OrderBookState, Side};
use crate::parser::{OrderBookSnapshot, PriceLevel};

/// Book built from one `partial` snapshot and the `update` deltas after it
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    /// Set by the first snapshot
    initialized: bool,
    /// Maximum depth levels to maintain per side
    max_depth: Option<usize>,
    /// Venue time of the last snapshot or delta (ms)
    timestamp: Option<i64>,
    /// Last venue checksum seen; stored, not verified
    checksum: Option<u32>,
}

impl OrderBook {
    /// Empty, unsynchronized book
    pub fn new(symbol: &str, max_depth: Option<usize>) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            initialized: false,
            max_depth,
            timestamp: None,
            checksum: None,
        }
    }

    /// Replace both sides wholesale from a `partial` snapshot
    pub fn reset(&mut self, snapshot: &OrderBookSnapshot) {
        self.bids.clear();
        self.asks.clear();

        self.bids.extend(
            snapshot
                .bids
                .iter()
                .filter(|level| level.quantity > Decimal::ZERO)
                .map(|level| (Reverse(level.price), level.quantity)),
        );
        self.asks.extend(
            snapshot
                .asks
                .iter()
                .filter(|level| level.quantity > Decimal::ZERO)
                .map(|level| (level.price, level.quantity)),
        );

        self.timestamp = Some(snapshot.time);
        self.checksum = snapshot.checksum;
        self.initialized = true;
        self.trim_depth();
    }

    /// Apply an `update` frame
    ///
    /// Returns false when no snapshot has been applied yet; the delta is then ignored.
    pub fn apply_update(&mut self, update: &OrderBookSnapshot) -> bool {
        if !self.initialized {
            return false;
        }

        self.apply_delta(Side::Ask, &update.asks);
        self.apply_delta(Side::Bid, &update.bids);

        self.timestamp = Some(update.time);
        self.checksum = update.checksum;
        self.trim_depth();

        true
    }

    /// Apply price level updates to one side, in array order
    ///
    /// A zero size removes the level; anything else inserts or replaces it.
    pub fn apply_delta(&mut self, side: Side, levels: &[PriceLevel]) {
        for level in levels {
            match side {
                Side::Bid => upsert(&mut self.bids, Reverse(level.price), level.quantity),
                Side::Ask => upsert(&mut self.asks, level.price, level.quantity),
            }
        }
    }

    /// Drop the worst levels beyond `max_depth`
    fn trim_depth(&mut self) {
        let Some(max_depth) = self.max_depth else {
            return;
        };
        while self.bids.len() > max_depth {
            self.bids.pop_last();
        }
        while self.asks.len() > max_depth {
            self.asks.pop_last();
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Whether a snapshot has been applied
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn checksum(&self) -> Option<u32> {
        self.checksum
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// View of the top `limit` levels per side (all levels when `None`)
    pub fn limit(&self, limit: Option<usize>) -> OrderBookState {
        let take = limit.unwrap_or(usize::MAX);
        OrderBookState {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            checksum: self.checksum,
            bids: self
                .bids
                .iter()
                .take(take)
                .map(|(Reverse(p), q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .take(take)
                .map(|(p, q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
        }
    }

    /// Full view of the book
    pub fn state(&self) -> OrderBookState {
        self.limit(None)
    }
}

fn upsert<K: Ord>(side: &mut BTreeMap<K, Decimal>, key: K, quantity: Decimal) {
    if quantity.is_zero() {
        side.remove(&key);
    } else {
        side.insert(key, quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel { price, quantity }
    }

    fn snapshot(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            time: 1_000,
            checksum: Some(42),
            bids,
            asks,
        }
    }

    fn seeded_book() -> OrderBook {
        let mut book = OrderBook::new("BTC-PERP", Some(10));
        book.reset(&snapshot(
            vec![level(dec!(50000), dec!(1.0)), level(dec!(49999), dec!(2.0))],
            vec![level(dec!(50001), dec!(1.5)), level(dec!(50002), dec!(2.5))],
        ));
        book
    }

    fn assert_sorted_without_zeros(state: &OrderBookState) {
        assert!(state.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(state.asks.windows(2).all(|w| w[0].price < w[1].price));
        assert!(state
            .bids
            .iter()
            .chain(state.asks.iter())
            .all(|l| l.quantity != Decimal::ZERO));
    }

    #[test]
    fn test_best_bid_ask() {
        let book = seeded_book();
        assert_eq!(book.best_bid(), Some(dec!(50000)));
        assert_eq!(book.best_ask(), Some(dec!(50001)));
        assert_eq!(book.spread(), Some(dec!(1)));
    }

    #[test]
    fn test_snapshot_then_delta_scenario() {
        let mut book = OrderBook::new("BTC-PERP", Some(400));
        book.reset(&snapshot(vec![level(dec!(100), dec!(1))], vec![level(dec!(101), dec!(2))]));

        let update = OrderBookSnapshot {
            time: 2_000,
            checksum: None,
            bids: vec![level(dec!(100), dec!(0)), level(dec!(99), dec!(3))],
            asks: vec![],
        };
        assert!(book.apply_update(&update));

        let state = book.state();
        assert_eq!(state.bids, vec![Level { price: dec!(99), quantity: dec!(3) }]);
        assert_eq!(state.asks, vec![Level { price: dec!(101), quantity: dec!(2) }]);
        assert_eq!(state.timestamp, Some(2_000));
    }

    #[test]
    fn test_zero_size_removes_only_that_level() {
        let mut book = seeded_book();
        book.apply_delta(Side::Bid, &[level(dec!(49999), dec!(0))]);
        assert_eq!(book.bid_levels(), 1);

        // absent level: no-op
        book.apply_delta(Side::Ask, &[level(dec!(60000), dec!(0))]);
        assert_eq!(book.ask_levels(), 2);
    }

    #[test]
    fn test_delta_is_idempotent_and_last_write_wins() {
        let mut book = seeded_book();
        let delta = [level(dec!(50003), dec!(1)), level(dec!(50003), dec!(4))];

        book.apply_delta(Side::Ask, &delta);
        let once = book.state();
        book.apply_delta(Side::Ask, &delta);
        assert_eq!(book.state(), once);

        let top = book.limit(Some(3));
        assert_eq!(top.asks[2], Level { price: dec!(50003), quantity: dec!(4) });
    }

    #[test]
    fn test_delta_before_snapshot_is_ignored() {
        let mut book = OrderBook::new("BTC-PERP", None);
        let update = snapshot(vec![level(dec!(1), dec!(1))], vec![]);
        assert!(!book.apply_update(&update));
        assert_eq!(book.bid_levels(), 0);
        assert!(book.timestamp().is_none());
    }

    #[test]
    fn test_snapshot_replaces_wholesale_and_skips_zeros() {
        let mut book = seeded_book();
        book.reset(&snapshot(
            vec![level(dec!(10), dec!(1)), level(dec!(9), dec!(0))],
            vec![level(dec!(11), dec!(1))],
        ));
        let state = book.state();
        assert_eq!(state.bids.len(), 1);
        assert_eq!(state.asks.len(), 1);
        assert_eq!(state.checksum, Some(42));
        assert_sorted_without_zeros(&state);
    }

    #[test]
    fn test_ordering_holds_over_delta_sequence() {
        let mut book = OrderBook::new("BTC-PERP", Some(5));
        book.reset(&snapshot(vec![level(dec!(100), dec!(1))], vec![level(dec!(101), dec!(1))]));

        for i in 0..20i64 {
            let price = Decimal::from(90 + i);
            let size = if i % 3 == 0 { Decimal::ZERO } else { Decimal::from(i) };
            if price < dec!(101) {
                book.apply_delta(Side::Bid, &[level(price, size)]);
            } else {
                book.apply_delta(Side::Ask, &[level(price, size)]);
            }
            let state = book.state();
            assert_sorted_without_zeros(&state);
            assert!(state.bids.len() <= 5 && state.asks.len() <= 5);
        }
    }
}
