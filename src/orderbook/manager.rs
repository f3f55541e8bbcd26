//! Order book manager
//!
//! Manages one order book per symbol.

use std::collections::HashMap;

use super::{OrderBook, OrderBookState};
use crate::parser::OrderBookSnapshot;

/// Manages order books for multiple symbols
#[derive(Debug)]
pub struct OrderBookManager {
    books: HashMap<String, OrderBook>,
    max_depth: Option<usize>,
}

impl OrderBookManager {
    /// Create with custom depth
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            books: HashMap::new(),
            max_depth: Some(max_depth),
        }
    }

    /// Replace the book for `symbol` with a fresh one built from `snapshot`
    pub fn reset_book(&mut self, symbol: &str, snapshot: &OrderBookSnapshot) -> &OrderBook {
        let mut book = OrderBook::new(symbol, self.max_depth);
        book.reset(snapshot);
        self.books.insert(symbol.to_string(), book);
        &self.books[symbol]
    }

    /// Apply a delta to the appropriate book
    ///
    /// Returns the updated book, or `None` when no snapshot exists for `symbol`.
    pub fn apply_update(&mut self, symbol: &str, update: &OrderBookSnapshot) -> Option<&OrderBook> {
        let book = self.books.get_mut(symbol)?;
        if book.apply_update(update) {
            Some(book)
        } else {
            None
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    /// Get the state of a specific book
    pub fn get_state(&self, symbol: &str) -> Option<OrderBookState> {
        self.books.get(symbol).map(|book| book.state())
    }
}
