//! Waiter registry keyed by topic
//!
//! Each `watch` registers a one-shot slot under a topic key. A resolve or reject
//! drains every slot of that key at once, so all waiters of one delivery see the
//! same value. Slots whose receiver was dropped are pruned on the next
//! registration for the key.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{MarketDataError, Result};
use crate::orderbook::OrderBookState;
use crate::parser::{Order, Ticker, Trade};

/// View delivered to the waiters of a topic
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Ticker(Ticker),
    Trades(Vec<Trade>),
    OrderBook(OrderBookState),
    Orders(Vec<Order>),
    Fills(Vec<Trade>),
}

type Slot = oneshot::Sender<Result<StreamUpdate>>;

/// Pending `watch` calls, grouped by topic key
#[derive(Debug, Default)]
pub struct TopicRegistry {
    waiters: HashMap<String, Vec<Slot>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next delivery on `topic`
    pub fn register(&mut self, topic: &str) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let slots = self.waiters.entry(topic.to_string()).or_default();
        slots.retain(|slot| !slot.is_closed());
        slots.push(tx);
        Waiter {
            topic: topic.to_string(),
            rx,
        }
    }

    /// Whether anyone is still listening on `topic`
    pub fn has_waiters(&self, topic: &str) -> bool {
        self.pending(topic) > 0
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.waiters
            .get(topic)
            .map_or(0, |slots| slots.iter().filter(|slot| !slot.is_closed()).count())
    }

    /// Deliver `update` to every waiter of `topic`; returns how many received it
    pub fn resolve(&mut self, topic: &str, update: StreamUpdate) -> usize {
        self.drain(topic, Ok(update))
    }

    /// Resolve each topic in order, building the view only if someone is waiting
    pub fn resolve_with<F>(&mut self, topics: &[String], build: F) -> usize
    where
        F: FnOnce() -> StreamUpdate,
    {
        if !topics.iter().any(|topic| self.has_waiters(topic)) {
            for topic in topics {
                self.waiters.remove(topic);
            }
            return 0;
        }
        let update = build();
        topics
            .iter()
            .map(|topic| self.resolve(topic, update.clone()))
            .sum()
    }

    /// Fail every waiter of `topic` with `error`
    pub fn reject(&mut self, topic: &str, error: &MarketDataError) -> usize {
        self.drain(topic, Err(error.clone()))
    }

    /// Fail the waiters of `channel` and of every `channel:marketId` topic
    pub fn reject_channel(&mut self, channel: &str, error: &MarketDataError) -> usize {
        let prefix = format!("{}:", channel);
        self.reject_matching(|topic| topic == channel || topic.starts_with(&prefix), error)
    }

    /// Fail every waiter of every topic
    pub fn reject_all(&mut self, error: &MarketDataError) -> usize {
        self.reject_matching(|_| true, error)
    }

    fn reject_matching<P>(&mut self, matches: P, error: &MarketDataError) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let topics: Vec<String> = self
            .waiters
            .keys()
            .filter(|topic| matches(topic.as_str()))
            .cloned()
            .collect();
        topics.iter().map(|topic| self.reject(topic, error)).sum()
    }

    fn drain(&mut self, topic: &str, outcome: Result<StreamUpdate>) -> usize {
        let Some(slots) = self.waiters.remove(topic) else {
            return 0;
        };
        slots
            .into_iter()
            .filter(|slot| !slot.is_closed())
            .map(|slot| slot.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

/// A pending `watch`; resolves with the next delivery on its topic
#[derive(Debug)]
pub struct Waiter {
    topic: String,
    rx: oneshot::Receiver<Result<StreamUpdate>>,
}

impl Waiter {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Future for Waiter {
    type Output = Result<StreamUpdate>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(MarketDataError::SubscriptionClosed)))
    }
}
