//! FTX Market Data - real-time stream client library
//!
//! This crate maintains order books, bounded trade/order/fill caches and the
//! private-channel login handshake for the FTX WebSocket stream, and exposes
//! them to callers as awaitable watches.

use std::sync::Arc;
use tokio::sync::Mutex;

pub mod cache;
pub mod config;
pub mod error;
pub mod markets;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod watcher;
pub mod websocket;

pub use cache::{ArrayCache, ArrayCacheById};
pub use config::{Config, SessionConfig};
pub use error::{MarketDataError, Result};
pub use markets::{Market, Markets};
pub use metrics::Metrics;
pub use orderbook::{OrderBook, OrderBookManager, OrderBookState};
pub use parser::{Order, Ticker, Trade};
pub use protocol::{Channel, OutboundFrame};
pub use session::{ChannelSink, Credential, FrameSink, Session, StreamUpdate};
pub use watcher::Watcher;
pub use websocket::WebSocketManager;

/// Application state shared across components
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}
