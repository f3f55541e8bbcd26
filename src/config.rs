//! Configuration module for the market data handler

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Markets to watch (e.g., ["BTC-PERP", "ETH/USD"])
    pub markets: Vec<String>,

    /// WebSocket endpoint
    pub ws_endpoint: String,

    /// REST API endpoint for market metadata
    pub rest_endpoint: String,

    /// Credentials for the private `orders` and `fills` channels
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub subaccount: Option<String>,

    /// Bounded cache capacities per feed
    pub trades_limit: usize,
    pub orders_limit: usize,
    pub fills_limit: usize,

    /// Order book depth levels to maintain
    pub orderbook_depth: usize,

    /// Application-level ping interval
    pub keepalive_ms: u64,
    /// Missed pongs tolerated before the connection is considered stale
    pub max_pong_misses: u32,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,

    /// Port for the health/metrics HTTP server
    pub health_port: u16,

    /// Only hand watchers the entries that arrived since their previous read
    pub new_updates: bool,
}

/// The subset of configuration a [`crate::Session`] consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub trades_limit: usize,
    pub orders_limit: usize,
    pub fills_limit: usize,
    pub orderbook_depth: usize,
    pub new_updates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trades_limit: 1000,
            orders_limit: 1000,
            fills_limit: 1000,
            orderbook_depth: 400,
            new_updates: true,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let markets: Vec<String> = env::var("MARKETS")
            .unwrap_or_else(|_| "BTC-PERP".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if markets.is_empty() {
            anyhow::bail!("MARKETS must name at least one market");
        }

        let defaults = SessionConfig::default();

        let config = Self {
            markets,
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or_else(|_| "wss://ftx.com/ws".to_string()),
            rest_endpoint: env::var("REST_ENDPOINT")
                .unwrap_or_else(|_| "https://ftx.com/api".to_string()),
            api_key: env_opt("FTX_API_KEY"),
            api_secret: env_opt("FTX_API_SECRET"),
            subaccount: env_opt("FTX_SUBACCOUNT"),
            trades_limit: env_or("TRADES_LIMIT", defaults.trades_limit),
            orders_limit: env_or("ORDERS_LIMIT", defaults.orders_limit),
            fills_limit: env_or("FILLS_LIMIT", defaults.fills_limit),
            orderbook_depth: env_or("ORDERBOOK_DEPTH", defaults.orderbook_depth),
            keepalive_ms: env_or("KEEPALIVE_MS", 15_000),
            max_pong_misses: env_or("MAX_PONG_MISSES", 2),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", 1000),
            health_port: env_or("HEALTH_PORT", 9090),
            new_updates: env_or("NEW_UPDATES", defaults.new_updates),
        };

        if config.keepalive_ms == 0 {
            anyhow::bail!("KEEPALIVE_MS must be greater than zero");
        }

        Ok(config)
    }

    /// Per-session limits
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            trades_limit: self.trades_limit,
            orders_limit: self.orders_limit,
            fills_limit: self.fills_limit,
            orderbook_depth: self.orderbook_depth,
            new_updates: self.new_updates,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            markets: vec!["BTC-PERP".to_string()],
            ws_endpoint: "wss://ftx.com/ws".to_string(),
            rest_endpoint: "https://ftx.com/api".to_string(),
            api_key: None,
            api_secret: None,
            subaccount: None,
            trades_limit: session.trades_limit,
            orders_limit: session.orders_limit,
            fills_limit: session.fills_limit,
            orderbook_depth: session.orderbook_depth,
            keepalive_ms: 15_000,
            max_pong_misses: 2,
            reconnect_delay_ms: 1000,
            health_port: 9090,
            new_updates: session.new_updates,
        }
    }
}
