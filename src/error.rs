//! Error types for the market data handler

use thiserror::Error;

/// Market data handler errors
///
/// Cloneable so a single failure can be delivered to every waiter of a topic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Exchange not available: {0}")]
    ExchangeNotAvailable(String),

    #[error("Unknown symbol: {0}")]
    BadSymbol(String),

    #[error("Private channels require an API key and secret")]
    MissingCredentials,

    #[error("Subscription closed before an update arrived")]
    SubscriptionClosed,

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl MarketDataError {
    /// Map a venue `error` frame message onto a typed error.
    ///
    /// Matching is exact; unknown texts become a generic [`MarketDataError::Exchange`].
    pub fn from_venue_message(msg: &str) -> Self {
        match msg {
            "Internal server error" => MarketDataError::ExchangeNotAvailable(msg.to_string()),
            "Invalid login credentials" | "Not logged in" => {
                MarketDataError::Authentication(msg.to_string())
            }
            _ => MarketDataError::Exchange(msg.to_string()),
        }
    }

    /// Whether the venue recognized this error (as opposed to the generic fallback)
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            MarketDataError::Authentication(_) | MarketDataError::ExchangeNotAvailable(_)
        )
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, MarketDataError::Authentication(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::RestApiError(err.to_string())
    }
}

impl From<prometheus::Error> for MarketDataError {
    fn from(err: prometheus::Error) -> Self {
        MarketDataError::ConfigError(format!("metrics registration failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
