//! Instrument registry
//!
//! Maps venue market ids to unified symbols. Feed handlers drop frames for ids
//! missing here, since metadata may lag the stream.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use crate::error::{MarketDataError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Future,
}

/// A tradable instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Venue identifier (e.g. `BTC-PERP`, `ETH/USD`)
    pub id: String,
    /// Unified symbol exposed to watchers
    pub symbol: String,
    pub base: Option<String>,
    pub quote: Option<String>,
    pub kind: MarketKind,
}

impl Market {
    /// Build a market from its venue id alone, inferring the kind from the separator
    pub fn from_id(id: &str) -> Self {
        let (kind, base, quote) = match id.split_once('/') {
            Some((base, quote)) => (
                MarketKind::Spot,
                Some(base.to_string()),
                Some(quote.to_string()),
            ),
            None => (
                MarketKind::Future,
                id.split_once('-').map(|(base, _)| base.to_string()),
                Some("USD".to_string()),
            ),
        };
        Self {
            id: id.to_string(),
            symbol: id.to_string(),
            base,
            quote,
            kind,
        }
    }
}

/// Known instruments, indexed both ways
#[derive(Debug, Clone, Default)]
pub struct Markets {
    by_id: HashMap<String, Market>,
    id_by_symbol: HashMap<String, String>,
}

/// `GET /markets` response envelope
#[derive(Debug, Deserialize)]
struct RestResponse {
    success: bool,
    #[serde(default)]
    result: Vec<RestMarket>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestMarket {
    name: String,
    #[serde(rename = "type")]
    kind: MarketKind,
    base_currency: Option<String>,
    quote_currency: Option<String>,
    underlying: Option<String>,
}

impl From<RestMarket> for Market {
    fn from(raw: RestMarket) -> Self {
        let base = raw.base_currency.or(raw.underlying);
        let quote = raw.quote_currency.or_else(|| Some("USD".to_string()));
        Market {
            symbol: raw.name.clone(),
            id: raw.name,
            base,
            quote,
            kind: raw.kind,
        }
    }
}

impl Markets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry from a list of venue ids, without REST metadata
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut markets = Self::new();
        for id in ids {
            markets.insert(Market::from_id(id.as_ref()));
        }
        markets
    }

    /// Load every listed market from the REST API
    pub async fn fetch(rest_endpoint: &str) -> Result<Self> {
        let url = format!("{}/markets", rest_endpoint.trim_end_matches('/'));
        info!(url = %url, "Loading markets");

        let response = reqwest::Client::new()
            .get(&url)
            .send()
            .await?
            .json::<RestResponse>()
            .await?;

        let markets = Self::from_rest(response)?;
        info!(count = markets.len(), "Markets loaded");
        Ok(markets)
    }

    fn from_rest(response: RestResponse) -> Result<Self> {
        if !response.success {
            return Err(MarketDataError::RestApiError(
                response.error.unwrap_or_else(|| "markets request failed".to_string()),
            ));
        }
        let mut markets = Self::new();
        for raw in response.result {
            markets.insert(raw.into());
        }
        Ok(markets)
    }

    pub fn insert(&mut self, market: Market) {
        self.id_by_symbol.insert(market.symbol.clone(), market.id.clone());
        self.by_id.insert(market.id.clone(), market);
    }

    /// Look up by venue id
    pub fn by_id(&self, id: &str) -> Option<&Market> {
        self.by_id.get(id)
    }

    /// Look up by unified symbol
    pub fn by_symbol(&self, symbol: &str) -> Option<&Market> {
        self.id_by_symbol.get(symbol).and_then(|id| self.by_id.get(id))
    }

    /// Resolve a symbol, failing with [`MarketDataError::BadSymbol`]
    pub fn market(&self, symbol: &str) -> Result<&Market> {
        self.by_symbol(symbol)
            .ok_or_else(|| MarketDataError::BadSymbol(symbol.to_string()))
    }

    /// Symbols from `symbols` that are not in the registry
    pub fn unknown_symbols<'a>(&self, symbols: &'a [String]) -> Vec<&'a str> {
        symbols
            .iter()
            .map(String::as_str)
            .filter(|symbol| !self.id_by_symbol.contains_key(*symbol))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
