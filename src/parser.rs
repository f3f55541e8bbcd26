//! Parser module for FTX WebSocket messages
//!
//! Deserializes the frame envelope and the per-channel payloads, then normalizes
//! them into the entities held by the session caches.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{MarketDataError, Result};
use crate::markets::Market;

/// Fields of an inbound frame the router looks at
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// Outer discriminator
    #[serde(rename = "type")]
    pub kind: Option<String>,

    /// Inner discriminator for `partial`/`update`
    pub channel: Option<String>,

    /// Instrument id on public channels
    pub market: Option<String>,

    /// Payload, object or array depending on the channel
    #[serde(default)]
    pub data: Value,

    /// Human-readable text on `error` and `info`
    pub msg: Option<String>,

    pub code: Option<i64>,
}

impl Envelope {
    pub fn parse(frame: &Value) -> Result<Self> {
        parse_payload(frame)
    }
}

/// Deserialize a payload without copying the JSON tree
pub fn parse_payload<T: DeserializeOwned>(data: &Value) -> Result<T> {
    T::deserialize(data).map_err(MarketDataError::from)
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// `orderbook` payload, shared by snapshots (`partial`) and deltas (`update`)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Venue time in fractional seconds
    #[serde(deserialize_with = "deserialize_seconds")]
    pub time: i64,

    /// Venue integrity field, carried but not verified
    #[serde(default)]
    pub checksum: Option<u32>,

    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Maker,
    Taker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: i64,
    pub bid: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub last: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fee {
    pub cost: Decimal,
    pub currency: Option<String>,
    pub rate: Option<Decimal>,
}

/// A public trade or a private fill
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub id: Option<String>,
    pub order_id: Option<String>,
    pub symbol: String,
    pub timestamp: i64,
    pub side: TradeSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub taker_or_maker: Option<Liquidity>,
    pub fee: Option<Fee>,
    pub liquidation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
}

impl OrderStatus {
    fn from_venue(raw: &str) -> Result<Self> {
        match raw {
            "new" | "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(MarketDataError::ParseError(format!("unknown order status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub timestamp: i64,
    pub order_type: String,
    pub side: TradeSide,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average: Option<Decimal>,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub post_only: bool,
}

/// `ticker` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTicker {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    bid_size: Option<Decimal>,
    ask_size: Option<Decimal>,
    last: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_seconds")]
    time: i64,
}

/// `trades` payload entry
#[derive(Debug, Clone, Deserialize)]
struct WireTrade {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    price: Decimal,
    size: Decimal,
    side: TradeSide,
    #[serde(default)]
    liquidation: bool,
    time: String,
}

/// `orders` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrder {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub client_id: Option<String>,
    pub market: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: TradeSide,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub status: String,
    pub filled_size: Option<Decimal>,
    pub remaining_size: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub post_only: bool,
    pub created_at: String,
}

/// `fills` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFill {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub market: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub order_id: Option<String>,
    pub price: Decimal,
    pub size: Decimal,
    pub side: TradeSide,
    pub liquidity: Option<Liquidity>,
    pub fee: Option<Decimal>,
    pub fee_rate: Option<Decimal>,
    pub fee_currency: Option<String>,
    pub time: String,
}

/// Parse a ticker payload for a resolved market
pub fn parse_ticker(data: &Value, market: &Market) -> Result<Ticker> {
    let wire: WireTicker = parse_payload(data)?;
    Ok(Ticker {
        symbol: market.symbol.clone(),
        timestamp: wire.time,
        bid: wire.bid,
        bid_size: wire.bid_size,
        ask: wire.ask,
        ask_size: wire.ask_size,
        last: wire.last,
    })
}

/// Parse a trades payload, which may be a single trade or a list
pub fn parse_trades(data: &Value, market: &Market) -> Result<Vec<Trade>> {
    let wires: Vec<WireTrade> = match data {
        Value::Array(_) => parse_payload(data)?,
        _ => vec![parse_payload(data)?],
    };
    wires.into_iter().map(|wire| wire.into_trade(market)).collect()
}

impl WireTrade {
    fn into_trade(self, market: &Market) -> Result<Trade> {
        Ok(Trade {
            id: Some(self.id),
            order_id: None,
            symbol: market.symbol.clone(),
            timestamp: parse_rfc3339(&self.time)?,
            side: self.side,
            price: self.price,
            amount: self.size,
            taker_or_maker: None,
            fee: None,
            liquidation: self.liquidation,
        })
    }
}

impl WireOrder {
    pub fn into_order(self, market: &Market) -> Result<Order> {
        let filled = self.filled_size.unwrap_or(Decimal::ZERO);
        let remaining = self
            .remaining_size
            .unwrap_or_else(|| (self.size - filled).max(Decimal::ZERO));
        Ok(Order {
            status: OrderStatus::from_venue(&self.status)?,
            timestamp: parse_rfc3339(&self.created_at)?,
            id: self.id,
            client_order_id: self.client_id,
            symbol: market.symbol.clone(),
            order_type: self.order_type,
            side: self.side,
            price: self.price,
            amount: self.size,
            filled,
            remaining,
            average: self.avg_fill_price,
            reduce_only: self.reduce_only,
            post_only: self.post_only,
        })
    }
}

impl WireFill {
    pub fn into_trade(self, market: &Market) -> Result<Trade> {
        let fee = self.fee.map(|cost| Fee {
            cost,
            currency: self.fee_currency.clone().or_else(|| market.quote.clone()),
            rate: self.fee_rate,
        });
        Ok(Trade {
            timestamp: parse_rfc3339(&self.time)?,
            id: Some(self.id),
            order_id: self.order_id,
            symbol: market.symbol.clone(),
            side: self.side,
            price: self.price,
            amount: self.size,
            taker_or_maker: self.liquidity,
            fee,
            liquidation: false,
        })
    }
}

fn parse_rfc3339(raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| MarketDataError::ParseError(format!("bad timestamp '{}': {}", raw, e)))
}

/// Fractional seconds to milliseconds
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: f64 = Deserialize::deserialize(deserializer)?;
    Ok((seconds * 1000.0).round() as i64)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

/// Custom deserializer for price levels from an array of `[price, size]` pairs
fn deserialize_price_levels<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<Decimal>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: pair[0],
                quantity: pair[1],
            })
        })
        .collect()
}
