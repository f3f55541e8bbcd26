//! Wire vocabulary of the FTX WebSocket API
//!
//! Inbound discriminators, outbound control frames and topic keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outer discriminator of an inbound frame (`type` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Partial,
    Update,
    Subscribed,
    Unsubscribed,
    Info,
    Error,
    Pong,
}

impl MessageType {
    /// Returns `None` for discriminators this client does not know about
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "partial" => Some(Self::Partial),
            "update" => Some(Self::Update),
            "subscribed" => Some(Self::Subscribed),
            "unsubscribed" => Some(Self::Unsubscribed),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::Update => "update",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Info => "info",
            Self::Error => "error",
            Self::Pong => "pong",
        }
    }
}

/// Inner discriminator of `partial`/`update` frames (`channel` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Ticker,
    Trades,
    Orderbook,
    Orders,
    Fills,
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ticker" => Some(Self::Ticker),
            "trades" => Some(Self::Trades),
            "orderbook" => Some(Self::Orderbook),
            "orders" => Some(Self::Orders),
            "fills" => Some(Self::Fills),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::Orderbook => "orderbook",
            Self::Orders => "orders",
            Self::Fills => "fills",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of the `login` control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginArgs {
    pub key: String,
    pub time: i64,
    pub sign: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

/// Control frames sent to the venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OutboundFrame {
    Subscribe {
        channel: Channel,
        #[serde(skip_serializing_if = "Option::is_none")]
        market: Option<String>,
    },
    Login {
        args: LoginArgs,
    },
    Ping,
}

impl OutboundFrame {
    pub fn subscribe(channel: Channel, market: Option<&str>) -> Self {
        OutboundFrame::Subscribe {
            channel,
            market: market.map(str::to_string),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Topic of a public feed: `channel:marketId`
pub fn public_topic(channel: Channel, market_id: &str) -> String {
    format!("{}:{}", channel.as_str(), market_id)
}

/// Topic of a private feed: `channel`, or `channel:marketId` for a per-instrument view
pub fn private_topic(channel: Channel, market_id: Option<&str>) -> String {
    match market_id {
        Some(id) => public_topic(channel, id),
        None => channel.as_str().to_string(),
    }
}
