//! Login handshake for the private channels
//!
//! The venue never acknowledges `login`, so the shared outcome is marked
//! successful as soon as the frame is sent. An authentication error reported
//! later clears the handshake flag and the next private watch logs in again.

use std::fmt::{self, Debug};

use futures_util::future::Shared;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::oneshot;

use crate::error::{MarketDataError, Result};
use crate::protocol::LoginArgs;

type HmacSha256 = Hmac<Sha256>;

/// Key under which the handshake flag lives in the session subscriptions
pub const AUTHENTICATE: &str = "authenticate";

/// Key of the shared handshake outcome
pub const LOGIN: &str = "login";

/// Outcome of a login handshake, awaitable by any number of watchers
pub type AuthHandle = Shared<oneshot::Receiver<Result<()>>>;

/// Wait for a handshake to complete
pub async fn wait_authenticated(handle: AuthHandle) -> Result<()> {
    handle
        .await
        .map_err(|_| MarketDataError::SubscriptionClosed)?
}

/// API credentials for the private channels
#[derive(Clone)]
pub struct Credential {
    api_key: String,
    api_secret: Box<[u8]>,
    subaccount: Option<String>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("subaccount", &self.subaccount)
            .finish()
    }
}

impl Credential {
    pub fn new(api_key: String, api_secret: String, subaccount: Option<String>) -> Self {
        Self {
            api_key,
            api_secret: api_secret.into_bytes().into_boxed_slice(),
            subaccount,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC SHA256 of `message`, lowercase hex
    pub fn sign(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.api_secret)
            .map_err(|e| MarketDataError::Authentication(format!("invalid secret: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Arguments of the login frame for time `time_ms`
    pub fn login_args(&self, time_ms: i64) -> Result<LoginArgs> {
        let payload = format!("{}websocket_login", time_ms);
        Ok(LoginArgs {
            key: self.api_key.clone(),
            time: time_ms,
            sign: self.sign(&payload)?,
            subaccount: self.subaccount.clone(),
        })
    }
}
