//! FTX Market Data - stream client
//!
//! Connects to the FTX WebSocket stream, keeps order books and trade caches in
//! sync for the configured markets and logs every watched update. Private
//! orders and fills are watched when API credentials are configured.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ftx_market_data::{
    AppState, ChannelSink, Config, Credential, Markets, Metrics, Session, Watcher,
    WebSocketManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting FTX Market Data client");

    let config = Arc::new(Config::load()?);
    info!(markets = ?config.markets, endpoint = %config.ws_endpoint, "Configuration loaded");

    let metrics = Arc::new(Metrics::new()?);
    let markets = load_markets(&config).await;
    let public_markets: Vec<String> = config
        .markets
        .iter()
        .filter(|symbol| markets.by_symbol(symbol).is_some())
        .cloned()
        .collect();

    let (sink, outbound) = ChannelSink::new();
    let mut session = Session::new(config.session(), markets, Box::new(sink), metrics.clone());
    if let (Some(key), Some(secret)) = (&config.api_key, &config.api_secret) {
        session = session.with_credential(Credential::new(
            key.clone(),
            secret.clone(),
            config.subaccount.clone(),
        ));
    }

    let state = Arc::new(AppState {
        session: Arc::new(Mutex::new(session)),
        metrics,
        config: config.clone(),
    });

    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    let watcher = Watcher::new(state.session.clone());
    for symbol in public_markets {
        spawn_public_watchers(watcher.clone(), symbol);
    }
    if config.has_credentials() {
        spawn_private_watchers(watcher.clone());
    }

    let mut ws_manager = WebSocketManager::new(state, outbound);
    ws_manager.run().await?;

    Ok(())
}

/// Fetch instrument metadata, falling back to the configured ids.
///
/// The whole venue registry is kept: account-wide orders and fills may name
/// any market, not only the ones with public feeds.
async fn load_markets(config: &Config) -> Markets {
    let markets = match Markets::fetch(&config.rest_endpoint).await {
        Ok(markets) => markets,
        Err(e) => {
            warn!(error = %e, "Market metadata unavailable, using configured ids");
            Markets::from_ids(&config.markets)
        }
    };
    let unknown = markets.unknown_symbols(&config.markets);
    if !unknown.is_empty() {
        warn!(unknown = ?unknown, "Some configured markets are unknown to the venue");
    }
    markets
}

fn spawn_public_watchers(watcher: Watcher, symbol: String) {
    let books = watcher.clone();
    let book_symbol = symbol.clone();
    tokio::spawn(async move {
        loop {
            match books.watch_order_book(&book_symbol, Some(10)).await {
                Ok(book) => info!(
                    symbol = %book.symbol,
                    best_bid = ?book.bids.first().map(|l| l.price),
                    best_ask = ?book.asks.first().map(|l| l.price),
                    "Order book"
                ),
                Err(e) => {
                    warn!(symbol = %book_symbol, error = %e, "Order book watch failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match watcher.watch_trades(&symbol, None, None).await {
                Ok(trades) => {
                    for trade in trades {
                        info!(
                            symbol = %trade.symbol,
                            side = ?trade.side,
                            price = %trade.price,
                            amount = %trade.amount,
                            "Trade"
                        );
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Trades watch failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
}

fn spawn_private_watchers(watcher: Watcher) {
    let orders = watcher.clone();
    tokio::spawn(async move {
        loop {
            match orders.watch_orders(None, None, None).await {
                Ok(orders) => {
                    for order in orders {
                        info!(
                            id = %order.id,
                            symbol = %order.symbol,
                            status = ?order.status,
                            filled = %order.filled,
                            "Order"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Orders watch failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match watcher.watch_my_trades(None, None, None).await {
                Ok(fills) => {
                    for fill in fills {
                        info!(
                            id = ?fill.id,
                            symbol = %fill.symbol,
                            price = %fill.price,
                            amount = %fill.amount,
                            "Fill"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Fills watch failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let port = state.config.health_port;
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let session = state.session.lock().await;
    Json(serde_json::json!({
        "status": "healthy",
        "component": "ftx-market-data",
        "markets": session.markets().len(),
        "authenticated": session.is_authenticating(),
        "last_pong": session.last_pong(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    state
        .metrics
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
