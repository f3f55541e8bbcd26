use std::sync::Arc;

use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_test::{assert_pending, assert_ready, task};

use super::*;
use crate::orderbook::Level;
use crate::parser::OrderStatus;

fn markets() -> Markets {
    Markets::from_ids(["BTC-PERP", "ETH-PERP"])
}

fn session_with(config: SessionConfig) -> (Session, mpsc::UnboundedReceiver<OutboundFrame>) {
    let (sink, rx) = ChannelSink::new();
    let session = Session::new(config, markets(), Box::new(sink), Arc::new(Metrics::new().unwrap()))
        .with_credential(Credential::new("key".to_string(), "secret".to_string(), None));
    (session, rx)
}

fn session() -> (Session, mpsc::UnboundedReceiver<OutboundFrame>) {
    session_with(SessionConfig::default())
}

fn mock_session(sink: MockFrameSink) -> Session {
    Session::new(
        SessionConfig::default(),
        markets(),
        Box::new(sink),
        Arc::new(Metrics::new().unwrap()),
    )
    .with_credential(Credential::new("key".to_string(), "secret".to_string(), None))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn book_frame(kind: &str, market: &str, bids: Value, asks: Value) -> Value {
    json!({
        "type": kind,
        "channel": "orderbook",
        "market": market,
        "data": {"time": 1585812237.63, "checksum": 1, "bids": bids, "asks": asks, "action": kind}
    })
}

fn trade_frame(market: &str, id: u64) -> Value {
    json!({
        "type": "update",
        "channel": "trades",
        "market": market,
        "data": [{
            "id": id,
            "price": 6661.5,
            "size": 1,
            "side": "buy",
            "liquidation": false,
            "time": "2020-04-02T07:45:12.011352+00:00"
        }]
    })
}

fn order_frame(id: u64, market: &str, status: &str) -> Value {
    json!({
        "type": "update",
        "channel": "orders",
        "data": {
            "id": id,
            "clientId": null,
            "market": market,
            "type": "limit",
            "side": "buy",
            "price": 300,
            "size": 0.1,
            "status": status,
            "filledSize": 0,
            "remainingSize": 0.1,
            "avgFillPrice": null,
            "reduceOnly": false,
            "postOnly": false,
            "createdAt": "2020-08-22T14:35:07.861545+00:00"
        }
    })
}

fn fill_frame(id: u64, market: &str) -> Value {
    json!({
        "type": "update",
        "channel": "fills",
        "data": {
            "fee": 0.5,
            "feeRate": 0.0007,
            "id": id,
            "liquidity": "maker",
            "market": market,
            "orderId": 1,
            "price": 100,
            "side": "sell",
            "size": 2,
            "time": "2020-08-22T15:42:42.646980+00:00",
            "type": "order"
        }
    })
}

#[test]
fn test_unknown_discriminators_are_ignored() {
    let (mut session, _rx) = session();
    session.handle_message(&json!({"type": "heartbeat"}));
    session.handle_message(&json!({"type": "update", "channel": "markets", "data": {}}));
    session.handle_message(&json!({"channel": "trades"}));
    session.handle_message(&json!("not an object"));

    assert_eq!(session.metrics.dropped_count("unknown_type"), 2);
    assert_eq!(session.metrics.dropped_count("unknown_channel"), 1);
    assert_eq!(session.metrics.dropped_count("malformed"), 1);
}

#[test]
fn test_subscribe_frame_sent_once_per_hash() {
    let (mut session, mut rx) = session();
    let _first = session.watch_public(Channel::Trades, "BTC-PERP").unwrap();
    let _second = session.watch_public(Channel::Trades, "BTC-PERP").unwrap();

    assert_eq!(
        drain(&mut rx),
        vec![OutboundFrame::subscribe(Channel::Trades, Some("BTC-PERP"))]
    );
    assert_eq!(session.pending("trades:BTC-PERP"), 2);
}

#[test]
fn test_watch_unknown_symbol_fails() {
    let (mut session, mut rx) = session();
    let err = session.watch_public(Channel::Ticker, "DOGE-PERP").unwrap_err();
    assert_eq!(err, MarketDataError::BadSymbol("DOGE-PERP".to_string()));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_order_book_snapshot_then_delta() {
    let (mut session, _rx) = session();
    let mut waiter = task::spawn(session.watch_public(Channel::Orderbook, "BTC-PERP").unwrap());
    assert_pending!(waiter.poll());

    let snapshot = book_frame("partial", "BTC-PERP", json!([[100, 1]]), json!([[101, 2]]));
    session.handle_message(&snapshot);
    let Ok(StreamUpdate::OrderBook(snapshot)) = assert_ready!(waiter.poll()) else {
        panic!("Expected order book");
    };
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.timestamp, Some(1585812237630));

    let mut waiter = task::spawn(session.watch_public(Channel::Orderbook, "BTC-PERP").unwrap());
    let delta = book_frame("update", "BTC-PERP", json!([[100, 0], [99, 3]]), json!([]));
    session.handle_message(&delta);
    let Ok(StreamUpdate::OrderBook(book)) = assert_ready!(waiter.poll()) else {
        panic!("Expected order book");
    };
    assert_eq!(book.bids, vec![Level { price: dec!(99), quantity: dec!(3) }]);
    assert_eq!(book.asks, vec![Level { price: dec!(101), quantity: dec!(2) }]);
}

#[test]
fn test_delta_without_snapshot_is_noop() {
    let (mut session, _rx) = session();
    let mut waiter = task::spawn(session.watch_public(Channel::Orderbook, "ETH-PERP").unwrap());
    session.handle_message(&book_frame("update", "ETH-PERP", json!([[1, 1]]), json!([])));

    assert_pending!(waiter.poll());
    assert!(session.order_book("ETH-PERP", None).is_none());
    assert_eq!(session.metrics.dropped_count("no_snapshot"), 1);
}

#[test]
fn test_unknown_market_is_dropped() {
    let (mut session, _rx) = session();
    session.handle_message(&book_frame("partial", "SOL-PERP", json!([[1, 1]]), json!([])));
    session.handle_message(&trade_frame("SOL-PERP", 1));
    session.handle_message(&order_frame(1, "SOL-PERP", "new"));

    assert!(session.order_book("SOL-PERP", None).is_none());
    assert_eq!(session.metrics.dropped_count("unknown_market"), 3);
}

#[test]
fn test_malformed_payload_is_dropped() {
    let (mut session, _rx) = session();
    session.handle_message(&json!({
        "type": "partial", "channel": "orderbook", "market": "BTC-PERP", "data": {"bids": "nope"}
    }));
    assert!(session.order_book("BTC-PERP", None).is_none());
    assert_eq!(session.metrics.dropped_count("parse_error"), 1);
}

#[test]
fn test_trade_cache_keeps_last_entries() {
    let config = SessionConfig {
        trades_limit: 2,
        ..SessionConfig::default()
    };
    let (mut session, _rx) = session_with(config);
    let mut waiter = task::spawn(session.watch_public(Channel::Trades, "BTC-PERP").unwrap());

    for id in 1..=3 {
        session.handle_message(&trade_frame("BTC-PERP", id));
    }

    let Ok(StreamUpdate::Trades(trades)) = assert_ready!(waiter.poll()) else {
        panic!("Expected trades");
    };
    // resolved on the first trade
    assert_eq!(trades.len(), 1);

    let ids: Vec<_> = session
        .read_trades("BTC-PERP", None, None)
        .into_iter()
        .filter_map(|t| t.id)
        .collect();
    assert_eq!(ids, ["2", "3"]);
}

#[test]
fn test_ticker_single_and_list() {
    let (mut session, _rx) = session();
    let mut waiter = task::spawn(session.watch_public(Channel::Ticker, "BTC-PERP").unwrap());
    let data = json!({
        "bid": 6652,
        "ask": 6653,
        "bidSize": 17.66,
        "askSize": 18.18,
        "last": 6655,
        "time": 1585787827.31
    });
    session.handle_message(&json!({
        "type": "update", "channel": "ticker", "market": "BTC-PERP", "data": data
    }));

    let Ok(StreamUpdate::Ticker(ticker)) = assert_ready!(waiter.poll()) else {
        panic!("Expected ticker");
    };
    assert_eq!(ticker.bid, Some(dec!(6652)));

    session.handle_message(&json!({
        "type": "update", "channel": "ticker", "market": "BTC-PERP", "data": [data]
    }));
    assert_eq!(session.ticker("BTC-PERP").unwrap().last, Some(dec!(6655)));
}

#[test]
fn test_order_dedup_and_both_topics() {
    let (mut session, _rx) = session();
    let mut wide = task::spawn(session.watch_private(Channel::Orders, None).unwrap());
    let mut narrow = task::spawn(session.watch_private(Channel::Orders, Some("BTC-PERP")).unwrap());

    session.handle_message(&order_frame(6, "ETH-PERP", "new"));
    assert_ready!(wide.poll()).unwrap();
    assert_pending!(narrow.poll());

    session.handle_message(&order_frame(7, "BTC-PERP", "new"));
    assert_ready!(narrow.poll()).unwrap();

    session.handle_message(&order_frame(7, "BTC-PERP", "closed"));
    let orders = session.read_orders(None, None, None);
    let ids: Vec<_> = orders.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["6", "7"]);
    assert_eq!(orders[1].status, OrderStatus::Closed);
}

#[test]
fn test_fill_resolves_channel_then_market_topic() {
    let (mut session, _rx) = session();
    let mut wide = task::spawn(session.watch_private(Channel::Fills, None).unwrap());
    let mut narrow = task::spawn(session.watch_private(Channel::Fills, Some("ETH-PERP")).unwrap());

    session.handle_message(&fill_frame(11, "ETH-PERP"));
    let Ok(StreamUpdate::Fills(wide_view)) = assert_ready!(wide.poll()) else {
        panic!("Expected fills");
    };
    let narrow_view = assert_ready!(narrow.poll()).unwrap();
    assert_eq!(StreamUpdate::Fills(wide_view.clone()), narrow_view);
    assert_eq!(wide_view[0].fee.as_ref().unwrap().cost, dec!(0.5));
}

#[test]
fn test_private_subscribe_has_no_market() {
    let (mut session, mut rx) = session();
    let _orders = session.watch_private(Channel::Orders, Some("BTC-PERP")).unwrap();
    let _again = session.watch_private(Channel::Orders, None).unwrap();
    assert_eq!(drain(&mut rx), vec![OutboundFrame::subscribe(Channel::Orders, None)]);
}

#[tokio::test]
async fn test_concurrent_authentication_sends_one_login() {
    let mut sink = MockFrameSink::new();
    sink.expect_send_frame()
        .withf(|frame| matches!(frame, OutboundFrame::Login { .. }))
        .times(1)
        .returning(|_| Ok(()));
    let mut session = mock_session(sink);

    let first = session.authenticate().unwrap();
    let second = session.authenticate().unwrap();
    let (a, b) = tokio::join!(wait_authenticated(first), wait_authenticated(second));
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert!(session.is_authenticating());
}

#[test]
fn test_authentication_error_clears_handshake_and_rejects_private_topics() {
    let mut sink = MockFrameSink::new();
    sink.expect_send_frame()
        .withf(|frame| matches!(frame, OutboundFrame::Login { .. }))
        .times(2)
        .returning(|_| Ok(()));
    sink.expect_send_frame()
        .withf(|frame| matches!(frame, OutboundFrame::Subscribe { .. }))
        .times(2)
        .returning(|_| Ok(()));
    let mut session = mock_session(sink);

    let _handshake = session.authenticate().unwrap();
    let mut orders = task::spawn(session.watch_private(Channel::Orders, None).unwrap());
    let mut fills = task::spawn(session.watch_private(Channel::Fills, None).unwrap());

    session.handle_message(&json!({"type": "error", "code": 400, "msg": "Not logged in"}));

    let expected = MarketDataError::Authentication("Not logged in".to_string());
    assert_eq!(assert_ready!(orders.poll()), Err(expected.clone()));
    assert_eq!(assert_ready!(fills.poll()), Err(expected));
    assert!(!session.is_authenticating());

    // fresh handshake on the next private watch
    let _handshake = session.authenticate().unwrap();
    assert!(session.is_authenticating());
}

#[test]
fn test_authentication_error_rejects_per_market_private_topics() {
    let (mut session, _rx) = session();
    let _handshake = session.authenticate().unwrap();
    let mut orders = task::spawn(session.watch_private(Channel::Orders, Some("BTC-PERP")).unwrap());
    let mut fills = task::spawn(session.watch_private(Channel::Fills, Some("ETH-PERP")).unwrap());
    let mut trades = task::spawn(session.watch_public(Channel::Trades, "BTC-PERP").unwrap());

    session.handle_message(&json!({"type": "error", "code": 400, "msg": "Not logged in"}));

    let expected = MarketDataError::Authentication("Not logged in".to_string());
    assert_eq!(assert_ready!(orders.poll()), Err(expected.clone()));
    assert_eq!(assert_ready!(fills.poll()), Err(expected));
    assert_pending!(trades.poll());
    assert!(!session.is_subscribed("orders"));
    assert!(!session.is_authenticating());
}

#[test]
fn test_unavailable_error_keeps_handshake() {
    let (mut session, _rx) = session();
    let _handshake = session.authenticate().unwrap();
    let mut orders = task::spawn(session.watch_private(Channel::Orders, None).unwrap());

    session.handle_message(&json!({"type": "error", "msg": "Internal server error"}));
    assert!(matches!(
        assert_ready!(orders.poll()),
        Err(MarketDataError::ExchangeNotAvailable(_))
    ));
    assert!(session.is_authenticating());
}

#[test]
fn test_unclassified_error_rejects_only_context_topic() {
    let (mut session, _rx) = session();
    let mut btc = task::spawn(session.watch_public(Channel::Trades, "BTC-PERP").unwrap());
    let mut eth = task::spawn(session.watch_public(Channel::Trades, "ETH-PERP").unwrap());

    session.handle_message(&json!({
        "type": "error",
        "code": 400,
        "msg": "Invalid market",
        "channel": "trades",
        "market": "BTC-PERP"
    }));
    assert_eq!(
        assert_ready!(btc.poll()),
        Err(MarketDataError::Exchange("Invalid market".to_string()))
    );
    assert_pending!(eth.poll());

    // no context: nothing rejected
    session.handle_message(&json!({"type": "error", "msg": "Something else"}));
    assert_pending!(eth.poll());
}

#[test]
fn test_missing_credentials() {
    let (sink, _rx) = ChannelSink::new();
    let mut session = Session::new(
        SessionConfig::default(),
        markets(),
        Box::new(sink),
        Arc::new(Metrics::new().unwrap()),
    );
    assert_eq!(session.authenticate().unwrap_err(), MarketDataError::MissingCredentials);
    assert!(!session.is_authenticating());
}

#[test]
fn test_pong_updates_liveness() {
    let (mut session, _rx) = session();
    assert!(session.last_pong().is_none());
    let before = now_ms();
    session.handle_message(&json!({"type": "pong"}));
    assert!(session.last_pong().unwrap() >= before);
    assert_eq!(session.ping_frame(), OutboundFrame::Ping);
}

#[test]
fn test_unsubscribed_allows_resubscribe() {
    let (mut session, mut rx) = session();
    let _waiter = session.watch_public(Channel::Ticker, "BTC-PERP").unwrap();
    let status = json!({"type": "subscribed", "channel": "ticker", "market": "BTC-PERP"});
    session.handle_message(&status);
    assert!(session.is_subscribed("ticker:BTC-PERP"));

    let status = json!({"type": "unsubscribed", "channel": "ticker", "market": "BTC-PERP"});
    session.handle_message(&status);
    assert!(!session.is_subscribed("ticker:BTC-PERP"));

    let _waiter = session.watch_public(Channel::Ticker, "BTC-PERP").unwrap();
    assert_eq!(drain(&mut rx).len(), 2);
}

#[test]
fn test_restart_info_requests_reconnect() {
    let (mut session, _rx) = session();
    session.handle_message(&json!({"type": "info", "code": 20001, "msg": "Server restarting"}));
    assert!(session.take_reconnect_request());
    assert!(!session.take_reconnect_request());
}

#[test]
fn test_disconnect_rejects_everything() {
    let (mut session, mut rx) = session();
    let _handshake = session.authenticate().unwrap();
    let mut trades = task::spawn(session.watch_public(Channel::Trades, "BTC-PERP").unwrap());
    let mut fills = task::spawn(session.watch_private(Channel::Fills, None).unwrap());

    let error = MarketDataError::WebSocketConnection("Stream ended".to_string());
    session.on_disconnect(&error);
    assert_eq!(assert_ready!(trades.poll()), Err(error.clone()));
    assert_eq!(assert_ready!(fills.poll()), Err(error));
    assert!(!session.is_authenticating());

    drain(&mut rx);
    let _trades = session.watch_public(Channel::Trades, "BTC-PERP").unwrap();
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_new_updates_read_returns_only_fresh_trades() {
    let (mut session, _rx) = session();
    for id in 1..=3 {
        session.handle_message(&trade_frame("BTC-PERP", id));
    }
    assert_eq!(session.read_trades("BTC-PERP", None, None).len(), 3);

    session.handle_message(&trade_frame("BTC-PERP", 4));
    let fresh = session.read_trades("BTC-PERP", None, Some(10));
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].id.as_deref(), Some("4"));
}

#[test]
fn test_new_updates_first_read_returns_newest_within_requested_limit() {
    let (mut session, _rx) = session();
    for id in 1..=3 {
        session.handle_message(&trade_frame("BTC-PERP", id));
    }
    let first = session.read_trades("BTC-PERP", None, Some(2));
    let ids: Vec<_> = first.iter().map(|t| t.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("2"), Some("3")]);
}

#[test]
fn test_without_new_updates_read_returns_requested_tail() {
    let config = SessionConfig {
        new_updates: false,
        ..SessionConfig::default()
    };
    let (mut session, _rx) = session_with(config);
    for id in 1..=3 {
        session.handle_message(&trade_frame("BTC-PERP", id));
    }
    assert_eq!(session.read_trades("BTC-PERP", None, Some(2)).len(), 2);
    assert_eq!(session.read_trades("BTC-PERP", None, None).len(), 3);
}
