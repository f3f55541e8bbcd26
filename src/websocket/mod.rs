//! WebSocket transport for the FTX stream

mod client;
mod manager;

pub use client::WebSocketClient;
pub use manager::WebSocketManager;
