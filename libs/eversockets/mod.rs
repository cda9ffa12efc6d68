//! # EverSockets
//!
//! A websocket client that keeps itself connected.
//!
//! ## Features
//!
//! - **Automatic reconnection**: Exponential backoff with jitter, one
//!   dial loop no matter how many failures race
//! - **Keepalive watchdog**: Ping/pong probing detects half-open
//!   connections and forces a redial
//! - **Fail-fast I/O**: Calls while disconnected return an error
//!   immediately instead of blocking behind the reconnect
//! - **Thread-safe handle**: Clone it freely; every clone drives the
//!   same session
//! - **Pluggable seams**: Custom transports, post-connect auth hooks,
//!   disconnect and pong callbacks
//!
//! ## Example
//!
//! ```rust,ignore
//! use eversockets::{EverSocket, SocketConfig, WsMessage};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> eversockets::Result<()> {
//!     let config = SocketConfig::new()
//!         .keepalive_timeout(Duration::from_secs(30))
//!         .request_header("Authorization", "Bearer <token>");
//!
//!     let conn = EverSocket::dial("wss://api.example.com/feed", config).await?;
//!
//!     conn.write_message(WsMessage::Text("subscribe".into())).await?;
//!
//!     loop {
//!         match conn.read_message().await {
//!             Ok(Some(message)) => println!("{:?}", message),
//!             Ok(None) => break, // server closed gracefully
//!             Err(e) => {
//!                 // A reconnect is already in flight; retry shortly.
//!                 eprintln!("read failed: {}", e);
//!                 tokio::time::sleep(Duration::from_millis(250)).await;
//!             }
//!         }
//!     }
//!
//!     conn.shutdown(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export the client surface
pub use self::core::{
    backoff::Backoff, config::SocketConfig, conn::EverSocket, state::StateSnapshot,
    tungstenite::TungsteniteDialer,
};

/// Type alias for Result with SocketError
pub type Result<T> = std::result::Result<T, traits::SocketError>;
