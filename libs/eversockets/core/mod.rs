//! # EverSockets Core
//!
//! The connection lifecycle: dial loop with exponential backoff, the
//! state record, the keepalive watchdog and the tokio-tungstenite
//! transport binding.
//!
//! Everything here hangs off [`conn::EverSocket`]; the other modules
//! are its moving parts and are re-exported for configuration and
//! inspection.

pub mod backoff;
pub mod config;
pub mod conn;
pub mod keepalive;
pub mod liveness;
pub mod state;
pub mod tungstenite;

// Re-export main types
pub use backoff::Backoff;
pub use config::SocketConfig;
pub use conn::EverSocket;
pub use liveness::LivenessTracker;
pub use state::StateSnapshot;
pub use tungstenite::TungsteniteDialer;

// Re-export traits for convenience
pub use crate::traits::*;
