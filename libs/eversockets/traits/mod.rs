//! # EverSockets Traits
//!
//! Core traits and types for the EverSockets resilience layer.
//!
//! This module provides the fundamental abstractions used throughout
//! the crate:
//!
//! - **Dialer**: Establish the underlying transport
//! - **TransportReader / TransportWriter**: The two halves of a live
//!   transport behind the delegation façade
//! - **ConnectHandler / DisconnectHandler / PongHandler**: Lifecycle
//!   hooks fired by the reconnect loop and the read path
//! - **SocketError / Result**: The crate-wide error taxonomy

pub mod error;
pub mod hooks;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, SocketError};
pub use hooks::{ConnectHandler, DisconnectHandler, PongHandler};
pub use transport::{
    CloseReason, DialOutcome, Dialer, Frame, HandshakeResponse, Target, TransportReader,
    TransportWriter, WsMessage, NORMAL_CLOSURE_CODE,
};
