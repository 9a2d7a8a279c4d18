//! Request/response bridge in front of a trading platform.
//!
//! A single ZeroMQ REP socket receives JSON commands, each command is
//! translated into one platform call, and the mapped result is sent back.
//! Requests are handled one at a time.

pub mod client;
pub mod error;
pub mod handlers;
pub mod server;

pub use client::BridgeClient;
pub use error::BridgeError;
pub use handlers::dispatch;
pub use server::{handle_request, BridgeConfig, BridgeServer, BridgeState};
