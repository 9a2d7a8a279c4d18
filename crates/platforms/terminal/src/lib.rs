//! MetaTrader 5 terminal platform.
//!
//! Communicates with MT5 via a socket link to an MQL5 Expert Advisor running
//! inside the terminal. Frames are 4-byte big-endian length prefixes followed
//! by a JSON body.

pub mod client;
pub mod protocol;

pub use client::{TerminalConfig, TerminalPlatform};
