//! In-memory trading platform.
//!
//! Stands in for a live terminal in dry runs (`mtbridge serve --simulated`)
//! and in tests that need to observe which platform calls were made.

pub mod simulated;

pub use simulated::{CallCounts, SimulatedPlatform, SimulatedPlatformConfig};
