pub mod commands;
pub mod models;
pub mod traits;

pub use commands::*;
pub use models::*;
pub use traits::*;
