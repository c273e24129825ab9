//! Configuration module.

mod loader;
mod ports;
mod types;

pub use loader::*;
pub use ports::*;
pub use types::*;
