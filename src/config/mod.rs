//! Configuration module
//!
//! Loads relay settings from an optional TOML file.

mod relay;

pub use relay::*;
