//! Connection registry module
//!
//! Tracks live client connections and the room each one belongs to.

#[allow(dead_code)]
mod rooms;

pub use rooms::*;
