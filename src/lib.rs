//! Pure Rust async implementation of the [Source RCON protocol](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol).
pub mod config;
pub mod error;
pub mod packet;
pub mod sequencer;
pub mod session;

pub use config::{AuthHandshake, Config};
pub use error::RconError;
pub use packet::Encoding;
pub use session::Session;
