use std::time::Duration;

use crate::packet::Encoding;

/// How `authenticate` reads the server's answer to an auth packet.
///
/// srcds answers with an empty `SERVERDATA_RESPONSE_VALUE` followed by the
/// `SERVERDATA_AUTH_RESPONSE`. Other servers only send the latter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthHandshake {
    /// Judge the handshake by the first frame of the first delivery. A server
    /// that leads with a response value frame is reported as a failed login.
    #[default]
    FirstFrame,
    /// Skip response value frames, reading more deliveries if needed, until an
    /// auth response shows up.
    AwaitAuthResponse,
}

/// Construction-time settings for a [crate::session::Session].
///
/// ```
/// use rcon_session::{config::Config, packet::Encoding};
///
/// let config = Config {
///     host: "10.0.0.5".into(),
///     encoding: Encoding::Utf8,
///     ..Config::default()
/// };
/// assert_eq!(config.port, 27015);
/// assert_eq!(config.address(), "10.0.0.5:27015");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Ceiling for outbound encoded packets in bytes, `0` for no limit.
    pub maximum_packet_size: usize,
    pub encoding: Encoding,
    /// Idle timeout for connecting and for every read.
    pub timeout: Duration,
    pub auth_handshake: AuthHandshake,
}

impl Config {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 27015;
    pub const DEFAULT_MAXIMUM_PACKET_SIZE: usize = 4096;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Config {
            host: host.into(),
            port,
            ..Config::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: Self::DEFAULT_HOST.to_owned(),
            port: Self::DEFAULT_PORT,
            maximum_packet_size: Self::DEFAULT_MAXIMUM_PACKET_SIZE,
            encoding: Encoding::Ascii,
            timeout: Self::DEFAULT_TIMEOUT,
            auth_handshake: AuthHandshake::FirstFrame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.address(), "127.0.0.1:27015");
        assert_eq!(config.maximum_packet_size, 4096);
        assert_eq!(config.encoding, Encoding::Ascii);
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert_eq!(config.auth_handshake, AuthHandshake::FirstFrame);
    }

    #[test]
    fn new_keeps_other_defaults() {
        let config = Config::new("game.example.net", 27016);
        assert_eq!(config.address(), "game.example.net:27016");
        assert_eq!(config.maximum_packet_size, 4096);
    }
}
