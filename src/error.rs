use std::time::Duration;

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if we received a packet that does not have a type known to us.
    #[error("unknown rcon packet type: {0}")]
    UnknownPacketType(i32),
    /// Returned if the frame is too short to hold a size, id, type and the
    /// two terminators.
    #[error("packet header malformed (frame is only {0} bytes long)")]
    MalformedPacketHeader(usize),
    /// Returned if the body is mangled in some way.
    #[error("packet body malformed (not valid utf-8)")]
    MalformedPacketBody(#[from] std::str::Utf8Error),
    /// Returned when parsing an encoding name other than `ascii` or `utf8`.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    /// Returned if the encoded packet is larger than the configured ceiling.
    /// Nothing is written to the socket in that case.
    #[error("packet too long ({size} bytes, maximum is {max})")]
    PacketTooLarge { size: usize, max: usize },
    /// Returned if the host is down or behind a firewall.
    #[error("host cannot be reached")]
    UnreachableHost(#[source] std::io::Error),
    /// The connection failed while a request was outstanding. The session is
    /// closed afterwards.
    #[error("transport error")]
    TransportError(#[source] std::io::Error),
    /// The socket reported an error instead of closing cleanly.
    #[error("cannot close connection")]
    DisconnectError(#[source] std::io::Error),
    /// Returned if the session is closed or the socket is gone.
    #[error("connection is not writable")]
    NotWritable,
    /// Returned by `authenticate` on a session that is already authenticated.
    #[error("already authenticated")]
    AlreadyAuthenticated,
    /// Returned by `execute` before a successful `authenticate`.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Returned if you can't remember the password, or the server answered the
    /// handshake with something other than an auth response.
    #[error("authentication failed")]
    AuthenticationError,
    /// Returned if the server did not respond in time.
    #[error("timeout")]
    TimeoutError(#[from] Elapsed),
    /// A queued request ran longer than the sequencer allows.
    #[error("request did not complete within {0:?}")]
    RequestTimeout(Duration),
    /// The request queue stopped accepting work.
    #[error("request queue is closed")]
    QueueClosed,
}
