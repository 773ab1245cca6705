use std::{
    io,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use log::{debug, trace, warn};
use rand::Rng;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{watch, Mutex as AsyncMutex},
    time,
};

use crate::{
    config::{AuthHandshake, Config},
    error::RconError,
    packet::{Packet, PacketType},
    sequencer::Sequencer,
};

// srcds caps response bodies at 4096 bytes; leave room for a coalesced frame.
const READ_BUFFER_SIZE: usize = 8192;

// Response value frames tolerated ahead of the auth response.
const MAX_SKIPPED_AUTH_FRAMES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Authenticated,
    Closed,
}

/// Asynchronous rcon session over a single TCP connection. Call `connect()` to
/// open the connection, then `authenticate()` before running commands.
///
/// Commands may be issued concurrently from several tasks sharing the session;
/// they go out one at a time, in the order they were issued, and each caller
/// gets the response to its own command. `authenticate` talks to the socket
/// directly and must not overlap with any other call.
///
/// A closed session stays closed. Build a new one to reconnect.
///
/// ## Example
/// ```no_run
/// use rcon_session::{config::Config, session::Session};
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let session = Session::connect(Config::new("dev.viora.sh", 27016)).await?;
///     session.authenticate("<put rcon password here>").await?;
///
///     let response = session.execute("echo hi").await?;
///     assert_eq!(response, "hi");
///
///     session.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct Session {
    connection: Arc<Connection>,
    sequencer: Sequencer,
}

struct Connection {
    config: Config,
    state: Mutex<State>,
    stream: AsyncMutex<Option<TcpStream>>,
    closing: watch::Sender<bool>,
    last_id: AtomicI32,
}

impl Session {
    pub async fn connect(config: Config) -> Result<Self, RconError> {
        let address = config.address();
        let stream = time::timeout(config.timeout, TcpStream::connect(&address))
            .await?
            .map_err(RconError::UnreachableHost)?;

        trace!("opened tcp stream to {}", address);

        let (closing, _) = watch::channel(false);
        Ok(Session {
            connection: Arc::new(Connection {
                config,
                state: Mutex::new(State::Created),
                stream: AsyncMutex::new(Some(stream)),
                closing,
                last_id: AtomicI32::new(0),
            }),
            sequencer: Sequencer::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.connection.config
    }

    pub fn state(&self) -> State {
        self.connection.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == State::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Logs in with the rcon password. Once the auth packet has gone out, any
    /// failure (rejection, unexpected reply, timeout) closes the session.
    pub async fn authenticate(&self, password: &str) -> Result<(), RconError> {
        match self.connection.state() {
            State::Authenticated => return Err(RconError::AlreadyAuthenticated),
            State::Closed => return Err(RconError::NotWritable),
            State::Created => {}
        }

        let auth_packet = Packet::new(
            self.connection.next_request_id(),
            PacketType::Auth,
            password,
        );
        self.connection.encode(&auth_packet)?;

        trace!("sending auth packet to server");
        let outcome = match self.connection.write(&auth_packet).await {
            Ok(delivery) => self.read_handshake(delivery).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) if response.id() != -1 => {
                self.connection.set_state(State::Authenticated);
                trace!("auth complete");
                Ok(())
            }
            Ok(_) => {
                warn!("server rejected the rcon password");
                self.abandon().await;
                Err(RconError::AuthenticationError)
            }
            Err(e) => {
                warn!("rcon handshake failed: {}", e);
                self.abandon().await;
                Err(e)
            }
        }
    }

    /// Runs a command and returns its output with one trailing newline removed.
    ///
    /// The whole response is expected in a single frame; output that the server
    /// splits over several packets is not stitched together. Frames carrying
    /// another request's id (a late reply to a request that timed out) are
    /// dropped while waiting.
    pub async fn execute(&self, command: &str) -> Result<String, RconError> {
        let command_packet = Packet::new(
            self.connection.next_request_id(),
            PacketType::Exec,
            command,
        );

        self.connection.encode(&command_packet)?;
        if !self.is_authenticated() {
            return Err(RconError::NotAuthenticated);
        }
        if !self.connection.is_writable() {
            return Err(RconError::NotWritable);
        }

        let connection = Arc::clone(&self.connection);
        self.sequencer
            .enqueue(async move {
                trace!("sending command packet {} to server", command_packet.id());
                let mut delivery = connection.write(&command_packet).await?;
                loop {
                    if let Some(response) =
                        connection.find_reply(&delivery, command_packet.id())?
                    {
                        return Ok::<_, RconError>(response.into_body());
                    }
                    delivery = connection.receive().await?;
                }
            })
            .await
    }

    /// Closes the connection. Requests still waiting on the server fail with a
    /// [RconError::TransportError].
    pub async fn disconnect(&self) -> Result<(), RconError> {
        self.connection.close().await
    }

    async fn read_handshake(&self, delivery: Vec<u8>) -> Result<Packet, RconError> {
        let encoding = self.connection.config.encoding;

        match self.connection.config.auth_handshake {
            AuthHandshake::FirstFrame => {
                let response = Packet::unpack(&delivery, encoding)?;
                if response.packet_type() != PacketType::AuthResponse {
                    debug!(
                        "expected an auth response, got {:?}",
                        response.packet_type()
                    );
                    return Err(RconError::AuthenticationError);
                }
                Ok(response)
            }
            AuthHandshake::AwaitAuthResponse => {
                let mut delivery = delivery;
                let mut skipped = 0;
                loop {
                    for frame in Packet::split_frames(&delivery) {
                        let packet = Packet::unpack(frame, encoding)?;
                        if packet.packet_type() == PacketType::AuthResponse {
                            return Ok(packet);
                        }
                        skipped += 1;
                        if skipped > MAX_SKIPPED_AUTH_FRAMES {
                            debug!("no auth response after {} frames", skipped);
                            return Err(RconError::AuthenticationError);
                        }
                        trace!("skipping {:?} frame during auth", packet.packet_type());
                    }
                    delivery = self.connection.receive().await?;
                }
            }
        }
    }

    async fn abandon(&self) {
        if let Err(e) = self.connection.close().await {
            debug!("error while closing rejected session: {}", e);
        }
    }
}

impl Connection {
    fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: State) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    // Random in [1, 255], never the same as the previous request, so a late
    // reply to that request cannot pass for this one.
    fn next_request_id(&self) -> i32 {
        let previous = self.last_id.load(Ordering::Relaxed);
        let mut rng = rand::thread_rng();
        let id = loop {
            let id = rng.gen_range(1..=255);
            if id != previous {
                break id;
            }
        };
        self.last_id.store(id, Ordering::Relaxed);
        id
    }

    /// Picks the frame answering request `id` out of a delivery.
    fn find_reply(&self, delivery: &[u8], id: i32) -> Result<Option<Packet>, RconError> {
        for frame in Packet::split_frames(delivery) {
            let packet = Packet::unpack(frame, self.config.encoding)?;
            if packet.id() == id {
                return Ok(Some(packet));
            }
            warn!(
                "dropping stale response {} while waiting for request {}",
                packet.id(),
                id
            );
        }
        Ok(None)
    }

    fn is_writable(&self) -> bool {
        self.state() != State::Closed && !*self.closing.borrow()
    }

    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, RconError> {
        let encoded = packet.pack(self.config.encoding);
        let max = self.config.maximum_packet_size;

        if max > 0 && encoded.len() > max {
            return Err(RconError::PacketTooLarge {
                size: encoded.len(),
                max,
            });
        }
        Ok(encoded)
    }

    /// Sends one packet and waits for exactly one delivery in reply.
    async fn write(&self, packet: &Packet) -> Result<Vec<u8>, RconError> {
        let encoded = self.encode(packet)?;

        let mut closing = self.closing.subscribe();
        let mut guard = self.stream.lock().await;
        if *closing.borrow_and_update() {
            return Err(RconError::NotWritable);
        }
        let stream = guard.as_mut().ok_or(RconError::NotWritable)?;

        discard_unsolicited(stream);

        let mut partial = PartialWrite {
            connection: self,
            armed: true,
        };
        let written = stream.write_all(&encoded).await;
        partial.armed = false;
        if let Err(e) = written {
            return Err(self.fail(&mut guard, e));
        }

        self.receive_locked(&mut guard, &mut closing).await
    }

    /// Waits for one more delivery without sending anything.
    async fn receive(&self) -> Result<Vec<u8>, RconError> {
        let mut closing = self.closing.subscribe();
        let mut guard = self.stream.lock().await;
        if *closing.borrow_and_update() {
            return Err(RconError::NotWritable);
        }

        self.receive_locked(&mut guard, &mut closing).await
    }

    async fn receive_locked(
        &self,
        slot: &mut Option<TcpStream>,
        closing: &mut watch::Receiver<bool>,
    ) -> Result<Vec<u8>, RconError> {
        let stream = slot.as_mut().ok_or(RconError::NotWritable)?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let read = tokio::select! {
            read = time::timeout(self.config.timeout, stream.read(&mut buf)) => read?,
            _ = closing.changed() => {
                return Err(RconError::TransportError(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "session disconnected",
                )));
            }
        };

        match read {
            Ok(0) => Err(self.fail(
                slot,
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by server"),
            )),
            Ok(n) => {
                trace!("received {} bytes", n);
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(self.fail(slot, e)),
        }
    }

    fn fail(&self, slot: &mut Option<TcpStream>, error: io::Error) -> RconError {
        warn!("connection to {} failed: {}", self.config.address(), error);
        slot.take();
        self.set_state(State::Closed);
        RconError::TransportError(error)
    }

    async fn close(&self) -> Result<(), RconError> {
        self.set_state(State::Closed);
        self.closing.send_replace(true);

        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            stream
                .shutdown()
                .await
                .map_err(RconError::DisconnectError)?;
            debug!("closed connection to {}", self.config.address());
        }
        Ok(())
    }
}

// Nothing is listening between requests, so whatever arrived in the meantime
// (a reply to an aborted request, the tail of a split response) is dropped
// rather than handed to the next caller.
fn discard_unsolicited(stream: &TcpStream) {
    let mut scratch = [0u8; 1024];
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => debug!("discarding {} unsolicited bytes", n),
            // WouldBlock means the socket is drained; real errors show up on the next read
            Err(_) => break,
        }
    }
}

/// Closes the session if dropped while armed, which happens when the request
/// sending a frame is aborted before the frame is fully written. The peer would
/// read whatever follows as the rest of that frame.
struct PartialWrite<'a> {
    connection: &'a Connection,
    armed: bool,
}

impl Drop for PartialWrite<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("request aborted in the middle of a write, closing the session");
            self.connection.set_state(State::Closed);
            self.connection.closing.send_replace(true);
        }
    }
}
