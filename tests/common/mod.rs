use std::{net::SocketAddr, time::Duration};

use rcon_session::{
    packet::{Encoding, Packet, PacketType},
    Config,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
    time,
};

/// One step of the fake server's answer to an incoming packet.
pub enum Reply {
    /// Written with a single `write_all`.
    Send(Vec<u8>),
    Sleep(Duration),
    /// Drop the connection.
    Hangup,
}

pub fn frame(id: i32, packet_type: PacketType, body: &str) -> Vec<u8> {
    Packet::new(id, packet_type, body).pack(Encoding::Ascii)
}

pub fn auth_ok(request: &Packet) -> Vec<Reply> {
    vec![Reply::Send(frame(request.id(), PacketType::AuthResponse, ""))]
}

/// Scripted rcon server accepting a single connection. Every read is treated
/// as one packet and handed to the script; the packets seen are returned once
/// the client hangs up.
pub struct FakeServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Packet>>,
}

impl FakeServer {
    pub async fn start<F>(mut script: F) -> Self
    where
        F: FnMut(&Packet) -> Vec<Reply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];

            'conn: loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let packet = Packet::unpack(&buf[..n], Encoding::Ascii).unwrap();
                let replies = script(&packet);
                received.push(packet);

                for reply in replies {
                    match reply {
                        Reply::Send(bytes) => {
                            if stream.write_all(&bytes).await.is_err() {
                                break 'conn;
                            }
                        }
                        Reply::Sleep(duration) => time::sleep(duration).await,
                        Reply::Hangup => break 'conn,
                    }
                }
            }

            received
        });

        FakeServer { addr, handle }
    }

    pub fn config(&self) -> Config {
        Config::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Packets the server received, available once the client disconnects.
    pub async fn received(self) -> Vec<Packet> {
        time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("fake server did not see the client hang up")
            .unwrap()
    }
}
