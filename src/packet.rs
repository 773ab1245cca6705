use std::{fmt, str::FromStr};

use crate::error::RconError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // SERVERDATA_AUTH
    Auth,
    // SERVERDATA_EXECCOMMAND
    Exec,
    // SERVERDATA_AUTH_RESPONSE
    AuthResponse,
    // SERVERDATA_RESPONSE_VALUE
    Response,
}

impl PacketType {
    pub fn value(&self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::Exec => 2,
            PacketType::AuthResponse => 2,
            PacketType::Response => 0,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.value().to_le_bytes()
    }
}

// Exec and AuthResponse share the value 2. Everything we decode comes from the
// server, so 2 always means an auth response.
impl TryFrom<i32> for PacketType {
    type Error = RconError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(PacketType::Auth),
            2 => Ok(PacketType::AuthResponse),
            0 => Ok(PacketType::Response),
            other => Err(RconError::UnknownPacketType(other)),
        }
    }
}

/// Text codec applied to packet bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// 7-bit ASCII. Characters outside the range are sent as `?`, and the high
    /// bit of incoming bytes is dropped.
    #[default]
    Ascii,
    Utf8,
}

impl Encoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Encoding::Utf8 => text.as_bytes().to_vec(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, RconError> {
        match self {
            Encoding::Ascii => Ok(bytes.iter().map(|b| (b & 0x7f) as char).collect()),
            Encoding::Utf8 => Ok(std::str::from_utf8(bytes)?.to_owned()),
        }
    }
}

impl FromStr for Encoding {
    type Err = RconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(Encoding::Ascii),
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            _ => Err(RconError::UnknownEncoding(s.to_owned())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Ascii => f.write_str("ascii"),
            Encoding::Utf8 => f.write_str("utf8"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    packet_type: PacketType,
    body: String,
}

impl Packet {
    /// Id + type + the two terminators.
    pub const BASE_PACKET_SIZE: i32 = 10;
    /// Size + id + type.
    pub const HEADER_SIZE: usize = 12;
    /// Header plus the two terminators of an empty body.
    pub const MIN_FRAME_SIZE: usize = Self::HEADER_SIZE + 2;

    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// Parses a single frame. The declared size is not checked against the
    /// buffer: whatever sits between the header and the last two bytes is the
    /// body. One trailing newline is stripped from the body.
    pub fn unpack(incoming: &[u8], encoding: Encoding) -> Result<Self, RconError> {
        if incoming.len() < Self::MIN_FRAME_SIZE {
            return Err(RconError::MalformedPacketHeader(incoming.len()));
        }

        let id = read_i32(incoming, 4);
        let packet_type = PacketType::try_from(read_i32(incoming, 8))?;
        let mut body = encoding.decode(&incoming[Self::HEADER_SIZE..incoming.len() - 2])?;
        if body.ends_with('\n') {
            body.pop();
        }

        Ok(Packet {
            id,
            packet_type,
            body,
        })
    }

    /// Splits a delivery holding several coalesced frames using each frame's
    /// declared size. A frame whose size is implausible, or that runs past the
    /// end of the buffer, swallows the rest of the delivery.
    pub fn split_frames(incoming: &[u8]) -> Vec<&[u8]> {
        let mut frames = Vec::new();
        let mut rest = incoming;

        while rest.len() >= Self::MIN_FRAME_SIZE {
            let declared = usize::try_from(read_i32(rest, 0)).ok();
            match declared.map(|size| size + 4) {
                Some(total) if total >= Self::MIN_FRAME_SIZE && total <= rest.len() => {
                    let (frame, tail) = rest.split_at(total);
                    frames.push(frame);
                    rest = tail;
                }
                _ => {
                    frames.push(rest);
                    rest = &[];
                }
            }
        }

        if !rest.is_empty() {
            frames.push(rest);
        }
        frames
    }

    // Since the only one of these values that can change in length is the body,
    // an easy way to calculate the size of a packet is to find the byte-length
    // of the packet body, then add 10 to it.
    pub fn size(&self, encoding: Encoding) -> i32 {
        encoding.encode(&self.body).len() as i32 + Self::BASE_PACKET_SIZE
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &str {
        self.body.as_ref()
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn pack(&self, encoding: Encoding) -> Vec<u8> {
        let body = encoding.encode(&self.body);
        let size = body.len() as i32 + Self::BASE_PACKET_SIZE;

        // Size, ID, Type, Body, Terminator
        let mut payload = Vec::<u8>::with_capacity(size as usize + 4);
        payload.extend_from_slice(&size.to_le_bytes());
        payload.extend_from_slice(&self.id.to_le_bytes());
        payload.extend_from_slice(&self.packet_type.to_le_bytes());
        payload.extend_from_slice(&body);
        // null terminate the body (C++ interop 🤢), then the empty second string
        payload.extend_from_slice(&[0u8, 0u8]);
        payload
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
