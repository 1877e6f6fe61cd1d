//! Wire format: handshake and length-prefixed framing
//!
//! ```text
//! handshake (server -> client, once):  [version: u16][peer id: u16]
//! frame (either direction, repeated):  [length: u16][payload: length bytes]
//! ```
//!
//! All integers are little-endian.

use crate::error::TransportError;
use crate::PeerId;

pub const PROTOCOL_VERSION: u16 = 2;
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const LENGTH_FIELD: usize = 2;
const HANDSHAKE_SIZE: usize = 4;

/// The two values sent to a freshly accepted client
pub fn encode_handshake(peer: PeerId) -> [u8; HANDSHAKE_SIZE] {
    let mut bytes = [0u8; HANDSHAKE_SIZE];
    bytes[..2].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    bytes[2..].copy_from_slice(&peer.to_le_bytes());
    bytes
}

/// Prepends the length field to `payload`
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.is_empty() {
        return Err(TransportError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(TransportError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(LENGTH_FIELD + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Something decoded from the inbound byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Handshake { version: u16, peer: PeerId },
    Packet(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingHandshake,
    AwaitingLength,
    AwaitingPayload,
}

/// Receive state machine turning arbitrary chunks into whole frames
#[derive(Debug)]
pub struct FrameDecoder {
    state: ReceiveState,
    header: Vec<u8>,
    expected: usize,
    payload: Vec<u8>,
}

impl FrameDecoder {
    /// Decoder for a server-side connection: frames from the first byte
    pub fn new() -> Self {
        Self::starting_in(ReceiveState::AwaitingLength)
    }

    /// Decoder for a client-side connection: expects the handshake first
    pub fn expecting_handshake() -> Self {
        Self::starting_in(ReceiveState::AwaitingHandshake)
    }

    fn starting_in(state: ReceiveState) -> Self {
        Self {
            state,
            header: Vec::with_capacity(HANDSHAKE_SIZE),
            expected: 0,
            payload: Vec::new(),
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Declared length of the frame being received, zero between frames
    pub fn expected_len(&self) -> usize {
        self.expected
    }

    /// Bytes held in the header and payload accumulators
    pub fn buffered(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Feeds one chunk read from the socket
    ///
    /// Chunks may split a length field or payload anywhere, and one chunk may
    /// carry several frames; every completed item is returned in order.
    pub fn handle_read(&mut self, mut chunk: &[u8]) -> Result<Vec<Inbound>, TransportError> {
        let mut decoded = Vec::new();

        while !chunk.is_empty() {
            match self.state {
                ReceiveState::AwaitingHandshake => {
                    let taken = take_into(&mut self.header, HANDSHAKE_SIZE, chunk);
                    chunk = &chunk[taken..];

                    if self.header.len() == HANDSHAKE_SIZE {
                        let version = u16::from_le_bytes([self.header[0], self.header[1]]);
                        let peer = u16::from_le_bytes([self.header[2], self.header[3]]);
                        self.header.clear();

                        if version != PROTOCOL_VERSION {
                            return Err(TransportError::ProtocolViolation(format!(
                                "handshake announces protocol {} but {} is required",
                                version, PROTOCOL_VERSION
                            )));
                        }
                        decoded.push(Inbound::Handshake { version, peer });
                        self.state = ReceiveState::AwaitingLength;
                    }
                }
                ReceiveState::AwaitingLength => {
                    let taken = take_into(&mut self.header, LENGTH_FIELD, chunk);
                    chunk = &chunk[taken..];

                    if self.header.len() == LENGTH_FIELD {
                        let length = u16::from_le_bytes([self.header[0], self.header[1]]) as usize;
                        self.header.clear();

                        if length == 0 {
                            return Err(TransportError::ProtocolViolation(
                                "frame declares an empty payload".to_string(),
                            ));
                        }
                        self.expected = length;
                        self.payload = Vec::with_capacity(length);
                        self.state = ReceiveState::AwaitingPayload;
                    }
                }
                ReceiveState::AwaitingPayload => {
                    let taken = take_into(&mut self.payload, self.expected, chunk);
                    chunk = &chunk[taken..];

                    if self.payload.len() == self.expected {
                        decoded.push(Inbound::Packet(std::mem::take(&mut self.payload)));
                        self.expected = 0;
                        self.state = ReceiveState::AwaitingLength;
                    }
                }
            }
        }

        Ok(decoded)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves up to `target - buffer.len()` bytes from `chunk` into `buffer`
fn take_into(buffer: &mut Vec<u8>, target: usize, chunk: &[u8]) -> usize {
    let wanted = target.saturating_sub(buffer.len()).min(chunk.len());
    buffer.extend_from_slice(&chunk[..wanted]);
    wanted
}
