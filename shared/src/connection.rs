//! One framed, non-blocking socket endpoint

use crate::error::TransportError;
use crate::protocol::{encode_frame, FrameDecoder, Inbound};
use crate::PeerId;
use log::debug;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// Unsent bytes tolerated for one peer after a flush; beyond this the
/// peer is treated as stalled and the connection is closed
pub const MAX_BACKLOG: usize = 8 * 1024 * 1024;

/// A connected stream with its receive state machine and send queue
///
/// Reads and writes never wait: whatever the socket cannot take or give
/// right now is left for the next poll pass.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: PeerId,
    decoder: FrameDecoder,
    outbound: Vec<u8>,
    written: usize,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: PeerId, decoder: FrameDecoder) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for peer {}: {}", peer, e);
        }

        Self {
            stream,
            peer,
            decoder,
            outbound: Vec::new(),
            written: 0,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub(crate) fn set_peer(&mut self, peer: PeerId) {
        self.peer = peer;
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.stream.local_addr()?)
    }

    /// Queues bytes that bypass framing (the handshake)
    pub(crate) fn queue_raw(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    /// Frames `payload` and queues it for the next flush
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload)?;
        self.outbound.extend_from_slice(&frame);
        Ok(())
    }

    pub(crate) fn queue_frame(&mut self, frame: &[u8]) {
        self.outbound.extend_from_slice(frame);
    }

    pub fn pending_output(&self) -> usize {
        self.outbound.len() - self.written
    }

    /// Writes as much of the send queue as the socket accepts. A queue still
    /// holding more than [`MAX_BACKLOG`] bytes afterwards is an error.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        while self.written < self.outbound.len() {
            match self.stream.try_write(&self.outbound[self.written..]) {
                Ok(0) => return Err(TransportError::PeerClosed),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if self.written > 0 {
            self.outbound.drain(..self.written);
            self.written = 0;
        }

        let pending = self.pending_output();
        if pending > MAX_BACKLOG {
            return Err(TransportError::SendBacklog(pending));
        }
        Ok(())
    }

    /// Reads everything currently available
    ///
    /// Returns the items decoded before any fault together with the fault,
    /// so packets that arrived just ahead of a close are still delivered.
    pub fn receive(&mut self) -> (Vec<Inbound>, Option<TransportError>) {
        let mut items = Vec::new();
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            match self.stream.try_read(&mut buffer) {
                Ok(0) => return (items, Some(TransportError::PeerClosed)),
                Ok(n) => match self.decoder.handle_read(&buffer[..n]) {
                    Ok(decoded) => items.extend(decoded),
                    Err(e) => return (items, Some(e)),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return (items, None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return (items, Some(e.into())),
            }
        }
    }
}
