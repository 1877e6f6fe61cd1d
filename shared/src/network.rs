//! Single-threaded event loop over every live session in the process
//!
//! A [`Network`] is the explicit set of live session registries: listening
//! servers and outbound clients. Nothing runs in the background. The host
//! calls [`Network::communicate`] once per tick; each pass accepts ready
//! sockets, reads ready bytes and flushes send queues without blocking, and
//! returns what happened as [`NetworkEvent`]s.
//!
//! The current-thread tokio runtime is used purely as a reactor: no task is
//! ever spawned, and the runtime only advances while a pass is running.

use crate::connection::Connection;
use crate::error::TransportError;
use crate::protocol::{encode_frame, encode_handshake, FrameDecoder, Inbound};
use crate::{PeerId, DEFAULT_PORT, SERVER_PEER_ID};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::future::poll_fn;
use std::net::{Ipv4Addr, SocketAddr};
use std::task::Poll;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};

/// Handle to one server or client role inside a [`Network`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u32);

impl SessionId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Port 0 picks an ephemeral port
    pub port: u16,
    /// Bind the loopback interface only
    pub local_only: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            local_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by this process
    Local,
    /// Orderly close by the remote end
    PeerClosed,
    /// Socket error or protocol violation
    Fault(String),
}

impl From<TransportError> for CloseReason {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::PeerClosed => CloseReason::PeerClosed,
            other => CloseReason::Fault(other.to_string()),
        }
    }
}

/// Outcome of a poll pass, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A server accepted a connection and queued its handshake
    ConnectionOpened { session: SessionId, peer: PeerId },
    /// A client completed its handshake and adopted `peer` as its id
    Connected { session: SessionId, peer: PeerId },
    /// A whole frame arrived. Client sessions report `SERVER_PEER_ID`.
    PacketReceived {
        session: SessionId,
        peer: PeerId,
        payload: Vec<u8>,
    },
    /// A connection is gone; reported exactly once per connection
    ConnectionClosed {
        session: SessionId,
        peer: PeerId,
        reason: CloseReason,
    },
}

struct ServerRole {
    listener: TcpListener,
    connections: BTreeMap<PeerId, Connection>,
    last_peer: PeerId,
}

impl ServerRole {
    async fn accept_ready(&mut self, session: SessionId, events: &mut Vec<NetworkEvent>) {
        loop {
            let ready = poll_fn(|cx| match self.listener.poll_accept(cx) {
                Poll::Ready(result) => Poll::Ready(Some(result)),
                Poll::Pending => Poll::Ready(None),
            })
            .await;

            match ready {
                None => break,
                Some(Ok((stream, addr))) => self.open(session, stream, addr, events),
                Some(Err(e)) => {
                    warn!("Accept failed on {}: {}", session, e);
                    break;
                }
            }
        }
    }

    fn open(
        &mut self,
        session: SessionId,
        stream: TcpStream,
        addr: SocketAddr,
        events: &mut Vec<NetworkEvent>,
    ) {
        let Some(peer) = self.last_peer.checked_add(1) else {
            warn!("Refusing {}: {}", addr, TransportError::PeerIdsExhausted);
            return;
        };
        self.last_peer = peer;

        let mut connection = Connection::new(stream, peer, FrameDecoder::new());
        connection.queue_raw(&encode_handshake(peer));
        self.connections.insert(peer, connection);

        info!("Peer {} connected from {} on {}", peer, addr, session);
        events.push(NetworkEvent::ConnectionOpened { session, peer });
    }

    fn pump(&mut self, session: SessionId, events: &mut Vec<NetworkEvent>) {
        let mut faulted = Vec::new();

        for (peer, connection) in self.connections.iter_mut() {
            let (items, fault) = connection.receive();
            for item in items {
                match item {
                    Inbound::Packet(payload) => {
                        debug!("{} bytes from peer {} on {}", payload.len(), peer, session);
                        events.push(NetworkEvent::PacketReceived {
                            session,
                            peer: *peer,
                            payload,
                        });
                    }
                    Inbound::Handshake { .. } => {
                        warn!("Unexpected handshake from peer {} on {}", peer, session);
                    }
                }
            }

            if let Some(error) = fault.or_else(|| connection.flush().err()) {
                faulted.push((*peer, error));
            }
        }

        for (peer, error) in faulted {
            self.connections.remove(&peer);
            warn!("Peer {} on {} closed: {}", peer, session, error);
            events.push(NetworkEvent::ConnectionClosed {
                session,
                peer,
                reason: error.into(),
            });
        }
    }
}

struct ClientRole {
    connection: Option<Connection>,
    assigned: Option<PeerId>,
}

impl ClientRole {
    fn pump(&mut self, session: SessionId, events: &mut Vec<NetworkEvent>) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let (items, fault) = connection.receive();
        for item in items {
            match item {
                Inbound::Handshake { peer, .. } => {
                    info!("Handshake complete on {}, assigned peer id {}", session, peer);
                    connection.set_peer(peer);
                    self.assigned = Some(peer);
                    events.push(NetworkEvent::Connected { session, peer });
                }
                Inbound::Packet(payload) => {
                    debug!("{} bytes from server on {}", payload.len(), session);
                    events.push(NetworkEvent::PacketReceived {
                        session,
                        peer: SERVER_PEER_ID,
                        payload,
                    });
                }
            }
        }

        if let Some(error) = fault.or_else(|| connection.flush().err()) {
            warn!("Connection on {} closed: {}", session, error);
            self.connection = None;
            events.push(NetworkEvent::ConnectionClosed {
                session,
                peer: SERVER_PEER_ID,
                reason: error.into(),
            });
        }
    }
}

enum Session {
    Server(ServerRole),
    Client(ClientRole),
}

impl Session {
    fn is_alive(&self) -> bool {
        match self {
            Session::Server(_) => true,
            Session::Client(client) => client.connection.is_some(),
        }
    }
}

pub struct Network {
    sessions: BTreeMap<SessionId, Session>,
    /// Events raised outside a pass (local closes), reported by the next one
    pending: Vec<NetworkEvent>,
    last_session: u32,
    runtime: Runtime,
}

impl Network {
    pub fn new() -> Result<Self, TransportError> {
        let runtime = Builder::new_current_thread().enable_io().build()?;

        Ok(Self {
            sessions: BTreeMap::new(),
            pending: Vec::new(),
            last_session: 0,
            runtime,
        })
    }

    fn next_session(&mut self) -> SessionId {
        self.last_session += 1;
        SessionId(self.last_session)
    }

    /// Starts a server session
    pub fn listen(&mut self, config: &ListenConfig) -> Result<SessionId, TransportError> {
        let host = if config.local_only {
            Ipv4Addr::LOCALHOST
        } else {
            Ipv4Addr::UNSPECIFIED
        };
        let addr = SocketAddr::from((host, config.port));

        let listener = self
            .runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let session = self.next_session();
        info!("Listening on {} ({})", listener.local_addr()?, session);
        self.sessions.insert(
            session,
            Session::Server(ServerRole {
                listener,
                connections: BTreeMap::new(),
                last_peer: 0,
            }),
        );
        Ok(session)
    }

    /// Starts a client session with one outbound connection
    ///
    /// Waits for the TCP connect itself so that a refused or unreachable
    /// address is reported here; the handshake completes during later passes.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<SessionId, TransportError> {
        let addr = format!("{}:{}", host, port);
        let stream = self
            .runtime
            .block_on(TcpStream::connect(addr.as_str()))
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let session = self.next_session();
        info!("Connected to {} ({})", addr, session);
        self.sessions.insert(
            session,
            Session::Client(ClientRole {
                connection: Some(Connection::new(
                    stream,
                    SERVER_PEER_ID,
                    FrameDecoder::expecting_handshake(),
                )),
                assigned: None,
            }),
        );
        Ok(session)
    }

    /// Runs `cycles` poll passes (at least one) over every live session
    pub fn communicate(&mut self, cycles: usize) -> Vec<NetworkEvent> {
        let mut events = std::mem::take(&mut self.pending);
        let Network {
            sessions, runtime, ..
        } = self;

        runtime.block_on(async {
            for _ in 0..cycles.max(1) {
                // lets the reactor collect readiness without parking
                tokio::task::yield_now().await;

                for (id, session) in sessions.iter_mut() {
                    match session {
                        Session::Server(server) => {
                            server.accept_ready(*id, &mut events).await;
                            server.pump(*id, &mut events);
                        }
                        Session::Client(client) => client.pump(*id, &mut events),
                    }
                }
            }
        });

        self.sessions.retain(|_, session| session.is_alive());
        events
    }

    /// Queues one framed payload for `peer`
    ///
    /// On a client session the only valid peer is `SERVER_PEER_ID`.
    pub fn send(
        &mut self,
        session: SessionId,
        peer: PeerId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.connection_mut(session, peer)?.send(payload)
    }

    /// Queues `payload` for every connection of `session` not in `ignore`.
    /// Returns how many connections it was queued for.
    pub fn broadcast(
        &mut self,
        session: SessionId,
        payload: &[u8],
        ignore: &[PeerId],
    ) -> Result<usize, TransportError> {
        let frame = encode_frame(payload)?;
        let mut queued = 0;

        match self.session_mut(session)? {
            Session::Server(server) => {
                for (peer, connection) in server.connections.iter_mut() {
                    if !ignore.contains(peer) {
                        connection.queue_frame(&frame);
                        queued += 1;
                    }
                }
            }
            Session::Client(client) => {
                if let Some(connection) = client.connection.as_mut() {
                    if !ignore.contains(&SERVER_PEER_ID) {
                        connection.queue_frame(&frame);
                        queued += 1;
                    }
                }
            }
        }
        Ok(queued)
    }

    /// Closes one connection, discarding anything still queued. Returns
    /// false when it was already closed.
    pub fn close_peer(&mut self, session: SessionId, peer: PeerId) -> bool {
        let closed = match self.sessions.get_mut(&session) {
            Some(Session::Server(server)) => server.connections.remove(&peer).is_some(),
            Some(Session::Client(client)) if peer == SERVER_PEER_ID => {
                client.connection.take().is_some()
            }
            _ => false,
        };

        if closed {
            info!("Closed peer {} on {}", peer, session);
            self.pending.push(NetworkEvent::ConnectionClosed {
                session,
                peer,
                reason: CloseReason::Local,
            });
        }
        closed
    }

    /// Closes every connection of `session` and forgets the session
    pub fn close_session(&mut self, session: SessionId) -> bool {
        let Some(removed) = self.sessions.remove(&session) else {
            return false;
        };

        let peers: Vec<PeerId> = match removed {
            Session::Server(server) => server.connections.into_keys().collect(),
            Session::Client(client) => client
                .connection
                .map(|_| SERVER_PEER_ID)
                .into_iter()
                .collect(),
        };

        for peer in peers {
            self.pending.push(NetworkEvent::ConnectionClosed {
                session,
                peer,
                reason: CloseReason::Local,
            });
        }
        info!("Closed {}", session);
        true
    }

    /// Closes every socket of every session. Idempotent; no close events
    /// are reported for connections discarded here.
    pub fn shutdown(&mut self) {
        if !self.sessions.is_empty() {
            info!("Shutting down {} sessions", self.sessions.len());
        }
        self.sessions.clear();
        self.pending.clear();
    }

    pub fn is_open(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Connected peers of a server session
    pub fn peers(&self, session: SessionId) -> Vec<PeerId> {
        match self.sessions.get(&session) {
            Some(Session::Server(server)) => server.connections.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Peer id a client session adopted from its handshake
    pub fn assigned_id(&self, session: SessionId) -> Option<PeerId> {
        match self.sessions.get(&session) {
            Some(Session::Client(client)) => client.assigned,
            _ => None,
        }
    }

    pub fn local_addr(&self, session: SessionId) -> Result<SocketAddr, TransportError> {
        match self.session(session)? {
            Session::Server(server) => Ok(server.listener.local_addr()?),
            Session::Client(client) => client
                .connection
                .as_ref()
                .ok_or(TransportError::UnknownPeer(SERVER_PEER_ID))?
                .local_addr(),
        }
    }

    /// Bytes queued but not yet written for `peer`
    pub fn pending_output(&self, session: SessionId, peer: PeerId) -> Result<usize, TransportError> {
        let connection = match self.session(session)? {
            Session::Server(server) => server.connections.get(&peer),
            Session::Client(client) if peer == SERVER_PEER_ID => client.connection.as_ref(),
            Session::Client(_) => None,
        };
        Ok(connection
            .ok_or(TransportError::UnknownPeer(peer))?
            .pending_output())
    }

    fn session(&self, session: SessionId) -> Result<&Session, TransportError> {
        self.sessions
            .get(&session)
            .ok_or(TransportError::UnknownSession(session.0))
    }

    fn session_mut(&mut self, session: SessionId) -> Result<&mut Session, TransportError> {
        self.sessions
            .get_mut(&session)
            .ok_or(TransportError::UnknownSession(session.0))
    }

    fn connection_mut(
        &mut self,
        session: SessionId,
        peer: PeerId,
    ) -> Result<&mut Connection, TransportError> {
        let connection = match self.session_mut(session)? {
            Session::Server(server) => server.connections.get_mut(&peer),
            Session::Client(client) if peer == SERVER_PEER_ID => client.connection.as_mut(),
            Session::Client(_) => None,
        };
        connection.ok_or(TransportError::UnknownPeer(peer))
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.shutdown();
    }
}
