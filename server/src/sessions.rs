//! Server-side session management for replicated game state
//!
//! This module keeps the server's view of every connected peer:
//! - Session lifecycle (open, close, faults)
//! - A full snapshot for each newcomer so it starts from the current state
//! - Relaying each peer's deltas to every other peer
//! - Broadcasting the server's own deltas once per tick
//!
//! All of it runs on the caller's thread from [`SessionServer::tick`].

use log::{debug, error, info, warn};
use shared::{
    ChangeSet, ListenConfig, Manager, ManagerId, Network, NetworkEvent, PeerId, ReplicationError,
    SessionError, SessionId, TransportError, TypeRegistry, SERVER_PEER_ID,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Represents one connected peer
#[derive(Debug)]
pub struct PeerSession {
    /// Peer id assigned during the handshake
    pub id: PeerId,
    /// When the connection was accepted
    pub joined: Instant,
    /// Change sets received from this peer
    pub packets: u64,
}

impl PeerSession {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            joined: Instant::now(),
            packets: 0,
        }
    }

    pub fn connected_for(&self) -> Duration {
        self.joined.elapsed()
    }
}

/// Authoritative hub: owns the listening session and the server's manager
///
/// The server manager holds every object in the game. Peers send their
/// deltas here; the server applies them and forwards the same payload to
/// everyone else, so all peers converge on the union of all populations.
pub struct SessionServer {
    network: Network,
    session: SessionId,
    manager: Manager,
    peers: BTreeMap<PeerId, PeerSession>,
    /// Replication faults of peers that were disconnected for them
    faults: Vec<(PeerId, ReplicationError)>,
}

impl SessionServer {
    /// Starts listening; bind failures are returned immediately
    pub fn new(config: &ListenConfig, registry: Arc<TypeRegistry>) -> Result<Self, SessionError> {
        let mut network = Network::new()?;
        let session = network.listen(config)?;

        Ok(Self {
            network,
            session,
            manager: Manager::new(SERVER_PEER_ID as ManagerId, registry),
            peers: BTreeMap::new(),
            faults: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.network.local_addr(self.session)
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut Manager {
        &mut self.manager
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerSession> {
        self.peers.get(&id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Returns the number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Replication faults collected since the last call
    pub fn take_faults(&mut self) -> Vec<(PeerId, ReplicationError)> {
        std::mem::take(&mut self.faults)
    }

    /// One server frame: a single poll pass, event handling, then the
    /// server's own delta to every peer
    pub fn tick(&mut self) -> Result<(), SessionError> {
        for event in self.network.communicate(1) {
            self.handle_event(event)?;
        }

        if let Some(changes) = self.manager.get_changes(false) {
            let payload = changes.encode()?;
            let queued = self.network.broadcast(self.session, &payload, &[])?;
            debug!("Queued {} object changes for {} peers", changes.len(), queued);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: NetworkEvent) -> Result<(), SessionError> {
        match event {
            NetworkEvent::ConnectionOpened { peer, .. } => self.handle_connection_open(peer)?,
            NetworkEvent::PacketReceived { peer, payload, .. } => {
                self.handle_packet(peer, &payload)?
            }
            NetworkEvent::ConnectionClosed { peer, reason, .. } => {
                debug!("Peer {} closed: {:?}", peer, reason);
                self.handle_connection_close(peer);
            }
            NetworkEvent::Connected { .. } => {
                warn!("Client-side event on the server session");
            }
        }
        Ok(())
    }

    /// Registers a newly accepted peer and sends it the complete state
    pub fn handle_connection_open(&mut self, peer: PeerId) -> Result<(), SessionError> {
        info!("Peer {} joined ({} peers)", peer, self.peers.len() + 1);
        self.peers.insert(peer, PeerSession::new(peer));

        if let Some(snapshot) = self.manager.get_changes(true) {
            let payload = snapshot.encode()?;
            self.network.send(self.session, peer, &payload)?;
            debug!("Sent {} objects to peer {}", snapshot.len(), peer);
        }
        Ok(())
    }

    /// Forgets a peer; returns false if it was already gone
    pub fn handle_connection_close(&mut self, peer: PeerId) -> bool {
        if let Some(session) = self.peers.remove(&peer) {
            info!(
                "Peer {} left after {:.1}s",
                session.id,
                session.connected_for().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Applies a peer's change set and forwards it to every other peer
    ///
    /// A change set that does not decode or does not apply is a fault of
    /// that peer only: it is disconnected and the error is kept for
    /// [`SessionServer::take_faults`].
    pub fn handle_packet(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), SessionError> {
        let Some(session) = self.peers.get_mut(&peer) else {
            debug!("Ignoring packet from departed peer {}", peer);
            return Ok(());
        };
        session.packets += 1;

        let applied = ChangeSet::decode(payload)
            .and_then(|changes| self.manager.apply_changes(peer as ManagerId, &changes));

        match applied {
            Ok(()) => {
                self.network.broadcast(self.session, payload, &[peer])?;
            }
            Err(e) => {
                error!("Dropping peer {}: {}", peer, e);
                self.network.close_peer(self.session, peer);
                self.handle_connection_close(peer);
                self.faults.push((peer, e));
            }
        }
        Ok(())
    }

    /// Sends `payload` to every peer not in `ignore`; with `me_too` the
    /// change set is also applied to the server's own manager
    pub fn broadcast(
        &mut self,
        payload: &[u8],
        me_too: bool,
        ignore: &[PeerId],
    ) -> Result<usize, SessionError> {
        if me_too {
            let changes = ChangeSet::decode(payload)?;
            self.manager
                .apply_changes(SERVER_PEER_ID as ManagerId, &changes)?;
        }
        Ok(self.network.broadcast(self.session, payload, ignore)?)
    }

    /// Closes every connection and the listening socket
    pub fn shutdown(&mut self) {
        self.network.shutdown();
        self.peers.clear();
    }
}
