//! Client-side session: one connection to the server plus the local manager

use log::{debug, error, info, warn};
use shared::{
    ChangeSet, Manager, ManagerId, Network, NetworkEvent, PeerId, SessionError, SessionId,
    TypeRegistry, SERVER_PEER_ID, UNASSIGNED_MANAGER_ID,
};
use std::sync::Arc;

/// A client connected (or connecting) to a session server
pub struct ClientSession {
    network: Network,
    session: SessionId,
    manager: Manager,
    /// Set once the handshake has assigned our id
    peer_id: Option<PeerId>,
    open: bool,
}

impl ClientSession {
    /// Connects to the server; the handshake completes during later ticks
    pub fn new(host: &str, port: u16, registry: Arc<TypeRegistry>) -> Result<Self, SessionError> {
        let mut network = Network::new()?;
        let session = network.connect(host, port)?;

        Ok(Self {
            network,
            session,
            manager: Manager::new(UNASSIGNED_MANAGER_ID, registry),
            peer_id: None,
            open: true,
        })
    }

    /// True once the handshake is done and until the connection closes
    pub fn is_connected(&self) -> bool {
        self.open && self.peer_id.is_some()
    }

    /// True until the connection closes
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut Manager {
        &mut self.manager
    }

    /// One client frame: a poll pass, event handling, then our own delta
    ///
    /// A change set from the server that cannot be applied closes the
    /// connection and is returned as the error.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        for event in self.network.communicate(1) {
            self.handle_event(event)?;
        }

        if self.is_connected() {
            if let Some(changes) = self.manager.get_changes(false) {
                let payload = changes.encode()?;
                self.network.send(self.session, SERVER_PEER_ID, &payload)?;
                debug!("Sent {} object changes", changes.len());
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: NetworkEvent) -> Result<(), SessionError> {
        match event {
            NetworkEvent::Connected { peer, .. } => self.adopt_id(peer),
            NetworkEvent::PacketReceived { payload, .. } => {
                let applied = ChangeSet::decode(&payload).and_then(|changes| {
                    self.manager
                        .apply_changes(SERVER_PEER_ID as ManagerId, &changes)
                });
                if let Err(e) = applied {
                    error!("Rejected change set from server: {}", e);
                    self.network.close_peer(self.session, SERVER_PEER_ID);
                    self.open = false;
                    return Err(e.into());
                }
            }
            NetworkEvent::ConnectionClosed { reason, .. } => {
                warn!("Disconnected: {:?}", reason);
                self.open = false;
            }
            NetworkEvent::ConnectionOpened { .. } => {
                warn!("Server-side event on a client session");
            }
        }
        Ok(())
    }

    /// Moves the manager into the id space assigned by the server
    ///
    /// Objects created before the handshake get ids under the assigned peer
    /// id, so they cannot collide with another client's. Their pending
    /// attributes and messages go out with the next delta.
    fn adopt_id(&mut self, peer: PeerId) {
        info!("Connected! Client ID: {}", peer);
        let moved = self.manager.rebase(peer as ManagerId);
        if moved > 0 {
            debug!("Moved {} objects created before the handshake", moved);
        }
        self.peer_id = Some(peer);
    }

    pub fn shutdown(&mut self) {
        self.network.shutdown();
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::game::{self, Player};
    use shared::{ListenConfig, ObjectId, Replicated, Value};
    use std::time::{Duration, Instant};

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(game::registry().unwrap())
    }

    fn listening() -> (Network, SessionId, u16) {
        let mut network = Network::new().unwrap();
        let session = network
            .listen(&ListenConfig {
                port: 0,
                local_only: true,
            })
            .unwrap();
        let port = network.local_addr(session).unwrap().port();
        (network, session, port)
    }

    /// Alternates server passes and client ticks until `done` or timeout
    fn run_until(
        server: &mut Network,
        client: &mut ClientSession,
        mut done: impl FnMut(&ClientSession) -> bool,
    ) -> Vec<NetworkEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while !done(client) {
            assert!(Instant::now() < deadline, "timed out");
            events.extend(server.communicate(1));
            client.tick().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        events
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(ClientSession::new("127.0.0.1", port, registry()).is_err());
    }

    #[test]
    fn test_handshake_assigns_id() {
        let (mut server, _, port) = listening();
        let mut client = ClientSession::new("127.0.0.1", port, registry()).unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.manager().id(), UNASSIGNED_MANAGER_ID);

        run_until(&mut server, &mut client, |c| c.is_connected());
        assert_eq!(client.peer_id(), Some(1));
        assert_eq!(client.manager().id(), 1);
    }

    #[test]
    fn test_objects_created_before_handshake_are_announced() {
        let (mut server, _, port) = listening();
        let mut client = ClientSession::new("127.0.0.1", port, registry()).unwrap();
        let early = client.manager_mut().create::<Player>().unwrap();
        {
            let player = client.manager_mut().get_mut(early).unwrap();
            player.set("name", "early").unwrap();
            game::record_hit(player, 2).unwrap();
        }

        let mut received = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        while received.is_none() {
            assert!(Instant::now() < deadline, "timed out");
            client.tick().unwrap();
            for event in server.communicate(1) {
                if let NetworkEvent::PacketReceived { payload, .. } = event {
                    received = Some(ChangeSet::decode(&payload).unwrap());
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let moved = ObjectId::new(1, early.serial());
        assert!(!client.manager().contains(early));
        assert!(client.manager().contains(moved));

        let changes = received.unwrap();
        let creation = &changes.objects[&moved];
        assert_eq!(creation.tag.as_deref(), Some(Player::TAG));
        assert_eq!(
            creation.attributes.get("name"),
            Some(&Value::Text("early".into()))
        );
        assert_eq!(creation.messages.len(), 1);
        assert!(creation.messages[0].is(game::NOTE_HIT));
    }

    #[test]
    fn test_bad_change_set_closes_connection() {
        let (mut server, session, port) = listening();
        let mut client = ClientSession::new("127.0.0.1", port, registry()).unwrap();
        run_until(&mut server, &mut client, |c| c.is_connected());

        server.send(session, 1, &[0xff, 0xff, 0xff]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let error = loop {
            assert!(Instant::now() < deadline, "timed out");
            server.communicate(1);
            if let Err(e) = client.tick() {
                break e;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        assert!(matches!(error, SessionError::Replication(_)));
        assert!(!client.is_open());
    }

    #[test]
    fn test_server_close_is_reported() {
        let (mut server, session, port) = listening();
        let mut client = ClientSession::new("127.0.0.1", port, registry()).unwrap();
        run_until(&mut server, &mut client, |c| c.is_connected());

        assert!(server.close_peer(session, 1));
        server.communicate(1);
        run_until(&mut server, &mut client, |c| !c.is_open());
        assert!(!client.is_connected());
    }
}
