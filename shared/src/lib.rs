//! # Shared replication and transport layer
//!
//! Everything both peers need to keep game objects consistent over TCP.
//!
//! ## Replication
//! - [`value`]: attribute values, object ids and per-type schemas
//! - [`object`]: shared attributes, dirty tracking and message handlers
//! - [`registry`]: tag → type lookup used to build objects announced by peers
//! - [`manager`]: per-peer object registry that computes and applies deltas
//! - [`changes`]: the change sets exchanged between managers
//!
//! ## Transport
//! - [`protocol`]: handshake and length-prefixed framing
//! - [`connection`]: one non-blocking framed socket
//! - [`network`]: the event loop over every live server and client session
//!
//! The host drives everything from one thread: it calls
//! [`network::Network::communicate`] once per tick, feeds received payloads to
//! [`manager::Manager::apply_changes`], and sends whatever
//! [`manager::Manager::get_changes`] returns.

pub mod changes;
pub mod connection;
pub mod error;
pub mod game;
pub mod manager;
pub mod network;
pub mod object;
pub mod protocol;
pub mod registry;
pub mod value;

pub use changes::{ChangeSet, Message, ObjectDelta};
pub use error::{ReplicationError, SessionError, TransportError};
pub use manager::Manager;
pub use network::{CloseReason, ListenConfig, Network, NetworkEvent, SessionId};
pub use object::Object;
pub use registry::{Replicated, TypeRegistry};
pub use value::{Field, ManagerId, ObjectId, Value, ValueKind};

/// Peer identifier assigned by the server during the handshake
pub type PeerId = u16;

/// The server's own peer and manager id; clients are numbered from 1
pub const SERVER_PEER_ID: PeerId = 0;

pub const DEFAULT_PORT: u16 = 12345;

/// Manager id a client uses until the handshake assigns its peer id
pub const UNASSIGNED_MANAGER_ID: ManagerId = u32::MAX;

pub const DEFAULT_TICK_RATE: u32 = 60;
