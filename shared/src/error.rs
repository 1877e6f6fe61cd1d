//! Error taxonomy shared by the transport and the replication engine
//!
//! Transport errors are local to one connection: the event loop closes the
//! connection and reports the reason. Replication errors are integration
//! faults and are always returned to the caller.

use crate::value::{ObjectId, ValueKind};
use crate::PeerId;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("unable to listen on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("unable to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("refusing to send an empty payload")]
    EmptyPayload,

    #[error("no live session with id {0}")]
    UnknownSession(u32),

    #[error("no open connection for peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer id space exhausted")]
    PeerIdsExhausted,

    #[error("{0} bytes queued for a peer that is not reading")]
    SendBacklog(usize),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("object {0} is unknown and the change carries no type tag")]
    UnknownObject(ObjectId),

    #[error("no replicable type registered under tag {0:?}")]
    UnknownType(String),

    #[error("type tag {0:?} registered twice")]
    DuplicateType(String),

    #[error("attribute {attribute:?} of object {object} is not shared")]
    UnsharedAttribute { object: ObjectId, attribute: String },

    #[error("attribute {attribute:?} of object {object} expects a {expected:?} value")]
    KindMismatch {
        object: ObjectId,
        attribute: String,
        expected: ValueKind,
    },

    #[error("object {object} references missing object {target}")]
    DanglingReference { object: ObjectId, target: ObjectId },

    #[error("object id {0} is already in use")]
    IdInUse(ObjectId),

    #[error("object {target} is still referenced by object {referrer}")]
    StillReferenced { target: ObjectId, referrer: ObjectId },

    #[error("object {0} has been deleted")]
    ObjectDeleted(ObjectId),

    #[error("change set codec failed: {0}")]
    Codec(#[from] bincode::Error),
}

/// Failure of a session layer that drives both the transport and a manager
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}
