//! Change sets exchanged between peers
//!
//! A [`ChangeSet`] is either an incremental delta (dirty attributes, new and
//! deleted objects, queued messages) or a full snapshot of every live object.
//! It is encoded with bincode and carried as one transport frame.

use crate::error::ReplicationError;
use crate::value::{ObjectId, Value};
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transient event emitted by an object. Never stored once delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Per-object part of a change set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectDelta {
    /// Type tag, present when the receiver may not know the object yet
    pub tag: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub messages: Vec<Message>,
    pub deleted: bool,
}

impl ObjectDelta {
    pub fn deletion() -> Self {
        Self {
            deleted: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.attributes.is_empty() && self.messages.is_empty() && !self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// True when this is a complete snapshot rather than a delta
    pub snapshot: bool,
    pub objects: BTreeMap<ObjectId, ObjectDelta>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(serialize(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ReplicationError> {
        Ok(deserialize(payload)?)
    }
}
