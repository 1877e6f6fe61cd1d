//! Replicable objects: shared attributes, dirty tracking and messaging

use crate::changes::{Message, ObjectDelta};
use crate::error::ReplicationError;
use crate::value::{Field, ObjectId, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Reaction to a message, run for local emits and for remote deliveries alike
pub type Handler = Arc<dyn Fn(&mut Object, &Message) + Send + Sync>;

/// One replicable entity
///
/// Attributes declared through [`Object::share`] take part in delta
/// computation; any other attribute is plain local state. Every write to a
/// shared attribute marks it dirty until the next [`Object::get_changes`].
pub struct Object {
    id: ObjectId,
    tag: String,
    shared: Vec<Field>,
    attributes: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    outbox: Vec<Message>,
    handlers: Vec<(String, Handler)>,
    deleted: bool,
    /// Set once a creation record carrying the tag has left this peer
    announced: bool,
}

impl Object {
    pub fn new(id: ObjectId, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            shared: Vec::new(),
            attributes: BTreeMap::new(),
            dirty: BTreeSet::new(),
            outbox: Vec::new(),
            handlers: Vec::new(),
            deleted: false,
            announced: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Declares attributes as replicated. Attributes without a value yet
    /// start from their kind's default; all of them are dirty so the first
    /// delta carries them.
    pub fn share(&mut self, fields: &[Field]) {
        for field in fields {
            if let Some(existing) = self.shared.iter_mut().find(|f| f.name == field.name) {
                *existing = *field;
            } else {
                self.shared.push(*field);
            }
            self.attributes
                .entry(field.name.to_string())
                .or_insert_with(|| field.kind.default_value());
            self.dirty.insert(field.name.to_string());
        }
    }

    pub fn shared_fields(&self) -> &[Field] {
        &self.shared
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.shared.iter().find(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ReplicationError> {
        if self.deleted {
            return Err(ReplicationError::ObjectDeleted(self.id));
        }

        let value = value.into();
        if let Some(field) = self.field(name) {
            if !field.kind.accepts(&value) {
                return Err(ReplicationError::KindMismatch {
                    object: self.id,
                    attribute: name.to_string(),
                    expected: field.kind,
                });
            }
            self.dirty.insert(name.to_string());
        }

        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Subscribes `handler` to messages of `kind` on this object
    pub fn connect<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&mut Object, &Message) + Send + Sync + 'static,
    {
        self.handlers.push((kind.into(), Arc::new(handler)));
    }

    /// Runs local handlers now and queues the message for the next delta
    pub fn emit(&mut self, message: Message) -> Result<(), ReplicationError> {
        if self.deleted {
            return Err(ReplicationError::ObjectDeleted(self.id));
        }
        self.dispatch(&message);
        self.outbox.push(message);
        Ok(())
    }

    fn dispatch(&mut self, message: &Message) {
        let matching: Vec<Handler> = self
            .handlers
            .iter()
            .filter(|(kind, _)| message.is(kind))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in matching {
            handler(self, message);
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.outbox.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Tombstones the object. The owning manager reports the deletion once
    /// and then forgets the object.
    pub fn delete(&mut self) {
        self.deleted = true;
        self.dirty.clear();
        self.outbox.clear();
    }

    /// Dirty shared attributes and queued messages since the last call.
    /// Clears both as a side effect.
    pub fn get_changes(&mut self) -> Option<ObjectDelta> {
        if self.deleted || !self.is_dirty() {
            return None;
        }

        let mut delta = ObjectDelta::default();
        for name in std::mem::take(&mut self.dirty) {
            if let Some(value) = self.attributes.get(&name) {
                delta.attributes.insert(name, value.clone());
            }
        }
        delta.messages = std::mem::take(&mut self.outbox);
        Some(delta)
    }

    /// Complete shared state with the type tag, dirty flags untouched
    pub fn snapshot(&self) -> ObjectDelta {
        let attributes = self
            .shared
            .iter()
            .map(|field| {
                let value = self.attributes.get(field.name).cloned().unwrap_or_default();
                (field.name.to_string(), value)
            })
            .collect();

        ObjectDelta {
            tag: Some(self.tag.clone()),
            attributes,
            messages: Vec::new(),
            deleted: false,
        }
    }

    /// Checks a delta against this object's schema without touching state
    pub fn validate(&self, delta: &ObjectDelta) -> Result<(), ReplicationError> {
        if self.deleted {
            return Err(ReplicationError::ObjectDeleted(self.id));
        }

        for (name, value) in &delta.attributes {
            let field = self
                .field(name)
                .ok_or_else(|| ReplicationError::UnsharedAttribute {
                    object: self.id,
                    attribute: name.clone(),
                })?;

            if !field.kind.accepts(value) {
                return Err(ReplicationError::KindMismatch {
                    object: self.id,
                    attribute: name.clone(),
                    expected: field.kind,
                });
            }
        }
        Ok(())
    }

    /// Assigns every attribute of `delta` and delivers its messages to local
    /// handlers. Remote writes are not marked dirty and messages are not
    /// queued again, so nothing echoes back to the sender.
    pub fn apply_changes(&mut self, delta: &ObjectDelta) -> Result<(), ReplicationError> {
        self.validate(delta)?;

        for (name, value) in &delta.attributes {
            self.attributes.insert(name.clone(), value.clone());
            self.dirty.remove(name);
        }

        for message in &delta.messages {
            self.dispatch(message);
        }
        Ok(())
    }

    /// Object ids referenced from any shared attribute
    pub fn references(&self) -> Vec<ObjectId> {
        self.references_after(None)
    }

    /// References this object would hold once `delta` is applied
    pub(crate) fn references_after(&self, delta: Option<&ObjectDelta>) -> Vec<ObjectId> {
        self.shared
            .iter()
            .filter_map(|field| {
                delta
                    .and_then(|d| d.attributes.get(field.name))
                    .or_else(|| self.attributes.get(field.name))
            })
            .flat_map(Value::references)
            .collect()
    }

    /// Moves the object to a new id. It has to be announced again under it.
    pub(crate) fn rekey(&mut self, id: ObjectId) {
        self.id = id;
        self.announced = false;
    }

    /// Rewrites references to moved objects in attributes and queued
    /// messages. Rewritten shared attributes become dirty.
    pub(crate) fn remap_references(&mut self, moved: &BTreeMap<ObjectId, ObjectId>) {
        for (name, value) in self.attributes.iter_mut() {
            if value.remap_references(moved) && self.shared.iter().any(|f| f.name == name) {
                self.dirty.insert(name.clone());
            }
        }
        for message in self.outbox.iter_mut() {
            for arg in message.args.iter_mut() {
                arg.remap_references(moved);
            }
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
        self.outbox.clear();
    }

    pub(crate) fn is_announced(&self) -> bool {
        self.announced
    }

    pub(crate) fn set_announced(&mut self) {
        self.announced = true;
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("attributes", &self.attributes)
            .field("dirty", &self.dirty)
            .field("deleted", &self.deleted)
            .finish()
    }
}
