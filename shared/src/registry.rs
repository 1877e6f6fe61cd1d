//! Static type registry used to instantiate objects announced by peers

use crate::error::ReplicationError;
use crate::object::Object;
use crate::value::{Field, ObjectId};
use std::collections::HashMap;

/// A replicable object type
///
/// `TAG` identifies the type on the wire, `SCHEMA` lists its shared
/// attributes in order, and `setup` gives a fresh instance its initial
/// values and message handlers. `setup` runs both for local creation and
/// for instances built from a remote creation record.
pub trait Replicated: 'static {
    const TAG: &'static str;
    const SCHEMA: &'static [Field];

    fn setup(_object: &mut Object) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectType {
    pub tag: &'static str,
    pub schema: &'static [Field],
    setup: fn(&mut Object),
}

impl ObjectType {
    pub fn of<T: Replicated>() -> Self {
        Self {
            tag: T::TAG,
            schema: T::SCHEMA,
            setup: T::setup,
        }
    }

    pub fn instantiate(&self, id: ObjectId) -> Object {
        let mut object = Object::new(id, self.tag);
        (self.setup)(&mut object);
        object.share(self.schema);
        object
    }
}

/// Tag → type lookup, populated once at start-up
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<&'static str, ObjectType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Replicated>(&mut self) -> Result<(), ReplicationError> {
        if self.types.contains_key(T::TAG) {
            return Err(ReplicationError::DuplicateType(T::TAG.to_string()));
        }
        self.types.insert(T::TAG, ObjectType::of::<T>());
        Ok(())
    }

    /// Builder form of [`TypeRegistry::register`]
    pub fn with<T: Replicated>(mut self) -> Result<Self, ReplicationError> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn get(&self, tag: &str) -> Result<&ObjectType, ReplicationError> {
        self.types
            .get(tag)
            .ok_or_else(|| ReplicationError::UnknownType(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
