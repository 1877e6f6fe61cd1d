//! Values carried by shared attributes and messages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity space of one replication manager
pub type ManagerId = u32;

/// Globally unique object identity: the owning manager's id in the high
/// 32 bits and that manager's local serial number in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(owner: ManagerId, serial: u32) -> Self {
        Self(((owner as u64) << 32) | serial as u64)
    }

    pub fn owner(&self) -> ManagerId {
        (self.0 >> 32) as ManagerId
    }

    pub fn serial(&self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner(), self.serial())
    }
}

/// A replicated value. Object references travel as ids, never by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(ObjectId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Every object id reachable from this value, containers included
    pub fn references(&self) -> Vec<ObjectId> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references(&self, found: &mut Vec<ObjectId>) {
        match self {
            Value::Ref(id) => found.push(*id),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(found)),
            Value::Map(entries) => entries.values().for_each(|v| v.collect_references(found)),
            _ => {}
        }
    }

    /// Rewrites every reference found in `moved`; returns whether any changed
    pub fn remap_references(&mut self, moved: &BTreeMap<ObjectId, ObjectId>) -> bool {
        match self {
            Value::Ref(id) => match moved.get(id) {
                Some(new_id) => {
                    *id = *new_id;
                    true
                }
                None => false,
            },
            Value::List(items) => items
                .iter_mut()
                .fold(false, |changed, v| v.remap_references(moved) || changed),
            Value::Map(entries) => entries
                .values_mut()
                .fold(false, |changed, v| v.remap_references(moved) || changed),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Ref(id)
    }
}

impl From<Vec<ObjectId>> for Value {
    fn from(ids: Vec<ObjectId>) -> Self {
        Value::List(ids.into_iter().map(Value::Ref).collect())
    }
}

/// What a shared attribute may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Plain data, containers of plain data included
    Scalar,
    /// A single object reference, or `Nil`
    Reference,
    /// An ordered list of object references
    ReferenceList,
    Any,
}

impl ValueKind {
    /// Initial value of an attribute of this kind that was never set
    pub fn default_value(&self) -> Value {
        match self {
            ValueKind::ReferenceList => Value::List(Vec::new()),
            _ => Value::Nil,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Scalar => value.references().is_empty(),
            ValueKind::Reference => matches!(value, Value::Ref(_) | Value::Nil),
            ValueKind::ReferenceList => match value {
                Value::List(items) => items.iter().all(|v| matches!(v, Value::Ref(_))),
                _ => false,
            },
        }
    }
}

/// One entry of a replicable type's schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: ValueKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self { name, kind }
    }

    pub const fn scalar(name: &'static str) -> Self {
        Self::new(name, ValueKind::Scalar)
    }

    pub const fn reference(name: &'static str) -> Self {
        Self::new(name, ValueKind::Reference)
    }

    pub const fn reference_list(name: &'static str) -> Self {
        Self::new(name, ValueKind::ReferenceList)
    }
}
