//! Structural value types used in request keys and entity identifiers.
//!
//! The registry keys operations by value, not by reference: two logically
//! identical requests must collapse to one cache entry. That requires every
//! piece of a key to implement structural `Eq` and `Hash`, including
//! floating-point variable values, which are compared by bit pattern here so
//! the types are lawful map keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A variable value attached to an operation request.
///
/// This is a closed set of variants rather than an open runtime-typed value:
/// dispatch over result and variable shapes happens by matching, never by
/// runtime type lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<VariableValue>),
    Object(BTreeMap<String, VariableValue>),
}

impl PartialEq for VariableValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bit-pattern comparison keeps Eq lawful for NaN values.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for VariableValue {}

impl Hash for VariableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Boolean(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::List(items) => items.hash(state),
            Self::Object(fields) => fields.hash(state),
        }
    }
}

impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Primary-key value of a normalized entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    String(String),
    Int(i64),
    /// Composite key built from multiple parts, ordered.
    Composite(Vec<KeyValue>),
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Identifier of one normalized entity: type discriminator plus primary key.
///
/// Used both inside dependency sets on stored operations and as the join key
/// between stored operations and entity store updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    typename: String,
    key: KeyValue,
}

impl EntityKey {
    /// Create an entity key from a type name and primary key.
    pub fn new(typename: impl Into<String>, key: impl Into<KeyValue>) -> Self {
        Self {
            typename: typename.into(),
            key: key.into(),
        }
    }

    /// The entity's type discriminator.
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// The entity's primary key.
    pub fn key(&self) -> &KeyValue {
        &self.key
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            KeyValue::String(s) => write!(f, "{}:{}", self.typename, s),
            KeyValue::Int(i) => write!(f, "{}:{}", self.typename, i),
            KeyValue::Composite(parts) => write!(f, "{}:{:?}", self.typename, parts),
        }
    }
}
