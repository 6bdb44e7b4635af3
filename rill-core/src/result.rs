//! Operation results and the metadata needed to keep them consistent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::value::EntityKey;

/// One error reported alongside (or instead of) result data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Path into the result data the error applies to, if any.
    pub path: Vec<String>,
}

impl ResultError {
    /// Create an error with no path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Create an error scoped to a path within the result data.
    pub fn at_path(message: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}

/// Immutable result of one executed operation.
///
/// Besides the data itself, a result carries the set of entity keys it was
/// denormalized from and the entity-store version it was built against. Those
/// two fields drive invalidation: an operation is rechecked when an entity
/// update with a higher version touches one of its dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    data: Option<Value>,
    errors: Vec<ResultError>,
    extensions: BTreeMap<String, Value>,
    dependencies: HashSet<EntityKey>,
    version: u64,
}

impl OperationResult {
    /// Create a result holding the given data.
    pub fn new(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            extensions: BTreeMap::new(),
            dependencies: HashSet::new(),
            version: 0,
        }
    }

    /// Create a result carrying only errors, no data.
    pub fn from_errors(errors: Vec<ResultError>) -> Self {
        Self {
            data: None,
            errors,
            extensions: BTreeMap::new(),
            dependencies: HashSet::new(),
            version: 0,
        }
    }

    /// Record an entity key this result depends on.
    pub fn with_dependency(mut self, key: EntityKey) -> Self {
        self.dependencies.insert(key);
        self
    }

    /// Record a batch of entity keys this result depends on.
    pub fn with_dependencies(mut self, keys: impl IntoIterator<Item = EntityKey>) -> Self {
        self.dependencies.extend(keys);
        self
    }

    /// Stamp the entity-store version this result was built against.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Append an error to this result.
    pub fn with_error(mut self, error: ResultError) -> Self {
        self.errors.push(error);
        self
    }

    /// Attach an extension entry to this result.
    pub fn with_extension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }

    /// The result data, if the operation produced any.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Errors reported by the operation.
    pub fn errors(&self) -> &[ResultError] {
        &self.errors
    }

    /// Extension entries attached to the result.
    pub fn extensions(&self) -> &BTreeMap<String, Value> {
        &self.extensions
    }

    /// Entity keys this result was denormalized from.
    pub fn dependencies(&self) -> &HashSet<EntityKey> {
        &self.dependencies
    }

    /// The entity-store version this result was built against.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when the operation produced data and no errors.
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }
}
