//! Operation request keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RillResult, StoreError};
use crate::value::VariableValue;

/// Immutable, value-comparable key identifying one operation invocation.
///
/// Equality and hashing are structural over document id, operation name and
/// variable values, so two logically identical requests built independently
/// resolve to the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationRequest {
    document_id: String,
    operation_name: String,
    variables: BTreeMap<String, VariableValue>,
}

impl OperationRequest {
    /// Create a request for the given document and operation name.
    ///
    /// Both identifiers must be non-empty; malformed keys are rejected here,
    /// at the call boundary, rather than surfacing later as registry misses.
    pub fn new(
        document_id: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> RillResult<Self> {
        let document_id = document_id.into();
        let operation_name = operation_name.into();

        if document_id.is_empty() {
            return Err(StoreError::invalid_request("document id must not be empty"));
        }
        if operation_name.is_empty() {
            return Err(StoreError::invalid_request(
                "operation name must not be empty",
            ));
        }

        Ok(Self {
            document_id,
            operation_name,
            variables: BTreeMap::new(),
        })
    }

    /// Attach a variable value to this request.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// The identity of the query document.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// The operation name within the document.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The variable values this invocation was issued with.
    pub fn variables(&self) -> &BTreeMap<String, VariableValue> {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request() -> OperationRequest {
        OperationRequest::new("abc123", "GetBooks")
            .expect("valid request")
            .with_variable("limit", 10i64)
            .with_variable("genre", "scifi")
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(matches!(
            OperationRequest::new("", "GetBooks"),
            Err(StoreError::InvalidRequest { .. })
        ));
        assert!(matches!(
            OperationRequest::new("abc123", ""),
            Err(StoreError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn structurally_equal_requests_collide_in_maps() {
        let mut map = HashMap::new();
        map.insert(request(), 1);
        map.insert(request(), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&request()], 2);
    }

    #[test]
    fn variable_order_does_not_affect_equality() {
        let a = OperationRequest::new("abc123", "GetBooks")
            .expect("valid request")
            .with_variable("a", 1i64)
            .with_variable("b", 2i64);
        let b = OperationRequest::new("abc123", "GetBooks")
            .expect("valid request")
            .with_variable("b", 2i64)
            .with_variable("a", 1i64);
        assert_eq!(a, b);
    }

    #[test]
    fn differing_variables_produce_distinct_keys() {
        let a = request();
        let b = request().with_variable("limit", 20i64);
        assert_ne!(a, b);
    }
}
