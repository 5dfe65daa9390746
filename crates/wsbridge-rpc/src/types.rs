//! Reply wire format.

use serde::Serialize;
use serde_json::Value;

use crate::errors::RpcError;

/// Reply to one request.
///
/// Serializes as `{"id"}` for accepted actions, `{"id","result"}` for
/// queries and `{"id","error"}` for failures.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcReply {
    /// Echoed request id, empty when the request had none.
    pub id: String,
    /// Query result. `Some(Value::Null)` is written as `"result":null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcReply {
    /// Action accepted, nothing to return.
    pub fn accepted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: None,
        }
    }

    /// Query succeeded with `result`.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Request failed.
    pub fn error(id: impl Into<String>, err: &RpcError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(err.to_string()),
        }
    }

    /// Whether this reply carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
