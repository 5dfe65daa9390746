//! Request and host error types.
//!
//! The `Display` text of [`RpcError`] is what clients see in the `error`
//! field of a reply.

use thiserror::Error;

/// Failure reported back to the caller as `{"id", "error"}`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// `id` missing or not a string. Replied with an empty id.
    #[error("Missing 'id' Field")]
    MissingId,
    /// `method` missing or not a string.
    #[error("Missing 'method' Field")]
    MissingMethod,
    /// A required parameter is absent or has the wrong JSON type.
    #[error("Invalid Parameters")]
    InvalidParams,
    /// No host operation with this name.
    #[error("Unknown Method")]
    UnknownMethod,
    /// The host rejected or failed the call.
    #[error("{0}")]
    Host(String),
}

impl RpcError {
    /// Label used for the `error_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingId => "missing_id",
            Self::MissingMethod => "missing_method",
            Self::InvalidParams => "invalid_params",
            Self::UnknownMethod => "unknown_method",
            Self::Host(_) => "host",
        }
    }
}

/// Error returned by a [`Host`](crate::host::Host) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host is not ready to take calls.
    #[error("host unavailable: {0}")]
    Unavailable(String),
    /// The host ran the call and it failed.
    #[error("{0}")]
    Failed(String),
}

impl From<HostError> for RpcError {
    fn from(err: HostError) -> Self {
        Self::Host(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_visible_messages() {
        assert_eq!(RpcError::MissingId.to_string(), "Missing 'id' Field");
        assert_eq!(RpcError::MissingMethod.to_string(), "Missing 'method' Field");
        assert_eq!(RpcError::InvalidParams.to_string(), "Invalid Parameters");
        assert_eq!(RpcError::UnknownMethod.to_string(), "Unknown Method");
    }

    #[test]
    fn host_error_converts_with_message() {
        let err: RpcError = HostError::Failed("not logged in".into()).into();
        assert_eq!(err, RpcError::Host("not logged in".into()));
        assert_eq!(err.kind(), "host");

        let err: RpcError = HostError::Unavailable("starting".into()).into();
        assert_eq!(err.to_string(), "host unavailable: starting");
    }
}
