//! Error types and result types for document store commands.
//!
//! Every fallible operation in the workspace returns [`StoreResult<T>`]. Errors are
//! grouped into a small public taxonomy ([`ErrorKind`]) that is what callers on the
//! other side of the transport get to see.

use bson::error::Error as BsonError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while serving a store command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A `query`, `data`, `id` or options field failed wire decoding.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// The collection name is empty or structurally invalid.
    #[error("Unknown collection: {0:?}")]
    UnknownCollection(String),
    /// The request is missing a required field or is addressed to no known handler.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The storage engine rejected the operation.
    #[error("Storage error: {0}")]
    Storage(String),
    /// The storage engine could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The configuration could not be loaded or contains invalid values.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A specialized `Result` type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The failure categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedPayload,
    UnknownCollection,
    ValidationError,
    StorageError,
}

impl StoreError {
    /// Returns the public category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::MalformedPayload(_) => ErrorKind::MalformedPayload,
            StoreError::UnknownCollection(_) => ErrorKind::UnknownCollection,
            StoreError::Validation(_) | StoreError::Configuration(_) => ErrorKind::ValidationError,
            StoreError::Storage(_) | StoreError::Connection(_) | StoreError::Initialization(_) => {
                ErrorKind::StorageError
            }
        }
    }

    /// Whether the engine itself reported this failure, as opposed to the engine
    /// being unreachable. Only these errors may be collapsed by best-effort commands.
    pub fn is_engine_reported(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        StoreError::MalformedPayload(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }
}

/// The error object handed back to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StoreError> for ErrorPayload {
    fn from(err: &StoreError) -> Self {
        ErrorPayload {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::MalformedPayload(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::MalformedPayload(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_storage_kind_but_not_engine_reported() {
        let err = StoreError::Connection("server selection timeout".into());

        assert_eq!(err.kind(), ErrorKind::StorageError);
        assert!(!err.is_engine_reported());
        assert!(StoreError::Storage("ns not found".into()).is_engine_reported());
    }

    #[test]
    fn payload_carries_kind_and_message() {
        let payload = ErrorPayload::from(&StoreError::UnknownCollection(String::new()));

        assert_eq!(payload.kind, ErrorKind::UnknownCollection);
        assert_eq!(payload.message, "Unknown collection: \"\"");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({ "kind": "UnknownCollection", "message": "Unknown collection: \"\"" })
        );
    }
}
