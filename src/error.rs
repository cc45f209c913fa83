//! Error types for adapter operations.

use thiserror::Error;

/// Errors returned by the adapter and its connection providers.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Construction input is invalid; the adapter cannot be used.
    #[error("invalid adapter configuration: {0}")]
    Config(String),

    /// Connection, pool or request failure. Never retried internally.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A stored record (or a reply) is not in canonical form.
    #[error("malformed rule record {record:?}: {message}")]
    Decode { record: String, message: String },

    /// A rule could not be encoded.
    #[error("cannot encode rule: {0}")]
    Encode(String),

    /// Parallel rule lists passed to a bulk update differ in length.
    #[error("old and new rule lists differ in length ({old} != {new})")]
    Arity { old: usize, new: usize },

    /// An untyped filter had an unsupported shape.
    #[error("invalid filter: {0}")]
    FilterType(String),
}

impl AdapterError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a transport error without an underlying Redis error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error for the given raw record.
    pub fn decode(record: &[u8], message: impl Into<String>) -> Self {
        Self::Decode {
            record: String::from_utf8_lossy(record).into_owned(),
            message: message.into(),
        }
    }

    /// Returns true for connection and request failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<redis::RedisError> for AdapterError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Convenience type alias for adapter results.
pub type AdapterResult<T> = Result<T, AdapterError>;
