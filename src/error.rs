//! Error types shared across kvdb.
//!
//! Protocol, command and tester errors live next to the code that produces
//! them; this module holds the configuration and database errors that cross
//! module boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors returned by [`KeyValueDb`](crate::store::KeyValueDb) operations.
///
/// Local backends only ever produce [`DbError::Unsupported`]; the remaining
/// variants come from the network client.
#[derive(Error, Debug)]
pub enum DbError {
    /// The backend does not implement this operation.
    #[error("operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// The connection to the server is gone.
    #[error("unable to receive response from server")]
    ConnectionBroken,

    /// The server answered with a message of the wrong kind.
    #[error("wrong response type from server: {received}")]
    UnexpectedResponse {
        /// Name of the message that was received.
        received: &'static str,
    },

    /// The server failed to execute the request.
    #[error("server error: {0}")]
    Server(String),

    /// A request could not be encoded or sent.
    #[error("connection error")]
    Io(#[from] std::io::Error),

    /// A request could not be encoded.
    #[error(transparent)]
    Protocol(#[from] crate::protocol::ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn unsupported_error_names_backend() {
        let error = DbError::Unsupported {
            backend: "ShardedHashMapBackend",
            operation: "get_when",
        };
        assert_eq!(
            error.to_string(),
            "operation not supported by the ShardedHashMapBackend backend: get_when"
        );
    }
}
