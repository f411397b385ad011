//! Error types shared by the registry and the router.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for registry and routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the registry, the router and the state store.
#[derive(Error, Debug)]
pub enum Error {
    /// The matched service type has no registered instance.
    #[error("Service list {service} is empty or no service instance is responding")]
    EmptyList {
        /// Name of the empty service type.
        service: String,
    },

    /// Neither a prefix nor the catch-all entry matched the request path.
    #[error("Requested redirection does not exist: {path}")]
    NoRoute {
        /// Path of the unroutable request.
        path: String,
    },

    /// No service type with this name is configured.
    #[error("Service {0} does not exist")]
    UnknownService(String),

    /// An address that can never be routed to, such as an empty string.
    #[error("Invalid service address {0:?}")]
    InvalidAddress(String),

    /// Redirection policies are missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading or writing a state file failed.
    #[error("State file {path:?}: {source}")]
    Persistence {
        /// File being read or written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A state file exists but cannot be trusted.
    #[error("Corrupt state file {path:?}: {reason}")]
    CorruptState {
        /// Offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}
