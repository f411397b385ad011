//! Transport errors raised while talking to backends.

use std::io;

use thiserror::Error;

/// Result type for backend transport operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failures between the balancer and a selected backend.
///
/// None of these are retried; they surface to the client as a 502.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The rewritten request does not name a backend.
    #[error("Request target {0} does not name a backend")]
    MissingUpstream(String),

    /// The backend address cannot be used for a TLS server name.
    #[error("Invalid backend address {0:?}")]
    InvalidAddress(String),

    /// TCP connect failed.
    #[error("Unable to connect to backend {address}: {source}")]
    Connect {
        /// Backend address.
        address: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// TLS handshake with an `https` backend failed.
    #[error("TLS handshake with backend {address} failed: {source}")]
    Tls {
        /// Backend address.
        address: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// HTTP/1.1 connection setup failed.
    #[error("HTTP handshake with backend {address} failed: {source}")]
    Handshake {
        /// Backend address.
        address: String,
        /// Underlying failure.
        #[source]
        source: hyper::Error,
    },

    /// The request was sent but no response head came back.
    #[error("Request to backend {address} failed: {source}")]
    Request {
        /// Backend address.
        address: String,
        /// Underlying failure.
        #[source]
        source: hyper::Error,
    },
}
