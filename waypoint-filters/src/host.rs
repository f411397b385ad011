//! Host-based admission.

use hyper::header::HOST;
use hyper::{HeaderMap, StatusCode, Uri};

use crate::{Filter, Rejection};

/// Admits requests addressed to `localhost` or to one allowed host.
///
/// The comparison is on the raw `Host` value, port included, so the allowed
/// host is normally the balancer's private `host:port`.
#[derive(Debug, Clone)]
pub struct HostFilter {
    allowed: String,
}

impl HostFilter {
    /// Creates a filter admitting `allowed` besides `localhost`.
    pub fn new(allowed: impl Into<String>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }
}

// HTTP/2 carries the host in the URI authority instead of a header.
fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> &'a str {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("")
}

impl Filter for HostFilter {
    fn check(&self, uri: &Uri, headers: &HeaderMap) -> Result<(), Rejection> {
        let host = request_host(uri, headers);
        if host == "localhost" || host == self.allowed {
            return Ok(());
        }
        Err(Rejection::new(
            StatusCode::FORBIDDEN,
            format!("Request on forbidden host [{host}] rejected"),
        ))
    }
}
