//! Waypoint management gate.
//!
//! Filters that decide whether a request may reach the registration
//! endpoints. A [`Gate`] runs its filters outermost first and stops at the
//! first rejection.

#![deny(missing_docs)]

pub mod basic_auth;
pub mod host;

use hyper::header::HeaderValue;
use hyper::{HeaderMap, StatusCode, Uri};

pub use basic_auth::{BasicAuth, Credentials};
pub use host::HostFilter;

/// Why a filter turned a request away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status to answer with.
    pub status: StatusCode,
    /// Human-readable reason, sent back in the JSON body.
    pub message: String,
    /// `WWW-Authenticate` challenge to attach, if any.
    pub challenge: Option<HeaderValue>,
}

impl Rejection {
    /// A rejection without an authentication challenge.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            challenge: None,
        }
    }
}

/// A single admission check applied to a request head.
pub trait Filter: Send + Sync {
    /// Lets the request through or explains why not.
    fn check(&self, uri: &Uri, headers: &HeaderMap) -> Result<(), Rejection>;
}

/// An ordered chain of filters guarding the management endpoints.
#[derive(Default)]
pub struct Gate {
    filters: Vec<Box<dyn Filter>>,
}

impl Gate {
    /// A gate that admits everything.
    pub fn open() -> Self {
        Self::default()
    }

    /// Wraps the gate in `filter`, which then runs before every filter
    /// already present.
    pub fn wrap(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.insert(0, Box::new(filter));
        self
    }

    /// Builds the standard gate: the host filter when `allowed_host` is
    /// given, wrapped in Basic Auth when `credentials` are given.
    pub fn from_settings(allowed_host: Option<String>, credentials: Option<Credentials>) -> Self {
        let mut gate = Self::open();
        if let Some(host) = allowed_host {
            gate = gate.wrap(HostFilter::new(host));
        }
        if let Some(credentials) = credentials {
            gate = gate.wrap(BasicAuth::new(credentials));
        }
        gate
    }

    /// Number of filters in the chain.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the gate admits everything.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs every filter in order.
    pub fn check(&self, uri: &Uri, headers: &HeaderMap) -> Result<(), Rejection> {
        self.filters.iter().try_for_each(|f| f.check(uri, headers))
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").field("filters", &self.filters.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{AUTHORIZATION, HOST};

    fn headers(pairs: &[(hyper::header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_open_gate_admits_everything() {
        let gate = Gate::open();
        assert!(gate.is_empty());
        assert!(gate.check(&Uri::from_static("/register"), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_basic_auth_runs_before_host_filter() {
        let gate = Gate::from_settings(
            Some("10.0.0.5:443".to_owned()),
            Some(Credentials::new("admin", "secret")),
        );
        assert_eq!(gate.len(), 2);

        // Wrong host and no credentials: the outer filter answers.
        let rejection = gate
            .check(&Uri::from_static("/register"), &headers(&[(HOST, "evil.example")]))
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);

        // Good credentials, wrong host: the inner filter answers.
        let rejection = gate
            .check(
                &Uri::from_static("/register"),
                &headers(&[(HOST, "evil.example"), (AUTHORIZATION, "Basic YWRtaW46c2VjcmV0")]),
            )
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);

        assert!(gate
            .check(
                &Uri::from_static("/register"),
                &headers(&[(HOST, "10.0.0.5:443"), (AUTHORIZATION, "Basic YWRtaW46c2VjcmV0")]),
            )
            .is_ok());
    }
}
