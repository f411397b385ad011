//! HTTP Basic Auth with a single login/password pair.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderValue, AUTHORIZATION};
use hyper::{HeaderMap, StatusCode, Uri};
use subtle::ConstantTimeEq;

use crate::{Filter, Rejection};

/// Realm announced in the `WWW-Authenticate` challenge.
pub const REALM: &str = "waypoint";

/// The one accepted login and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    login: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// The accepted login.
    pub fn login(&self) -> &str {
        &self.login
    }

    fn matches(&self, login: &[u8], password: &[u8]) -> bool {
        let login_ok = self.login.as_bytes().ct_eq(login);
        let password_ok = self.password.as_bytes().ct_eq(password);
        (login_ok & password_ok).into()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Requires `Authorization: Basic ...` matching the configured credentials.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    credentials: Credentials,
}

impl BasicAuth {
    /// Creates the filter.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(encoded) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Some(colon) = decoded.iter().position(|&b| b == b':') else {
            return false;
        };
        self.credentials.matches(&decoded[..colon], &decoded[colon + 1..])
    }
}

fn challenge() -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Basic realm=\"{REALM}\"")).ok()
}

impl Filter for BasicAuth {
    fn check(&self, _uri: &Uri, headers: &HeaderMap) -> Result<(), Rejection> {
        if self.authorized(headers) {
            return Ok(());
        }
        Err(Rejection {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_owned(),
            challenge: challenge(),
        })
    }
}
