//! Redirection policies and backend schemes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The scheme used to reach a service type's backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// The lowercase scheme name as it appears in URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::Config(format!("unsupported scheme {other:?}"))),
        }
    }
}

/// Mounts a service type at a URL path prefix.
///
/// Several policies may name the same service type; they then share one
/// address list. Field names follow the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectionPolicy {
    /// Path prefix, either `/` (catch-all) or a single `/segment`.
    #[serde(rename = "Path", alias = "path", alias = "Prefix", alias = "prefix", default)]
    pub prefix: String,
    /// Service type name.
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    /// Scheme used to reach the service type, `http` or `https`.
    #[serde(rename = "Scheme", alias = "scheme", default)]
    pub scheme: String,
}

impl RedirectionPolicy {
    /// Builds a policy from its three parts.
    pub fn new(
        prefix: impl Into<String>,
        name: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            scheme: scheme.into(),
        }
    }

    /// Checks every field and returns the parsed scheme.
    pub fn validate(&self) -> Result<Scheme, Error> {
        if self.prefix.is_empty() {
            return Err(Error::Config(format!("policy for {:?} has no path prefix", self.name)));
        }
        if !is_single_segment(&self.prefix) {
            return Err(Error::Config(format!(
                "path prefix {:?} must be \"/\" or a single \"/segment\"",
                self.prefix
            )));
        }
        if self.name.is_empty() {
            return Err(Error::Config(format!(
                "policy for prefix {:?} has no service name",
                self.prefix
            )));
        }
        if !is_file_stem(&self.name) {
            return Err(Error::Config(format!(
                "service name {:?} may only contain letters, digits, '.', '_' and '-' \
                 and may not start with '.'",
                self.name
            )));
        }
        if self.scheme.is_empty() {
            return Err(Error::Config(format!("policy for {:?} has no scheme", self.name)));
        }
        self.scheme.parse()
    }
}

fn is_single_segment(prefix: &str) -> bool {
    match prefix.strip_prefix('/') {
        Some(rest) => !rest.contains('/'),
        None => false,
    }
}

// Names double as state file stems.
fn is_file_stem(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
