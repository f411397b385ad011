//! Configuration management
//!
//! Loads the balancer's JSON configuration file, fills in defaults and
//! rejects anything that would stop the balancer from starting correctly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use waypoint_core::{RedirectionPolicy, Scheme};
use waypoint_filters::{Credentials, Gate};

/// Seconds between two beacon datagrams when not configured.
pub const DEFAULT_MULTICAST_INTERVAL_SECS: u64 = 5;

/// `Port` may be written as a JSON string or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u32),
    Text(String),
}

/// The configuration file as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FileConfig {
    port: Option<PortValue>,
    multicast_address: String,
    multicast_interval_secs: Option<u64>,
    private_load_balancer_address: String,
    load_balancer_scheme: String,
    cert_file_path: String,
    key_file_path: String,
    log_directory: String,
    state_directory: String,
    verbose: bool,
    redirection_config: Option<Vec<RedirectionPolicy>>,
    disable_registration_host_filter: bool,
    enable_basic_auth: bool,
    basic_auth_login: String,
    basic_auth_password: String,
}

/// Validated balancer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the public listener binds on every interface.
    pub port: u16,
    /// Scheme of the public listener.
    pub scheme: Scheme,
    /// Group the beacon announces to.
    pub multicast_address: SocketAddr,
    /// Time between two announcements.
    pub multicast_interval: Duration,
    /// Address announced by the beacon and accepted by the host filter.
    pub private_address: String,
    /// PEM certificate chain for the `https` listener.
    pub cert_file: PathBuf,
    /// PEM private key for the `https` listener.
    pub key_file: PathBuf,
    /// Directory for daily log files; stdout when absent.
    pub log_directory: Option<PathBuf>,
    /// Directory holding one state file per service list; no persistence
    /// when absent.
    pub state_directory: Option<PathBuf>,
    /// Keep query strings in redirect log lines.
    pub verbose: bool,
    /// Prefix to service type mappings, in file order.
    pub redirections: Vec<RedirectionPolicy>,
    /// Whether registration is restricted to `localhost` and the private
    /// address.
    pub host_filter: bool,
    /// Credentials required for registration, if any.
    pub basic_auth: Option<Credentials>,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("loading configuration file {}", path.display()))
    }

    /// Parses and validates a configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: FileConfig = serde_json::from_str(raw).context("malformed configuration")?;

        if file.multicast_address.is_empty() {
            bail!("Multicast address is missing");
        }
        let multicast_address: SocketAddr = file
            .multicast_address
            .parse()
            .with_context(|| format!("Invalid multicast address {}", file.multicast_address))?;

        let scheme: Scheme = if file.load_balancer_scheme.is_empty() {
            Scheme::Https
        } else {
            match file.load_balancer_scheme.parse() {
                Ok(scheme) => scheme,
                Err(_) => bail!(
                    "Unsupported protocol in LoadBalancerScheme: {}",
                    file.load_balancer_scheme
                ),
            }
        };

        let port = match file.port {
            None => default_port(scheme),
            Some(PortValue::Text(text)) if text.is_empty() => default_port(scheme),
            Some(PortValue::Text(text)) => match text.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => bail!("Invalid port {}", text),
            },
            Some(PortValue::Number(number)) => match u16::try_from(number) {
                Ok(port) if port != 0 => port,
                _ => bail!("Invalid port {}", number),
            },
        };

        let multicast_interval = match file.multicast_interval_secs {
            Some(0) => bail!("MulticastIntervalSecs must be positive"),
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(DEFAULT_MULTICAST_INTERVAL_SECS),
        };

        let Some(redirections) = file.redirection_config else {
            bail!("RedirectionConfig is missing");
        };

        let basic_auth = if file.enable_basic_auth {
            if file.basic_auth_login.is_empty() || file.basic_auth_password.is_empty() {
                bail!("Missing basic auth credentials");
            }
            Some(Credentials::new(file.basic_auth_login, file.basic_auth_password))
        } else {
            None
        };

        Ok(Self {
            port,
            scheme,
            multicast_address,
            multicast_interval,
            private_address: non_empty(file.private_load_balancer_address)
                .unwrap_or_else(|| format!("localhost:{port}")),
            cert_file: non_empty(file.cert_file_path)
                .unwrap_or_else(|| "cert.pem".to_owned())
                .into(),
            key_file: non_empty(file.key_file_path)
                .unwrap_or_else(|| "key.pem".to_owned())
                .into(),
            log_directory: non_empty(file.log_directory).map(PathBuf::from),
            state_directory: non_empty(file.state_directory).map(PathBuf::from),
            verbose: file.verbose,
            redirections,
            host_filter: !file.disable_registration_host_filter,
            basic_auth,
        })
    }

    /// Address of the public listener.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Whether a plain listener on port 80 redirects to HTTPS.
    pub fn redirects_http(&self) -> bool {
        self.scheme == Scheme::Https && self.port == 443
    }

    /// The gate guarding registration and deregistration.
    pub fn gate(&self) -> Gate {
        let allowed_host = self.host_filter.then(|| self.private_address.clone());
        Gate::from_settings(allowed_host, self.basic_auth.clone())
    }
}

fn default_port(scheme: Scheme) -> u16 {
    match scheme {
        Scheme::Https => 443,
        Scheme::Http => 80,
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
