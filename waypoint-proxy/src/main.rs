//! Waypoint load balancer
//!
//! Loads the configuration, restores the service lists and serves the public
//! listener until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::info;
use waypoint_core::{RoutingTable, Scheme};
use waypoint_proxy::beacon::Beacon;
use waypoint_proxy::server::{serve, serve_https_redirect};
use waypoint_proxy::{logging, tls, Balancer, Config};

/// Prefix-routing HTTP load balancer with self-registering backends.
#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let _log_guard = logging::init(config.log_directory.as_deref())?;

    let table = RoutingTable::init(&config.redirections, config.state_directory.as_deref())
        .context("building routing table")?;
    for list in table.services() {
        info!("Service {} ({}): {:?}", list.name(), list.scheme(), list.addresses_list());
    }

    let tls_acceptor = match config.scheme {
        Scheme::Https => {
            let server_config = tls::load_tls_config(&config.cert_file, &config.key_file)
                .map_err(|e| anyhow!(e))
                .with_context(|| {
                    format!(
                        "loading TLS certificate {} and key {}",
                        config.cert_file.display(),
                        config.key_file.display()
                    )
                })?;
            Some(TlsAcceptor::from(server_config))
        }
        Scheme::Http => None,
    };

    let balancer = Balancer::from_config(&config, Arc::new(table))
        .context("building backend TLS configuration")?;
    let balancer = Arc::new(balancer);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let redirect_listener = if config.redirects_http() {
        let plain = SocketAddr::from(([0, 0, 0, 0], 80));
        Some(
            TcpListener::bind(plain)
                .await
                .with_context(|| format!("binding {plain}"))?,
        )
    } else {
        None
    };

    let beacon = Beacon::new(
        config.private_address.clone(),
        config.multicast_address,
        config.multicast_interval,
    )
    .spawn();
    if let Some(plain) = redirect_listener {
        tokio::spawn(serve_https_redirect(plain));
    }

    info!("Listening on {} ({})", addr, config.scheme);
    tokio::select! {
        _ = serve(listener, tls_acceptor, balancer) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for shutdown signal")?;
            info!("Shutting down");
        }
    }

    beacon.abort();
    Ok(())
}
