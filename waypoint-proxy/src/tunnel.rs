//! Protocol upgrade tunnelling (WebSocket and friends).
//!
//! An upgrade request is directed like any other request, then replayed on a
//! dedicated backend connection. Once the backend switches protocols both
//! connections are taken over and bytes are relayed until either side goes
//! away.

use std::io;
use std::net::SocketAddr;

use hyper::body::Incoming;
use hyper::header::{CONNECTION, UPGRADE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use crate::director::Director;
use crate::server::{boxed, full, ProxyBody};
use crate::upstream::{append_forwarded_for, Forwarder};

/// Whether the request asks to switch protocols.
pub fn is_upgrade<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && req.headers().contains_key(UPGRADE)
}

/// Which side ended a relay, with the bytes it had sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// The client stopped sending.
    Client(u64),
    /// The backend stopped sending.
    Backend(u64),
}

/// Copies bytes both ways until either direction ends, then drops both
/// streams so neither is left dangling.
pub async fn relay<C, B>(client: C, backend: B) -> io::Result<Closed>
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    tokio::select! {
        sent = tokio::io::copy(&mut client_read, &mut backend_write) => {
            sent.map(Closed::Client)
        }
        received = tokio::io::copy(&mut backend_read, &mut client_write) => {
            received.map(Closed::Backend)
        }
    }
}

/// Tunnels an upgrade request to the next instance of its service type.
///
/// Routing failures are answered by the error responder exactly like plain
/// requests; transport failures are logged and answered with the generic
/// message. A backend that declines the upgrade has its response passed
/// through as-is.
pub async fn open(
    director: &Director,
    forwarder: &Forwarder,
    mut req: Request<Incoming>,
    client: SocketAddr,
) -> Response<ProxyBody> {
    if let Err(err) = director.direct(&mut req) {
        return full(waypoint_admin::error_response(Some(&err.to_string())));
    }
    append_forwarded_for(req.headers_mut(), client.ip());

    let target = req.uri().to_string();
    let client_upgrade = hyper::upgrade::on(&mut req);

    let mut response = match forwarder.open_upgrade(req).await {
        Ok(response) => response,
        Err(err) => {
            error!("Upgrade to {} failed: {}", target, err);
            return full(waypoint_admin::error_response(None));
        }
    };

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!("Backend {} declined upgrade with {}", target, response.status());
        return boxed(response);
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    tokio::spawn(async move {
        let (client_io, backend_io) = match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok(upgraded) => upgraded,
            Err(err) => {
                warn!("Upgrade to {} did not complete: {}", target, err);
                return;
            }
        };
        match relay(TokioIo::new(client_io), TokioIo::new(backend_io)).await {
            Ok(closed) => debug!("Tunnel to {} closed: {:?}", target, closed),
            Err(err) => debug!("Tunnel to {} broke: {}", target, err),
        }
    });

    boxed(response)
}
