//! Sends directed requests to backends.

use std::net::{IpAddr, SocketAddr};

use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::header::{HeaderName, HeaderValue, CONNECTION};
use hyper::{HeaderMap, Request, Response, Uri, Version};
use tracing::trace;

use crate::connection_pool::{ConnectionPool, Connector, Upstream};
use crate::error::{ProxyError, Result};

/// Header listing the client and any proxies before us.
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Removes connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(hyper::header::UPGRADE);
}

/// Adds the client address to `X-Forwarded-For`, after any earlier hops.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client)
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

/// Takes the backend out of an absolute request URI, leaving the request in
/// origin form as HTTP/1.1 expects.
pub fn detach_upstream<B>(req: &mut Request<B>) -> Result<Upstream> {
    let upstream = Upstream::from_uri(req.uri())
        .ok_or_else(|| ProxyError::MissingUpstream(req.uri().to_string()))?;
    let origin: Uri = req
        .uri()
        .path_and_query()
        .cloned()
        .map(Uri::from)
        .unwrap_or_else(|| Uri::from_static("/"));
    *req.uri_mut() = origin;
    *req.version_mut() = Version::HTTP_11;
    Ok(upstream)
}

/// Forwards requests over pooled connections.
#[derive(Debug, Clone)]
pub struct Forwarder {
    pool: ConnectionPool,
    connector: Connector,
}

impl Forwarder {
    /// Creates a forwarder with an empty pool.
    pub fn new(connector: Connector) -> Self {
        Self {
            pool: ConnectionPool::new(),
            connector,
        }
    }

    /// Sends a directed request and returns the backend's response head with
    /// its body still streaming.
    pub async fn forward(
        &self,
        mut req: Request<Incoming>,
        client: SocketAddr,
    ) -> Result<Response<Incoming>> {
        let upstream = detach_upstream(&mut req)?;
        strip_hop_by_hop(req.headers_mut());
        append_forwarded_for(req.headers_mut(), client.ip());

        let mut sender = self.checkout(&upstream).await?;
        let mut response = sender
            .send_request(req)
            .await
            .map_err(|source| ProxyError::Request {
                address: upstream.address.clone(),
                source,
            })?;
        self.pool.release(upstream, sender);

        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }

    /// Sends an upgrade request over a fresh connection that is never
    /// pooled, so the backend side can be taken over after a `101`.
    pub async fn open_upgrade(&self, mut req: Request<Incoming>) -> Result<Response<Incoming>> {
        let upstream = detach_upstream(&mut req)?;
        let mut sender = self.connector.handshake_with_upgrades(&upstream).await?;
        sender
            .send_request(req)
            .await
            .map_err(|source| ProxyError::Request {
                address: upstream.address.clone(),
                source,
            })
    }

    // A pooled connection that turns out closed is replaced before anything
    // is sent on it.
    async fn checkout(&self, upstream: &Upstream) -> Result<SendRequest<Incoming>> {
        while let Some(mut sender) = self.pool.try_pop(upstream) {
            if sender.ready().await.is_ok() {
                trace!("Reusing connection to {}", upstream);
                return Ok(sender);
            }
        }
        trace!("Opening connection to {}", upstream);
        self.connector.handshake(upstream).await
    }
}
