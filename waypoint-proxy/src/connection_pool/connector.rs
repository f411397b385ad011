//! Opens plain or TLS connections to backends and performs the HTTP/1.1
//! handshake on them.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use waypoint_core::Scheme;

use crate::connection_pool::pool::Upstream;
use crate::error::{ProxyError, Result};

/// A byte stream to a backend, encrypted for `https` service types.
pub enum BackendStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials backends.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
}

impl Connector {
    /// Creates a connector using `tls_config` for `https` backends.
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(tls_config),
        }
    }

    /// Opens a stream to `upstream`, wrapping it in TLS when needed.
    pub async fn connect(&self, upstream: &Upstream) -> Result<BackendStream> {
        let tcp = TcpStream::connect(upstream.address.as_str())
            .await
            .map_err(|source| ProxyError::Connect {
                address: upstream.address.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        match upstream.scheme {
            Scheme::Http => Ok(BackendStream::Plain(tcp)),
            Scheme::Https => {
                let server_name = ServerName::try_from(upstream.host())
                    .map_err(|_| ProxyError::InvalidAddress(upstream.address.clone()))?
                    .to_owned();
                let tls = self
                    .tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|source| ProxyError::Tls {
                        address: upstream.address.clone(),
                        source,
                    })?;
                Ok(BackendStream::Tls(Box::new(tls)))
            }
        }
    }

    /// Opens a keep-alive HTTP/1.1 connection suitable for pooling.
    pub async fn handshake(&self, upstream: &Upstream) -> Result<SendRequest<Incoming>> {
        let io = TokioIo::new(self.connect(upstream).await?);
        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|source| ProxyError::Handshake {
                address: upstream.address.clone(),
                source,
            })?;

        let address = upstream.address.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("Connection to backend {} closed: {}", address, err);
            }
        });
        Ok(sender)
    }

    /// Opens a dedicated HTTP/1.1 connection that may be taken over by a
    /// protocol upgrade. Never pooled.
    pub async fn handshake_with_upgrades(
        &self,
        upstream: &Upstream,
    ) -> Result<SendRequest<Incoming>> {
        let io = TokioIo::new(self.connect(upstream).await?);
        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|source| ProxyError::Handshake {
                address: upstream.address.clone(),
                source,
            })?;

        let address = upstream.address.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.with_upgrades().await {
                debug!("Upgradable connection to backend {} closed: {}", address, err);
            }
        });
        Ok(sender)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}
