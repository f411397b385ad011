//! Server module for handling incoming connections and dispatching requests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, HOST, LOCATION};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};
use waypoint_admin::{error_response, AdminApi};
use waypoint_core::SharedRoutingTable;

use crate::config::Config;
use crate::connection_pool::Connector;
use crate::director::Director;
use crate::upstream::Forwarder;
use crate::{tls, tunnel};

/// Body type of every response the balancer writes.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Boxes a generated response body.
pub fn full(response: Response<Full<Bytes>>) -> Response<ProxyBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// Boxes a streamed backend response body.
pub fn boxed<B>(response: Response<B>) -> Response<ProxyBody>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    response.map(|body| body.boxed())
}

/// Everything needed to answer a request.
#[derive(Debug)]
pub struct Balancer {
    director: Director,
    admin: AdminApi,
    forwarder: Forwarder,
}

impl Balancer {
    /// Assembles the request pipeline.
    pub fn new(director: Director, admin: AdminApi, forwarder: Forwarder) -> Self {
        Self {
            director,
            admin,
            forwarder,
        }
    }

    /// Wires the pipeline for `config` around a shared routing table.
    pub fn from_config(config: &Config, table: SharedRoutingTable) -> Result<Self, rustls::Error> {
        let director = Director::new(Arc::clone(&table), config.scheme, config.verbose);
        let admin = AdminApi::new(table, config.gate());
        let forwarder = Forwarder::new(Connector::new(tls::backend_client_config()?));
        Ok(Self::new(director, admin, forwarder))
    }

    /// Answers one request from `client`.
    ///
    /// Management paths are served locally; upgrade requests are tunnelled;
    /// everything else is directed and forwarded.
    pub async fn handle(&self, req: Request<Incoming>, client: SocketAddr) -> Response<ProxyBody> {
        if AdminApi::owns(req.uri().path()) {
            return full(self.admin.serve(req).await);
        }
        if tunnel::is_upgrade(&req) {
            return tunnel::open(&self.director, &self.forwarder, req, client).await;
        }
        self.proxy(req, client).await
    }

    async fn proxy(&self, mut req: Request<Incoming>, client: SocketAddr) -> Response<ProxyBody> {
        if let Err(err) = self.director.direct(&mut req) {
            return full(error_response(Some(&err.to_string())));
        }

        let target = req.uri().to_string();
        match self.forwarder.forward(req, client).await {
            Ok(response) => boxed(response),
            Err(err) => {
                error!("Proxying to {} failed: {}", target, err);
                full(error_response(None))
            }
        }
    }
}

async fn serve_connection<I>(io: I, balancer: Arc<Balancer>, client: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let balancer = Arc::clone(&balancer);
        async move { Ok::<_, Infallible>(balancer.handle(req, client).await) }
    });

    if let Err(err) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(io), service)
        .await
    {
        debug!("Error serving connection from {}: {:?}", client, err);
    }
}

/// Accepts connections on `listener` forever, terminating TLS when an
/// acceptor is given. One task is spawned per connection.
pub async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    balancer: Arc<Balancer>,
) {
    loop {
        let (stream, client) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let balancer = Arc::clone(&balancer);

        if let Some(acceptor) = &tls_acceptor {
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_connection(tls_stream, balancer, client).await,
                    Err(e) => debug!("TLS handshake with {} failed: {}", client, e),
                }
            });
        } else {
            tokio::task::spawn(serve_connection(stream, balancer, client));
        }
    }
}

/// The `301` sent by the plain listener when the balancer runs on 443.
pub fn https_redirect<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default();
    let target = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(location) = HeaderValue::from_str(&format!("https://{host}{target}")) {
        response.headers_mut().insert(LOCATION, location);
    }
    response
}

/// Redirects every plain HTTP request on `listener` to HTTPS.
pub async fn serve_https_redirect(listener: TcpListener) {
    loop {
        let (stream, client) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        tokio::task::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(https_redirect(&req))
            });
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Error serving redirect to {}: {:?}", client, err);
            }
        });
    }
}
