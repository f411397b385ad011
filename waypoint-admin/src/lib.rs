//! Waypoint Admin Control Plane
//!
//! The management HTTP endpoints through which backend instances register
//! and deregister themselves, plus the listing endpoint and the canonical
//! JSON error responder used for unroutable requests.

#![deny(missing_docs)]

pub mod handlers;
pub mod params;
pub mod response;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::WWW_AUTHENTICATE;
use hyper::{Request, Response, StatusCode};
use tracing::info;
use waypoint_core::SharedRoutingTable;
use waypoint_filters::{Gate, Rejection};

pub use handlers::Operation;
pub use response::{error_response, status_response, DEFAULT_ERROR_MESSAGE};

use params::Params;

/// Largest form body accepted on a management endpoint.
const MAX_FORM_BYTES: usize = 64 * 1024;

/// The management endpoints served by the balancer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/register`, behind the gate.
    Register,
    /// `/deregister`, behind the gate.
    Deregister,
    /// `/list`.
    List,
    /// `/error`.
    Error,
}

impl Endpoint {
    /// Maps an exact request path to its endpoint.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/register" => Some(Endpoint::Register),
            "/deregister" => Some(Endpoint::Deregister),
            "/list" => Some(Endpoint::List),
            "/error" => Some(Endpoint::Error),
            _ => None,
        }
    }

    fn gated(self) -> bool {
        matches!(self, Endpoint::Register | Endpoint::Deregister)
    }
}

/// Serves the management endpoints against the shared routing table.
#[derive(Debug)]
pub struct AdminApi {
    table: SharedRoutingTable,
    gate: Gate,
}

impl AdminApi {
    /// Creates the API; `gate` guards registration and deregistration.
    pub fn new(table: SharedRoutingTable, gate: Gate) -> Self {
        Self { table, gate }
    }

    /// Whether `path` is a management endpoint rather than proxied traffic.
    pub fn owns(path: &str) -> bool {
        Endpoint::from_path(path).is_some()
    }

    /// Handles one management request and logs its outcome.
    pub async fn serve<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let uri = req.uri().clone();

        let (response, message) = match self.dispatch(req).await {
            Ok(response) => (response, String::new()),
            Err(rejection) => {
                let mut response = status_response(rejection.status, &rejection.message);
                if let Some(challenge) = rejection.challenge {
                    response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
                }
                (response, rejection.message)
            }
        };

        info!(
            "[{}] {:?} Response: {} {}",
            method,
            uri.to_string(),
            response.status().as_u16(),
            message
        );
        response
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Rejection>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let endpoint = Endpoint::from_path(req.uri().path())
            .ok_or_else(|| Rejection::new(StatusCode::NOT_FOUND, "Not found"))?;

        if endpoint.gated() {
            self.gate.check(req.uri(), req.headers())?;
        }

        let params = read_params(req).await?;
        match endpoint {
            Endpoint::Register => handlers::manage(&self.table, Operation::Register, &params),
            Endpoint::Deregister => handlers::manage(&self.table, Operation::Deregister, &params),
            Endpoint::List => handlers::list(&self.table, &params),
            Endpoint::Error => Ok(handlers::redirection_error(&params)),
        }
    }
}

async fn read_params<B>(req: Request<B>) -> Result<Params, Rejection>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    if !params::is_form(&parts.headers) {
        return Ok(Params::parse(parts.uri.query(), None));
    }

    let form = Limited::new(body, MAX_FORM_BYTES)
        .collect()
        .await
        .map_err(|e| {
            Rejection::new(
                StatusCode::BAD_REQUEST,
                format!("Unable to read request body: {e}"),
            )
        })?
        .to_bytes();
    Ok(Params::parse(parts.uri.query(), Some(&form)))
}
