//! Rewrites inbound requests into backend requests.

use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Request, Uri};
use tracing::{info, warn};
use waypoint_core::{select, Error, Scheme, Selection, SharedRoutingTable};

/// Header carrying the scheme the client used to reach the balancer.
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Drops the query string from a request target unless `verbose` is set.
pub fn cut_params(target: &str, verbose: bool) -> &str {
    if verbose {
        return target;
    }
    target.split('?').next().unwrap_or(target)
}

/// Picks a backend for each request and points the request at it.
#[derive(Debug, Clone)]
pub struct Director {
    table: SharedRoutingTable,
    public_scheme: Scheme,
    verbose: bool,
}

impl Director {
    /// `public_scheme` is the balancer's own scheme; `verbose` keeps query
    /// strings in log lines.
    pub fn new(table: SharedRoutingTable, public_scheme: Scheme, verbose: bool) -> Self {
        Self {
            table,
            public_scheme,
            verbose,
        }
    }

    /// Rewrites `req` in place to target the next instance of the service
    /// type mounted at its path.
    ///
    /// On success the URI is absolute: the list's scheme, the selected
    /// address, and the resolved path with the original query. Routing and
    /// availability failures are logged and returned untouched so the caller
    /// can answer through the error responder.
    pub fn direct<B>(&self, req: &mut Request<B>) -> Result<Selection, Error> {
        let original = target(req.uri()).to_owned();

        req.headers_mut().append(
            X_FORWARDED_PROTO.clone(),
            HeaderValue::from_static(self.public_scheme.as_str()),
        );

        // HTTP/2 clients send the host only as the URI authority.
        if !req.headers().contains_key(HOST) {
            if let Some(host) = req
                .uri()
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                req.headers_mut().insert(HOST, host);
            }
        }

        let rewritten = select(&self.table, req.uri().path()).and_then(|selection| {
            let uri = backend_uri(&selection, req.uri().query())?;
            Ok((selection, uri))
        });

        match rewritten {
            Ok((selection, uri)) => {
                info!(
                    "[{}] {:?} redirect to {:?}",
                    req.method(),
                    cut_params(&original, self.verbose),
                    cut_params(&uri.to_string(), self.verbose)
                );
                *req.uri_mut() = uri;
                Ok(selection)
            }
            Err(err) => {
                warn!(
                    "[{}] {:?} Unable to redirect: {}",
                    req.method(),
                    cut_params(&original, self.verbose),
                    err
                );
                Err(err)
            }
        }
    }
}

fn target(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

fn backend_uri(selection: &Selection, query: Option<&str>) -> Result<Uri, Error> {
    let path_and_query = match query {
        Some(query) => format!("{}?{}", selection.path, query),
        None => selection.path.clone(),
    };
    Uri::builder()
        .scheme(selection.scheme.as_str())
        .authority(selection.address.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|_| Error::InvalidAddress(selection.address.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_core::{RedirectionPolicy, RoutingTable};

    fn director(policies: &[RedirectionPolicy]) -> (Director, SharedRoutingTable) {
        let table = Arc::new(RoutingTable::init(policies, None).unwrap());
        (Director::new(Arc::clone(&table), Scheme::Https, false), table)
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).header(HOST, "lb.example").body(()).unwrap()
    }

    #[test]
    fn test_cut_params() {
        assert_eq!(cut_params("/a?token=secret", false), "/a");
        assert_eq!(cut_params("/a?token=secret", true), "/a?token=secret");
        assert_eq!(cut_params("/a", false), "/a");
    }

    #[test]
    fn test_rewrites_to_registered_worker() {
        let (director, table) = director(&[RedirectionPolicy::new("/work", "worker", "http")]);
        table.service("worker").unwrap().add_service("10.0.0.1:9000").unwrap();

        let mut req = get("/work/status");
        let selection = director.direct(&mut req).unwrap();

        assert_eq!(selection.address, "10.0.0.1:9000");
        assert_eq!(req.uri().scheme_str(), Some("http"));
        assert_eq!(req.uri().authority().unwrap().as_str(), "10.0.0.1:9000");
        assert_eq!(req.uri().path(), "/status");
        assert_eq!(req.headers()[&X_FORWARDED_PROTO], "https");
        assert_eq!(req.headers()[HOST], "lb.example");
    }

    #[test]
    fn test_keeps_query_and_full_path_for_catch_all() {
        let (director, table) = director(&[
            RedirectionPolicy::new("/work", "worker", "http"),
            RedirectionPolicy::new("/", "web", "https"),
        ]);
        table.service("web").unwrap().add_service("web-1:8443").unwrap();

        let mut req = get("/other/page?lang=en");
        director.direct(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "https://web-1:8443/other/page?lang=en");
    }

    #[test]
    fn test_failures_leave_uri_untouched() {
        let (director, _table) = director(&[RedirectionPolicy::new("/work", "worker", "http")]);

        let mut req = get("/work/status");
        assert!(matches!(director.direct(&mut req), Err(Error::EmptyList { .. })));
        assert_eq!(req.uri().to_string(), "/work/status");

        let mut req = get("/elsewhere");
        assert!(matches!(director.direct(&mut req), Err(Error::NoRoute { .. })));
    }

    #[test]
    fn test_unusable_address_is_reported() {
        let (director, table) = director(&[RedirectionPolicy::new("/work", "worker", "http")]);
        table.service("worker").unwrap().add_service("not an authority").unwrap();

        let mut req = get("/work/status");
        assert!(matches!(director.direct(&mut req), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_copies_authority_into_host() {
        let (director, table) = director(&[RedirectionPolicy::new("/", "web", "http")]);
        table.service("web").unwrap().add_service("web-1:80").unwrap();

        let mut req = Request::builder().uri("https://lb.example/x").body(()).unwrap();
        director.direct(&mut req).unwrap();
        assert_eq!(req.headers()[HOST], "lb.example");
    }
}
