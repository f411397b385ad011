//! Backend selection for a request path.

use crate::domain::policy::Scheme;
use crate::domain::routing::RoutingTable;
use crate::error::{Error, Result};

/// Where a request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Name of the service type that matched.
    pub service: String,
    /// Scheme of the matched service type.
    pub scheme: Scheme,
    /// Selected instance, `host:port`.
    pub address: String,
    /// Path to request on the instance.
    pub path: String,
}

/// Resolves `path` and picks the next instance of the matched service type.
///
/// Fails with [`Error::NoRoute`] when nothing matches the path and with
/// [`Error::EmptyList`] when the matched type has no instance. Neither is
/// retried.
pub fn select(table: &RoutingTable, path: &str) -> Result<Selection> {
    let route = table.resolve(path).ok_or_else(|| Error::NoRoute {
        path: path.to_owned(),
    })?;
    let address = route.list.get_next()?;

    Ok(Selection {
        service: route.list.name().to_owned(),
        scheme: route.list.scheme(),
        address,
        path: route.path,
    })
}
