//! Routing table mapping path prefixes to service lists.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::domain::policy::{RedirectionPolicy, Scheme};
use crate::error::{Error, Result};
use crate::load_balancer::round_robin::ServiceList;
use crate::state::StateStore;

/// The catch-all prefix used when no other prefix matches.
pub const CATCH_ALL: &str = "/";

/// The result of resolving a request path.
#[derive(Debug, Clone)]
pub struct Route {
    /// Path to send to the backend: the remainder after the matched prefix,
    /// or the full original path for a catch-all match.
    pub path: String,
    /// List serving the matched prefix.
    pub list: Arc<ServiceList>,
}

/// Service type and prefix indexes, fixed after startup.
///
/// The key sets never change, so the table is shared without locking; only
/// the address contents of each [`ServiceList`] mutate, under their own lock.
#[derive(Debug)]
pub struct RoutingTable {
    services: HashMap<String, Arc<ServiceList>>,
    prefixes: HashMap<String, Arc<ServiceList>>,
}

impl RoutingTable {
    /// Builds both indexes from the configured policies.
    ///
    /// One list is created per service type and seeded from `state_dir`
    /// when given. Any malformed policy aborts startup.
    pub fn init(policies: &[RedirectionPolicy], state_dir: Option<&Path>) -> Result<Self> {
        if policies.is_empty() {
            return Err(Error::Config("no redirection policies configured".to_owned()));
        }

        let mut services: HashMap<String, Arc<ServiceList>> = HashMap::new();
        let mut prefixes: HashMap<String, Arc<ServiceList>> = HashMap::new();

        for policy in policies {
            let scheme = policy.validate()?;

            let list = match services.entry(policy.name.clone()) {
                Entry::Occupied(entry) => {
                    let list = entry.get();
                    if list.scheme() != scheme {
                        return Err(Error::Config(format!(
                            "service {} is declared with both {} and {}",
                            policy.name,
                            list.scheme(),
                            scheme
                        )));
                    }
                    Arc::clone(list)
                }
                Entry::Vacant(entry) => {
                    let list = Arc::new(Self::build_list(&policy.name, scheme, state_dir)?);
                    Arc::clone(entry.insert(list))
                }
            };

            if prefixes.insert(policy.prefix.clone(), list).is_some() {
                return Err(Error::Config(format!(
                    "path prefix {} is configured twice",
                    policy.prefix
                )));
            }
            info!("Redirecting {} to {} ({})", policy.prefix, policy.name, scheme);
        }

        Ok(Self { services, prefixes })
    }

    fn build_list(name: &str, scheme: Scheme, state_dir: Option<&Path>) -> Result<ServiceList> {
        match state_dir {
            Some(dir) => {
                ServiceList::with_store(name, scheme, StateStore::open(dir, name, scheme)?)
            }
            None => Ok(ServiceList::new(name, scheme)),
        }
    }

    /// Finds the list serving `path`.
    ///
    /// The first segment is looked up as an exact prefix; the backend then
    /// sees only the remainder. Without such a prefix the catch-all entry
    /// receives the full path. `None` when neither exists.
    pub fn resolve(&self, path: &str) -> Option<Route> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

        if let Some(list) = self.prefixes.get(&format!("/{first}")) {
            return Some(Route {
                path: format!("/{rest}"),
                list: Arc::clone(list),
            });
        }

        self.prefixes.get(CATCH_ALL).map(|list| Route {
            path: path.to_owned(),
            list: Arc::clone(list),
        })
    }

    /// Looks up a service type by name.
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceList>> {
        self.services.get(name)
    }

    /// Looks up a service type by name, failing for unknown names.
    pub fn require(&self, name: &str) -> Result<&Arc<ServiceList>> {
        self.service(name)
            .ok_or_else(|| Error::UnknownService(name.to_owned()))
    }

    /// Every configured service type, in no particular order.
    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceList>> {
        self.services.values()
    }
}

/// A shared reference to the routing table.
pub type SharedRoutingTable = Arc<RoutingTable>;

#[cfg(test)]
mod tests {
    use super::*;

    fn table(policies: &[(&str, &str, &str)]) -> RoutingTable {
        let policies: Vec<_> = policies
            .iter()
            .map(|(prefix, name, scheme)| RedirectionPolicy::new(*prefix, *name, *scheme))
            .collect();
        RoutingTable::init(&policies, None).unwrap()
    }

    #[test]
    fn test_prefix_match_strips_prefix() {
        let table = table(&[("/api", "a", "http"), ("/", "b", "https")]);
        let route = table.resolve("/api/v1/x").unwrap();
        assert_eq!(route.list.name(), "a");
        assert_eq!(route.path, "/v1/x");
    }

    #[test]
    fn test_bare_prefix_resolves_to_root() {
        let table = table(&[("/api", "a", "http")]);
        assert_eq!(table.resolve("/api").unwrap().path, "/");
        assert_eq!(table.resolve("/api/").unwrap().path, "/");
    }

    #[test]
    fn test_catch_all_keeps_full_path() {
        let table = table(&[("/api", "a", "http"), ("/", "b", "https")]);
        let route = table.resolve("/other").unwrap();
        assert_eq!(route.list.name(), "b");
        assert_eq!(route.path, "/other");

        let nested = table.resolve("/other/deeper/path").unwrap();
        assert_eq!(nested.list.name(), "b");
        assert_eq!(nested.path, "/other/deeper/path");

        assert_eq!(table.resolve("/").unwrap().path, "/");
    }

    #[test]
    fn test_prefix_is_matched_exactly() {
        let table = table(&[("/api", "a", "http"), ("/", "b", "http")]);
        assert_eq!(table.resolve("/apiv2/x").unwrap().list.name(), "b");
    }

    #[test]
    fn test_no_catch_all_means_no_route() {
        let table = table(&[("/api", "a", "http")]);
        assert!(table.resolve("/other").is_none());
        assert!(table.resolve("/").is_none());
    }

    #[test]
    fn test_prefixes_share_one_list() {
        let table = table(&[
            ("/sim", "simulation", "http"),
            ("/simulations", "simulation", "http"),
        ]);
        let a = table.resolve("/sim/x").unwrap().list;
        let b = table.resolve("/simulations/y").unwrap().list;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.services().count(), 1);

        a.add_service("10.0.0.1:80").unwrap();
        assert_eq!(b.addresses_list(), vec!["10.0.0.1:80"]);
    }

    #[test]
    fn test_service_lookup() {
        let table = table(&[("/work", "worker", "http")]);
        assert_eq!(table.service("worker").unwrap().name(), "worker");
        assert!(table.service("nope").is_none());
        assert!(matches!(table.require("nope"), Err(Error::UnknownService(_))));
    }

    #[test]
    fn test_init_rejects_bad_configuration() {
        assert!(matches!(RoutingTable::init(&[], None), Err(Error::Config(_))));

        let duplicate_prefix = [
            RedirectionPolicy::new("/a", "x", "http"),
            RedirectionPolicy::new("/a", "y", "http"),
        ];
        assert!(matches!(RoutingTable::init(&duplicate_prefix, None), Err(Error::Config(_))));

        let conflicting_scheme = [
            RedirectionPolicy::new("/a", "x", "http"),
            RedirectionPolicy::new("/b", "x", "https"),
        ];
        assert!(matches!(RoutingTable::init(&conflicting_scheme, None), Err(Error::Config(_))));

        let missing_scheme = [RedirectionPolicy::new("/a", "x", "")];
        assert!(matches!(RoutingTable::init(&missing_scheme, None), Err(Error::Config(_))));
    }

    #[test]
    fn test_init_seeds_from_state_directory() {
        let dir = tempfile::tempdir().unwrap();
        let policies = [RedirectionPolicy::new("/work", "worker", "http")];

        let first = RoutingTable::init(&policies, Some(dir.path())).unwrap();
        first.service("worker").unwrap().add_service("10.0.0.1:9000").unwrap();
        first.service("worker").unwrap().add_service("10.0.0.2:9000").unwrap();
        drop(first);

        let restarted = RoutingTable::init(&policies, Some(dir.path())).unwrap();
        assert_eq!(
            restarted.service("worker").unwrap().addresses_list(),
            vec!["10.0.0.1:9000", "10.0.0.2:9000"]
        );
    }

    #[test]
    fn test_init_fails_on_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("worker.json"), b"[]").unwrap();
        let policies = [RedirectionPolicy::new("/work", "worker", "http")];
        assert!(matches!(
            RoutingTable::init(&policies, Some(dir.path())),
            Err(Error::CorruptState { .. })
        ));
    }
}
