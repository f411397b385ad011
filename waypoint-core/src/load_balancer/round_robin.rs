//! Round-robin address lists, one per service type.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::policy::Scheme;
use crate::error::{Error, Result};
use crate::state::StateStore;

/// Outcome of [`ServiceList::add_service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The address was appended to the list.
    Added,
    /// The address was already present; nothing changed.
    AlreadyRegistered,
}

#[derive(Debug, Default)]
struct Ring {
    addresses: Vec<String>,
    /// Index of the next address to hand out. Always `< addresses.len()`
    /// when the list is non-empty.
    cursor: usize,
    /// Bumped on every structural change; orders persisted snapshots.
    generation: u64,
}

/// The registered instances of one service type.
///
/// Selection and mutation share a single lock so a selection never observes
/// a cursor that a concurrent removal has invalidated. Every list has its own
/// lock; unrelated service types never contend.
#[derive(Debug)]
pub struct ServiceList {
    name: String,
    scheme: Scheme,
    ring: Mutex<Ring>,
    store: Option<StateStore>,
}

impl ServiceList {
    /// Creates an empty, memory-only list.
    pub fn new(name: impl Into<String>, scheme: Scheme) -> Self {
        Self {
            name: name.into(),
            scheme,
            ring: Mutex::new(Ring::default()),
            store: None,
        }
    }

    /// Creates a list backed by `store`, seeded with whatever it holds.
    pub fn with_store(name: impl Into<String>, scheme: Scheme, store: StateStore) -> Result<Self> {
        let name = name.into();
        let addresses = store.load()?;
        if !addresses.is_empty() {
            info!("Restored {} instance(s) of {}: {:?}", addresses.len(), name, addresses);
        }

        Ok(Self {
            name,
            scheme,
            ring: Mutex::new(Ring {
                addresses,
                ..Ring::default()
            }),
            store: Some(store),
        })
    }

    /// Service type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheme used to reach this service type.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Registers `address`. Registering a known address is not an error.
    pub fn add_service(&self, address: &str) -> Result<Registration> {
        if address.is_empty() {
            return Err(Error::InvalidAddress(address.to_owned()));
        }

        {
            let mut ring = self.ring.lock();
            if ring.addresses.iter().any(|a| a == address) {
                return Ok(Registration::AlreadyRegistered);
            }
            ring.addresses.push(address.to_owned());
            ring.generation += 1;
        }

        self.persist();
        Ok(Registration::Added)
    }

    /// Removes `address`, returning whether it was registered.
    ///
    /// The cursor keeps pointing at the same upcoming address when an
    /// earlier one is removed, and wraps to the start when it falls off the
    /// end.
    pub fn unregister_service(&self, address: &str) -> bool {
        {
            let mut ring = self.ring.lock();
            let Some(index) = ring.addresses.iter().position(|a| a == address) else {
                return false;
            };
            ring.addresses.remove(index);
            if index < ring.cursor {
                ring.cursor -= 1;
            }
            if ring.cursor >= ring.addresses.len() {
                ring.cursor = 0;
            }
            ring.generation += 1;
        }

        self.persist();
        true
    }

    /// A copy of the registered addresses in registration order.
    pub fn addresses_list(&self) -> Vec<String> {
        self.ring.lock().addresses.clone()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.ring.lock().addresses.len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().addresses.is_empty()
    }

    /// Hands out the next address in round-robin order.
    pub fn get_next(&self) -> Result<String> {
        let mut ring = self.ring.lock();
        let len = ring.addresses.len();
        if len == 0 {
            return Err(Error::EmptyList {
                service: self.name.clone(),
            });
        }
        let address = ring.addresses[ring.cursor].clone();
        ring.cursor = (ring.cursor + 1) % len;
        Ok(address)
    }

    // A failed write never rolls back the in-memory change. The snapshot is
    // taken inside the store's lock, so whichever write lands last carries
    // the newest set.
    fn persist(&self) {
        if let Some(store) = &self.store {
            let snapshot = || {
                let ring = self.ring.lock();
                (ring.generation, ring.addresses.clone())
            };
            if let Err(e) = store.save(snapshot) {
                warn!("Unable to persist {} state: {}", self.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn list_with(addresses: &[&str]) -> ServiceList {
        let list = ServiceList::new("worker", Scheme::Http);
        for address in addresses {
            list.add_service(address).unwrap();
        }
        list
    }

    #[test]
    fn test_accessors() {
        let list = ServiceList::new("worker", Scheme::Https);
        assert_eq!(list.name(), "worker");
        assert_eq!(list.scheme(), Scheme::Https);
        assert!(list.is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let list = ServiceList::new("worker", Scheme::Http);
        assert_eq!(list.add_service("a:1").unwrap(), Registration::Added);
        assert_eq!(list.add_service("b:2").unwrap(), Registration::Added);
        assert_eq!(list.add_service("a:1").unwrap(), Registration::AlreadyRegistered);
        assert_eq!(list.addresses_list(), vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_empty_address_is_rejected() {
        let list = ServiceList::new("worker", Scheme::Http);
        assert!(matches!(list.add_service(""), Err(Error::InvalidAddress(_))));
        assert!(list.is_empty());
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let list = list_with(&["a:1"]);
        assert!(!list.unregister_service("b:2"));
        assert!(!ServiceList::new("x", Scheme::Http).unregister_service("a:1"));
        assert_eq!(list.addresses_list(), vec!["a:1"]);
    }

    #[test]
    fn test_get_next_on_empty_list() {
        let list = ServiceList::new("worker", Scheme::Http);
        for _ in 0..3 {
            match list.get_next() {
                Err(Error::EmptyList { service }) => assert_eq!(service, "worker"),
                other => panic!("expected EmptyList, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_list_message() {
        let err = ServiceList::new("worker", Scheme::Http).get_next().unwrap_err();
        assert!(err.to_string().contains("no service instance is responding"));
    }

    #[test]
    fn test_removing_before_cursor_keeps_next_in_line() {
        let list = list_with(&["a:1", "b:2", "c:3"]);
        assert_eq!(list.get_next().unwrap(), "a:1");
        assert!(list.unregister_service("a:1"));
        assert_eq!(list.get_next().unwrap(), "b:2");
        assert_eq!(list.get_next().unwrap(), "c:3");
        assert_eq!(list.get_next().unwrap(), "b:2");
    }

    #[test]
    fn test_removing_at_end_wraps_cursor() {
        let list = list_with(&["a:1", "b:2", "c:3"]);
        list.get_next().unwrap();
        list.get_next().unwrap();
        assert!(list.unregister_service("c:3"));
        assert_eq!(list.get_next().unwrap(), "a:1");
    }

    #[test]
    fn test_removing_last_address_empties_list() {
        let list = list_with(&["a:1"]);
        list.get_next().unwrap();
        assert!(list.unregister_service("a:1"));
        assert!(list.get_next().is_err());
        list.add_service("b:2").unwrap();
        assert_eq!(list.get_next().unwrap(), "b:2");
    }

    #[test]
    fn test_concurrent_registration_keeps_each_address_once() {
        let list = Arc::new(ServiceList::new("worker", Scheme::Http));
        std::thread::scope(|s| {
            for t in 0..8 {
                let list = Arc::clone(&list);
                s.spawn(move || {
                    for i in 0..50 {
                        list.add_service(&format!("10.0.{t}.{i}:80")).unwrap();
                        // Every address is registered twice; the second is a no-op.
                        list.add_service(&format!("10.0.{t}.{i}:80")).unwrap();
                    }
                });
            }
        });

        let addresses = list.addresses_list();
        assert_eq!(addresses.len(), 400);
        assert_eq!(addresses.iter().collect::<HashSet<_>>().len(), 400);

        // Each thread's own calls stay in call order.
        for t in 0..8 {
            let own: Vec<_> = addresses
                .iter()
                .filter(|a| a.starts_with(&format!("10.0.{t}.")))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..50).map(|i| format!("10.0.{t}.{i}:80")).collect();
            assert_eq!(own, expected);
        }
    }

    #[test]
    fn test_concurrent_selection_and_removal_never_panics() {
        let list = Arc::new(list_with(&["a:1", "b:2", "c:3", "d:4"]));
        std::thread::scope(|s| {
            for _ in 0..4 {
                let list = Arc::clone(&list);
                s.spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(address) = list.get_next() {
                            assert!(!address.is_empty());
                        }
                    }
                });
            }
            let list = Arc::clone(&list);
            s.spawn(move || {
                for round in 0..200 {
                    let host = (b'a' + (round % 4) as u8) as char;
                    let address = format!("{}:{}", host, round % 4 + 1);
                    list.unregister_service(&address);
                    list.add_service(&address).unwrap();
                }
            });
        });
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_persists_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path(), "worker", Scheme::Http).unwrap();
        let list = ServiceList::with_store("worker", Scheme::Http, store).unwrap();
        list.add_service("a:1").unwrap();
        list.add_service("b:2").unwrap();
        list.unregister_service("a:1");

        let store = StateStore::open(dir.path(), "worker", Scheme::Http).unwrap();
        let restored = ServiceList::with_store("worker", Scheme::Http, store).unwrap();
        assert_eq!(restored.addresses_list(), vec!["b:2"]);
        assert_eq!(restored.get_next().unwrap(), "b:2");
    }

    #[test]
    fn test_persistence_failure_keeps_registration() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let store = StateStore::open(&state_dir, "worker", Scheme::Http).unwrap();
        let list = ServiceList::with_store("worker", Scheme::Http, store).unwrap();

        // Replace the directory with a plain file so every write fails.
        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, b"").unwrap();

        assert_eq!(list.add_service("a:1").unwrap(), Registration::Added);
        assert_eq!(list.get_next().unwrap(), "a:1");
    }

    #[test]
    fn test_late_write_after_failure_stores_newest_set() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let store = StateStore::open(&state_dir, "worker", Scheme::Http).unwrap();
        let list = ServiceList::with_store("worker", Scheme::Http, store).unwrap();
        list.add_service("a:1").unwrap();

        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, b"").unwrap();
        list.add_service("b:2").unwrap();

        // The disk recovers before a write from the earlier mutation lands.
        std::fs::remove_file(&state_dir).unwrap();
        std::fs::create_dir(&state_dir).unwrap();
        list.persist();

        let store = StateStore::open(&state_dir, "worker", Scheme::Http).unwrap();
        assert_eq!(store.load().unwrap(), vec!["a:1", "b:2"]);
    }

    proptest! {
        #[test]
        fn prop_addresses_keep_registration_order(ids in proptest::collection::hash_set(0u16..5000, 0..40)) {
            let expected: Vec<String> = ids.iter().map(|i| format!("10.1.0.{i}:8080")).collect();
            let list = ServiceList::new("worker", Scheme::Http);
            for address in &expected {
                prop_assert_eq!(list.add_service(address).unwrap(), Registration::Added);
            }
            prop_assert_eq!(list.addresses_list(), expected);
        }

        #[test]
        fn prop_round_robin_visits_each_once_per_cycle(n in 1usize..30, start in 0usize..60) {
            let list = ServiceList::new("worker", Scheme::Http);
            for i in 0..n {
                list.add_service(&format!("10.2.0.{i}:80")).unwrap();
            }
            // Start mid-cycle: any window of n selections is a full cycle.
            for _ in 0..start {
                list.get_next().unwrap();
            }
            let cycle: Vec<String> = (0..n).map(|_| list.get_next().unwrap()).collect();
            let unique: HashSet<_> = cycle.iter().collect();
            prop_assert_eq!(unique.len(), n);
            prop_assert_eq!(list.get_next().unwrap(), cycle[0].clone());
        }
    }
}
