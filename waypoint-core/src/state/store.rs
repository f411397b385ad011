//! Per-service state files.
//!
//! Each service type owns one JSON file, `<dir>/<name>.json`, holding its
//! current address set. Writes go to a sibling temporary file which is synced
//! and renamed over the old one, so a crash mid-write leaves the previous
//! snapshot intact.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::policy::Scheme;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct Snapshot<'a> {
    name: &'a str,
    scheme: Scheme,
    addresses: &'a [String],
}

#[derive(Deserialize)]
struct PersistedState {
    name: String,
    scheme: Scheme,
    addresses: Vec<String>,
}

/// On-disk home of one service type's address set.
#[derive(Debug)]
pub struct StateStore {
    name: String,
    scheme: Scheme,
    path: PathBuf,
    /// Generation of the newest snapshot on disk.
    written: Mutex<u64>,
}

impl StateStore {
    /// Opens the store for `name` under `dir`, creating the directory if needed.
    pub fn open(dir: &Path, name: &str, scheme: Scheme) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| Error::Persistence {
            path: dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            name: name.to_owned(),
            scheme,
            path: dir.join(format!("{name}.json")),
            written: Mutex::new(0),
        })
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted addresses.
    ///
    /// A missing file is an empty list. Anything unreadable is an error so
    /// registrations are never dropped silently.
    pub fn load(&self) -> Result<Vec<String>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::Persistence {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: PersistedState =
            serde_json::from_slice(&raw).map_err(|e| self.corrupt(e.to_string()))?;

        if state.name != self.name {
            return Err(self.corrupt(format!(
                "belongs to service {:?}, expected {:?}",
                state.name, self.name
            )));
        }
        if state.scheme != self.scheme {
            warn!(
                "State file {:?} was written for scheme {}, now configured as {}",
                self.path, state.scheme, self.scheme
            );
        }

        let mut addresses: Vec<String> = Vec::with_capacity(state.addresses.len());
        for address in state.addresses {
            if address.is_empty() {
                return Err(self.corrupt("contains an empty address".to_owned()));
            }
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        debug!("Loaded {} address(es) for {} from {:?}", addresses.len(), self.name, self.path);
        Ok(addresses)
    }

    /// Atomically replaces the file with the set returned by `snapshot`.
    ///
    /// `snapshot` yields a generation and its addresses and runs while the
    /// store is locked, so a write that waited behind another one still
    /// reads the current set. Generations already on disk are skipped.
    pub fn save<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> (u64, Vec<String>),
    {
        let mut written = self.written.lock();
        let (generation, addresses) = snapshot();
        if generation <= *written {
            return Ok(());
        }

        let snapshot = Snapshot {
            name: &self.name,
            scheme: self.scheme,
            addresses: &addresses,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| Error::Persistence {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        self.write_atomic(&bytes).map_err(|source| Error::Persistence {
            path: self.path.clone(),
            source,
        })?;

        *written = generation;
        Ok(())
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptState {
            path: self.path.clone(),
            reason,
        }
    }
}
