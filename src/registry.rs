//! Append-only snapshot registry, in memory and on disk
//!
//! Snapshots are stored once under their id and never replaced. Readers
//! get an `Arc<Snapshot>` and need no further locking.

use crate::manifest::Domain;
use crate::resolve::{NotFoundError, Resolver};
use crate::snapshot::{Snapshot, SnapshotBuilder, SnapshotId, SNAPSHOT_FORMAT};
use crate::target::Target;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Snapshot {0} already exists (snapshots are append-only)")]
    SnapshotExists(SnapshotId),

    #[error("Conflicting binding for {domain}/{symbol} on {target}: {existing} vs {new}")]
    DuplicateBinding {
        domain: Domain,
        symbol: String,
        target: Target,
        existing: String,
        new: String,
    },

    #[error("Invalid snapshot id '{0}'")]
    InvalidId(String),

    #[error("Unsupported snapshot format '{0}' (expected {})", SNAPSHOT_FORMAT)]
    UnsupportedFormat(String),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot {0} not found in store")]
    NotFound(SnapshotId),

    #[error("{} holds snapshot {found}, not {expected}", path.display())]
    IdMismatch {
        path: PathBuf,
        expected: SnapshotId,
        found: SnapshotId,
    },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// In-memory table of snapshots by id
#[derive(Debug, Default)]
pub struct Registry {
    snapshots: RwLock<HashMap<SnapshotId, Arc<Snapshot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze `bindings` under `id` and store the snapshot
    pub fn put(&self, id: SnapshotId, bindings: SnapshotBuilder) -> Result<Arc<Snapshot>> {
        self.insert(bindings.with_id(id).build()?)
    }

    /// Store an already built (or loaded) snapshot under its own id
    pub fn insert(&self, snapshot: Snapshot) -> Result<Arc<Snapshot>> {
        let mut snapshots = self.snapshots.write();
        match snapshots.entry(snapshot.id().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::SnapshotExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::info!(
                    "Registered snapshot {} ({} bindings)",
                    snapshot.id(),
                    snapshot.len()
                );
                let snapshot = Arc::new(snapshot);
                entry.insert(Arc::clone(&snapshot));
                Ok(snapshot)
            }
        }
    }

    pub fn snapshot(&self, id: &SnapshotId) -> std::result::Result<Arc<Snapshot>, NotFoundError> {
        self.snapshots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| NotFoundError::Snapshot(id.clone()))
    }

    pub fn resolver(&self, id: &SnapshotId) -> std::result::Result<Resolver, NotFoundError> {
        self.snapshot(id).map(Resolver::new)
    }

    /// Value bound to (domain, symbol, target) in snapshot `id`
    pub fn get(
        &self,
        id: &SnapshotId,
        domain: Domain,
        symbol: &str,
        target: &Target,
    ) -> std::result::Result<Value, NotFoundError> {
        self.resolver(id)?.resolve(domain, symbol, target).cloned()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<SnapshotId> {
        let mut ids: Vec<SnapshotId> = self.snapshots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

/// Read and validate a snapshot file at any path
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let json = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Snapshot::from_json(&json)
}

/// Directory of `<id>.json` snapshot files, written once each
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) a store directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write a new snapshot file; an existing file for the id is never touched
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.path_for(snapshot.id());
        let json = snapshot.to_json()?;
        let io_err = |source| RegistryError::Io {
            path: path.clone(),
            source,
        };
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RegistryError::SnapshotExists(snapshot.id().clone()))
            }
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        tracing::info!("Saved snapshot {} to {}", snapshot.id(), path.display());
        Ok(path)
    }

    pub fn load(&self, id: &SnapshotId) -> Result<Snapshot> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(RegistryError::NotFound(id.clone()));
        }
        let snapshot = read_snapshot(&path)?;
        if snapshot.id() != id {
            return Err(RegistryError::IdMismatch {
                path,
                expected: id.clone(),
                found: snapshot.id().clone(),
            });
        }
        Ok(snapshot)
    }

    /// Ids of the stored snapshots, sorted; files that are not valid ids are ignored
    pub fn ids(&self) -> Result<Vec<SnapshotId>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| SnapshotId::new(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every stored snapshot into `registry`
    pub fn load_into(&self, registry: &Registry) -> Result<usize> {
        let ids = self.ids()?;
        for id in &ids {
            registry.insert(self.load(id)?)?;
        }
        Ok(ids.len())
    }
}
