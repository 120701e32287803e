//! Builds and refreshes the cached entry table of a container.
//!
//! A container is (re)parsed only when the store has no generation for it
//! or the stored size/mtime fingerprint no longer matches the file. The
//! cache-hit path is one `stat` and one lookup and takes no lock.
//!
//! Rebuilds are serialized per canonical path: concurrent first requests
//! for the same archive wait on one another, and every waiter re-checks the
//! store once it holds the lock, so only the first one parses and writes.

mod locks;

pub use locks::{PathGuard, PathLocks};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::LocalFileReader;
use crate::store::{ContainerId, Fingerprint, MetadataStore};
use crate::zip::{LocatedEntry, ZipError, ZipParser};

/// What [`Indexer::refresh`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The cached generation matched the file
    Fresh(ContainerId),
    /// A new generation was parsed and stored
    Built { id: ContainerId, entries: usize },
}

impl IndexOutcome {
    pub fn id(&self) -> ContainerId {
        match *self {
            IndexOutcome::Fresh(id) | IndexOutcome::Built { id, .. } => id,
        }
    }
}

pub struct Indexer {
    store: Arc<MetadataStore>,
    locks: PathLocks,
}

impl Indexer {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self {
            store,
            locks: PathLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// Make sure the store holds a current generation for `path` and return
    /// its id.
    pub fn ensure_indexed(&self, path: &Path) -> Result<ContainerId> {
        self.refresh(path).map(|outcome| outcome.id())
    }

    pub fn refresh(&self, path: &Path) -> Result<IndexOutcome> {
        let (path, fingerprint) = stat_container(path)?;

        if let Some(id) = self.fresh_generation(&path, fingerprint)? {
            debug!(path = %path.display(), id = id.get(), "Index cache hit");
            return Ok(IndexOutcome::Fresh(id));
        }

        let _guard = self.locks.lock(&path);

        // Another request may have rebuilt it while we waited.
        if let Some(id) = self.fresh_generation(&path, fingerprint)? {
            debug!(path = %path.display(), id = id.get(), "Index built by concurrent request");
            return Ok(IndexOutcome::Fresh(id));
        }

        let (fingerprint, entries) = parse_container(&path)?;

        let (id, count) = self
            .store
            .write(|txn| {
                let id = txn.replace_container(&path, fingerprint)?;
                let count = txn.insert_entries(id, &entries)?;
                Ok((id, count))
            })
            .map_err(|e| Error::store(&path, e))?;

        info!(
            path = %path.display(),
            id = id.get(),
            entries = count,
            size = fingerprint.size,
            "Indexed container"
        );
        Ok(IndexOutcome::Built { id, entries: count })
    }

    /// Drop the cached generation of `path`, which need not exist on disk
    /// anymore. Returns whether anything was cached.
    pub fn forget(&self, path: &Path) -> Result<bool> {
        let path = fs::canonicalize(path)
            .or_else(|_| std::path::absolute(path))
            .map_err(|e| Error::unreadable(path, e))?;

        let _guard = self.locks.lock(&path);
        self.store
            .remove_container(&path)
            .map_err(|e| Error::store(&path, e))
    }

    fn fresh_generation(&self, path: &Path, fingerprint: Fingerprint) -> Result<Option<ContainerId>> {
        let record = self
            .store
            .lookup_container(path)
            .map_err(|e| Error::store(path, e))?;

        Ok(record
            .filter(|record| record.fingerprint == fingerprint)
            .map(|record| record.id))
    }
}

/// Canonicalize and stat a container path.
fn stat_container(path: &Path) -> Result<(PathBuf, Fingerprint)> {
    let canonical = fs::canonicalize(path).map_err(|e| Error::unreadable(path, e))?;
    let metadata = fs::metadata(&canonical).map_err(|e| Error::unreadable(&canonical, e))?;
    if !metadata.is_file() {
        return Err(Error::unreadable(
            canonical,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    let fingerprint =
        Fingerprint::from_metadata(&metadata).map_err(|e| Error::unreadable(&canonical, e))?;
    Ok((canonical, fingerprint))
}

/// Parse the central directory of `path`.
///
/// The fingerprint returned is taken from the handle that was parsed, so it
/// describes exactly the bytes the entries were read from.
fn parse_container(path: &Path) -> Result<(Fingerprint, Vec<LocatedEntry>)> {
    let reader = LocalFileReader::new(path).map_err(|e| Error::unreadable(path, e))?;
    let fingerprint = reader
        .metadata()
        .and_then(|metadata| Fingerprint::from_metadata(&metadata))
        .map_err(|e| Error::unreadable(path, e))?;

    let parser = ZipParser::new(Arc::new(reader));
    let entries = parser.located_entries().map_err(|e| match e {
        ZipError::Io(source) => Error::unreadable(path, source),
        ZipError::Malformed(reason) => {
            warn!(path = %path.display(), %reason, "Container failed to parse");
            Error::ContainerCorrupt {
                path: path.to_path_buf(),
                reason,
            }
        }
    })?;

    Ok((fingerprint, entries))
}
