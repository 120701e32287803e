//! Persistent entry-location cache.
//!
//! Two tables back the store:
//!
//! - `containers`: one row per indexed archive, keyed uniquely by path and
//!   carrying the size/mtime fingerprint it was indexed at
//! - `entries`: one row per archive entry, keyed by `(container_id, name)`
//!   and cascade-deleted with its container
//!
//! The only way to mutate the store is [`MetadataStore::write`], which runs
//! its closure inside a single `BEGIN IMMEDIATE` transaction. Readers use
//! their own pooled connections and, thanks to WAL, always observe a whole
//! generation.

mod pool;
mod schema;

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use thiserror::Error;
use tracing::debug;

use crate::zip::{Encoding, LocatedEntry};
use pool::ConnectionPool;

/// Idle connections kept around for reuse
const MAX_IDLE_CONNECTIONS: usize = 16;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("value {0} does not fit in an SQLite integer")]
    OutOfRange(u64),

    #[error("path {} is not valid UTF-8", .0.display())]
    InvalidPath(PathBuf),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Surrogate key of one container generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(i64);

impl ContainerId {
    pub fn get(self) -> i64 {
        self.0
    }
}

/// Staleness fingerprint of a container file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time in nanoseconds since the unix epoch, at whatever
    /// resolution the filesystem records
    pub modified_at: i64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified()?;
        Ok(Self {
            size: metadata.len(),
            modified_at: unix_nanos(modified),
        })
    }
}

fn unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}

fn unix_seconds_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

fn to_sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}

/// Containers are keyed by their path as text; a lossy conversion could
/// make two archives share one key.
fn path_key(path: &Path) -> StoreResult<&str> {
    path.to_str()
        .ok_or_else(|| StoreError::InvalidPath(path.to_path_buf()))
}

/// Identity of one indexed archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Unix seconds of the build that produced this generation
    pub indexed_at: i64,
}

impl ContainerRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: ContainerId(row.get(0)?),
            path: PathBuf::from(row.get::<_, String>(1)?),
            fingerprint: Fingerprint {
                size: row.get::<_, i64>(2)? as u64,
                modified_at: row.get(3)?,
            },
            indexed_at: row.get(4)?,
        })
    }
}

/// Payload location of one entry within one container generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub container_id: ContainerId,
    pub name: String,
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub encoding: Encoding,
    pub crc32: u32,
    /// Fingerprint of the container generation the offsets were read from
    pub generation: Fingerprint,
}

impl EntryRecord {
    const COLUMNS: &'static str =
        "container_id, name, data_offset, compressed_size, uncompressed_size, method, supported, crc32";

    /// Entry columns joined with the owning container's fingerprint, so
    /// both come from the same snapshot
    const SELECT: &'static str = "SELECT e.container_id, e.name, e.data_offset, e.compressed_size, \
         e.uncompressed_size, e.method, e.supported, e.crc32, c.size, c.modified_at \
         FROM entries e JOIN containers c ON c.id = e.container_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let method: u16 = row.get(5)?;
        let supported: bool = row.get(6)?;
        Ok(Self {
            container_id: ContainerId(row.get(0)?),
            name: row.get(1)?,
            offset: row.get::<_, i64>(2)? as u64,
            compressed_size: row.get::<_, i64>(3)? as u64,
            uncompressed_size: row.get::<_, i64>(4)? as u64,
            encoding: if supported {
                Encoding::from_method(method)
            } else {
                Encoding::Unsupported(method)
            },
            crc32: row.get(7)?,
            generation: Fingerprint {
                size: row.get::<_, i64>(8)? as u64,
                modified_at: row.get(9)?,
            },
        })
    }
}

/// SQLite-backed metadata store shared by every request handler
pub struct MetadataStore {
    pool: ConnectionPool,
}

impl MetadataStore {
    /// Create or open the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = pool::open_connection(&path)?;
        schema::initialize(&conn)?;
        debug!(path = %path.display(), "Opened metadata store");

        Ok(Self {
            pool: ConnectionPool::new(path, conn, MAX_IDLE_CONNECTIONS),
        })
    }

    pub fn lookup_container(&self, path: &Path) -> StoreResult<Option<ContainerRecord>> {
        let conn = self.pool.get()?;
        lookup_container(&conn, path)
    }

    pub fn lookup_entry(&self, id: ContainerId, name: &str) -> StoreResult<Option<EntryRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE e.container_id = ?1 AND e.name = ?2",
            EntryRecord::SELECT
        ))?;
        Ok(stmt
            .query_row(params![id.0, name], EntryRecord::from_row)
            .optional()?)
    }

    /// All entries of one generation, ordered by name
    pub fn list_entries(&self, id: ContainerId) -> StoreResult<Vec<EntryRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE e.container_id = ?1 ORDER BY e.name",
            EntryRecord::SELECT
        ))?;
        let rows = stmt.query_map(params![id.0], EntryRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every cached container, ordered by path
    pub fn containers(&self) -> StoreResult<Vec<ContainerRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, path, size, modified_at, indexed_at FROM containers ORDER BY path",
        )?;
        let rows = stmt.query_map([], ContainerRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Drop the cached generation for `path`. Returns whether one existed.
    pub fn remove_container(&self, path: &Path) -> StoreResult<bool> {
        self.write(|txn| txn.remove_container(path))
    }

    /// Run `f` inside one write transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error (or a
    /// panic) rolls back every statement `f` issued.
    pub fn write<T>(&self, f: impl FnOnce(&WriteTxn<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&WriteTxn { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    #[cfg(test)]
    fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }
}

fn lookup_container(conn: &Connection, path: &Path) -> StoreResult<Option<ContainerRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, path, size, modified_at, indexed_at FROM containers WHERE path = ?1",
    )?;
    Ok(stmt
        .query_row(params![path_key(path)?], ContainerRecord::from_row)
        .optional()?)
}

/// Mutating operations, only reachable inside [`MetadataStore::write`]
pub struct WriteTxn<'a> {
    conn: &'a Connection,
}

impl WriteTxn<'_> {
    /// Same as [`MetadataStore::lookup_container`], but sees this
    /// transaction's own writes.
    pub fn lookup_container(&self, path: &Path) -> StoreResult<Option<ContainerRecord>> {
        lookup_container(self.conn, path)
    }

    /// Delete any generation stored for `path` and insert a fresh record.
    pub fn replace_container(&self, path: &Path, fingerprint: Fingerprint) -> StoreResult<ContainerId> {
        self.remove_container(path)?;

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO containers (path, size, modified_at, indexed_at) VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![
            path_key(path)?,
            to_sql_int(fingerprint.size)?,
            fingerprint.modified_at,
            unix_seconds_now(),
        ])?;

        Ok(ContainerId(self.conn.last_insert_rowid()))
    }

    /// Bulk insert one generation's entries. Returns the number of rows
    /// written; a name repeated in `entries` keeps its first occurrence.
    pub fn insert_entries(&self, id: ContainerId, entries: &[LocatedEntry]) -> StoreResult<usize> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            EntryRecord::COLUMNS
        ))?;

        let mut inserted = 0;
        for entry in entries {
            inserted += stmt.execute(params![
                id.0,
                entry.name,
                to_sql_int(entry.data_offset)?,
                to_sql_int(entry.compressed_size)?,
                to_sql_int(entry.uncompressed_size)?,
                entry.encoding.method(),
                entry.encoding.is_supported(),
                entry.crc32,
            ])?;
        }
        Ok(inserted)
    }

    pub fn remove_container(&self, path: &Path) -> StoreResult<bool> {
        let key = path_key(path)?;
        self.conn.execute(
            "DELETE FROM entries WHERE container_id IN (SELECT id FROM containers WHERE path = ?1)",
            params![key],
        )?;
        let removed = self
            .conn
            .execute("DELETE FROM containers WHERE path = ?1", params![key])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    fn entry(name: &str, offset: u64, encoding: Encoding) -> LocatedEntry {
        LocatedEntry {
            name: name.to_string(),
            data_offset: offset,
            compressed_size: 10,
            uncompressed_size: 20,
            encoding,
            crc32: 0xDEADBEEF,
        }
    }

    const FP: Fingerprint = Fingerprint {
        size: 100,
        modified_at: 1_700_000_000_123_456_789,
    };

    #[test]
    fn replace_and_lookup() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/site.zip");

        assert!(store.lookup_container(path).unwrap().is_none());

        let id = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                txn.insert_entries(
                    id,
                    &[
                        entry("index.html", 40, Encoding::Deflate),
                        entry("img/a.png", 90, Encoding::Stored),
                    ],
                )?;
                Ok(id)
            })
            .unwrap();

        let record = store.lookup_container(path).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.fingerprint, FP);
        assert_eq!(record.path, path);

        let found = store.lookup_entry(id, "index.html").unwrap().unwrap();
        assert_eq!(found.offset, 40);
        assert_eq!(found.encoding, Encoding::Deflate);
        assert_eq!(found.crc32, 0xDEADBEEF);
        assert!(store.lookup_entry(id, "missing").unwrap().is_none());

        let names: Vec<_> = store
            .list_entries(id)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["img/a.png", "index.html"]);
    }

    #[test]
    fn replacement_drops_previous_generation() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/site.zip");

        let old = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                txn.insert_entries(id, &[entry("old.txt", 30, Encoding::Stored)])?;
                Ok(id)
            })
            .unwrap();
        let new = store
            .write(|txn| {
                let id = txn.replace_container(path, Fingerprint { size: 200, ..FP })?;
                txn.insert_entries(id, &[entry("new.txt", 30, Encoding::Stored)])?;
                Ok(id)
            })
            .unwrap();

        assert_ne!(old, new);
        assert!(store.list_entries(old).unwrap().is_empty());
        assert_eq!(store.list_entries(new).unwrap().len(), 1);
        assert_eq!(store.containers().unwrap().len(), 1);
    }

    #[test]
    fn failed_write_keeps_previous_generation() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/site.zip");

        let old = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                txn.insert_entries(id, &[entry("keep.txt", 30, Encoding::Stored)])?;
                Ok(id)
            })
            .unwrap();

        let result: StoreResult<()> = store.write(|txn| {
            let id = txn.replace_container(path, Fingerprint { size: 1, ..FP })?;
            txn.insert_entries(id, &[entry("partial.txt", 30, Encoding::Stored)])?;
            Err(StoreError::OutOfRange(u64::MAX))
        });
        assert!(result.is_err());

        let record = store.lookup_container(path).unwrap().unwrap();
        assert_eq!(record.id, old);
        assert_eq!(record.fingerprint, FP);
        let names: Vec<_> = store
            .list_entries(old)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["keep.txt"]);
        assert_eq!(store.idle_connections(), 1);
    }

    #[test]
    fn duplicate_names_keep_first_occurrence() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/dup.zip");

        let (id, inserted) = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                let n = txn.insert_entries(
                    id,
                    &[
                        entry("a.txt", 30, Encoding::Stored),
                        entry("a.txt", 70, Encoding::Stored),
                    ],
                )?;
                Ok((id, n))
            })
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.lookup_entry(id, "a.txt").unwrap().unwrap().offset, 30);
    }

    #[test]
    fn unsupported_encoding_round_trips() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/odd.zip");

        let id = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                // Encrypted deflate entry: method 8 but not decodable
                txn.insert_entries(
                    id,
                    &[
                        entry("bz.txt", 30, Encoding::Unsupported(12)),
                        entry("enc.txt", 60, Encoding::Unsupported(8)),
                    ],
                )?;
                Ok(id)
            })
            .unwrap();

        let bz = store.lookup_entry(id, "bz.txt").unwrap().unwrap();
        assert_eq!(bz.encoding, Encoding::Unsupported(12));
        let enc = store.lookup_entry(id, "enc.txt").unwrap().unwrap();
        assert_eq!(enc.encoding, Encoding::Unsupported(8));
    }

    #[test]
    fn remove_container_reports_presence() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/gone.zip");

        assert!(!store.remove_container(path).unwrap());
        store.write(|txn| txn.replace_container(path, FP)).unwrap();
        assert!(store.remove_container(path).unwrap());
        assert!(store.lookup_container(path).unwrap().is_none());
    }

    #[test]
    fn store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("cache.db");
        let path = Path::new("/srv/site.zip");

        let id = {
            let store = MetadataStore::open(&db).unwrap();
            store.write(|txn| txn.replace_container(path, FP)).unwrap()
        };

        let store = MetadataStore::open(&db).unwrap();
        assert_eq!(store.lookup_container(path).unwrap().unwrap().id, id);
    }

    #[test]
    fn entries_carry_their_generation() {
        let (_dir, store) = open_store();
        let path = Path::new("/srv/site.zip");

        let id = store
            .write(|txn| {
                let id = txn.replace_container(path, FP)?;
                txn.insert_entries(id, &[entry("a.txt", 30, Encoding::Stored)])?;
                Ok(id)
            })
            .unwrap();

        assert_eq!(store.lookup_entry(id, "a.txt").unwrap().unwrap().generation, FP);
        assert_eq!(store.list_entries(id).unwrap()[0].generation, FP);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_are_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, store) = open_store();
        let a = Path::new(OsStr::from_bytes(b"/srv/\xff.zip"));

        let err = store.write(|txn| txn.replace_container(a, FP)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
        assert!(matches!(
            store.lookup_container(a).unwrap_err(),
            StoreError::InvalidPath(_)
        ));
        assert!(store.containers().unwrap().is_empty());
    }
}
