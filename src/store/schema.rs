use rusqlite::Connection;
use tracing::info;

/// Bumped whenever the table layout changes. The store is a derived cache,
/// so a mismatch simply discards what was there.
pub(super) const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS containers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        size INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        indexed_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entries (
        container_id INTEGER NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        data_offset INTEGER NOT NULL,
        compressed_size INTEGER NOT NULL,
        uncompressed_size INTEGER NOT NULL,
        method INTEGER NOT NULL,
        supported INTEGER NOT NULL,
        crc32 INTEGER NOT NULL,
        PRIMARY KEY (container_id, name)
    ) WITHOUT ROWID;
";

const DROP_TABLES: &str = "
    DROP TABLE IF EXISTS entries;
    DROP TABLE IF EXISTS containers;
";

/// Create the tables, discarding any layout written by another version.
pub(super) fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version != 0 && version != SCHEMA_VERSION {
        info!(
            found = version,
            expected = SCHEMA_VERSION,
            "Discarding metadata cache written by another schema version"
        );
        conn.execute_batch(DROP_TABLES)?;
    }

    conn.execute_batch(CREATE_TABLES)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
