//! # zipserve
//!
//! Serve ZIP archive contents over HTTP as if they were expanded
//! directories, without re-reading the archive's directory on every request.
//!
//! The first request for an archive parses its central directory once and
//! stores every entry's payload offset, sizes, encoding and CRC in a
//! SQLite cache. Later requests seek straight to the payload and decode it
//! as a stream. The cache entry is rebuilt whenever the archive's size or
//! modification time changes.
//!
//! ## Components
//!
//! - [`MetadataStore`]: persistent `path → container` and
//!   `(container, name) → entry` tables, mutated only transactionally
//! - [`Indexer`]: staleness check and (re)indexing, serialized per archive
//! - [`Streamer`]: entry lookup plus seek-and-decode to any `Write` sink
//! - [`service`]: path router, directory listings and the axum front end
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zipserve::{Indexer, MetadataStore, Streamer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MetadataStore::open("/var/cache/zipserve/.zip_reader_cache.db")?);
//!     let streamer = Streamer::new(Arc::new(Indexer::new(store)));
//!
//!     let mut stdout = std::io::stdout().lock();
//!     streamer.stream(Path::new("/srv/www/site.zip"), "index.html", &mut stdout)?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod io;
pub mod service;
pub mod store;
pub mod stream;
pub mod zip;

pub use cli::Cli;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use index::{IndexOutcome, Indexer};
pub use io::{LocalFileReader, ReadAt};
pub use service::Service;
pub use store::{ContainerId, ContainerRecord, EntryRecord, Fingerprint, MetadataStore};
pub use stream::{EntryReader, Streamer};
pub use zip::{Encoding, ZipParser};
