//! Error types for zipserve
//!
//! Every failure of the archive core is terminal for the request that hit
//! it. Callers that only need to pick a response status should match on
//! [`Error::kind`] rather than on the variants.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using zipserve's Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unstattable file, or on-disk bytes that no longer match
    /// what was indexed (short read, bad deflate stream, size or CRC mismatch)
    #[error("container {} is unreadable: {source}", path.display())]
    ContainerUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The central directory could not be parsed
    #[error("container {} is corrupt: {reason}", path.display())]
    ContainerCorrupt { path: PathBuf, reason: String },

    #[error("entry {name:?} not found in {}", path.display())]
    EntryNotFound { path: PathBuf, name: String },

    #[error("entry {name:?} in {} uses unsupported compression method {method}", path.display())]
    UnsupportedEncoding {
        path: PathBuf,
        name: String,
        method: u16,
    },

    /// The metadata store failed; the transaction in flight was rolled back
    #[error("metadata store failed for {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// Writing to the caller's output failed, typically a closed connection
    #[error("output sink failed: {0}")]
    Sink(#[source] io::Error),
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ContainerUnreadable,
    ContainerCorrupt,
    EntryNotFound,
    UnsupportedEncoding,
    Sink,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // A store that cannot be read or written leaves the container
            // just as unservable as an unreadable file.
            Error::ContainerUnreadable { .. } | Error::Store { .. } => {
                ErrorKind::ContainerUnreadable
            }
            Error::ContainerCorrupt { .. } => ErrorKind::ContainerCorrupt,
            Error::EntryNotFound { .. } => ErrorKind::EntryNotFound,
            Error::UnsupportedEncoding { .. } => ErrorKind::UnsupportedEncoding,
            Error::Sink(_) => ErrorKind::Sink,
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::ContainerUnreadable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: StoreError) -> Self {
        Error::Store {
            path: path.into(),
            source,
        }
    }
}
