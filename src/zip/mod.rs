//! ZIP archive parsing.
//!
//! This module reads the central directory of a ZIP archive and resolves,
//! for every entry, the byte offset where its raw payload begins. That is
//! all the index needs: once offsets are known, any entry can be read by a
//! single seek without touching the directory again.
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The parser reads the EOCD first (from the end of the file), then the
//! Central Directory, then each entry's Local File Header to skip its
//! variable-length fields.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//!
//! Entries with other compression methods, or encrypted entries, are
//! listed with [`Encoding::Unsupported`]. Multi-disk archives are rejected.

mod parser;
mod structures;

pub use parser::ZipParser;
pub use structures::*;

use std::io;

use thiserror::Error;

pub type ZipResult<T> = std::result::Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// The data source could not be read
    #[error("read failed: {0}")]
    Io(#[source] io::Error),

    /// The bytes were read but do not form a valid archive
    #[error("{0}")]
    Malformed(String),
}

impl ZipError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ZipError::Malformed(reason.into())
    }
}

// Fixed-size records are decoded from buffers already in memory, so a
// failing cursor read means the record is truncated rather than unreadable.
impl From<io::Error> for ZipError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::Malformed("truncated record".to_string())
        } else {
            ZipError::Io(e)
        }
    }
}
