//! Random-access extraction of single entries.
//!
//! An entry is served by seeking straight to the payload offset recorded
//! in the store and decoding exactly `compressed_size` bytes. The decoded
//! output is checked against the declared size and CRC-32 as it is
//! produced, so a container that changed without its fingerprint changing
//! yields an error rather than wrong bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::Indexer;
use crate::store::{EntryRecord, Fingerprint};
use crate::zip::Encoding;

/// Copy buffer size; also the chunk size handed to HTTP bodies
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Generations an open may chase while the container keeps changing
const MAX_OPEN_ATTEMPTS: usize = 8;

pub struct Streamer {
    indexer: Arc<Indexer>,
}

impl Streamer {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Stream the decoded payload of `name` inside the container at `path`
    /// to `sink`, returning the number of bytes written.
    ///
    /// On error some bytes may already have been written; the caller is
    /// responsible for discarding them.
    pub fn stream<W: Write + ?Sized>(&self, path: &Path, name: &str, sink: &mut W) -> Result<u64> {
        let mut reader = self.open_entry(path, name)?;
        reader.copy_to(sink)
    }

    /// Resolve `name` and position a decoder on its payload, without
    /// producing any output yet.
    ///
    /// The returned reader holds a handle on exactly the file version the
    /// entry's offsets were read from. If a concurrent rebuild replaces the
    /// generation, or the file changes, between indexing and opening, the
    /// lookup is repeated against the current generation.
    pub fn open_entry(&self, path: &Path, name: &str) -> Result<EntryReader> {
        let store = self.indexer.store();
        let mut id = self.indexer.ensure_indexed(path)?;

        for _ in 0..MAX_OPEN_ATTEMPTS {
            let Some(entry) = store
                .lookup_entry(id, name)
                .map_err(|e| Error::store(path, e))?
            else {
                let current = self.indexer.ensure_indexed(path)?;
                if current == id {
                    return Err(Error::EntryNotFound {
                        path: path.to_path_buf(),
                        name: name.to_string(),
                    });
                }
                debug!(path = %path.display(), "Generation replaced during lookup");
                id = current;
                continue;
            };

            let file = File::open(path).map_err(|e| Error::unreadable(path, e))?;
            let fingerprint = file
                .metadata()
                .and_then(|metadata| Fingerprint::from_metadata(&metadata))
                .map_err(|e| Error::unreadable(path, e))?;
            if fingerprint != entry.generation {
                debug!(path = %path.display(), "Container changed since indexing");
                id = self.indexer.ensure_indexed(path)?;
                continue;
            }

            return EntryReader::open(path, file, entry);
        }

        Err(Error::unreadable(
            path,
            io::Error::other("container kept changing while being opened"),
        ))
    }
}

enum Decoder {
    Stored(Take<File>),
    Deflate(DeflateDecoder<Take<File>>),
}

impl Read for Decoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Stored(r) => r.read(buf),
            Decoder::Deflate(r) => r.read(buf),
        }
    }
}

/// Decoded payload of one entry.
///
/// Yields exactly the entry's uncompressed bytes; reaching the end of the
/// payload with the wrong length or checksum is reported as an
/// `InvalidData` error instead of end-of-file. The container file is closed
/// when the reader is dropped.
pub struct EntryReader {
    path: PathBuf,
    entry: EntryRecord,
    decoder: Decoder,
    hasher: crc32fast::Hasher,
    produced: u64,
}

impl EntryReader {
    fn open(path: &Path, mut file: File, entry: EntryRecord) -> Result<Self> {
        match entry.encoding {
            Encoding::Stored | Encoding::Deflate => {}
            Encoding::Unsupported(method) => {
                return Err(Error::UnsupportedEncoding {
                    path: path.to_path_buf(),
                    name: entry.name,
                    method,
                });
            }
        }

        let len = entry.generation.size;
        if entry.offset.saturating_add(entry.compressed_size) > len {
            return Err(Error::unreadable(
                path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("container is {len} bytes, shorter than its index"),
                ),
            ));
        }
        file.seek(SeekFrom::Start(entry.offset))
            .map_err(|e| Error::unreadable(path, e))?;

        let payload = file.take(entry.compressed_size);
        let decoder = match entry.encoding {
            Encoding::Deflate => Decoder::Deflate(DeflateDecoder::new(payload)),
            _ => Decoder::Stored(payload),
        };

        debug!(
            path = %path.display(),
            entry = %entry.name,
            offset = entry.offset,
            size = entry.uncompressed_size,
            "Opened entry"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entry,
            decoder,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Uncompressed size declared by the container
    pub fn size(&self) -> u64 {
        self.entry.uncompressed_size
    }

    /// Copy the remaining payload to `sink`, returning the bytes written.
    pub fn copy_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            let n = match self.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::unreadable(&self.path, e)),
            };
            sink.write_all(&buf[..n]).map_err(Error::Sink)?;
            written += n as u64;
        }

        sink.flush().map_err(Error::Sink)?;
        Ok(written)
    }

    fn verify(&self) -> io::Result<()> {
        if self.produced != self.entry.uncompressed_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} ended after {} of {} bytes",
                    self.entry.name, self.produced, self.entry.uncompressed_size
                ),
            ));
        }

        let crc = self.hasher.clone().finalize();
        if crc != self.entry.crc32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} checksum mismatch: expected {:08x}, got {:08x}",
                    self.entry.name, self.entry.crc32, crc
                ),
            ));
        }
        Ok(())
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let n = self.decoder.read(buf)?;
        if n == 0 {
            self.verify()?;
            return Ok(0);
        }

        self.produced += n as u64;
        if self.produced > self.entry.uncompressed_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} is longer than its declared {} bytes",
                    self.entry.name, self.entry.uncompressed_size
                ),
            ));
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
