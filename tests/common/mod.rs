//! Shared fixtures: a minimal ZIP writer and a store/indexer/streamer stack
//! rooted in a temporary directory.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use tempfile::TempDir;

use zipserve::{Indexer, MetadataStore, Streamer};

enum Method {
    Stored,
    Deflate,
    Raw(u16),
}

/// Builds single-disk archives without comments or ZIP64 records.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<(String, Method, Vec<u8>)>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(mut self, name: &str, data: impl AsRef<[u8]>) -> Self {
        self.entries
            .push((name.to_string(), Method::Stored, data.as_ref().to_vec()));
        self
    }

    pub fn deflated(mut self, name: &str, data: impl AsRef<[u8]>) -> Self {
        self.entries
            .push((name.to_string(), Method::Deflate, data.as_ref().to_vec()));
        self
    }

    /// An entry declaring `method` whose payload is `data` as given
    pub fn raw(mut self, name: &str, method: u16, data: impl AsRef<[u8]>) -> Self {
        self.entries
            .push((name.to_string(), Method::Raw(method), data.as_ref().to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for (name, method, data) in &self.entries {
            let crc = crc32fast::hash(data);
            let (method, payload) = match method {
                Method::Stored => (0u16, data.clone()),
                Method::Deflate => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(data).unwrap();
                    (8u16, encoder.finish().unwrap())
                }
                Method::Raw(method) => (*method, data.clone()),
            };
            let offset = out.len() as u32;

            out.write_u32::<LittleEndian>(0x04034b50).unwrap();
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(method).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0x21).unwrap();
            out.write_u32::<LittleEndian>(crc).unwrap();
            out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&payload);

            central.write_u32::<LittleEndian>(0x02014b50).unwrap();
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(method).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0x21).unwrap();
            central.write_u32::<LittleEndian>(crc).unwrap();
            central.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            central.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            central.write_u16::<LittleEndian>(name.len() as u16).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(offset).unwrap();
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);

        out.write_u32::<LittleEndian>(0x06054b50).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u32::<LittleEndian>(central.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(cd_offset).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out
    }

    pub fn write_to(&self, path: &Path) {
        fs::write(path, self.build()).unwrap();
    }
}

/// Store, indexer and streamer over a cache inside a temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub streamer: Streamer,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path().join("cache").join("meta.db")).unwrap();
        let indexer = Arc::new(Indexer::new(Arc::new(store)));
        Self {
            dir,
            streamer: Streamer::new(indexer),
        }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        self.streamer.indexer()
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        self.indexer().store()
    }

    /// Write `zip` as `name` inside the fixture directory
    pub fn archive(&self, name: &str, zip: ZipBuilder) -> PathBuf {
        let path = self.dir.path().join(name);
        zip.write_to(&path);
        path
    }

    pub fn read(&self, path: &Path, entry: &str) -> zipserve::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.streamer.stream(path, entry, &mut out)?;
        Ok(out)
    }
}
