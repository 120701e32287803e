//! Configuration for zipserve
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// File name of the metadata cache inside the cache directory
pub const CACHE_DB_NAME: &str = ".zip_reader_cache.db";

/// Main configuration for a zipserve instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------
    /// Directory tree served over HTTP. `name.zip` files inside it are
    /// browsable as `name/`.
    pub root_dir: PathBuf,

    /// Entry served when a request targets the root of an archive
    pub index_file: String,

    /// Render HTML listings for directories
    pub create_indexes: bool,

    /// Serve and list names starting with a dot
    pub expose_hidden_files: bool,

    // -------------------------------------------------------------------------
    // Cache
    // -------------------------------------------------------------------------
    /// Directory holding the metadata cache, kept apart from `root_dir`
    pub cache_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Network
    // -------------------------------------------------------------------------
    /// HTTP listen address
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            index_file: "index.html".to_string(),
            create_indexes: false,
            expose_hidden_files: false,
            cache_dir: PathBuf::from("."),
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn database_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_DB_NAME)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = path.into();
        self
    }

    pub fn index_file(mut self, name: impl Into<String>) -> Self {
        self.config.index_file = name.into();
        self
    }

    pub fn create_indexes(mut self, enabled: bool) -> Self {
        self.config.create_indexes = enabled;
        self
    }

    pub fn expose_hidden_files(mut self, enabled: bool) -> Self {
        self.config.expose_hidden_files = enabled;
        self
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
