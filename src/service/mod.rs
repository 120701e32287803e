//! HTTP front end.
//!
//! Maps request paths onto the content tree ([`Router`]), renders
//! directory listings, serves plain files directly and delegates archive
//! entries to the [`Streamer`].

mod http;
mod listing;
mod route;

pub use http::{AppState, app};
pub use route::{ARCHIVE_SUFFIX, Route, Router};

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::index::Indexer;
use crate::store::MetadataStore;
use crate::stream::Streamer;

/// A configured server: content router plus the archive core it feeds.
pub struct Service {
    config: Config,
    router: Arc<Router>,
    streamer: Arc<Streamer>,
}

impl Service {
    /// Validate the configured directories and open the metadata store.
    pub fn new(config: Config) -> Result<Self> {
        if !config.root_dir.is_dir() {
            bail!("invalid service directory: {}", config.root_dir.display());
        }
        if !config.cache_dir.is_dir() {
            bail!("invalid cache directory: {}", config.cache_dir.display());
        }

        let db_path = config.database_path();
        let store = MetadataStore::open(&db_path)
            .with_context(|| format!("failed to open metadata store {}", db_path.display()))?;
        let indexer = Arc::new(Indexer::new(Arc::new(store)));

        Ok(Self {
            router: Arc::new(Router::new(&config)),
            streamer: Arc::new(Streamer::new(indexer)),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn streamer(&self) -> &Arc<Streamer> {
        &self.streamer
    }

    /// The axum application serving this configuration
    pub fn app(&self) -> axum::Router {
        app(AppState {
            router: self.router.clone(),
            streamer: self.streamer.clone(),
            expose_hidden_files: self.config.expose_hidden_files,
        })
    }

    /// Serve until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;

        info!(
            "Serving {} on http://{}",
            self.config.root_dir.display(),
            listener.local_addr()?
        );

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            // Without a signal handler, run until the process is killed
            tracing::warn!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
