use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, warn};

use super::listing;
use super::route::{Route, Router};
use crate::error::{Error, ErrorKind};
use crate::stream::Streamer;

/// Decoded chunks buffered between the blocking reader and the response
const BODY_CHANNEL_DEPTH: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub(super) router: Arc<Router>,
    pub(super) streamer: Arc<Streamer>,
    pub(super) expose_hidden_files: bool,
}

pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(serve_root))
        .route("/*path", get(serve_path))
        .with_state(state)
}

async fn serve_root(State(state): State<AppState>, request: Request) -> Response {
    dispatch(state, String::new(), request).await
}

async fn serve_path(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    dispatch(state, path, request).await
}

async fn dispatch(state: AppState, url_path: String, request: Request) -> Response {
    let router = state.router.clone();
    let route = match tokio::task::spawn_blocking(move || router.resolve(&url_path)).await {
        Ok(route) => route,
        Err(e) => {
            error!("Route resolution panicked: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match route {
        Route::File(path) => serve_file(path, request).await,
        Route::Listing { dir, url_path } => {
            let expose = state.expose_hidden_files;
            let rendered =
                tokio::task::spawn_blocking(move || listing::render(&dir, &url_path, expose)).await;
            match rendered {
                Ok(Ok(html)) => Html(html).into_response(),
                Ok(Err(e)) => {
                    error!("Failed to read directory: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read directory").into_response()
                }
                Err(e) => {
                    error!("Directory listing panicked: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Route::Redirect(location) => Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .unwrap_or_else(|e| {
                warn!("Unusable redirect location: {}", e);
                not_found()
            }),
        Route::Archive { container, entry } => serve_entry(state.streamer, container, entry).await,
        Route::NotFound => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

/// Serve a plain file from the content tree, honoring conditional and
/// range requests.
async fn serve_file(path: PathBuf, request: Request) -> Response {
    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Serve one archive entry.
///
/// The entry is resolved (and the archive indexed if needed) before any
/// header is sent, so every lookup failure still becomes a clean 404. The
/// payload is then decoded on the blocking pool and handed over in chunks;
/// a failure past that point aborts the response.
async fn serve_entry(streamer: Arc<Streamer>, container: PathBuf, entry: String) -> Response {
    let opened = tokio::task::spawn_blocking(move || streamer.open_entry(&container, &entry)).await;

    let mut reader = match opened {
        Ok(Ok(reader)) => reader,
        Ok(Err(e)) => {
            match e.kind() {
                ErrorKind::EntryNotFound => debug!("{}", e),
                ErrorKind::ContainerCorrupt | ErrorKind::UnsupportedEncoding => warn!("{}", e),
                _ => error!("{}", e),
            }
            return not_found();
        }
        Err(e) => {
            error!("Entry lookup panicked: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let content_type = mime_guess::from_path(reader.name()).first_or_octet_stream();
    let content_length = reader.size();

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { tx: tx.clone() };
        match reader.copy_to(&mut sink) {
            Ok(n) => debug!(entry = reader.name(), bytes = n, "Streamed entry"),
            Err(Error::Sink(_)) => debug!(entry = reader.name(), "Client went away mid-stream"),
            Err(e) => {
                error!("{}", e);
                let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, content_length)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|e| {
            error!("Error building response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Blocking writer feeding a response body. Fails with `BrokenPipe` once
/// the body has been dropped.
struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
