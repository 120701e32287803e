mod common;

use std::fs;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use tempfile::TempDir;
use tower::ServiceExt;

use common::ZipBuilder;
use zipserve::{Config, Service};

struct Site {
    _dir: TempDir,
    service: Service,
}

fn site(create_indexes: bool) -> Site {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("www");
    let cache = dir.path().join("cache");
    fs::create_dir_all(root.join("assets")).unwrap();
    fs::create_dir_all(&cache).unwrap();

    fs::write(root.join("assets/logo.txt"), "plain file").unwrap();
    let blob: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    fs::write(root.join("big.bin"), blob).unwrap();
    ZipBuilder::new()
        .stored("index.html", "<h1>docs</h1>")
        .deflated("guide/intro.md", "# Intro\n".repeat(100))
        .write_to(&root.join("docs.zip"));

    let config = Config::builder()
        .root_dir(&root)
        .cache_dir(&cache)
        .create_indexes(create_indexes)
        .build();
    Site {
        _dir: dir,
        service: Service::new(config).unwrap(),
    }
}

async fn get(site: &Site, uri: &str) -> Response {
    send(site, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn send(site: &Site, request: Request<Body>) -> Response {
    site.service.app().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_text_len(response: Response) -> usize {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().len()
}

#[tokio::test]
async fn serves_archive_entries() {
    let site = site(false);

    let response = get(&site, "/docs/guide/intro.md").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "800");
    assert_eq!(body_text(response).await, "# Intro\n".repeat(100));

    let response = get(&site, "/docs/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/html"
    );
    assert_eq!(body_text(response).await, "<h1>docs</h1>");

    assert!(site.service.config().database_path().is_file());
}

#[tokio::test]
async fn archive_root_redirects() {
    let site = site(false);

    let response = get(&site, "/docs").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/docs/");
}

#[tokio::test]
async fn missing_paths_are_not_found() {
    let site = site(false);

    for uri in ["/docs/missing.txt", "/nothing", "/assets/logo.txt/extra", "/assets"] {
        let response = get(&site, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    assert_eq!(
        body_text(get(&site, "/nothing").await).await,
        "404 page not found"
    );
}

#[tokio::test]
async fn serves_plain_files() {
    let site = site(false);

    let response = get(&site, "/assets/logo.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(body_text(response).await, "plain file");
}

#[tokio::test]
async fn plain_files_honor_range_requests() {
    let site = site(false);

    let request = Request::builder()
        .uri("/big.bin")
        .header(header::RANGE, "bytes=0-9")
        .body(Body::empty())
        .unwrap();
    let response = send(&site, request).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-9/1000");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), (0u8..10).collect::<Vec<_>>());

    let response = get(&site, "/big.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(body_text_len(response).await, 1000);
}

#[tokio::test]
async fn plain_files_honor_if_modified_since() {
    let site = site(false);

    let response = get(&site, "/assets/logo.txt").await;
    let last_modified = response.headers()[header::LAST_MODIFIED].clone();

    let request = Request::builder()
        .uri("/assets/logo.txt")
        .header(header::IF_MODIFIED_SINCE, last_modified)
        .body(Body::empty())
        .unwrap();
    let response = send(&site, request).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn renders_listings_when_enabled() {
    let site = site(true);

    let response = get(&site, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("<a href=\"/assets/\">assets/</a>"));
    assert!(html.contains("<a href=\"/docs/\">docs.zip</a>"));

    let html = body_text(get(&site, "/assets").await).await;
    assert!(html.contains("<a href=\"/assets/logo.txt\">logo.txt</a>"));
}

#[test]
fn rejects_missing_directories() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(dir.path().join("absent"))
        .cache_dir(dir.path())
        .build();
    assert!(Service::new(config).is_err());
}
