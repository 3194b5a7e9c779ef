//! HTTP tile source tests against a local tile server.
//!
//! Tests verify:
//! - Successful tile downloads and decoding
//! - Status code and transport error mapping
//! - Session headers reaching the server
//! - Manifest downloads

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use tile_animator::{
    AnimationOverlay, FetchError, FrameManifest, HttpTileSource, OverlayConfig, SessionConfig,
    TileCoordinate, TileSource,
};

use super::test_utils::png_tile;

const MANIFEST: &str = r#"{
    "template": "http://HOST/frames/{timestamp}/{z}/{x}/{y}.png",
    "timestamps": ["0900", "0910", "0920", "0930"]
}"#;

// =============================================================================
// Test Server
// =============================================================================

async fn frame_tile(
    Path((frame, z, x, y)): Path<(String, u32, u32, String)>,
) -> impl IntoResponse {
    let y = y.trim_end_matches(".png");
    if frame == "missing" || y.parse::<u32>().is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let shade = (z * 40 + x * 10) as u8;
    (
        [("content-type", "image/png")],
        png_tile(8, [shade, 0, 0, 255]),
    )
        .into_response()
}

async fn private_tile(headers: HeaderMap) -> impl IntoResponse {
    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some("secret") => png_tile(8, [0, 0, 255, 255]).into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn slow_tile() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(5)).await;
    png_tile(8, [0, 255, 0, 255])
}

/// Start a tile server on an ephemeral port and return its address.
async fn spawn_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manifest_body = MANIFEST.replace("HOST", &addr.to_string());

    let app = Router::new()
        .route("/frames/{frame}/{z}/{x}/{y}", get(frame_tile))
        .route("/private/tile.png", get(private_tile))
        .route("/slow/tile.png", get(slow_tile))
        .route(
            "/manifest.json",
            get(move || {
                let body = manifest_body.clone();
                async move { ([("content-type", "application/json")], body) }
            }),
        )
        .route("/broken.json", get(|| async { "{\"template\": 5}" }));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn frame_templates(addr: SocketAddr, frames: &[&str]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| format!("http://{}/frames/{}/{{z}}/{{x}}/{{y}}.png", addr, frame))
        .collect()
}

// =============================================================================
// HttpTileSource
// =============================================================================

#[tokio::test]
async fn test_fetch_tile_success() {
    let addr = spawn_server().await;
    let source = HttpTileSource::new(&SessionConfig::default()).unwrap();

    let url = format!("http://{}/frames/0900/2/1/3.png", addr);
    let bytes = source.fetch(&url).await.unwrap();

    let image = image::load_from_memory(&bytes).unwrap();
    assert_eq!(image.width(), 8);
    assert_eq!(source.identifier(), "http");
}

#[tokio::test]
async fn test_fetch_not_found_is_bad_url_response() {
    let addr = spawn_server().await;
    let source = HttpTileSource::new(&SessionConfig::default()).unwrap();

    let url = format!("http://{}/frames/missing/2/1/3.png", addr);
    let err = source.fetch(&url).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::BadUrlResponse {
            url: url.clone(),
            status: 404
        }
    );
}

#[tokio::test]
async fn test_session_headers_are_sent() {
    let addr = spawn_server().await;
    let url = format!("http://{}/private/tile.png", addr);

    let anonymous = HttpTileSource::new(&SessionConfig::default()).unwrap();
    assert!(matches!(
        anonymous.fetch(&url).await,
        Err(FetchError::BadUrlResponse { status: 401, .. })
    ));

    let session = SessionConfig::default().with_header("X-Api-Key", "secret");
    let authorized = HttpTileSource::new(&session).unwrap();
    assert!(authorized.fetch(&url).await.is_ok());
}

#[tokio::test]
async fn test_request_timeout() {
    let addr = spawn_server().await;
    let session = SessionConfig::default().with_timeout(Duration::from_millis(100));
    let source = HttpTileSource::new(&session).unwrap();

    let url = format!("http://{}/slow/tile.png", addr);
    assert_eq!(
        source.fetch(&url).await.unwrap_err(),
        FetchError::Timeout { url }
    );
}

// =============================================================================
// End to End
// =============================================================================

#[tokio::test]
async fn test_overlay_loads_over_http() {
    let addr = spawn_server().await;
    let config = OverlayConfig::new(
        frame_templates(addr, &["0900", "missing", "0920"]),
        Duration::from_millis(100),
    )
    .with_zoom_range(0, 6)
    .with_tile_size(8);
    let mut overlay = AnimationOverlay::new(config).unwrap();

    let tile = TileCoordinate::new(1, 1, 2);
    let (tx, rx) = tokio::sync::oneshot::channel();
    overlay
        .fetch_tiles_for_map_rect(
            tile_animator::map_rect(tile),
            tile.z,
            |_| {},
            move |outcome| {
                let _ = tx.send(outcome);
            },
        )
        .unwrap();
    overlay.wait_for_load().await;

    let outcome = rx.await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.loaded_frames, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].frame_index, 1);

    let image = overlay.current_frame_image(&tile).unwrap();
    assert_eq!(image.width(), 8);
}

// =============================================================================
// Manifests
// =============================================================================

#[tokio::test]
async fn test_manifest_from_url() {
    let addr = spawn_server().await;
    let url = format!("http://{}/manifest.json", addr);

    let manifest = FrameManifest::load(&url, &SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(manifest.timestamps.len(), 4);

    let templates = manifest.template_urls(2);
    assert_eq!(templates.len(), 2);
    assert_eq!(
        templates[1].as_str(),
        format!("http://{}/frames/0920/{{z}}/{{x}}/{{y}}.png", addr)
    );

    // Manifest frames resolve against the same server
    let source = HttpTileSource::new(&SessionConfig::default()).unwrap();
    let bytes = source
        .fetch(&templates[0].expand(TileCoordinate::new(0, 0, 1)))
        .await
        .unwrap();
    assert!(!bytes.is_empty());
}

#[tokio::test]
async fn test_manifest_errors() {
    let addr = spawn_server().await;
    let session = SessionConfig::default();

    let broken = FrameManifest::from_url(&format!("http://{}/broken.json", addr), &session).await;
    assert!(matches!(broken, Err(tile_animator::ManifestError::Json(_))));

    let missing =
        FrameManifest::from_url(&format!("http://{}/nothing.json", addr), &session).await;
    assert!(matches!(missing, Err(tile_animator::ManifestError::Load(_))));
}
