//! LAN file sharing server binary.
//!
//! This crate wires together the upload receiver, the range-aware download
//! streamer, the directory listing and the embedded upload page. The main
//! entry point builds the Axum router, binds the listener and blocks until
//! shutdown.

mod config;
mod error;
mod etag;
mod files;
mod frontend;
mod http;
mod logging;
mod storage;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use local_ip_address::local_ip;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::Args;
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::upload::UploadLimits;

shadow!(build);

/// Builds the application router around a storage root and upload limits.
fn app(storage: Arc<Storage>, limits: Arc<UploadLimits>, cors_origins: Option<&str>) -> Router {
    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::receive_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/files", get(files::list_files))
        .route("/download/{file_id}", get(files::download_file))
        .route("/version", get(version::get_version_info))
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = http::resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(limits));

    if let Some(cors_layer) = build_cors_layer(cors_origins) {
        app = app.layer(cors_layer);
    }

    app
}

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    info!("📁 Storage directory: {}", storage.root_path().display());
    let limits = Arc::new(UploadLimits {
        max_total_size: args.upload_max_size,
    });
    let app = app(storage, limits, args.cors_origins.as_deref());

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    let display_ip = if host.is_unspecified() {
        local_ip().unwrap_or(host)
    } else {
        host
    };
    info!("🚀 Server running at http://{}:{}", display_ip, args.port);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "lan-share-test-boundary";

    fn test_app(max_total_size: u64) -> (tempfile::TempDir, Arc<Storage>, Router) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        let storage = Arc::new(Storage::new(root));
        let limits = Arc::new(UploadLimits { max_total_size });
        let router = app(storage.clone(), limits, None);
        (temp, storage, router)
    }

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (field, filename, content) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                     filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    async fn upload(router: &Router, parts: &[(&str, &str, &[u8])]) -> StatusCode {
        let (content_type, body) = multipart_body(parts);
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    async fn get_response(
        router: &Router,
        uri: &str,
        headers: &[(header::HeaderName, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_exact_bytes() {
        let (_temp, storage, router) = test_app(0);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let status = upload(&router, &[("files", "data.bin", &payload)]).await;
        assert_eq!(status, StatusCode::OK);
        let on_disk = std::fs::read(storage.root_path().join("data.bin")).unwrap();
        assert_eq!(on_disk, payload);

        let response = get_response(&router, "/download/data.bin", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            payload.len().to_string().as_str()
        );
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(body_bytes(response).await, payload);
    }

    #[tokio::test]
    async fn duplicate_upload_renames_and_serves_ranges() {
        let (_temp, _storage, router) = test_app(0);
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 241) as u8).collect();

        assert_eq!(
            upload(&router, &[("files", "report.pdf", &payload)]).await,
            StatusCode::OK
        );
        assert_eq!(
            upload(&router, &[("files", "report.pdf", &payload)]).await,
            StatusCode::OK
        );

        let response = get_response(&router, "/files", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let listing: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        let names: Vec<&str> = listing
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"report.pdf"));
        assert!(names.contains(&"report_1.pdf"));
        for entry in listing.as_array().unwrap() {
            assert_eq!(entry["id"], entry["name"]);
            assert_eq!(entry["size"].as_u64().unwrap(), payload.len() as u64);
            assert!(entry["timestamp"].as_i64().unwrap() > 0);
            assert_eq!(entry["exists"], true);
        }

        let response = get_response(
            &router,
            "/download/report_1.pdf",
            &[(header::RANGE, "bytes=0-99")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes 0-99/{}", payload.len()).as_str()
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        assert_eq!(body_bytes(response).await, &payload[..100]);
    }

    #[tokio::test]
    async fn upload_without_files_field_is_rejected() {
        let (_temp, storage, router) = test_app(0);
        let status = upload(&router, &[("attachment", "x.bin", b"abc")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(storage.list_entries().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn upload_skips_parts_with_empty_filename() {
        let (_temp, storage, router) = test_app(0);
        let status = upload(
            &router,
            &[("files", "", b"ignored"), ("files", "kept.txt", b"data")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let entries = storage.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "kept.txt");
    }

    #[tokio::test]
    async fn upload_sanitizes_traversal_filenames() {
        let (_temp, storage, router) = test_app(0);
        let status = upload(&router, &[("files", "../evil.txt", b"data")]).await;
        assert_eq!(status, StatusCode::OK);

        let entries = storage.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "evil.txt");
    }

    #[tokio::test]
    async fn upload_over_size_limit_fails_and_removes_partial_file() {
        let (_temp, storage, router) = test_app(100);
        let payload = vec![0u8; 200];
        let status = upload(&router, &[("files", "big.bin", &payload)]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            storage.list_entries().await.unwrap().len(),
            0,
            "aborted part must not leave a partial file behind"
        );
    }

    #[tokio::test]
    async fn earlier_parts_survive_a_failed_request() {
        let (_temp, storage, router) = test_app(100);
        let big = vec![0u8; 200];
        let status = upload(
            &router,
            &[("files", "small.bin", b"ok"), ("files", "big.bin", &big)],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let entries = storage.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "small.bin");
    }

    #[tokio::test]
    async fn download_missing_file_returns_json_error() {
        let (_temp, _storage, router) = test_app(0);
        let response = get_response(&router, "/download/absent.bin", &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn download_range_past_eof_returns_416() {
        let (_temp, _storage, router) = test_app(0);
        assert_eq!(
            upload(&router, &[("files", "abc.txt", b"abc")]).await,
            StatusCode::OK
        );

        let response = get_response(&router, "/download/abc.txt", &[(header::RANGE, "bytes=3-")])
            .await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */3");
    }

    #[tokio::test]
    async fn download_traversal_id_is_rejected() {
        let (_temp, _storage, router) = test_app(0);
        let response = get_response(&router, "/download/..%2Fsecret.txt", &[]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (_temp, _storage, router) = test_app(0);
        let response = get_response(&router, "/files", &[]).await;
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }
}
