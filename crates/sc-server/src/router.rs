//! Axum router construction.
//!
//! Builds the application router with its routes, middleware layers, the
//! OpenAPI document and static file serving.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::upload::upload,
        routes::download::download,
        routes::tools::list_tools,
    ),
    components(schemas(
        routes::ErrorBody,
        routes::upload::UploadResponse,
        routes::upload::UploadForm,
        routes::tools::ToolStatus,
    )),
    tags(
        (name = "conversion", description = "Image + audio to MP4"),
        (name = "system", description = "Service status"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Whole-request limit for `/upload`: two files at the per-file limit plus
/// room for multipart framing. The per-file limit is enforced while
/// streaming each field.
fn upload_body_limit(max_file_bytes: u64) -> usize {
    let total = max_file_bytes.saturating_mul(2).saturating_add(1024 * 1024);
    usize::try_from(total).unwrap_or(usize::MAX)
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = upload_body_limit(ctx.max_upload_bytes());
    let static_dir = ctx.config.server.static_dir.clone();

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/upload",
            post(routes::upload::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/download/{filename}",
            get(routes::download::download).head(routes::download::download_head),
        )
        .route("/api/tools", get(routes::tools::list_tools))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    if static_dir.is_dir() {
        tracing::info!("Serving static files from {}", static_dir.display());
        let index_path = static_dir.join("index.html");
        app = app.fallback_service(
            tower_http::services::ServeDir::new(&static_dir)
                .append_index_html_on_directories(true)
                .not_found_service(tower_http::services::ServeFile::new(index_path)),
        );
    }

    app
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sc_core::config::Config;
    use tower::ServiceExt;

    fn test_router(dir: &tempfile::TempDir) -> Router {
        let mut config = Config::default();
        config.scratch.dir = dir.path().join("scratch");
        config.server.static_dir = dir.path().join("no-static");
        build_router(AppContext::from_config(config).unwrap())
    }

    #[tokio::test]
    async fn health_returns_ok_with_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(&dir)
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn unknown_download_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(&dir)
            .oneshot(
                Request::get("/download/output_video_nope.mp4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_without_multipart_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(&dir)
            .oneshot(
                Request::post("/upload")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn static_dir_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "<h1>stillcast</h1>").unwrap();

        let mut config = Config::default();
        config.scratch.dir = dir.path().join("scratch");
        config.server.static_dir = public;
        let app = build_router(AppContext::from_config(config).unwrap());

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn body_limit_covers_two_files() {
        assert_eq!(upload_body_limit(100), 200 + 1024 * 1024);
        assert_eq!(upload_body_limit(u64::MAX), usize::MAX);
    }

    #[test]
    fn openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/upload", "/download/{filename}", "/health", "/api/tools"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
