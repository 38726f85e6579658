//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the complete router: `/health` plus everything under `/api`.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(ctx.config.server.max_upload_bytes).unwrap_or(usize::MAX);

    let api = Router::new()
        .route(
            "/upload",
            post(routes::upload::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/jobs", get(routes::jobs::list_jobs))
        .route("/jobs/{id}", get(routes::jobs::get_job))
        .route("/jobs/{id}/download/{*file}", get(routes::jobs::download))
        .route("/formats", get(routes::formats::list_formats));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rf_av::ToolRegistry;
    use rf_core::config::Config;
    use tower::ServiceExt;

    use super::*;

    fn app(dir: &std::path::Path) -> Router {
        let mut config = Config::default();
        config.server.upload_dir = dir.join("uploads");
        config.server.output_dir = dir.join("output");
        let ctx = AppContext::from_config(config, Arc::new(ToolRegistry::default())).unwrap();
        build_router(ctx)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn formats_are_grouped_by_platform() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = send(app(dir.path()), get("/api/formats")).await;
        assert_eq!(status, StatusCode::OK);
        let square = json["instagram"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "Square")
            .unwrap();
        assert_eq!(square["dimensions"]["width"], 1080);
    }

    #[tokio::test]
    async fn job_lookup_errors_map_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = send(app(dir.path()), get("/api/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "validation_error");

        let unknown = rf_core::JobId::new();
        let (status, json) = send(app(dir.path()), get(&format!("/api/jobs/{unknown}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "not_found");

        let (status, _) = send(
            app(dir.path()),
            get(&format!("/api/jobs/{unknown}/download/instagram_square.jpg")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_job_list() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = send(app(dir.path()), get("/api/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn upload_without_formats_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             not really a jpeg\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();

        let (status, json) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("no formats"));

        let leftovers = std::fs::read_dir(dir.path().join("uploads"))
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn upload_with_only_empty_platforms_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             not really a jpeg\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"formats\"\r\n\r\n\
             {{\"instagram\": []}}\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();

        let (status, json) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("no formats"));
    }
}
