//! HTTP server implementation
//!
//! Implements:
//! - Row retrieval (GET/POST /generate)
//! - Session cache clearing (POST /clear_cache)
//! - The truth table page (GET/POST /) and its assets (GET /static/*path)
//! - Liveness probe (GET /health)
//! - Security headers middleware

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error};

use crate::cache::{CacheError, SessionId};
use crate::config::defaults::DEFAULT_WEB_ROOT;
use crate::lifecycle::LifecycleManager;
use crate::rows::{GenerateParams, GenerateRequest, RowService, RowsError};
use crate::server::headers::{security_headers_middleware, SecurityHeadersConfig};

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Directory holding `templates/index.html` and `static/`
    pub web_root: PathBuf,
    /// Add security headers to every response
    pub security_headers: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            web_root: PathBuf::from(DEFAULT_WEB_ROOT),
            security_headers: true,
        }
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    config: Arc<HttpConfig>,
    rows: Arc<RowService>,
    lifecycle: Arc<LifecycleManager>,
    start_time: i64,
}

/// Create the HTTP router with all endpoints
pub fn create_router(
    config: HttpConfig,
    rows: Arc<RowService>,
    lifecycle: Arc<LifecycleManager>,
) -> Router {
    let security_headers = config.security_headers;
    let state = AppState {
        config: Arc::new(config),
        rows,
        lifecycle,
        start_time: chrono::Utc::now().timestamp(),
    };

    let router = Router::new()
        .route("/", get(index_handler).post(index_handler))
        .route("/static/*path", get(static_handler))
        .route("/generate", get(generate_handler).post(generate_handler))
        .route("/clear_cache", post(clear_cache_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if security_headers {
        router.layer(middleware::from_fn_with_state(
            Arc::new(SecurityHeadersConfig::default()),
            security_headers_middleware,
        ))
    } else {
        router
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(err: &RowsError) -> StatusCode {
    match err {
        RowsError::InvalidRequest(_) | RowsError::Cache(CacheError::InvalidSession) => {
            StatusCode::BAD_REQUEST
        }
        RowsError::Cache(CacheError::NotFound { .. }) => StatusCode::NOT_FOUND,
        RowsError::Cache(CacheError::Deletion { .. })
        | RowsError::Cache(CacheError::Io(_))
        | RowsError::Producer(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RowsError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(target: "http", status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(target: "http", status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Malformed query strings (e.g. a repeated key) get the same JSON error shape
fn invalid_query(rejection: QueryRejection) -> RowsError {
    RowsError::InvalidRequest(rejection.body_text())
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

// ============================================================================
// Rows
// ============================================================================

/// GET|POST /generate - Rows of the truth table (or its true rows) for an expression.
async fn generate_handler(
    State(state): State<AppState>,
    query: Result<Query<GenerateParams>, QueryRejection>,
) -> Result<Json<Vec<String>>, RowsError> {
    let Query(params) = query.map_err(invalid_query)?;
    let request = GenerateRequest::from_params(&params)?;
    debug!(
        target: "http",
        mode = request.mode.as_str(),
        start = request.start,
        end = request.end,
        "Generate request"
    );
    let rows = state.rows.generate(&request).await?;
    Ok(Json(rows))
}

/// Query parameters for /clear_cache
#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheParams {
    pub session_id: Option<String>,
}

/// POST /clear_cache - Drop every cache artifact owned by a session.
async fn clear_cache_handler(
    State(state): State<AppState>,
    query: Result<Query<ClearCacheParams>, QueryRejection>,
) -> Result<Response, RowsError> {
    let Query(params) = query.map_err(invalid_query)?;
    let session = SessionId::parse(params.session_id.as_deref())?;
    let removed = state.lifecycle.clear_session(&session).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Cache cleared successfully",
            "removed": removed,
        })),
    )
        .into_response())
}

// ============================================================================
// Page and assets
// ============================================================================

/// GET|POST / - The truth table page.
async fn index_handler(State(state): State<AppState>) -> Response {
    let index_path = state.config.web_root.join("templates").join("index.html");
    if !index_path.is_file() {
        return not_found("index.html not found");
    }
    serve_file(&index_path).await
}

/// GET /static/*path - Page assets.
async fn static_handler(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    // Security: prevent path traversal
    let safe_path = path.trim_start_matches('/');
    if safe_path.is_empty() || safe_path.split(['/', '\\']).any(|part| part == "..") {
        return not_found("Not Found");
    }

    let file_path = state.config.web_root.join("static").join(safe_path);
    if !file_path.is_file() {
        return not_found("Not Found");
    }
    serve_file(&file_path).await
}

/// Serve a static file
async fn serve_file(path: &std::path::Path) -> Response {
    let content_type = get_content_type(path);

    match fs::read(path).await {
        Ok(content) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            content,
        )
            .into_response(),
        Err(_) => not_found("Not Found"),
    }
}

/// Get content type based on file extension
fn get_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("map") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Health Check
// ============================================================================

/// GET /health - Lightweight liveness probe.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::producer::{ProducerError, RowProducer};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Producer over a fixed list of true rows.
    struct FixedProducer {
        rows: Vec<String>,
        full_scans: AtomicUsize,
    }

    impl FixedProducer {
        fn new(count: usize) -> Self {
            Self {
                rows: (0..count).map(|i| format!("row{}", i)).collect(),
                full_scans: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RowProducer for FixedProducer {
        async fn produce_range(
            &self,
            expression: &str,
            start: u64,
            end: u64,
        ) -> Result<Vec<String>, ProducerError> {
            if expression == "a &" {
                return Err(ProducerError::Failed {
                    status: "exit status: 1".to_string(),
                    diagnostic: "Invalid expression".to_string(),
                });
            }
            Ok((start..end).map(|i| format!("{} {}", expression, i)).collect())
        }

        async fn produce_all_to_file(
            &self,
            _expression: &str,
            target: &std::path::Path,
        ) -> Result<(), ProducerError> {
            self.full_scans.fetch_add(1, Ordering::SeqCst);
            let mut content = self.rows.join("\n");
            content.push('\n');
            tokio::fs::write(target, content)
                .await
                .map_err(|_| ProducerError::Output)
        }
    }

    struct Harness {
        dir: TempDir,
        producer: Arc<FixedProducer>,
        store: CacheStore,
        router: Router,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache_files"));
        let producer = Arc::new(FixedProducer::new(250));
        let rows = Arc::new(RowService::new(store.clone(), producer.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        let config = HttpConfig {
            web_root: dir.path().join("web"),
            security_headers: true,
        };
        let router = create_router(config, rows, lifecycle);
        Harness {
            dir,
            producer,
            store,
            router,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_generate_truth_table_range() {
        let h = harness();
        let (status, json) = send(
            &h.router,
            "GET",
            "/generate?expression=a%26b&start=0&end=4&mode=truth_table",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!(["a&b 0", "a&b 1", "a&b 2", "a&b 3"]));
        assert_eq!(h.producer.full_scans.load(Ordering::SeqCst), 0);
        assert!(!h.store.root().exists());
    }

    #[tokio::test]
    async fn test_generate_post_reads_query_and_defaults() {
        let h = harness();
        let (status, json) = send(&h.router, "POST", "/generate?expression=x").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 100);
        assert_eq!(json[0], "x 0");
    }

    #[tokio::test]
    async fn test_generate_validation_errors() {
        let h = harness();

        let (status, json) = send(&h.router, "GET", "/generate").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No expression provided");

        let (status, _) = send(&h.router, "GET", "/generate?expression=a&start=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&h.router, "GET", "/generate?expression=a&start=9&end=3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&h.router, "GET", "/generate?expression=a&mode=all").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(&h.router, "GET", "/generate?expression=a&mode=true_rows").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No session ID provided");
    }

    #[tokio::test]
    async fn test_malformed_query_is_json_400() {
        let h = harness();

        let (status, json) =
            send(&h.router, "GET", "/generate?expression=a&expression=b").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("duplicate field"));

        let (status, json) =
            send(&h.router, "POST", "/clear_cache?session_id=a&session_id=b").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("duplicate field"));
    }

    #[tokio::test]
    async fn test_generate_producer_failure_is_500() {
        let h = harness();
        let (status, json) = send(&h.router, "GET", "/generate?expression=a%20%26").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("Invalid expression"));
    }

    #[tokio::test]
    async fn test_true_rows_first_window_ignores_start() {
        let h = harness();
        let uri = "/generate?expression=a&start=50&mode=true_rows&session_id=s1";

        let (status, json) = send(&h.router, "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[0], "row0");

        // Populated now: start is honoured and the producer is not rerun
        let (status, json) = send(&h.router, "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0], "row50");

        let (_, json) = send(
            &h.router,
            "GET",
            "/generate?expression=a&start=200&mode=true_rows&session_id=s1",
        )
        .await;
        assert_eq!(json.as_array().unwrap().len(), 50);
        assert_eq!(h.producer.full_scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let h = harness();

        let (status, json) = send(&h.router, "POST", "/clear_cache").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, json!({ "error": "No session ID provided" }));

        let (status, json) = send(&h.router, "POST", "/clear_cache?session_id=nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json,
            json!({ "error": "No cache files found for the provided session ID" })
        );

        send(
            &h.router,
            "GET",
            "/generate?expression=a&mode=true_rows&session_id=s1",
        )
        .await;
        let (status, json) = send(&h.router, "POST", "/clear_cache?session_id=s1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Cache cleared successfully");
        assert_eq!(json["removed"], 1);

        send(
            &h.router,
            "GET",
            "/generate?expression=a&mode=true_rows&session_id=s1",
        )
        .await;
        assert_eq!(h.producer.full_scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_deletion_failure_is_500() {
        let h = harness();
        let root = h.store.root();
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("s1-a.cache"), "row\n").unwrap();
        std::fs::create_dir(root.join("s1-b.cache")).unwrap();
        std::fs::write(root.join("s1.cache"), "row\n").unwrap();

        let (status, json) = send(&h.router, "POST", "/clear_cache?session_id=s1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .starts_with("Error deleting cache file:"));
        assert!(!root.join("s1-a.cache").exists());
        assert!(root.join("s1.cache").exists());
    }

    #[tokio::test]
    async fn test_clear_cache_rejects_get() {
        let h = harness();
        let (status, _) = send(&h.router, "GET", "/clear_cache?session_id=s1").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_index_and_static() {
        let h = harness();

        let (status, json) = send(&h.router, "GET", "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "index.html not found");

        let web = h.dir.path().join("web");
        std::fs::create_dir_all(web.join("templates")).unwrap();
        std::fs::create_dir_all(web.join("static").join("js")).unwrap();
        std::fs::write(web.join("templates").join("index.html"), "<html></html>").unwrap();
        std::fs::write(web.join("static").join("js").join("script.js"), "fetch()").unwrap();

        let response = h
            .router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
            "DENY"
        );

        let response = h
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/static/js/script.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript; charset=utf-8"
        );

        let (status, _) = send(&h.router, "GET", "/static/js/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_rejects_traversal() {
        let h = harness();
        let web = h.dir.path().join("web");
        std::fs::create_dir_all(web.join("static")).unwrap();
        std::fs::write(h.dir.path().join("secret.txt"), "secret").unwrap();

        let (status, _) = send(&h.router, "GET", "/static/../../secret.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&h.router, "GET", "/static/..%2F..%2Fsecret.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, json) = send(&h.router, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["uptimeSeconds"].as_i64().unwrap() >= 0);
    }

    #[test]
    fn test_get_content_type() {
        assert_eq!(
            get_content_type(std::path::Path::new("a/b.css")),
            "text/css; charset=utf-8"
        );
        assert_eq!(
            get_content_type(std::path::Path::new("blob")),
            "application/octet-stream"
        );
    }
}
