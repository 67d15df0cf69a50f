use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use extract::ModelCatalog;
use graph::{GraphPipeline, GraphRenderer, PipelineDiagnostics, PipelineError};
use ingest::{FileReader, content_hash};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{CachedGraph, GraphCache, is_valid_key};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GraphPipeline>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub renderer: Arc<GraphRenderer>,
    pub cache: Arc<GraphCache>,
    pub metrics: Arc<Metrics>,
    /// Serve stored graphs instead of regenerating them.
    pub cache_enabled: bool,
    /// Canonical directory `path` requests are confined to; `None` rejects them.
    pub input_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("model server unavailable: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::EmptyInput => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    ollama: String,
    default_model: String,
    graphs_cached: usize,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
    default_model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    /// Raw document text; takes precedence over `path`.
    text: Option<String>,
    /// A `.txt` or `.md` file, relative to the server's input directory.
    path: Option<String>,
    model: Option<String>,
    batch_size: Option<usize>,
}

#[derive(Serialize)]
struct GenerateResponse {
    hash: String,
    cached: bool,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<PipelineDiagnostics>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/models", get(list_models))
        .route("/graphs", get(list_graphs).post(generate_graph))
        .route("/graphs/:hash", get(get_graph))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ollama = match state.catalog.list_models().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        ollama,
        default_model: state.pipeline.config().default_model.clone(),
        graphs_cached: state.cache.len(),
    })
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state
        .catalog
        .list_models()
        .await
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))?;

    Ok(Json(ModelsResponse {
        models,
        default_model: state.pipeline.config().default_model.clone(),
    }))
}

async fn generate_graph(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let result = run_generate(&state, req).await;
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

async fn run_generate(state: &AppState, req: GenerateRequest) -> Result<GenerateResponse, ApiError> {
    if req.batch_size == Some(0) {
        return Err(ApiError::BadRequest("batch_size must be at least 1".to_string()));
    }

    let text = read_input(&req, state.input_dir.as_deref()).await?;
    let hash = content_hash(&text);
    let url = format!("/graphs/{hash}");

    if state.cache_enabled && state.cache.contains(&hash) {
        info!(hash = %hash, "serving stored graph");
        state.metrics.record_cache_hit();
        return Ok(GenerateResponse {
            hash,
            cached: true,
            url,
            diagnostics: None,
        });
    }

    let timer = TimedOperation::start();
    let build = state
        .pipeline
        .generate(&text, req.model.as_deref(), req.batch_size)
        .await?;
    state.metrics.record_generation(timer.elapsed(), &build.diagnostics);

    let timer = TimedOperation::start();
    let title = format!("Knowledge Graph {}", &hash[..12]);
    let html = state.renderer.render(&build.graph, &title);
    state.metrics.record_render(timer.elapsed());

    state.cache.store(&hash, &html).await?;

    Ok(GenerateResponse {
        hash,
        cached: false,
        url,
        diagnostics: Some(build.diagnostics),
    })
}

async fn read_input(
    req: &GenerateRequest,
    input_dir: Option<&std::path::Path>,
) -> Result<String, ApiError> {
    if let Some(text) = &req.text {
        return Ok(text.clone());
    }

    let Some(path) = &req.path else {
        return Err(ApiError::BadRequest("either text or path is required".to_string()));
    };
    let Some(input_dir) = input_dir else {
        return Err(ApiError::BadRequest("reading files is disabled on this server".to_string()));
    };

    let path = match tokio::fs::canonicalize(input_dir.join(path)).await {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("no such file: {path}")));
        }
        Err(e) => return Err(ApiError::BadRequest(format!("cannot resolve {path}: {e}"))),
    };
    // Symlinks and `..` are resolved above, so a prefix check is enough.
    if !path.starts_with(input_dir) {
        warn!(path = %path.display(), "path outside input directory rejected");
        return Err(ApiError::BadRequest("path is outside the input directory".to_string()));
    }
    if !path.is_file() {
        return Err(ApiError::NotFound(format!("no such file: {}", path.display())));
    }

    FileReader::read_file(&path)
        .await
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))
}

async fn list_graphs(State(state): State<AppState>) -> Json<Vec<CachedGraph>> {
    Json(state.cache.list())
}

async fn get_graph(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Html<String>, ApiError> {
    if !is_valid_key(&hash) {
        return Err(ApiError::BadRequest(format!("not a graph key: {hash}")));
    }

    match state.cache.get(&hash).await? {
        Some(html) => Ok(Html(html)),
        None => Err(ApiError::NotFound(format!("no graph stored for {hash}"))),
    }
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use extract::{
        ContextLengthResolver, ExtractionBackend, ExtractionFragment, ExtractorFactory, GraphNode,
        GraphRelationship,
    };
    use graph::PipelineConfig;
    use ingest::TextChunk;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt; // for oneshot

    struct MockResolver;

    #[async_trait]
    impl ContextLengthResolver for MockResolver {
        async fn context_length(&self, _model: &str) -> anyhow::Result<usize> {
            Ok(4096)
        }
    }

    struct MockCatalog {
        available: bool,
    }

    #[async_trait]
    impl ModelCatalog for MockCatalog {
        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            if !self.available {
                anyhow::bail!("connection refused");
            }
            Ok(vec!["gemma:2b".to_string(), "llama3:8b".to_string()])
        }
    }

    #[derive(Default)]
    struct MockBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionBackend for MockBackend {
        async fn extract_batch(&self, batch: &[TextChunk]) -> anyhow::Result<Vec<ExtractionFragment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .iter()
                .map(|chunk| ExtractionFragment {
                    chunk_index: chunk.index,
                    nodes: vec![
                        GraphNode::new("Alice", "Person"),
                        GraphNode::new("Bob", "Person"),
                        GraphNode::new("Acme", "Organization"),
                    ],
                    relationships: vec![
                        GraphRelationship::new("Alice", "WORKS_AT", "Acme"),
                        GraphRelationship::new("Bob", "LEADS", "Acme"),
                        GraphRelationship::new("Bob", "KNOWS", "Carol"),
                    ],
                })
                .collect())
        }
    }

    struct MockFactory(Arc<MockBackend>);

    impl ExtractorFactory for MockFactory {
        fn for_model(&self, _model: &str) -> Arc<dyn ExtractionBackend> {
            self.0.clone()
        }
    }

    struct TestApp {
        state: AppState,
        backend: Arc<MockBackend>,
        _dir: tempfile::TempDir,
    }

    async fn test_app(cache_enabled: bool, catalog_available: bool) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::default());
        let pipeline = GraphPipeline::new(
            Arc::new(MockResolver),
            Arc::new(MockFactory(backend.clone())),
            PipelineConfig::default(),
        );
        let state = AppState {
            pipeline: Arc::new(pipeline),
            catalog: Arc::new(MockCatalog {
                available: catalog_available,
            }),
            renderer: Arc::new(GraphRenderer::default()),
            cache: Arc::new(GraphCache::open(dir.path()).await.unwrap()),
            metrics: Metrics::new(),
            cache_enabled,
            input_dir: None,
        };
        TestApp {
            state,
            backend,
            _dir: dir,
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_graph(state: &AppState, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/graphs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(true, true).await;
        let (status, body) = get_json(&app.state, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ollama"], "ok");
        assert_eq!(body["default_model"], "gemma");

        let down = test_app(true, false).await;
        let (status, body) = get_json(&down.state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["ollama"].as_str().unwrap().starts_with("error"));
    }

    #[tokio::test]
    async fn test_list_models() {
        let app = test_app(true, true).await;
        let (status, body) = get_json(&app.state, "/models").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"], serde_json::json!(["gemma:2b", "llama3:8b"]));

        let down = test_app(true, false).await;
        let (status, _) = get_json(&down.state, "/models").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_generate_then_serve_from_cache() {
        let app = test_app(true, true).await;
        let text = "Alice works at Acme. Bob leads Acme.";

        let (status, body) = post_graph(&app.state, serde_json::json!({ "text": text })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], false);
        assert_eq!(body["hash"], content_hash(text));
        assert_eq!(body["diagnostics"]["node_count"], 3);
        assert_eq!(body["diagnostics"]["relationship_count"], 2);
        assert_eq!(body["diagnostics"]["dropped_relationships"], 1);

        let url = body["url"].as_str().unwrap().to_string();
        let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
        let (status, html) = send(&app.state, request).await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(html).unwrap();
        assert!(html.contains("vis.Network"));
        assert!(html.contains("Works_At"));

        let (status, body) = post_graph(&app.state, serde_json::json!({ "text": text })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], true);
        assert!(body.get("diagnostics").is_none());
        assert_eq!(app.backend.calls.load(Ordering::SeqCst), 1);

        let (_, metrics) = get_json(&app.state, "/metrics").await;
        assert_eq!(metrics["total_requests"], 2);
        assert_eq!(metrics["cache_hits"], 1);
        assert_eq!(metrics["graphs_generated"], 1);

        let (_, graphs) = get_json(&app.state, "/graphs").await;
        assert_eq!(graphs[0]["hash"], content_hash(text));
    }

    #[tokio::test]
    async fn test_disabled_cache_regenerates() {
        let app = test_app(false, true).await;
        let body = serde_json::json!({ "text": "Alice works at Acme.", "model": "llama3", "batch_size": 2 });

        post_graph(&app.state, body.clone()).await;
        let (status, response) = post_graph(&app.state, body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["cached"], false);
        assert_eq!(response["diagnostics"]["model"], "llama3");
        assert_eq!(response["diagnostics"]["batch_size"], 2);
        assert_eq!(app.backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let app = test_app(true, true).await;

        let (status, body) = post_graph(&app.state, serde_json::json!({ "text": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));

        let (status, _) = post_graph(&app.state, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            post_graph(&app.state, serde_json::json!({ "text": "Alice", "batch_size": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, metrics) = get_json(&app.state, "/metrics").await;
        assert_eq!(metrics["failed_requests"], 3);
        assert_eq!(app.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_from_file() {
        let mut app = test_app(true, true).await;
        let docs = tempfile::tempdir().unwrap();
        std::fs::write(docs.path().join("notes.md"), "# Notes\n\nAlice works at Acme.").unwrap();
        std::fs::write(docs.path().join("notes.pdf"), "binary").unwrap();
        app.state.input_dir = Some(docs.path().canonicalize().unwrap());

        let (status, body) = post_graph(&app.state, serde_json::json!({ "path": "notes.md" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], false);

        let (status, _) = post_graph(&app.state, serde_json::json!({ "path": "notes.pdf" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_graph(&app.state, serde_json::json!({ "path": "missing.txt" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_reads_confined_to_input_dir() {
        let mut app = test_app(true, true).await;
        let root = tempfile::tempdir().unwrap();
        let docs = root.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        let secret = root.path().join("secret.txt");
        std::fs::write(&secret, "Carol owns the vault.").unwrap();

        let (status, _) = post_graph(&app.state, serde_json::json!({ "path": "secret.txt" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.state.input_dir = Some(docs.canonicalize().unwrap());
        for path in ["../secret.txt", secret.to_str().unwrap()] {
            let (status, body) = post_graph(&app.state, serde_json::json!({ "path": path })).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
            assert!(body["error"].as_str().unwrap().contains("outside"));
        }
        assert_eq!(app.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_graph_errors() {
        let app = test_app(true, true).await;

        let (status, _) = get_json(&app.state, "/graphs/not-a-hash").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = format!("/graphs/{}", content_hash("never generated"));
        let (status, _) = get_json(&app.state, &unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
