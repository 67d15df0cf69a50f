mod cache;
mod config;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use extract::{OllamaClient, OllamaExtractorFactory};
use graph::{GraphPipeline, GraphRenderer};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cache::GraphCache;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::routes::{AppState, create_router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let client = OllamaClient::new(
        config.ollama.base_url.clone(),
        config.ollama.default_model.clone(),
    )
    .with_timeout(Duration::from_secs(config.ollama.request_timeout_secs));
    let factory = OllamaExtractorFactory::new(client.clone()).with_json_retries(config.ollama.json_retries);

    let pipeline = GraphPipeline::new(
        Arc::new(client.clone()),
        Arc::new(factory),
        config.pipeline_config(),
    )
    .with_retry(config.retry.policy());

    let cache = GraphCache::open(&config.cache.dir).await?;

    let input_dir = match &config.server.input_dir {
        Some(dir) => Some(
            tokio::fs::canonicalize(dir)
                .await
                .with_context(|| format!("Failed to resolve input directory {}", dir.display()))?,
        ),
        None => None,
    };

    let state = AppState {
        pipeline: Arc::new(pipeline),
        catalog: Arc::new(client),
        renderer: Arc::new(GraphRenderer::new(config.graph.render.clone())),
        cache: Arc::new(cache),
        metrics: Metrics::new(),
        cache_enabled: config.cache.enabled,
        input_dir,
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server encountered a fatal error")?;
    Ok(())
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!(error = %err, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
