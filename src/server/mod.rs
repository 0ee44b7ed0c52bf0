//! HTTP surface: `POST /analyze`, `POST /stream` and `GET /health`.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;

pub use error::ApiResult;

use crate::config::Config;
use crate::extractors::{MediaExtractor, YtDlpExtractor};
use crate::gate::{RequestGate, Route, StaticCredentialStore};
use crate::pipeline::PipelineRunner;

/// Shared, read-only handler state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<RequestGate>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub runner: Arc<PipelineRunner>,
    pub enforce_allowlist: bool,
}

impl AppState {
    /// Wire the production collaborators from configuration
    pub fn from_config(config: &Config) -> Self {
        let credentials = Arc::new(StaticCredentialStore::new(config.auth.tokens.clone()));
        let gate = RequestGate::new(
            config.auth.policy(),
            config.auth.api_key_header.clone(),
            credentials,
            config.limits.analyze,
            config.limits.stream,
        );

        Self {
            gate: Arc::new(gate),
            extractor: Arc::new(YtDlpExtractor::new(
                &config.tools.extractor,
                config.extract_timeout(),
            )),
            runner: Arc::new(PipelineRunner::new(
                &config.tools.transcoder,
                config.pipeline.chunk_size,
                config.kill_timeout(),
            )),
            enforce_allowlist: config.policy.enforce_allowlist,
        }
    }
}

/// Build the router
pub fn router(state: AppState, permissive_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/analyze", post(handlers::analyze))
        .route("/stream", post(handlers::stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if permissive_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router
}

/// Serve until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;

    let state = AppState::from_config(config);
    let gate = state.gate.clone();
    let app = router(state, config.server.permissive_cors);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        analyze_auth = %gate.scheme(Route::Analyze),
        stream_auth = %gate.scheme(Route::Stream),
        analyze_limit = %gate.limit(Route::Analyze),
        stream_limit = %gate.limit(Route::Stream),
        tokens = config.auth.tokens.len(),
        "Listening at {}",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
