//! Anchor HTTP Gateway
//!
//! Thin transport over the answer engine:
//! - `POST /v1/ask` - answer a question (loop or single-pass)
//! - `POST /v1/ask/stream` - SSE streaming variant
//! - `POST /v1/documents` - ingest pre-chunked passages
//! - `PUT /v1/profile` - store user style preferences
//! - `GET /v1/health` - liveness plus index readiness

mod handlers;

use anchor_common::config::AppConfig;
use anchor_common::embeddings::{create_embedder, Embedder};
use anchor_common::llm::{ChatModel, OpenAiChatModel};
use anchor_common::profile::InMemoryProfiles;
use anchor_engine::{AnswerDrafter, AnswerLoop, AnswerPipeline, CritiqueEvaluator};
use anchor_retrieval::{EvidenceRetriever, InMemoryIndex};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<InMemoryIndex>,
    pub retriever: Arc<EvidenceRetriever>,
    pub profiles: Arc<InMemoryProfiles>,
    pub answer_loop: Arc<AnswerLoop>,
    pub pipeline: Arc<AnswerPipeline>,
}

impl AppState {
    fn build(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let embedder = create_embedder(&config.embedding)?;
        let index = Arc::new(InMemoryIndex::new());
        let retriever = Arc::new(EvidenceRetriever::new(
            embedder.clone(),
            index.clone(),
            config.rag.clone(),
        ));

        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(config.llm.clone())?);
        let profiles = Arc::new(InMemoryProfiles::new());

        let answer_loop = Arc::new(AnswerLoop::new(
            retriever.clone(),
            AnswerDrafter::new(model.clone(), profiles.clone()),
            CritiqueEvaluator::new(model.clone(), config.rag.support_ratio),
            config.rag.clone(),
        ));
        let pipeline = Arc::new(AnswerPipeline::new(
            retriever.clone(),
            AnswerDrafter::new(model, profiles.clone()),
            config.rag.clone(),
        ));

        Ok(Self {
            config,
            embedder,
            index,
            retriever,
            profiles,
            answer_loop,
            pipeline,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Anchor gateway v{}", anchor_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let port = config.server.port;
    let state = AppState::build(config)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ask", post(handlers::ask::ask))
        .route("/ask/stream", post(handlers::ask::ask_stream))
        .route("/documents", post(handlers::documents::ingest))
        .route("/profile", put(handlers::profile::upsert_profile));

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
