//! HTTP surface of the ladle inference service.
//!
//! One [`AppContext`] is built at startup (embedding model + shared vector
//! store) and handed to every handler; the axum router mounts the API under
//! `/api`.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, ValueEnum};
use ladle_vector_store::{
    model_dir_from_env, EmbeddingMode, EmbeddingModel, ModelConfig, StoreBackend,
};
use std::path::PathBuf;
use std::sync::Arc;

pub mod handlers;
pub mod state;

pub use state::AppContext;

#[derive(Parser)]
#[command(name = "ladle-server")]
#[command(about = "Recipe embedding and vector search service", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Bind address for the HTTP API
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Directory holding the persisted vector artifacts
    #[arg(long, default_value = "store")]
    pub data_dir: PathBuf,

    /// Store backend serving /api/v1/search
    #[arg(long, value_enum, default_value = "linear")]
    pub store_backend: BackendFlag,

    /// Embedding backend (default: LADLE_EMBEDDING_MODE, then onnx)
    #[arg(long, value_enum)]
    pub embed_mode: Option<EmbedModeFlag>,

    /// Model directory (default: LADLE_MODEL_DIR, then ./models)
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Copy, Clone, ValueEnum)]
pub enum BackendFlag {
    Linear,
    Hnsw,
}

impl BackendFlag {
    #[must_use]
    pub const fn as_domain(self) -> StoreBackend {
        match self {
            Self::Linear => StoreBackend::Linear,
            Self::Hnsw => StoreBackend::Hnsw,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub enum EmbedModeFlag {
    Onnx,
    Stub,
}

impl EmbedModeFlag {
    const fn as_domain(self) -> EmbeddingMode {
        match self {
            Self::Onnx => EmbeddingMode::Onnx,
            Self::Stub => EmbeddingMode::Stub,
        }
    }
}

fn embedding_model_from_cli(cli: &Cli) -> Result<EmbeddingModel> {
    let mode = match cli.embed_mode {
        Some(flag) => flag.as_domain(),
        None => EmbeddingMode::from_env()?,
    };
    let model_dir = cli.model_dir.clone().unwrap_or_else(model_dir_from_env);
    Ok(EmbeddingModel::new(mode, ModelConfig::default(), model_dir))
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/v1/embed", post(handlers::embed))
        .route("/api/v1/embed-batch", post(handlers::embed_batch))
        .route("/api/v1/search", post(handlers::search))
        .route(
            "/api/v1/performance-comparison",
            post(handlers::performance_comparison),
        )
        .route(
            "/api/v1/performance-stats",
            get(handlers::performance_stats),
        )
        .with_state(ctx)
}

pub async fn run(cli: Cli) -> Result<()> {
    let model = embedding_model_from_cli(&cli)?;
    let ctx = Arc::new(
        AppContext::initialize(model, cli.store_backend.as_domain(), cli.data_dir.clone())
            .await?,
    );

    let app = build_router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    log::info!(
        "Serving recipe inference API on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.store.lock().await.cleanup().await;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {err}");
    }
}
