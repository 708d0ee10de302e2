use crate::state::{unix_timestamp, AppContext};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ladle_protocol::{
    ComparisonSummary, EmbedBatchRequest, EmbedBatchResponse, EmbedRequest, EmbedResponse,
    ErrorBody, HealthResponse, PerformanceComparisonRequest, PerformanceComparisonResponse,
    PerformanceStatsResponse, SearchRequest, SearchResponse, SearchStats,
};
use ladle_vector_store::StoreBackend;
use std::sync::Arc;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    fn internal(prefix: &str, err: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{prefix}: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::Internal(detail) => {
                log::error!("Request failed: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: ctx.model.model_name().to_string(),
        dim: ctx.model.dimension(),
        version: ctx.model.version().to_string(),
        timestamp: unix_timestamp(),
    })
}

pub async fn embed(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<EmbedRequest>,
) -> ApiResult<EmbedResponse> {
    let embedding = ctx
        .model
        .embed_text(&request.text, request.normalize)
        .await
        .map_err(|e| ApiError::internal("Embedding failed", e))?;

    Ok(Json(EmbedResponse {
        embedding,
        dim: ctx.model.dimension(),
        version: ctx.model.version().to_string(),
    }))
}

pub async fn embed_batch(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<EmbedBatchRequest>,
) -> ApiResult<EmbedBatchResponse> {
    if request.texts.is_empty() {
        return Err(ApiError::BadRequest("texts must not be empty".to_string()));
    }

    let embeddings = ctx
        .model
        .embed_texts_batch(&request.texts, request.normalize)
        .await
        .map_err(|e| ApiError::internal("Batch embedding failed", e))?;

    Ok(Json(EmbedBatchResponse {
        embeddings,
        dim: ctx.model.dimension(),
        version: ctx.model.version().to_string(),
    }))
}

pub async fn search(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let mut store = ctx.store.lock().await;
    let results = store
        .search_similar(&request.query, request.top_k, &request.exclude_ids)
        .await
        .map_err(|e| ApiError::internal("Search failed", e))?;

    Ok(Json(SearchResponse { results }))
}

pub async fn performance_comparison(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<PerformanceComparisonRequest>,
) -> ApiResult<PerformanceComparisonResponse> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    if request.iterations == 0 {
        return Err(ApiError::BadRequest(
            "iterations must be at least 1".to_string(),
        ));
    }

    let linear_stats = bench_backend(&ctx, StoreBackend::Linear, &request).await?;
    let hnsw_stats = bench_backend(&ctx, StoreBackend::Hnsw, &request).await?;
    let comparison = compare(&linear_stats, &hnsw_stats);

    Ok(Json(PerformanceComparisonResponse {
        linear_stats,
        hnsw_stats,
        comparison,
    }))
}

pub async fn performance_stats(
    State(ctx): State<Arc<AppContext>>,
) -> ApiResult<PerformanceStatsResponse> {
    let store = ctx.store.lock().await;
    Ok(Json(PerformanceStatsResponse {
        backend: ctx.backend.as_str().to_string(),
        stats: store.stats(),
        timestamp: unix_timestamp(),
    }))
}

/// Run the benchmark against a throwaway instance loaded from the persisted
/// artifacts, so the shared store's counters stay untouched.
async fn bench_backend(
    ctx: &AppContext,
    backend: StoreBackend,
    request: &PerformanceComparisonRequest,
) -> Result<SearchStats, ApiError> {
    let mut store = ctx.fresh_store(backend);
    store
        .initialize()
        .await
        .map_err(|e| ApiError::internal("Benchmark store initialization failed", e))?;
    store.reset_stats();

    for _ in 0..request.iterations {
        store
            .search_similar(&request.query, request.top_k, &request.exclude_ids)
            .await
            .map_err(|e| ApiError::internal("Benchmark search failed", e))?;
    }

    let stats = store.stats();
    store.cleanup().await;
    Ok(stats)
}

fn compare(linear: &SearchStats, hnsw: &SearchStats) -> ComparisonSummary {
    let linear_avg = linear.avg_search_time.unwrap_or(0.0);
    let hnsw_avg = hnsw.avg_search_time.unwrap_or(0.0);
    let linear_faster = linear_avg <= hnsw_avg;

    let (faster, slower) = if linear_faster {
        (linear_avg, hnsw_avg)
    } else {
        (hnsw_avg, linear_avg)
    };
    let speedup_ratio = if faster > 0.0 { slower / faster } else { 1.0 };

    ComparisonSummary {
        linear_faster,
        speedup_ratio,
        recommendation: if linear_faster { "linear" } else { "hnsw" }.to_string(),
    }
}
