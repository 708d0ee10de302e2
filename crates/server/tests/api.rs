//! Handler-level tests over a stub-backed context: the full request flow
//! minus the TCP listener.

use axum::extract::State;
use axum::Json;
use ladle_protocol::{
    EmbedBatchRequest, EmbedRequest, PerformanceComparisonRequest, SearchRequest,
};
use ladle_server::handlers::{self, ApiError};
use ladle_server::AppContext;
use ladle_vector_store::{EmbeddingModel, ModelConfig, StoreBackend};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 16;

async fn test_context(tmp: &TempDir, backend: StoreBackend) -> Arc<AppContext> {
    let model = EmbeddingModel::new_stub(ModelConfig {
        dimension: DIM,
        ..ModelConfig::default()
    });
    Arc::new(
        AppContext::initialize(model, backend, tmp.path().to_path_buf())
            .await
            .unwrap(),
    )
}

async fn seed_recipes(ctx: &AppContext, entries: &[(i64, &str)]) {
    let texts: Vec<String> = entries.iter().map(|(_, t)| (*t).to_string()).collect();
    let ids: Vec<i64> = entries.iter().map(|(id, _)| *id).collect();
    let vectors = ctx.model.embed_texts_batch(&texts, true).await.unwrap();
    ctx.store
        .lock()
        .await
        .add_vectors(&ids, vectors)
        .await
        .unwrap();
}

#[tokio::test]
async fn health_reports_model_identity() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let response = handlers::health(State(ctx)).await.0;
    assert_eq!(response.status, "ok");
    assert_eq!(response.dim, DIM);
    assert_eq!(response.model, "paraphrase-multilingual-MiniLM-L12-v2");
    assert!(response.timestamp > 0.0);
}

#[tokio::test]
async fn embed_returns_vector_of_model_dimension() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let response = handlers::embed(
        State(ctx),
        Json(EmbedRequest {
            text: "spicy rice cakes".to_string(),
            normalize: true,
        }),
    )
    .await
    .unwrap()
    .0;

    assert_eq!(response.embedding.len(), DIM);
    assert_eq!(response.dim, DIM);
    assert_eq!(response.version, "sbert-multilingual-v1");
}

#[tokio::test]
async fn embed_batch_returns_one_vector_per_text() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let response = handlers::embed_batch(
        State(ctx),
        Json(EmbedBatchRequest {
            texts: vec!["one".to_string(), "two".to_string()],
            normalize: true,
        }),
    )
    .await
    .unwrap()
    .0;

    assert_eq!(response.embeddings.len(), 2);
    assert!(response.embeddings.iter().all(|e| e.len() == DIM));
}

#[tokio::test]
async fn embed_batch_rejects_empty_input() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let err = handlers::embed_batch(
        State(ctx),
        Json(EmbedBatchRequest {
            texts: vec![],
            normalize: true,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn search_rejects_empty_query() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let err = handlers::search(
        State(ctx),
        Json(SearchRequest {
            query: "   ".to_string(),
            top_k: 5,
            exclude_ids: vec![],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn search_ranks_exact_match_first() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;
    seed_recipes(
        &ctx,
        &[(1, "kimchi stew"), (2, "bulgogi"), (3, "cold noodles")],
    )
    .await;

    let response = handlers::search(
        State(ctx),
        Json(SearchRequest {
            query: "bulgogi".to_string(),
            top_k: 3,
            exclude_ids: vec![],
        }),
    )
    .await
    .unwrap()
    .0;

    assert_eq!(response.results.len(), 3);
    assert_eq!(response.results[0].recipe_id, 2);
    assert!(response.results[0].distance.abs() < 1e-5);
}

#[tokio::test]
async fn search_honors_exclusions() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Hnsw).await;
    seed_recipes(
        &ctx,
        &[(1, "kimchi stew"), (2, "bulgogi"), (3, "cold noodles")],
    )
    .await;

    let response = handlers::search(
        State(ctx),
        Json(SearchRequest {
            query: "bulgogi".to_string(),
            top_k: 10,
            exclude_ids: vec![2],
        }),
    )
    .await
    .unwrap()
    .0;

    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|hit| hit.recipe_id != 2));
}

#[tokio::test]
async fn performance_stats_track_the_shared_store() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;
    seed_recipes(&ctx, &[(1, "kimchi stew")]).await;

    for _ in 0..2 {
        handlers::search(
            State(ctx.clone()),
            Json(SearchRequest {
                query: "stew".to_string(),
                top_k: 1,
                exclude_ids: vec![],
            }),
        )
        .await
        .unwrap();
    }

    let response = handlers::performance_stats(State(ctx)).await.unwrap().0;
    assert_eq!(response.backend, "linear");
    assert_eq!(response.stats.total_searches, 2);
    assert_eq!(response.stats.total_adds, 1);
    assert!(response.stats.avg_search_time.is_some());
    assert!(response.stats.p95_search_time.is_some());
}

#[tokio::test]
async fn performance_comparison_benchmarks_both_variants() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;
    seed_recipes(&ctx, &[(1, "kimchi stew"), (2, "bulgogi")]).await;

    let response = handlers::performance_comparison(
        State(ctx.clone()),
        Json(PerformanceComparisonRequest {
            query: "stew".to_string(),
            top_k: 2,
            exclude_ids: vec![],
            iterations: 3,
        }),
    )
    .await
    .unwrap()
    .0;

    assert_eq!(response.linear_stats.total_searches, 3);
    assert_eq!(response.hnsw_stats.total_searches, 3);
    assert!(response.comparison.speedup_ratio >= 1.0);
    assert!(["linear", "hnsw"].contains(&response.comparison.recommendation.as_str()));

    // Throwaway benchmark stores must not leak into the shared counters.
    let stats = handlers::performance_stats(State(ctx)).await.unwrap().0;
    assert_eq!(stats.stats.total_searches, 0);
}

#[tokio::test]
async fn performance_comparison_rejects_zero_iterations() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(&tmp, StoreBackend::Linear).await;

    let err = handlers::performance_comparison(
        State(ctx),
        Json(PerformanceComparisonRequest {
            query: "stew".to_string(),
            top_k: 2,
            exclude_ids: vec![],
            iterations: 0,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}
