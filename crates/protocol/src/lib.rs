//! Wire types for the ladle inference API.
//!
//! Every request/response body exchanged over HTTP lives here so the server
//! and any Rust client agree on one schema.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K: usize = 25;
pub const DEFAULT_ITERATIONS: usize = 10;

const fn default_normalize() -> bool {
    true
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

const fn default_iterations() -> usize {
    DEFAULT_ITERATIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    pub dim: usize,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedBatchRequest {
    pub texts: Vec<String>,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedBatchResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub dim: usize,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub exclude_ids: Vec<i64>,
}

/// One ranked recipe. `distance` is `1 - cosine_similarity`, so lower is
/// closer and an exact match scores 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub recipe_id: i64,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceComparisonRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub exclude_ids: Vec<i64>,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

/// Aggregated operation timings for one store instance.
///
/// The raw per-operation logs are included alongside the derived aggregates;
/// aggregate fields are absent until at least one sample exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub index_build_time: f64,
    pub total_searches: u64,
    pub total_adds: u64,
    #[serde(default)]
    pub search_times: Vec<f64>,
    #[serde(default)]
    pub add_times: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_search_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_search_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_search_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95_search_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99_search_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_add_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_add_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_add_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub linear_faster: bool,
    pub speedup_ratio: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceComparisonResponse {
    pub linear_stats: SearchStats,
    pub hnsw_stats: SearchStats,
    pub comparison: ComparisonSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStatsResponse {
    pub backend: String,
    pub stats: SearchStats,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub dim: usize,
    pub version: String,
    pub timestamp: f64,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_fills_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"kimchi stew"}"#).unwrap();
        assert_eq!(req.top_k, DEFAULT_TOP_K);
        assert!(req.exclude_ids.is_empty());
    }

    #[test]
    fn embed_request_defaults_to_normalized() {
        let req: EmbedRequest = serde_json::from_str(r#"{"text":"braised short ribs"}"#).unwrap();
        assert!(req.normalize);
    }

    #[test]
    fn comparison_request_defaults() {
        let req: PerformanceComparisonRequest =
            serde_json::from_str(r#"{"query":"cold noodles"}"#).unwrap();
        assert_eq!(req.iterations, DEFAULT_ITERATIONS);
        assert_eq!(req.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn empty_stats_omit_aggregates() {
        let stats = SearchStats::default();
        let raw = serialize_json(&stats).unwrap();
        assert!(!raw.contains("avg_search_time"));
        assert!(raw.contains("total_searches"));
    }
}
