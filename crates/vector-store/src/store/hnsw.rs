use super::{validate_batch, VectorSearchStore, HNSW_METADATA_FILE, HNSW_VECTORS_FILE};
use crate::embeddings::EmbeddingModel;
use crate::error::{Result, StoreError};
use crate::persist;
use crate::stats::PerformanceStats;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use ladle_protocol::{SearchHit, SearchStats};
use ndarray::{Array2, Axis};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const MIN_INDEX_CAPACITY: usize = 10_000;

/// ANN-backed store: queries go to an HNSW graph over inner product, while a
/// raw row mirror backs persistence (the graph is rebuilt from the mirror on
/// load). Vectors are expected L2-normalized, so inner product equals cosine
/// similarity and the graph's distance equals `1 - similarity` directly.
pub struct HnswVectorStore {
    model: Arc<EmbeddingModel>,
    index: Option<Hnsw<'static, f32, DistDot>>,
    vectors: Option<Array2<f32>>,
    recipe_ids: Vec<i64>,
    dimension: usize,
    vectors_path: PathBuf,
    metadata_path: PathBuf,
    stats: PerformanceStats,
}

impl HnswVectorStore {
    pub fn new(data_dir: &Path, model: Arc<EmbeddingModel>) -> Self {
        let dimension = model.dimension();
        Self {
            model,
            index: None,
            vectors: None,
            recipe_ids: Vec::new(),
            dimension,
            vectors_path: data_dir.join(HNSW_VECTORS_FILE),
            metadata_path: data_dir.join(HNSW_METADATA_FILE),
            stats: PerformanceStats::new(),
        }
    }

    async fn initialize_inner(&mut self) -> Result<()> {
        if self.vectors_path.exists() && self.metadata_path.exists() {
            self.load_existing().await?;
            log::info!("Loaded HNSW store ({} recipes)", self.recipe_ids.len());
        } else {
            self.create_empty().await?;
            log::info!("Created empty HNSW store (dim {})", self.dimension);
        }
        Ok(())
    }

    async fn load_existing(&mut self) -> Result<()> {
        let table = persist::load_table(&self.vectors_path).await?;
        let metadata = persist::load_metadata(&self.metadata_path).await?;
        if table.nrows() != metadata.recipe_ids.len() {
            return Err(StoreError::Corrupted(format!(
                "Metadata lists {} recipes but mirror has {} rows",
                metadata.recipe_ids.len(),
                table.nrows()
            )));
        }
        self.dimension = metadata.dimension;

        let index = new_index(table.nrows());
        for (data_id, row) in table.rows().into_iter().enumerate() {
            let vector = row.to_vec();
            index.insert((&vector, data_id));
        }

        self.recipe_ids = metadata.recipe_ids;
        self.vectors = Some(table);
        self.index = Some(index);
        Ok(())
    }

    async fn create_empty(&mut self) -> Result<()> {
        if let Some(parent) = self.vectors_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.recipe_ids = Vec::new();
        self.vectors = Some(Array2::zeros((0, self.dimension)));
        self.index = Some(new_index(0));
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let Some(table) = &self.vectors else {
            return Err(StoreError::NotInitialized);
        };
        persist::save_table(&self.vectors_path, table).await?;
        persist::save_metadata(&self.metadata_path, &self.recipe_ids, self.dimension).await?;
        Ok(())
    }
}

fn new_index(existing_rows: usize) -> Hnsw<'static, f32, DistDot> {
    Hnsw::new(
        MAX_NB_CONNECTION,
        existing_rows.max(MIN_INDEX_CAPACITY),
        MAX_LAYER,
        EF_CONSTRUCTION,
        DistDot {},
    )
}

#[async_trait]
impl VectorSearchStore for HnswVectorStore {
    async fn initialize(&mut self) -> Result<()> {
        let started = Instant::now();
        let outcome = self.initialize_inner().await;
        if outcome.is_ok() {
            self.stats.set_index_build_time(started.elapsed());
        }
        log::info!(
            "HNSW store initialization took {:.3}s",
            started.elapsed().as_secs_f64()
        );
        outcome
    }

    async fn search_similar(
        &mut self,
        query: &str,
        top_k: usize,
        exclude_ids: &[i64],
    ) -> Result<Vec<SearchHit>> {
        if self.index.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let started = Instant::now();

        let query_vector = self.model.embed_text(query, true).await?;
        if query_vector.len() != self.dimension {
            return Err(StoreError::InvalidDimension {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }
        let Some(index) = &self.index else {
            return Err(StoreError::NotInitialized);
        };

        // Over-fetch by the exclusion-set size so filtering cannot starve the
        // result list below what the table can actually supply.
        let candidate_k = top_k
            .saturating_mul(2)
            .saturating_add(exclude_ids.len())
            .min(self.recipe_ids.len());
        let mut results = Vec::new();
        if candidate_k > 0 {
            let excluded: HashSet<i64> = exclude_ids.iter().copied().collect();
            let ef_search = candidate_k.max(64);
            for neighbour in index.search(&query_vector, candidate_k, ef_search) {
                let Some(recipe_id) = self.recipe_ids.get(neighbour.d_id).copied() else {
                    continue;
                };
                if excluded.contains(&recipe_id) {
                    continue;
                }
                results.push(SearchHit {
                    recipe_id,
                    distance: neighbour.distance,
                });
                if results.len() >= top_k {
                    break;
                }
            }
        }

        self.stats.record_search(started.elapsed());
        log::debug!(
            "HNSW search returned {} results in {:.3}s",
            results.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(results)
    }

    async fn add_vectors(&mut self, recipe_ids: &[i64], vectors: Vec<Vec<f32>>) -> Result<()> {
        if self.index.is_none() || self.vectors.is_none() {
            return Err(StoreError::NotInitialized);
        }
        validate_batch(recipe_ids, &vectors, self.dimension)?;

        let started = Instant::now();
        let base = self.recipe_ids.len();
        if let Some(index) = &self.index {
            for (offset, vector) in vectors.iter().enumerate() {
                index.insert((vector, base + offset));
            }
        }

        let rows = vectors.len();
        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let batch = Array2::from_shape_vec((rows, self.dimension), flat)
            .map_err(|e| StoreError::Index(format!("Bad batch shape: {e}")))?;
        if let Some(table) = &mut self.vectors {
            table
                .append(Axis(0), batch.view())
                .map_err(|e| StoreError::Index(format!("Failed to append rows: {e}")))?;
        }
        self.recipe_ids.extend_from_slice(recipe_ids);

        self.save().await?;

        self.stats.record_add(started.elapsed());
        log::info!(
            "Added {} recipe vectors to HNSW store in {:.3}s (total {})",
            rows,
            started.elapsed().as_secs_f64(),
            self.recipe_ids.len()
        );
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.index = None;
        self.vectors = None;
        self.recipe_ids.clear();
        log::info!("HNSW store released");
    }

    fn len(&self) -> usize {
        self.recipe_ids.len()
    }

    fn stats(&self) -> SearchStats {
        self.stats.snapshot()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::ModelConfig;
    use tempfile::TempDir;

    fn test_model() -> Arc<EmbeddingModel> {
        Arc::new(EmbeddingModel::new_stub(ModelConfig {
            dimension: 8,
            ..ModelConfig::default()
        }))
    }

    async fn ready_store(dir: &Path) -> HnswVectorStore {
        let mut store = HnswVectorStore::new(dir, test_model());
        store.initialize().await.unwrap();
        store
    }

    async fn embeddings_of(
        model: &EmbeddingModel,
        texts: &[&str],
    ) -> Vec<Vec<f32>> {
        let owned: Vec<String> = texts.iter().map(ToString::to_string).collect();
        model.embed_texts_batch(&owned, true).await.unwrap()
    }

    #[tokio::test]
    async fn search_before_initialize_fails() {
        let tmp = TempDir::new().unwrap();
        let mut store = HnswVectorStore::new(tmp.path(), test_model());
        let err = store.search_similar("stew", 5, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
    }

    #[tokio::test]
    async fn empty_store_returns_no_results() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let results = store.search_similar("anything", 10, &[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn exact_match_ranks_first_with_zero_distance() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let model = store.model.clone();

        let vectors = embeddings_of(&model, &["bibimbap", "kimchi stew", "green salad"]).await;
        store.add_vectors(&[1, 2, 3], vectors).await.unwrap();

        let results = store.search_similar("kimchi stew", 3, &[]).await.unwrap();
        assert_eq!(results[0].recipe_id, 2);
        assert!(results[0].distance.abs() < 1e-4);
    }

    #[tokio::test]
    async fn results_are_sorted_by_ascending_distance() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let model = store.model.clone();

        let texts: Vec<String> = (0..20).map(|i| format!("recipe {i}")).collect();
        let ids: Vec<i64> = (1..=20).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embeddings_of(&model, &refs).await;
        store.add_vectors(&ids, vectors).await.unwrap();

        let results = store.search_similar("recipe 7", 10, &[]).await.unwrap();
        assert!(!results.is_empty());
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance + 1e-6);
        }
    }

    #[tokio::test]
    async fn exclusions_are_filtered_even_when_large() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let model = store.model.clone();

        let texts: Vec<String> = (0..12).map(|i| format!("dish {i}")).collect();
        let ids: Vec<i64> = (1..=12).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embeddings_of(&model, &refs).await;
        store.add_vectors(&ids, vectors).await.unwrap();

        // Exclusion set larger than top_k must still not starve results.
        let excluded: Vec<i64> = (1..=8).collect();
        let results = store.search_similar("dish 3", 4, &excluded).await.unwrap();
        assert_eq!(results.len(), 4);
        for hit in &results {
            assert!(!excluded.contains(&hit.recipe_id));
        }

        // Excluding everything yields an empty result, not an error.
        let all: Vec<i64> = (1..=12).collect();
        let results = store.search_similar("dish 3", 4, &all).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn mirror_roundtrip_rebuilds_identical_store() {
        let tmp = TempDir::new().unwrap();
        let model = test_model();

        {
            let mut store = HnswVectorStore::new(tmp.path(), model.clone());
            store.initialize().await.unwrap();
            let vectors = embeddings_of(&model, &["one", "two", "three"]).await;
            store.add_vectors(&[10, 20, 30], vectors).await.unwrap();
        }

        let mut reloaded = HnswVectorStore::new(tmp.path(), model);
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.recipe_ids, vec![10, 20, 30]);
        assert_eq!(reloaded.len(), 3);

        let results = reloaded.search_similar("two", 1, &[]).await.unwrap();
        assert_eq!(results[0].recipe_id, 20);
        assert!(results[0].distance.abs() < 1e-4);
    }

    #[tokio::test]
    async fn artifacts_are_separate_from_linear_variant() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let model = store.model.clone();

        let vectors = embeddings_of(&model, &["one"]).await;
        store.add_vectors(&[1], vectors).await.unwrap();

        assert!(tmp.path().join(HNSW_VECTORS_FILE).exists());
        assert!(tmp.path().join(HNSW_METADATA_FILE).exists());
        assert!(!tmp.path().join(super::super::LINEAR_VECTORS_FILE).exists());
    }

    #[tokio::test]
    async fn stats_count_operations() {
        let tmp = TempDir::new().unwrap();
        let mut store = ready_store(tmp.path()).await;
        let model = store.model.clone();

        let vectors = embeddings_of(&model, &["one", "two"]).await;
        store.add_vectors(&[1, 2], vectors).await.unwrap();
        store.search_similar("one", 2, &[]).await.unwrap();

        let snap = store.stats();
        assert_eq!(snap.total_adds, 1);
        assert_eq!(snap.total_searches, 1);
    }
}
