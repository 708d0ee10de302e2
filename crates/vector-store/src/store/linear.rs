use super::{validate_batch, VectorSearchStore, LINEAR_METADATA_FILE, LINEAR_VECTORS_FILE};
use crate::embeddings::EmbeddingModel;
use crate::error::{Result, StoreError};
use crate::persist;
use crate::stats::PerformanceStats;
use async_trait::async_trait;
use ladle_protocol::{SearchHit, SearchStats};
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Brute-force store: one dense table, cosine similarity against every row
/// per query. Exact results, O(n) per search.
pub struct LinearVectorStore {
    model: Arc<EmbeddingModel>,
    vectors: Option<Array2<f32>>,
    recipe_ids: Vec<i64>,
    dimension: usize,
    vectors_path: PathBuf,
    metadata_path: PathBuf,
    stats: PerformanceStats,
}

impl LinearVectorStore {
    pub fn new(data_dir: &Path, model: Arc<EmbeddingModel>) -> Self {
        let dimension = model.dimension();
        Self {
            model,
            vectors: None,
            recipe_ids: Vec::new(),
            dimension,
            vectors_path: data_dir.join(LINEAR_VECTORS_FILE),
            metadata_path: data_dir.join(LINEAR_METADATA_FILE),
            stats: PerformanceStats::new(),
        }
    }

    async fn initialize_inner(&mut self) -> Result<()> {
        if self.vectors_path.exists() && self.metadata_path.exists() {
            self.load_existing().await?;
            log::info!("Loaded vector store ({} recipes)", self.recipe_ids.len());
        } else {
            self.create_empty().await?;
            log::info!("Created empty vector store (dim {})", self.dimension);
        }
        Ok(())
    }

    async fn load_existing(&mut self) -> Result<()> {
        let table = persist::load_table(&self.vectors_path).await?;
        let metadata = persist::load_metadata(&self.metadata_path).await?;
        if table.nrows() != metadata.recipe_ids.len() {
            return Err(StoreError::Corrupted(format!(
                "Metadata lists {} recipes but table has {} rows",
                metadata.recipe_ids.len(),
                table.nrows()
            )));
        }
        self.dimension = metadata.dimension;
        self.recipe_ids = metadata.recipe_ids;
        self.vectors = Some(table);
        Ok(())
    }

    async fn create_empty(&mut self) -> Result<()> {
        if let Some(parent) = self.vectors_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.recipe_ids = Vec::new();
        self.vectors = Some(Array2::zeros((0, self.dimension)));
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

#[async_trait]
impl VectorSearchStore for LinearVectorStore {
    async fn initialize(&mut self) -> Result<()> {
        let started = Instant::now();
        let outcome = self.initialize_inner().await;
        if outcome.is_ok() {
            self.stats.set_index_build_time(started.elapsed());
        }
        log::info!(
            "Vector store initialization took {:.3}s",
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
        if self.vectors.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let started = Instant::now();

        let query_vector = self.model.embed_text(query, true).await?;
        let Some(table) = &self.vectors else {
            return Err(StoreError::NotInitialized);
        };
        if query_vector.len() != self.dimension {
            return Err(StoreError::InvalidDimension {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let excluded: HashSet<i64> = exclude_ids.iter().copied().collect();
        let mut scored: Vec<(i64, f32)> = Vec::with_capacity(self.recipe_ids.len());
        for (recipe_id, row) in self.recipe_ids.iter().zip(table.rows()) {
            if excluded.contains(recipe_id) {
                continue;
            }
            scored.push((*recipe_id, cosine_similarity(&query_vector, row)));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let results: Vec<SearchHit> = scored
            .into_iter()
            .map(|(recipe_id, similarity)| SearchHit {
                recipe_id,
                distance: 1.0 - similarity,
            })
            .collect();

        self.stats.record_search(started.elapsed());
        log::debug!(
            "Linear search returned {} results in {:.3}s",
            results.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(results)
    }

    async fn add_vectors(&mut self, recipe_ids: &[i64], vectors: Vec<Vec<f32>>) -> Result<()> {
        if self.vectors.is_none() {
            return Err(StoreError::NotInitialized);
        }
        validate_batch(recipe_ids, &vectors, self.dimension)?;

        let started = Instant::now();
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
            "Added {} recipe vectors in {:.3}s (total {})",
            rows,
            started.elapsed().as_secs_f64(),
            self.recipe_ids.len()
        );
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.vectors = None;
        self.recipe_ids.clear();
        log::info!("Vector store released");
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

fn cosine_similarity(query: &[f32], row: ArrayView1<'_, f32>) -> f32 {
    if query.len() != row.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_row = 0.0f32;
    let mut norm_query = 0.0f32;
    for (q, r) in query.iter().zip(row.iter()) {
        dot += q * r;
        norm_query += q * q;
        norm_row += r * r;
    }

    if norm_query == 0.0 || norm_row == 0.0 {
        return 0.0;
    }
    dot / (norm_query.sqrt() * norm_row.sqrt())
}
