mod hnsw;
mod linear;

pub use hnsw::HnswVectorStore;
pub use linear::LinearVectorStore;

use crate::embeddings::EmbeddingModel;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use ladle_protocol::{SearchHit, SearchStats};
use std::path::Path;
use std::sync::Arc;

pub const LINEAR_VECTORS_FILE: &str = "recipe_vectors.bin";
pub const LINEAR_METADATA_FILE: &str = "recipe_metadata.json";
pub const HNSW_VECTORS_FILE: &str = "recipe_vectors_hnsw.bin";
pub const HNSW_METADATA_FILE: &str = "recipe_metadata_hnsw.json";

/// Which concrete store serves similarity queries. Chosen by configuration,
/// never inferred from what happens to be on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Linear,
    Hnsw,
}

impl StoreBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Hnsw => "hnsw",
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "hnsw" => Ok(Self::Hnsw),
            other => Err(StoreError::Index(format!(
                "Unknown store backend '{other}' (expected 'linear' or 'hnsw')"
            ))),
        }
    }
}

/// Shared contract of both store variants.
///
/// Identifier order always matches row order in the underlying table, and
/// `add_vectors` persists synchronously, so a freshly constructed instance
/// pointed at the same data directory sees every prior committed add.
#[async_trait]
pub trait VectorSearchStore: Send + Sync {
    /// Load persisted state when both artifacts exist, otherwise start empty.
    async fn initialize(&mut self) -> Result<()>;

    /// Embed `query` and return up to `top_k` nearest recipes, best first,
    /// never including anything in `exclude_ids`.
    async fn search_similar(
        &mut self,
        query: &str,
        top_k: usize,
        exclude_ids: &[i64],
    ) -> Result<Vec<SearchHit>>;

    /// Append `vectors` under `recipe_ids` (position-matched) and persist.
    async fn add_vectors(&mut self, recipe_ids: &[i64], vectors: Vec<Vec<f32>>) -> Result<()>;

    /// Release in-memory state; persisted artifacts stay on disk.
    async fn cleanup(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> SearchStats;

    fn reset_stats(&mut self);
}

#[must_use]
pub fn open_store(
    backend: StoreBackend,
    data_dir: &Path,
    model: Arc<EmbeddingModel>,
) -> Box<dyn VectorSearchStore> {
    match backend {
        StoreBackend::Linear => Box::new(LinearVectorStore::new(data_dir, model)),
        StoreBackend::Hnsw => Box::new(HnswVectorStore::new(data_dir, model)),
    }
}

pub(crate) fn validate_batch(
    recipe_ids: &[i64],
    vectors: &[Vec<f32>],
    dimension: usize,
) -> Result<()> {
    if recipe_ids.len() != vectors.len() {
        return Err(StoreError::ShapeMismatch {
            ids: recipe_ids.len(),
            rows: vectors.len(),
        });
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(StoreError::InvalidDimension {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}
