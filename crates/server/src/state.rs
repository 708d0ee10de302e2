use anyhow::{Context, Result};
use ladle_vector_store::{open_store, EmbeddingModel, StoreBackend, VectorSearchStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// Everything handlers need, constructed once at startup and shared.
///
/// The store sits behind a mutex because searches append to its timing log;
/// the embedding model is internally synchronized and shared freely.
pub struct AppContext {
    pub model: Arc<EmbeddingModel>,
    pub store: Mutex<Box<dyn VectorSearchStore>>,
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
}

impl AppContext {
    /// Build the context and eagerly initialize both the embedding model and
    /// the shared store, failing fast if either cannot come up.
    pub async fn initialize(
        model: EmbeddingModel,
        backend: StoreBackend,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let model = Arc::new(model);
        model
            .initialize()
            .await
            .context("Failed to initialize embedding model")?;

        let mut store = open_store(backend, &data_dir, model.clone());
        store
            .initialize()
            .await
            .context("Failed to initialize vector store")?;
        log::info!(
            "Serving '{}' store from {} ({} recipes)",
            backend.as_str(),
            data_dir.display(),
            store.len()
        );

        Ok(Self {
            model,
            store: Mutex::new(store),
            backend,
            data_dir,
        })
    }

    /// Short-lived store instance over the same data directory. Used by the
    /// benchmark endpoints; never touches the shared instance.
    #[must_use]
    pub fn fresh_store(&self, backend: StoreBackend) -> Box<dyn VectorSearchStore> {
        open_store(backend, &self.data_dir, self.model.clone())
    }
}

pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
