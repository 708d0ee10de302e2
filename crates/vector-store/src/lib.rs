//! # Ladle Vector Store
//!
//! Embedding generation and nearest-neighbor recipe search.
//!
//! Two interchangeable store variants sit behind one trait:
//!
//! - [`LinearVectorStore`] — dense in-memory table, exact brute-force cosine
//!   scan per query.
//! - [`HnswVectorStore`] — HNSW inner-product graph for approximate search,
//!   with a raw row mirror for persistence.
//!
//! Both persist to flat files after every add, so a freshly constructed
//! instance pointed at the same data directory picks up prior state.
//!
//! ```text
//! query text
//!     │
//!     ├──> EmbeddingModel (ONNX Runtime)
//!     │      └─> Vector[384]
//!     │
//!     └──> VectorSearchStore (linear scan | HNSW)
//!            └─> ranked {recipe_id, distance}
//! ```

mod embeddings;
mod error;
mod persist;
mod stats;
mod store;

pub use embeddings::{model_dir_from_env, EmbeddingMode, EmbeddingModel, ModelConfig};
pub use error::{Result, StoreError};
pub use persist::{PersistedMetadata, METADATA_SCHEMA_VERSION};
pub use stats::{percentile, PerformanceStats};
pub use store::{
    open_store, HnswVectorStore, LinearVectorStore, StoreBackend, VectorSearchStore,
    HNSW_METADATA_FILE, HNSW_VECTORS_FILE, LINEAR_METADATA_FILE, LINEAR_VECTORS_FILE,
};
