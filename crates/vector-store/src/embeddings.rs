use crate::error::{Result, StoreError};
use ndarray::{Array, Axis, Ix2, Ix3};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;

/// Encoding stands in for genuinely empty input so the model never sees an
/// empty sequence.
const EMPTY_TEXT_PLACEHOLDER: &str = "empty text";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// Real sentence-embedding model on ONNX Runtime.
    Onnx,
    /// Deterministic hash-seeded vectors; no model assets needed.
    Stub,
}

impl EmbeddingMode {
    pub fn from_env() -> Result<Self> {
        let raw = env::var("LADLE_EMBEDDING_MODE")
            .unwrap_or_else(|_| "onnx".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "onnx" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(StoreError::Embedding(format!(
                "Unsupported LADLE_EMBEDDING_MODE '{other}' (expected 'onnx' or 'stub')"
            ))),
        }
    }
}

/// Static description of the sentence-embedding model in use.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub name: String,
    pub dimension: usize,
    pub max_length: usize,
    pub max_batch: usize,
    pub version: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            dimension: 384,
            max_length: 512,
            max_batch: 32,
            version: "sbert-multilingual-v1".to_string(),
        }
    }
}

pub fn model_dir_from_env() -> PathBuf {
    env::var("LADLE_MODEL_DIR").map_or_else(|_| PathBuf::from("models"), PathBuf::from)
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    config: ModelConfig,
}

impl OrtBackend {
    fn load(config: &ModelConfig, model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(StoreError::Embedding(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {} (set LADLE_MODEL_DIR to override).",
                config.name,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| StoreError::Embedding(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| StoreError::Embedding(format!("Tokenizer truncation failed: {e}")))?;

        let session = Session::builder()
            .map_err(|e| StoreError::Embedding(format!("{e}")))?
            .with_execution_providers(execution_providers())
            .map_err(|e| {
                StoreError::Embedding(format!("Failed to register execution providers: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| StoreError::Embedding(format!("Failed to set optimization level: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| StoreError::Embedding(format!("Failed to load ONNX model: {e}")))?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            config.name,
            config.dimension,
            config.max_length,
            config.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            config: config.clone(),
        })
    }

    fn embed_batch_blocking(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| StoreError::Embedding(format!("Tokenization failed: {e}")))?;
            if encodings.is_empty() {
                continue;
            }

            let seq_len = encodings[0].len();
            if encodings.iter().any(|e| e.len() != seq_len) {
                return Err(StoreError::Embedding(
                    "Inconsistent sequence lengths after padding".to_string(),
                ));
            }
            let (ids, masks, type_ids, mask_rows) = flatten_encodings(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| StoreError::Embedding(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| StoreError::Embedding(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| StoreError::Embedding(format!("Types shape error: {e}")))?;

            let mut available: HashMap<String, DynTensor> = HashMap::new();
            available.insert(
                "input_ids".to_string(),
                Tensor::from_array(ids_array.into_dyn())
                    .map_err(|e| StoreError::Embedding(format!("{e}")))?
                    .upcast(),
            );
            available.insert(
                "attention_mask".to_string(),
                Tensor::from_array(mask_array.into_dyn())
                    .map_err(|e| StoreError::Embedding(format!("{e}")))?
                    .upcast(),
            );
            available.insert(
                "token_type_ids".to_string(),
                Tensor::from_array(type_array.into_dyn())
                    .map_err(|e| StoreError::Embedding(format!("{e}")))?
                    .upcast(),
            );

            let array = {
                let mut session = self
                    .session
                    .lock()
                    .map_err(|_| StoreError::Embedding("Failed to lock ONNX session".into()))?;

                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for input in &session.inputs {
                    let Some(value) = available.get(&input.name) else {
                        return Err(StoreError::Embedding(format!(
                            "Unsupported ONNX input '{}'",
                            input.name
                        )));
                    };
                    feed.insert(input.name.clone(), value.clone());
                }

                let outputs = session
                    .run(SessionInputs::from(feed))
                    .map_err(|e| StoreError::Embedding(format!("ONNX forward failed: {e}")))?;
                if outputs.len() == 0 {
                    return Err(StoreError::Embedding("ONNX returned no outputs".to_string()));
                }

                outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        StoreError::Embedding(format!("Failed to decode ONNX output: {e}"))
                    })?
                    .to_owned()
            };

            results.extend(pooled_embeddings(
                array,
                &mask_rows,
                self.config.dimension,
                normalize,
            )?);
        }

        Ok(results)
    }
}

fn execution_providers() -> Vec<ExecutionProviderDispatch> {
    // Device selection is automatic: CUDA when the provider reports itself
    // available, plain CPU otherwise.
    let cuda = CUDAExecutionProvider::default();
    if matches!(cuda.is_available(), Ok(true)) {
        log::info!("Using CUDA execution provider");
        vec![cuda.build(), CPUExecutionProvider::default().build()]
    } else {
        log::info!("CUDA unavailable; embeddings run on CPU");
        vec![CPUExecutionProvider::default().build()]
    }
}

fn flatten_encodings(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();

        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }

        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn pooled_embeddings(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
    normalize: bool,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        // Model already pools to one row per input.
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| StoreError::Embedding(format!("Bad output shape: {e}")))?;
            for row in embeddings.outer_iter() {
                let mut emb = row.to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                if normalize {
                    l2_normalize(&mut emb);
                }
                out.push(emb);
            }
        }
        // Token-level hidden states: mean-pool over non-padding tokens.
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| StoreError::Embedding(format!("Bad output shape: {e}")))?;
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                let mut emb = mean_pool(sample.view(), &attn);
                ensure_dimension(&emb, expected_dimension)?;
                if normalize {
                    l2_normalize(&mut emb);
                }
                out.push(emb);
            }
        }
        _ => {
            return Err(StoreError::Embedding(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }
    Ok(out)
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

const fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(StoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state = fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let unit = ((bits >> 40) as f32) / ((1u64 << 24) as f32);
        vec.push(unit * 2.0 - 1.0);
    }
    l2_normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Sentence-embedding model shared by every handler in the process.
///
/// The backend is loaded lazily: the first caller performs the load while
/// concurrent callers wait on the same initialization, then everyone shares
/// the session read-only.
pub struct EmbeddingModel {
    mode: EmbeddingMode,
    config: ModelConfig,
    model_dir: PathBuf,
    backend: OnceCell<Arc<OrtBackend>>,
}

impl EmbeddingModel {
    pub fn new(mode: EmbeddingMode, config: ModelConfig, model_dir: PathBuf) -> Self {
        Self {
            mode,
            config,
            model_dir,
            backend: OnceCell::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            EmbeddingMode::from_env()?,
            ModelConfig::default(),
            model_dir_from_env(),
        ))
    }

    /// Stub-backed model for tests and asset-free environments.
    pub fn new_stub(config: ModelConfig) -> Self {
        Self::new(EmbeddingMode::Stub, config, PathBuf::new())
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.config.dimension
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Load and warm the model. Safe to call more than once; only the first
    /// call does work.
    pub async fn initialize(&self) -> Result<()> {
        let started = Instant::now();
        match self.mode {
            EmbeddingMode::Stub => {
                log::info!(
                    "Embedding backend: deterministic stub (dim {})",
                    self.config.dimension
                );
            }
            EmbeddingMode::Onnx => {
                self.backend().await?;
                let warmup = vec![
                    "stew".to_string(),
                    "noodles".to_string(),
                    "rice".to_string(),
                ];
                self.embed_texts_batch(&warmup, true).await?;
                log::info!(
                    "Embedding model '{}' ready in {:.3}s",
                    self.config.name,
                    started.elapsed().as_secs_f64()
                );
            }
        }
        Ok(())
    }

    async fn backend(&self) -> Result<Arc<OrtBackend>> {
        let config = self.config.clone();
        let dir = self.model_dir.clone();
        self.backend
            .get_or_try_init(|| async move {
                let backend = spawn_blocking(move || OrtBackend::load(&config, &dir))
                    .await
                    .map_err(|e| StoreError::Embedding(format!("Join error: {e}")))??;
                Ok::<_, StoreError>(Arc::new(backend))
            })
            .await
            .map(Arc::clone)
    }

    pub async fn embed_text(&self, text: &str, normalize: bool) -> Result<Vec<f32>> {
        let mut embeddings = self
            .embed_texts_batch(&[text.to_string()], normalize)
            .await?;
        embeddings
            .pop()
            .ok_or_else(|| StoreError::Embedding("Empty embedding result".to_string()))
    }

    pub async fn embed_texts_batch(
        &self,
        texts: &[String],
        normalize: bool,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let prepared: Vec<String> = texts.iter().map(|t| preprocess_text(t)).collect();
        match self.mode {
            EmbeddingMode::Stub => Ok(prepared
                .iter()
                .map(|t| stub_embed(t, self.config.dimension))
                .collect()),
            EmbeddingMode::Onnx => {
                let backend = self.backend().await?;
                spawn_blocking(move || backend.embed_batch_blocking(&prepared, normalize))
                    .await
                    .map_err(|e| StoreError::Embedding(format!("Join error: {e}")))?
            }
        }
    }

    /// Drop the cached session and its device memory.
    pub fn cleanup(&mut self) {
        if self.backend.take().is_some() {
            log::info!("Released embedding backend");
        }
    }
}

fn preprocess_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        EMPTY_TEXT_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}
