use crate::error::{Result, StoreError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Layout: magic, dimension (u32 LE), row count (u64 LE), then rows of f32 LE.
const TABLE_MAGIC: &[u8; 4] = b"LV01";
const TABLE_HEADER_LEN: usize = 4 + 4 + 8;

pub const METADATA_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedMetadata {
    pub schema_version: u32,
    pub recipe_ids: Vec<i64>,
    pub dimension: usize,
}

pub async fn save_table(path: impl AsRef<Path>, table: &Array2<f32>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = encode_table(table);
    let tmp = path.with_extension("bin.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn load_table(path: impl AsRef<Path>) -> Result<Array2<f32>> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    decode_table(&bytes)
}

pub async fn save_metadata(
    path: impl AsRef<Path>,
    recipe_ids: &[i64],
    dimension: usize,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let persisted = PersistedMetadata {
        schema_version: METADATA_SCHEMA_VERSION,
        recipe_ids: recipe_ids.to_vec(),
        dimension,
    };
    let bytes = serde_json::to_vec_pretty(&persisted)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn load_metadata(path: impl AsRef<Path>) -> Result<PersistedMetadata> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let persisted: PersistedMetadata = serde_json::from_slice(&bytes)?;
    if persisted.schema_version != METADATA_SCHEMA_VERSION {
        return Err(StoreError::Corrupted(format!(
            "Unsupported metadata schema_version {} (expected {METADATA_SCHEMA_VERSION})",
            persisted.schema_version
        )));
    }
    Ok(persisted)
}

fn encode_table(table: &Array2<f32>) -> Vec<u8> {
    let (rows, dim) = table.dim();
    let mut out = Vec::with_capacity(TABLE_HEADER_LEN + rows * dim * 4);
    out.extend_from_slice(TABLE_MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&(rows as u64).to_le_bytes());
    for value in table.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_table(bytes: &[u8]) -> Result<Array2<f32>> {
    if bytes.len() < TABLE_HEADER_LEN || &bytes[0..4] != TABLE_MAGIC {
        return Err(StoreError::Corrupted(
            "Vector table header missing or unrecognized".to_string(),
        ));
    }
    let dim = u32::from_le_bytes(
        bytes[4..8]
            .try_into()
            .map_err(|_| StoreError::Corrupted("Truncated table header".to_string()))?,
    ) as usize;
    let rows = u64::from_le_bytes(
        bytes[8..TABLE_HEADER_LEN]
            .try_into()
            .map_err(|_| StoreError::Corrupted("Truncated table header".to_string()))?,
    ) as usize;

    let expected_len = TABLE_HEADER_LEN
        .saturating_add(rows.saturating_mul(dim).saturating_mul(4));
    if bytes.len() != expected_len {
        return Err(StoreError::Corrupted(format!(
            "Vector table length {} does not match header ({rows} x {dim})",
            bytes.len()
        )));
    }

    let mut values = Vec::with_capacity(rows * dim);
    for chunk in bytes[TABLE_HEADER_LEN..].chunks_exact(4) {
        let raw: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::Corrupted("Truncated table payload".to_string()))?;
        values.push(f32::from_le_bytes(raw));
    }

    Array2::from_shape_vec((rows, dim), values)
        .map_err(|e| StoreError::Corrupted(format!("Bad table shape: {e}")))
}
