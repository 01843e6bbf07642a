use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::vector_math::{cosine_similarity, top_k};

/// Per-chunk metadata stored alongside each vector (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub file_name: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub text_preview: String,
    pub header_context: String,
    pub ingested_at: chrono::DateTime<chrono::Utc>,
    pub embedding_model: String,
    /// Lowercase, no-dot source extension; auditable chunker-dispatch trail.
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataEntry {
    id: String,
    metadata: ChunkMetadata,
}

pub struct SearchHit {
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreHealth {
    Ok,
    Corrupt(String),
}

/// In-memory brute-force cosine index, backed by a pair of on-disk files
/// (`{collection}.vectors.bin`, `{collection}.metadata.json`).
pub struct VectorStore {
    collection: String,
    dir: PathBuf,
    dims: Option<usize>,
    embedding_model: Option<String>,
    items: Vec<VectorRecord>,
    health: StoreHealth,
}

impl VectorStore {
    pub fn new(dir: PathBuf, collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            dir,
            dims: None,
            embedding_model: None,
            items: Vec::new(),
            health: StoreHealth::Ok,
        }
    }

    fn vectors_path(&self) -> PathBuf {
        self.dir.join(format!("{}.vectors.bin", self.collection))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.metadata.json", self.collection))
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn health(&self) -> &StoreHealth {
        &self.health
    }

    pub fn total_size_bytes(&self) -> u64 {
        let v = std::fs::metadata(self.vectors_path()).map(|m| m.len()).unwrap_or(0);
        let m = std::fs::metadata(self.metadata_path()).map(|m| m.len()).unwrap_or(0);
        v + m
    }

    /// Load both files from disk. A missing pair is treated as an empty,
    /// freshly-created store rather than an error.
    pub fn load(&mut self, expected_model: Option<&str>) -> AppResult<()> {
        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();

        if !vectors_path.exists() && !metadata_path.exists() {
            self.items = Vec::new();
            self.dims = None;
            self.embedding_model = None;
            self.health = StoreHealth::Ok;
            return Ok(());
        }

        let raw = std::fs::read(&vectors_path).map_err(AppError::from)?;
        let mut cursor = &raw[..];

        let count = read_i32(&mut cursor, &vectors_path)? as usize;
        let dims = read_i32(&mut cursor, &vectors_path)? as usize;
        let name_len_raw = read_i32(&mut cursor, &vectors_path)?;

        let model_name = if !(1..=256).contains(&name_len_raw) {
            // Legacy file without a model header: rewind the 4 bytes we
            // just consumed as the length prefix and treat model as null.
            cursor = &raw[8..];
            None
        } else {
            let name_len = name_len_raw as usize;
            if cursor.len() < name_len {
                self.health = StoreHealth::Corrupt("truncated model name".to_string());
                return Err(AppError::StoreCorrupt(format!(
                    "{}: truncated model name",
                    self.collection
                )));
            }
            let (name_bytes, rest) = cursor.split_at(name_len);
            cursor = rest;
            match std::str::from_utf8(name_bytes) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    self.health = StoreHealth::Corrupt("invalid utf8 model name".to_string());
                    return Err(AppError::StoreCorrupt(format!(
                        "{}: invalid utf8 model name",
                        self.collection
                    )));
                }
            }
        };

        let expected_floats = count * dims;
        let available_floats = cursor.len() / 4;
        let actual_count = if available_floats < expected_floats {
            tracing::warn!(
                collection = %self.collection,
                expected = count,
                available = available_floats / dims.max(1),
                "vector count/parity mismatch, truncating to available data"
            );
            available_floats / dims.max(1)
        } else {
            count
        };

        let mut vectors = Vec::with_capacity(actual_count);
        for i in 0..actual_count {
            let mut vec = Vec::with_capacity(dims);
            for d in 0..dims {
                let offset = (i * dims + d) * 4;
                let bytes: [u8; 4] = cursor[offset..offset + 4].try_into().unwrap();
                vec.push(f32::from_le_bytes(bytes));
            }
            vectors.push(vec);
        }

        let meta_raw = std::fs::read_to_string(&metadata_path).map_err(AppError::from)?;
        let entries: Vec<MetadataEntry> = serde_json::from_str(&meta_raw).map_err(|e| {
            AppError::StoreCorrupt(format!("{}: invalid metadata json: {}", self.collection, e))
        })?;

        let pair_count = vectors.len().min(entries.len());
        if vectors.len() != entries.len() {
            tracing::warn!(
                collection = %self.collection,
                vectors = vectors.len(),
                metadata = entries.len(),
                "vector/metadata count mismatch, truncating to the shorter side"
            );
        }

        if let (Some(expected), Some(found)) = (expected_model, model_name.as_deref()) {
            if expected != found {
                return Err(AppError::ModelMismatch(format!(
                    "collection {} was embedded with model {} but {} is configured",
                    self.collection, found, expected
                )));
            }
        }

        let mut items = Vec::with_capacity(pair_count);
        for (vector, entry) in vectors.into_iter().zip(entries.into_iter()).take(pair_count) {
            items.push(VectorRecord {
                id: entry.id,
                vector,
                metadata: entry.metadata,
            });
        }

        self.items = items;
        self.dims = if pair_count > 0 { Some(dims) } else { None };
        self.embedding_model = model_name;
        self.health = StoreHealth::Ok;
        Ok(())
    }

    /// Insert a record, binding `dims`/`embeddingModel` on first insert.
    pub fn add(&mut self, id: String, vector: Vec<f32>, metadata: ChunkMetadata) -> AppResult<()> {
        if self.items.is_empty() && self.dims.is_none() {
            self.dims = Some(vector.len());
            self.embedding_model = Some(metadata.embedding_model.clone());
        } else {
            if self.dims != Some(vector.len()) {
                return Err(AppError::DimensionMismatch(format!(
                    "collection {} expects dimension {:?}, got {}",
                    self.collection,
                    self.dims,
                    vector.len()
                )));
            }
            if self.embedding_model.as_deref() != Some(metadata.embedding_model.as_str()) {
                return Err(AppError::ModelMismatch(format!(
                    "collection {} is bound to model {:?}, got {}",
                    self.collection, self.embedding_model, metadata.embedding_model
                )));
            }
        }

        self.items.push(VectorRecord { id, vector, metadata });
        Ok(())
    }

    /// Mutable access to every record whose `fileName` matches
    /// (case-insensitive), used to rewrite `fileName`/`sourcePath` in place
    /// when a rename is detected without re-embedding.
    pub fn records_mut_by_file(&mut self, file_name: &str) -> impl Iterator<Item = &mut VectorRecord> {
        let needle = file_name.to_lowercase();
        self.items
            .iter_mut()
            .filter(move |r| r.metadata.file_name.to_lowercase() == needle)
    }

    /// Remove every record whose `fileName` matches (case-insensitive).
    pub fn delete(&mut self, file_name: &str) -> usize {
        let needle = file_name.to_lowercase();
        let before = self.items.len();
        self.items
            .retain(|r| r.metadata.file_name.to_lowercase() != needle);
        before - self.items.len()
    }

    /// Atomically rewrite both on-disk files: write to `.tmp`, then rename.
    pub fn save(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let dims = self.dims.unwrap_or(0);
        let model = self.embedding_model.clone().unwrap_or_default();
        let model_bytes = model.as_bytes();

        let mut buf = Vec::with_capacity(12 + model_bytes.len() + self.items.len() * dims * 4);
        buf.extend_from_slice(&(self.items.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(dims as i32).to_le_bytes());
        buf.extend_from_slice(&(model_bytes.len() as i32).to_le_bytes());
        buf.extend_from_slice(model_bytes);
        for item in &self.items {
            for v in &item.vector {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        let vectors_path = self.vectors_path();
        let vectors_tmp = vectors_path.with_extension("vectors.bin.tmp");
        {
            let mut f = std::fs::File::create(&vectors_tmp)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        std::fs::rename(&vectors_tmp, &vectors_path)?;

        let entries: Vec<MetadataEntry> = self
            .items
            .iter()
            .map(|r| MetadataEntry {
                id: r.id.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        let json = serde_json::to_vec_pretty(&entries)?;
        let metadata_path = self.metadata_path();
        let metadata_tmp = metadata_path.with_extension("metadata.json.tmp");
        {
            let mut f = std::fs::File::create(&metadata_tmp)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }
        std::fs::rename(&metadata_tmp, &metadata_path)?;

        Ok(())
    }

    /// Cosine search against every item, filtered by `minScore`, top-k.
    pub fn find_nearest(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        query_model: Option<&str>,
    ) -> AppResult<Vec<SearchHit>> {
        if let StoreHealth::Corrupt(reason) = &self.health {
            return Err(AppError::StoreCorrupt(reason.clone()));
        }

        if let (Some(expected), Some(found)) = (query_model, self.embedding_model.as_deref()) {
            if expected != found {
                return Err(AppError::ModelMismatch(format!(
                    "query model {} does not match collection model {}",
                    expected, found
                )));
            }
        }

        if self.items.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores = Vec::with_capacity(self.items.len());
        for item in &self.items {
            scores.push(cosine_similarity(query, &item.vector)?);
        }

        let candidate_indices: Vec<usize> = (0..scores.len())
            .filter(|&i| scores[i] >= min_score)
            .collect();
        let filtered_scores: Vec<f32> = candidate_indices.iter().map(|&i| scores[i]).collect();
        let ranked = top_k(&filtered_scores, k);

        Ok(ranked
            .into_iter()
            .map(|local_idx| {
                let item_idx = candidate_indices[local_idx];
                SearchHit {
                    score: scores[item_idx],
                    metadata: self.items[item_idx].metadata.clone(),
                }
            })
            .collect())
    }
}

fn read_i32(cursor: &mut &[u8], path: &Path) -> AppResult<i32> {
    if cursor.len() < 4 {
        return Err(AppError::StoreCorrupt(format!(
            "{}: truncated header",
            path.display()
        )));
    }
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf).map_err(AppError::from)?;
    Ok(i32::from_le_bytes(buf))
}
