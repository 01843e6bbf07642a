use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub file_name: String,
    pub source_path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub file_size: u64,
    pub last_ingested: DateTime<Utc>,
    pub embedding_model: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    version: u32,
    collection: String,
    last_updated: DateTime<Utc>,
    entries: Vec<ManifestEntry>,
}

const MANIFEST_VERSION: u32 = 1;

/// Per-collection ledger of ingested files, keyed case-insensitively on
/// `fileName`, used for incremental re-ingestion (§4.3).
pub struct SourceManifest {
    collection: String,
    path: PathBuf,
    entries: HashMap<String, ManifestEntry>,
}

impl SourceManifest {
    pub fn new(dir: PathBuf, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let path = dir.join(format!("{}.manifest.json", collection));
        Self {
            collection,
            path,
            entries: HashMap::new(),
        }
    }

    fn key(file_name: &str) -> String {
        file_name.to_lowercase()
    }

    pub fn load(&mut self) -> AppResult<()> {
        if !self.path.exists() {
            self.entries = HashMap::new();
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let file: ManifestFile = serde_json::from_str(&raw)?;
        self.entries = file
            .entries
            .into_iter()
            .map(|e| (Self::key(&e.file_name), e))
            .collect();
        Ok(())
    }

    pub fn save(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            collection: self.collection.clone(),
            last_updated: Utc::now(),
            entries: self.entries.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("manifest.json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.entries.get(&Self::key(file_name))
    }

    pub fn add_or_update(&mut self, entry: ManifestEntry) {
        self.entries.insert(Self::key(&entry.file_name), entry);
    }

    pub fn remove(&mut self, file_name: &str) -> Option<ManifestEntry> {
        self.entries.remove(&Self::key(file_name))
    }

    /// Rename a manifest key in place, keeping the rest of the entry
    /// (content hash, chunk count) untouched — used for rename detection.
    pub fn rename_key(&mut self, old_name: &str, new_name: &str, new_source_path: &str) {
        if let Some(mut entry) = self.entries.remove(&Self::key(old_name)) {
            entry.file_name = new_name.to_string();
            entry.source_path = new_source_path.to_string();
            self.entries.insert(Self::key(new_name), entry);
        }
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<&ManifestEntry> {
        self.entries.values().find(|e| e.content_hash == hash)
    }

    pub fn is_unchanged(&self, file_name: &str, hash: &str) -> bool {
        self.get(file_name).map(|e| e.content_hash == hash).unwrap_or(false)
    }

    /// Manifest entries whose file is no longer present in `current_file_names`.
    pub fn get_orphans(&self, current_file_names: &[String]) -> Vec<ManifestEntry> {
        let seen: std::collections::HashSet<String> =
            current_file_names.iter().map(|n| Self::key(n)).collect();
        self.entries
            .values()
            .filter(|e| !seen.contains(&Self::key(&e.file_name)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
