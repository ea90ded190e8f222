use crate::common::{GreeterError, Result};
use crate::core::types::Embedding;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub size: u64,
    pub modified: u64,
    pub embedding: Embedding,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    model_tag: String,
    entries: HashMap<String, CachedEmbedding>,
}

/// Reference image embeddings keyed by file name, valid while the file's
/// size and mtime are unchanged and the embedding model is the same.
pub struct EmbeddingCache {
    path: PathBuf,
    model_tag: String,
    entries: HashMap<String, CachedEmbedding>,
    dirty: bool,
}

impl EmbeddingCache {
    /// Loads the cache, starting empty when the file is missing, unreadable,
    /// from another version or from another model.
    pub fn load(path: &Path, model_tag: &str) -> Self {
        let entries = match Self::read_file(path) {
            Ok(Some(file)) if file.version == CACHE_VERSION && file.model_tag == model_tag => file.entries,
            Ok(Some(_)) => {
                tracing::info!("Embedding cache at {} is stale, rebuilding", path.display());
                HashMap::new()
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable embedding cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            model_tag: model_tag.to_string(),
            entries,
            dirty: false,
        }
    }

    fn read_file(path: &Path) -> Result<Option<CacheFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        let file = bincode::deserialize(&data)
            .map_err(|e| GreeterError::Storage(format!("Failed to deserialize: {}", e)))?;
        Ok(Some(file))
    }

    pub fn get(&self, file_name: &str, size: u64, modified: u64) -> Option<&Embedding> {
        self.entries
            .get(file_name)
            .filter(|entry| entry.size == size && entry.modified == modified)
            .map(|entry| &entry.embedding)
    }

    pub fn insert(&mut self, file_name: &str, size: u64, modified: u64, embedding: Embedding) {
        self.entries.insert(file_name.to_string(), CachedEmbedding { size, modified, embedding });
        self.dirty = true;
    }

    /// Drops entries for files that no longer exist.
    pub fn retain<F: Fn(&str) -> bool>(&mut self, keep: F) {
        let before = self.entries.len();
        self.entries.retain(|name, _| keep(name));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the cache if anything changed since it was loaded or last saved.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let file = CacheFile {
            version: CACHE_VERSION,
            model_tag: self.model_tag.clone(),
            entries: self.entries.clone(),
        };
        let encoded = bincode::serialize(&file)
            .map_err(|e| GreeterError::Storage(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("bincode.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;

        self.dirty = false;
        Ok(())
    }
}
