use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

const ARTIFACT_EXT: &str = "html";

/// Rendered graphs stored as `{dir}/{hash}.html`, keyed by the sha256 of the input text.
pub struct GraphCache {
    dir: PathBuf,
    entries: DashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CachedGraph {
    pub hash: String,
    pub size_bytes: u64,
}

impl GraphCache {
    /// Create the directory if needed and index the artifacts already in it.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create graph directory {}", dir.display()))?;

        let entries = DashMap::new();
        let mut listing = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read graph directory {}", dir.display()))?;
        while let Some(entry) = listing.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let Some(hash) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_key(hash) {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            entries.insert(hash.to_string(), size);
        }

        info!(dir = %dir.display(), graphs = entries.len(), "graph cache opened");
        Ok(Self { dir, entries })
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.{ARTIFACT_EXT}"))
    }

    pub async fn get(&self, hash: &str) -> Result<Option<String>> {
        if !is_valid_key(hash) || !self.contains(hash) {
            return Ok(None);
        }
        let path = self.path_for(hash);
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(Some(html)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Removed behind our back
                self.entries.remove(hash);
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn store(&self, hash: &str, html: &str) -> Result<PathBuf> {
        anyhow::ensure!(is_valid_key(hash), "invalid graph key: {hash}");

        let path = self.path_for(hash);
        tokio::fs::write(&path, html)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.entries.insert(hash.to_string(), html.len() as u64);

        debug!(hash, bytes = html.len(), "graph stored");
        Ok(path)
    }

    pub fn list(&self) -> Vec<CachedGraph> {
        let mut graphs: Vec<CachedGraph> = self
            .entries
            .iter()
            .map(|r| CachedGraph {
                hash: r.key().clone(),
                size_bytes: *r.value(),
            })
            .collect();
        graphs.sort_by(|a, b| a.hash.cmp(&b.hash));
        graphs
    }
}

/// Keys are lowercase sha256 hex, which also keeps them inside the cache directory.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::content_hash;

    #[tokio::test]
    async fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GraphCache::open(dir.path()).await.unwrap();
        let hash = content_hash("Alice works at Acme.");

        assert!(!cache.contains(&hash));
        assert_eq!(cache.get(&hash).await.unwrap(), None);

        let path = cache.store(&hash, "<html>graph</html>").await.unwrap();
        assert_eq!(path, dir.path().join(format!("{hash}.html")));
        assert!(cache.contains(&hash));
        assert_eq!(cache.get(&hash).await.unwrap().as_deref(), Some("<html>graph</html>"));
    }

    #[tokio::test]
    async fn test_open_indexes_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let hash = content_hash("existing");
        std::fs::write(dir.path().join(format!("{hash}.html")), "<html></html>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("short.html"), "ignored").unwrap();

        let cache = GraphCache::open(dir.path()).await.unwrap();

        assert_eq!(
            cache.list(),
            vec![CachedGraph {
                hash,
                size_bytes: 13
            }]
        );
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Data").join("graphs");

        let cache = GraphCache::open(&nested).await.unwrap();

        assert!(nested.is_dir());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_rejects_keys_outside_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GraphCache::open(dir.path()).await.unwrap();

        assert!(cache.store("../escape", "x").await.is_err());
        assert_eq!(cache.get("../../etc/passwd").await.unwrap(), None);
        assert!(!is_valid_key(&content_hash("x").to_uppercase()));
    }

    #[tokio::test]
    async fn test_deleted_artifact_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GraphCache::open(dir.path()).await.unwrap();
        let hash = content_hash("gone");
        let path = cache.store(&hash, "<html></html>").await.unwrap();

        std::fs::remove_file(path).unwrap();

        assert_eq!(cache.get(&hash).await.unwrap(), None);
        assert!(!cache.contains(&hash));
    }
}
