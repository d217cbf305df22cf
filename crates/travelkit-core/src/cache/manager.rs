use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// User-scoped documents (favorites, trips, profile...) cached as JSON files.
/// Everything here belongs to the signed-in user and is wiped on sign-out.
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Delete every cached document. Succeeds on an already empty cache.
    pub fn clear(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            return Ok(());
        }
        let entries = std::fs::read_dir(&self.cache_dir).context("Failed to list cache directory")?;
        let mut removed = 0usize;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        debug!(removed, "User data cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn temp_dir() -> PathBuf {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        std::env::temp_dir().join(format!("travelkit-cache-{}", hex::encode(suffix)))
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = temp_dir().join("user-data");
        let cache = CacheManager::new(dir.clone()).expect("cache");

        assert!(cache.cache_dir().is_dir());

        let _ = std::fs::remove_dir_all(dir.parent().expect("parent"));
    }

    #[test]
    fn test_clear_removes_only_json_documents() {
        let dir = temp_dir();
        let cache = CacheManager::new(dir.clone()).expect("cache");
        std::fs::write(dir.join("trips.json"), "[1,2]").expect("write");
        std::fs::write(dir.join("profile.json"), r#"{"name":"jane"}"#).expect("write");
        std::fs::write(dir.join("notes.txt"), "keep me").expect("write");

        cache.clear().expect("clear");

        assert!(!dir.join("trips.json").exists());
        assert!(!dir.join("profile.json").exists());
        assert!(dir.join("notes.txt").exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = temp_dir();
        let cache = CacheManager::new(dir.clone()).expect("cache");
        std::fs::write(dir.join("favorites.json"), "[]").expect("write");

        cache.clear().expect("clear");
        cache.clear().expect("second clear");

        std::fs::remove_dir_all(&dir).expect("cleanup");
        cache.clear().expect("clear of missing directory");
    }
}
