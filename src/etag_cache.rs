/// Per-URL entity-tag cache. Owned by the Conditional Fetcher for the
/// duration of one ingestion call; persisted as a JSON map under the
/// configured cache directory and rewritten atomically (write-temp, rename)
/// on every update, per §4.2's cache-protocol.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtagRecord {
    pub etag: String,
    pub last_checked: chrono::DateTime<chrono::Utc>,
    pub file_size: u64,
}

pub struct EtagCache {
    path: PathBuf,
    entries: HashMap<String, EtagRecord>,
}

impl EtagCache {
    /// Loads the cache from disk, creating an empty one if absent. A
    /// corrupted file is deleted and the cache starts empty rather than
    /// raising — the entity-tag store is allowed to be rebuilt, unlike the
    /// OHLCV store itself.
    pub fn load(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, EtagRecord>>(&bytes) {
                Ok(map) => {
                    debug!(entries = map.len(), "loaded etag cache");
                    map
                }
                Err(err) => {
                    error!(%err, path = %path.display(), "corrupted etag cache, discarding");
                    let _ = std::fs::remove_file(&path);
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err),
        };

        Ok(Self { path, entries })
    }

    pub fn get(&self, url: &str) -> Option<&EtagRecord> {
        self.entries.get(url)
    }

    /// Updates the record for `url` and persists the whole map atomically.
    pub fn update(&mut self, url: &str, etag: String, file_size: u64) -> std::io::Result<()> {
        self.entries.insert(
            url.to_string(),
            EtagRecord {
                etag,
                last_checked: chrono::Utc::now(),
                file_size,
            },
        );
        self.persist()
    }

    /// Drops the record for `url` (ETag/local-file mismatch scenario).
    pub fn invalidate(&mut self, url: &str) -> std::io::Result<()> {
        if self.entries.remove(url).is_some() {
            warn!(url, "invalidated etag cache entry");
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etags.json");

        let mut cache = EtagCache::load(&path).unwrap();
        assert!(cache.get("https://x").is_none());
        cache.update("https://x", "abc123".to_string(), 1024).unwrap();

        let reloaded = EtagCache::load(&path).unwrap();
        assert_eq!(reloaded.get("https://x").unwrap().etag, "abc123");
    }

    #[test]
    fn corrupted_file_is_discarded_not_raised() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etags.json");
        std::fs::write(&path, b"{not json").unwrap();

        let cache = EtagCache::load(&path).unwrap();
        assert!(cache.get("https://x").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etags.json");
        let mut cache = EtagCache::load(&path).unwrap();
        cache.update("https://x", "abc".to_string(), 10).unwrap();
        cache.invalidate("https://x").unwrap();
        assert!(cache.get("https://x").is_none());
    }
}
