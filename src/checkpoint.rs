//! Filesystem-backed offset checkpoints.
//!
//! One JSON file per topic-partition, replaced atomically on every checkpoint.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kafka_types::{Offset, Partition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Last fully processed offset of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOffset {
    pub topic: String,
    pub partition: Partition,
    pub offset: Offset,
    #[serde(default)]
    pub metadata: String,
    pub updated_at: DateTime<Utc>,
}

/// Stores partition offsets as JSON files in a directory.
#[derive(Debug, Clone)]
pub struct OffsetCheckpointStore {
    dir: PathBuf,
}

impl OffsetCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, topic: &str, partition: Partition) -> PathBuf {
        self.dir.join(format!("offset_{topic}_{partition}.json"))
    }

    pub async fn store(
        &self,
        topic: &str,
        partition: Partition,
        offset: Offset,
        metadata: &str,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stored = StoredOffset {
            topic: topic.to_string(),
            partition,
            offset,
            metadata: metadata.to_string(),
            updated_at: Utc::now(),
        };

        let path = self.path_for(topic, partition);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&stored)?).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::debug!(topic, partition, offset, "stored offset to {}", path.display());
        Ok(())
    }

    pub async fn read(&self, topic: &str, partition: Partition) -> Result<Option<StoredOffset>> {
        let path = self.path_for(topic, partition);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let stored = serde_json::from_str(&content)
            .with_context(|| format!("Invalid checkpoint file {}", path.display()))?;
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = OffsetCheckpointStore::new(dir.path().join("not-created-yet"));
        assert_eq!(store.read("events", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_overwrites_previous_offset() {
        let dir = TempDir::new().unwrap();
        let store = OffsetCheckpointStore::new(dir.path());

        store.store("events", 3, 41, "").await.unwrap();
        store.store("events", 3, 57, "worker-a").await.unwrap();
        store.store("events", 4, 2, "").await.unwrap();

        let stored = store.read("events", 3).await.unwrap().unwrap();
        assert_eq!(stored.offset, 57);
        assert_eq!(stored.metadata, "worker-a");
        assert_eq!(stored.partition, 3);
        assert_eq!(store.read("events", 4).await.unwrap().unwrap().offset, 2);

        // no temp files left behind
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = OffsetCheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("offset_events_0.json"), "{not json").unwrap();
        assert!(store.read("events", 0).await.is_err());
    }
}
