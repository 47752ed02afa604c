//! JSON-lines file consumed as a single partition.
//!
//! Line `i` (zero-based) carries offset `i`. Blank lines occupy an offset but
//! produce no record. Reaching the end of the file closes the feed.

use crate::checkpoint::OffsetCheckpointStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kafka_source::PartitionClient;
use kafka_types::{Offset, Partition, Record};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{error, info};

struct Cursor {
    lines: Lines<BufReader<File>>,
    next_offset: Offset,
}

pub struct JsonlPartitionClient {
    topic: String,
    partition: Partition,
    path: PathBuf,
    cursor: Mutex<Cursor>,
    start_offset: Offset,
    high_water_mark: Offset,
    checkpoints: OffsetCheckpointStore,
    closed: AtomicBool,
}

impl JsonlPartitionClient {
    /// Open `path`, resuming after the offset stored for this topic-partition.
    pub async fn open(
        path: impl AsRef<Path>,
        topic: impl Into<String>,
        partition: Partition,
        checkpoints: OffsetCheckpointStore,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let topic = topic.into();

        let start_offset = match checkpoints.read(&topic, partition).await? {
            Some(stored) => stored.offset + 1,
            None => 0,
        };
        let high_water_mark = count_lines(&path).await?;

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        info!(
            topic = %topic,
            partition,
            start_offset,
            high_water_mark,
            "opened {}",
            path.display()
        );

        Ok(Self {
            topic,
            partition,
            path,
            cursor: Mutex::new(Cursor {
                lines: BufReader::new(file).lines(),
                next_offset: 0,
            }),
            start_offset,
            high_water_mark,
            checkpoints,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First offset this client delivers
    pub fn start_offset(&self) -> Offset {
        self.start_offset
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn count_lines(path: &Path) -> Result<Offset> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0;
    while lines.next_line().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

#[async_trait]
impl PartitionClient for JsonlPartitionClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> Partition {
        self.partition
    }

    async fn recv(&self) -> Option<Record> {
        if self.is_closed() {
            return None;
        }

        let mut cursor = self.cursor.lock().await;
        loop {
            let line = match cursor.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    error!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset = cursor.next_offset,
                        "failed to read {}: {e}",
                        self.path.display()
                    );
                    return None;
                }
            };

            let offset = cursor.next_offset;
            cursor.next_offset += 1;

            if offset < self.start_offset || line.trim().is_empty() {
                continue;
            }
            return Some(Record::new(&self.topic, self.partition, offset, line));
        }
    }

    fn high_water_mark_offset(&self) -> Offset {
        self.high_water_mark
    }

    async fn mark_partition_offset(
        &self,
        topic: &str,
        partition: Partition,
        offset: Offset,
        metadata: &str,
    ) -> Result<()> {
        self.checkpoints
            .store(topic, partition, offset, metadata)
            .await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!(topic = %self.topic, partition = self.partition, "closed {}", self.path.display());
        Ok(())
    }
}
