//! Dead-letter destination appending failed records to a JSON-lines file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use kafka_source::DeadLetterProducer;
use kafka_types::{Offset, Partition, Record};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Utf8,
    Base64,
}

/// One line of the dead-letter file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub topic: String,
    pub partition: Partition,
    pub offset: Offset,
    pub key: String,
    pub payload: String,
    pub encoding: PayloadEncoding,
    pub timestamp: Option<DateTime<Utc>>,
    pub dead_lettered_at: DateTime<Utc>,
}

fn encode(bytes: &Bytes) -> (String, PayloadEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), PayloadEncoding::Utf8),
        Err(_) => (
            base64::engine::general_purpose::STANDARD.encode(bytes),
            PayloadEncoding::Base64,
        ),
    }
}

impl DeadLetterEntry {
    pub fn from_record(record: &Record) -> Self {
        let (payload, encoding) = encode(&record.payload);
        Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: String::from_utf8_lossy(&record.dead_letter_key()).into_owned(),
            payload,
            encoding,
            timestamp: record.timestamp,
            dead_lettered_at: Utc::now(),
        }
    }

    /// Original payload bytes
    pub fn payload_bytes(&self) -> Result<Bytes> {
        match self.encoding {
            PayloadEncoding::Utf8 => Ok(Bytes::from(self.payload.clone())),
            PayloadEncoding::Base64 => Ok(Bytes::from(
                base64::engine::general_purpose::STANDARD
                    .decode(&self.payload)
                    .context("Invalid base64 payload")?,
            )),
        }
    }
}

struct Writer {
    file: File,
    written: Offset,
}

/// Appends each dead-lettered record as a JSON line.
///
/// The returned offset is the line index within this session's writes.
pub struct JsonlDeadLetterProducer {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl JsonlDeadLetterProducer {
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open dead-letter file {}", path.display()))?;

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, written: 0 }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry of a dead-letter file.
    pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<DeadLetterEntry>> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Invalid dead-letter entry"))
            .collect()
    }
}

#[async_trait]
impl DeadLetterProducer for JsonlDeadLetterProducer {
    async fn send_message(&self, record: &Record) -> Result<(Partition, Offset)> {
        let mut line = serde_json::to_vec(&DeadLetterEntry::from_record(record))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .file
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        writer.file.flush().await?;

        let offset = writer.written;
        writer.written += 1;
        Ok((0, offset))
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.file.sync_all().await?;
        tracing::info!(
            written = writer.written,
            "closed dead-letter file {}",
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dlq").join("failed.jsonl");
        let producer = JsonlDeadLetterProducer::create(&path).await.unwrap();

        let text = Record::new("events", 2, 7, "not json").with_key("user-1");
        let binary = Record::new("events", 2, 9, vec![0xff, 0x00, 0xfe]);

        assert_eq!(producer.send_message(&text).await.unwrap(), (0, 0));
        assert_eq!(producer.send_message(&binary).await.unwrap(), (0, 1));
        producer.close().await.unwrap();

        let entries = JsonlDeadLetterProducer::read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].key, "user-1");
        assert_eq!(entries[0].payload, "not json");
        assert_eq!(entries[0].encoding, PayloadEncoding::Utf8);
        assert_eq!((entries[0].partition, entries[0].offset), (2, 7));

        assert_eq!(entries[1].key, "9");
        assert_eq!(entries[1].encoding, PayloadEncoding::Base64);
        assert_eq!(
            entries[1].payload_bytes().unwrap(),
            Bytes::from_static(&[0xff, 0x00, 0xfe])
        );
    }

    #[tokio::test]
    async fn test_reopening_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.jsonl");

        for offset in [1, 2] {
            let producer = JsonlDeadLetterProducer::create(&path).await.unwrap();
            producer
                .send_message(&Record::new("events", 0, offset, "x"))
                .await
                .unwrap();
            producer.close().await.unwrap();
        }

        let offsets: Vec<_> = JsonlDeadLetterProducer::read_entries(&path)
            .await
            .unwrap()
            .iter()
            .map(|e| e.offset)
            .collect();
        assert_eq!(offsets, vec![1, 2]);
    }
}
