//! rdkafka-backed collaborators: a single-partition reader and a dead-letter topic producer.

use crate::dead_letter::DeadLetterProducer;
use crate::error::Result;
use crate::partition::PartitionClient;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use clap::Args;
use kafka_types::{Offset, Partition, Record};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message as _};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset as KafkaOffset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for consuming one Kafka partition.
#[derive(Debug, Clone, Args)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', required = true)]
    pub brokers: Vec<String>,
    /// Consumer group ID whose committed offset is resumed from
    #[arg(long)]
    pub group_id: String,
    /// Topic to consume from
    #[arg(long)]
    pub topic: String,
    /// Partition to consume
    #[arg(long, default_value_t = 0)]
    pub partition: Partition,
    /// Topic receiving messages that failed processing
    #[arg(long)]
    pub dead_letter_topic: String,
    /// Where to start when the group has no committed offset ("earliest" or "latest")
    #[arg(long, default_value = "earliest")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[arg(long, default_value = "6000")]
    pub session_timeout_ms: String,
    /// Treat reaching the end of the partition as the end of the feed
    #[arg(long)]
    pub stop_at_end: bool,
}

/// Reads a single assigned partition through an rdkafka [`StreamConsumer`].
pub struct KafkaPartitionClient {
    consumer: StreamConsumer,
    topic: String,
    partition: Partition,
}

impl KafkaPartitionClient {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", &config.session_timeout_ms)
            .set("enable.partition.eof", config.stop_at_end.to_string())
            .create()?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&config.topic, config.partition, KafkaOffset::Stored)?;
        consumer.assign(&tpl)?;

        info!(
            topic = %config.topic,
            partition = config.partition,
            group_id = %config.group_id,
            "assigned kafka partition"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            partition: config.partition,
        })
    }

    pub fn inner(&self) -> &StreamConsumer {
        &self.consumer
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(Bytes::copy_from_slice),
        payload: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        timestamp: msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}

#[async_trait]
impl PartitionClient for KafkaPartitionClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> Partition {
        self.partition
    }

    async fn recv(&self) -> Option<Record> {
        loop {
            match self.consumer.recv().await {
                Ok(msg) => return Some(to_record(&msg)),
                Err(KafkaError::PartitionEOF(partition)) => {
                    info!(topic = %self.topic, partition, "reached end of partition");
                    return None;
                }
                Err(e) => {
                    warn!(topic = %self.topic, partition = self.partition, "error receiving message: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn high_water_mark_offset(&self) -> Offset {
        match self
            .consumer
            .get_watermark_offsets(&self.topic, self.partition)
        {
            Ok((_, high)) => high,
            Err(e) => {
                debug!(topic = %self.topic, partition = self.partition, "watermarks unavailable: {e}");
                0
            }
        }
    }

    async fn mark_partition_offset(
        &self,
        topic: &str,
        partition: Partition,
        offset: Offset,
        metadata: &str,
    ) -> anyhow::Result<()> {
        // Kafka stores the next offset to read, not the last one processed
        let mut tpl = TopicPartitionList::new();
        let mut elem = tpl.add_partition(topic, partition);
        elem.set_offset(KafkaOffset::Offset(offset + 1))?;
        if !metadata.is_empty() {
            elem.set_metadata(metadata);
        }

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .context("Failed to commit offset")?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.consumer
            .unassign()
            .context("Failed to unassign partition")?;
        Ok(())
    }
}

/// Writes dead-lettered records to a Kafka topic.
pub struct KafkaDeadLetterProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaDeadLetterProducer {
    pub fn new(brokers: &[String], topic: impl Into<String>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
            timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl DeadLetterProducer for KafkaDeadLetterProducer {
    async fn send_message(&self, record: &Record) -> anyhow::Result<(Partition, Offset)> {
        let key = record.dead_letter_key();
        let future_record = FutureRecord::to(&self.topic)
            .key(&key[..])
            .payload(&record.payload[..]);

        let (partition, offset) = self
            .producer
            .send(future_record, self.timeout)
            .await
            .map_err(|(err, _)| err)
            .context("Failed to send message to dead-letter topic")?;
        Ok((partition, offset))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.producer
            .flush(self.timeout)
            .context("Failed to flush dead-letter producer")?;
        Ok(())
    }
}
