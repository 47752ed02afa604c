//! kafka-partition-consumer
//!
//! Runs the per-partition consumption engine from `kafka-source` against
//! file-backed or Kafka-backed collaborators.
//!
//! # Features
//!
//! - JSON-lines input consumed as a single partition, with resumable offset checkpoints
//! - Dead-lettered records appended to a JSON-lines file
//! - A worker pool that acks valid JSON payloads and dead-letters the rest
//! - `kafka` feature: the same pipeline against a real broker partition
//!
//! # CLI Usage
//!
//! ```bash
//! # Consume a JSONL file, resuming from the last checkpoint
//! kafka-partition-consumer jsonl \
//!   --input events.jsonl \
//!   --checkpoint-dir .checkpoints \
//!   --dead-letter-file failed.jsonl \
//!   --concurrency 4
//!
//! # Consume partition 3 of a Kafka topic
//! kafka-partition-consumer kafka \
//!   --brokers localhost:9092 --group-id billing \
//!   --topic events --partition 3 --dead-letter-topic events-dlq
//! ```

pub mod checkpoint;
pub mod dead_letter;
pub mod jsonl;
pub mod runner;

pub use checkpoint::{OffsetCheckpointStore, StoredOffset};
pub use dead_letter::{DeadLetterEntry, JsonlDeadLetterProducer, PayloadEncoding};
pub use jsonl::JsonlPartitionClient;
pub use runner::{run_partition, PayloadValidator, RunSummary};
