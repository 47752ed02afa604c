//! Per-partition Kafka consumption core.
//!
//! This crate provides:
//! - A bounded, concurrency-safe ack tracker computing the safe commit offset
//! - The partition consumer: intake loop, commit loop and start/stop/drain lifecycle
//! - Dead-letter routing that holds back commits until the hand-off succeeds
//!
//! # Delivery Guarantee
//!
//! Offsets are committed only once every earlier offset of the partition has
//! been acked, either directly or after a successful dead-letter hand-off.
//! Anything unresolved at shutdown stays uncommitted and is redelivered by the
//! broker (at-least-once).
//!
//! # Usage
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(options.output_buffer_capacity);
//! let consumer = PartitionConsumer::new(client, dead_letter, tx, options)?;
//! consumer.start().await?;
//! while let Some(message) = rx.recv().await {
//!     match process(message.payload()).await {
//!         Ok(()) => message.ack()?,
//!         Err(_) => message.nack().await?,
//!     }
//! }
//! ```

/// Bounded ring of in-flight offsets
pub mod ack;
pub mod config;
pub mod dead_letter;
pub mod error;
#[cfg(feature = "rdkafka")]
pub mod kafka;
pub mod lifecycle;
pub mod message;
pub mod metrics;

/// Intake and commit loops for one topic-partition
pub mod partition;

pub use ack::{AckHandle, AckManager};
pub use config::{parse_duration, ConsumerOptions};
pub use dead_letter::{DeadLetter, DeadLetterProducer, RetryingDeadLetter};
pub use error::{Error, Result};
pub use kafka_types::{Offset, Partition, Record};
pub use message::Message;
pub use metrics::{MetricsSnapshot, PartitionMetrics};
pub use partition::{PartitionClient, PartitionConsumer};
