//! Dead-letter routing for messages that failed downstream processing.
//!
//! A nacked message keeps its offset unresolved until the hand-off to the
//! dead-letter destination succeeds, so the commit level never moves past a
//! message that exists nowhere else.

use crate::error::{Error, Result};
use async_trait::async_trait;
use kafka_types::{Offset, Partition, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination that accepts dead-lettered records (e.g. a DLQ topic producer).
#[async_trait]
pub trait DeadLetterProducer: Send + Sync {
    /// Write the record to the dead-letter destination.
    ///
    /// Returns the partition and offset the record was written to.
    async fn send_message(&self, record: &Record) -> anyhow::Result<(Partition, Offset)>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// What a message uses when it is nacked.
#[async_trait]
pub trait DeadLetter: Send + Sync {
    /// Hand the record off; returns only once it is durably stored elsewhere
    /// or the dead-letter queue is closed.
    async fn add(&self, record: &Record) -> Result<()>;

    async fn close(&self);
}

/// Retries a [`DeadLetterProducer`] with exponential backoff until the send succeeds.
///
/// Only closing the queue interrupts the retries; records are never dropped.
pub struct RetryingDeadLetter<P> {
    producer: P,
    backoff_initial: Duration,
    backoff_max: Duration,
    shutdown: CancellationToken,
    sent: AtomicU64,
    failures: AtomicU64,
}

impl<P: DeadLetterProducer> RetryingDeadLetter<P> {
    pub fn new(producer: P, backoff_initial: Duration, backoff_max: Duration) -> Self {
        Self {
            producer,
            backoff_initial,
            backoff_max: backoff_max.max(backoff_initial),
            shutdown: CancellationToken::new(),
            sent: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Number of records successfully handed off
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Number of failed send attempts
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

#[async_trait]
impl<P: DeadLetterProducer> DeadLetter for RetryingDeadLetter<P> {
    async fn add(&self, record: &Record) -> Result<()> {
        let mut backoff = self.backoff_initial;
        let mut attempt: u32 = 1;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.producer.send_message(record).await {
                Ok((partition, offset)) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        dlq_partition = partition,
                        dlq_offset = offset,
                        "message dead-lettered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        attempt,
                        "dead-letter send failed, retrying in {backoff:?}: {e:#}"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = backoff.saturating_mul(2).min(self.backoff_max);
            attempt = attempt.saturating_add(1);
        }
    }

    async fn close(&self) {
        self.shutdown.cancel();
        if let Err(e) = self.producer.close().await {
            warn!("failed to close dead-letter producer: {e:#}");
        }
        info!(
            sent = self.sent(),
            failures = self.failures(),
            "dead-letter queue closed"
        );
    }
}
