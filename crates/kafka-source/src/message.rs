use crate::ack::{AckHandle, AckManager};
use crate::dead_letter::DeadLetter;
use crate::error::{Error, Result};
use crate::metrics::PartitionMetrics;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use kafka_types::{Offset, Partition, Record};
use std::fmt;
use std::sync::Arc;

/// A record delivered to a downstream worker together with its ack handle.
///
/// The worker owns the message and must resolve it exactly once with
/// [`Message::ack`] or [`Message::nack`]. A message dropped unresolved keeps
/// its offset uncommitted; the broker redelivers it after a restart.
pub struct Message {
    record: Record,
    handle: Option<AckHandle>,
    acker: Arc<AckManager>,
    dead_letter: Arc<dyn DeadLetter>,
    metrics: Arc<PartitionMetrics>,
}

impl Message {
    pub(crate) fn new(
        record: Record,
        handle: AckHandle,
        acker: Arc<AckManager>,
        dead_letter: Arc<dyn DeadLetter>,
        metrics: Arc<PartitionMetrics>,
    ) -> Self {
        Self {
            record,
            handle: Some(handle),
            acker,
            dead_letter,
            metrics,
        }
    }

    pub fn topic(&self) -> &str {
        &self.record.topic
    }

    pub fn partition(&self) -> Partition {
        self.record.partition
    }

    pub fn offset(&self) -> Offset {
        self.record.offset
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.record.key.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.record.payload
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.record.timestamp
    }

    /// The underlying broker record
    pub fn record(&self) -> &Record {
        &self.record
    }

    fn take_handle(&mut self) -> Result<AckHandle> {
        self.handle.take().ok_or(Error::AlreadyResolved {
            offset: self.record.offset,
        })
    }

    /// Mark the message as successfully processed.
    pub fn ack(mut self) -> Result<()> {
        let handle = self.take_handle()?;
        self.acker.ack(&handle)
    }

    /// Mark the message as failed and route it to the dead-letter queue.
    ///
    /// Resolves only after the dead-letter hand-off succeeds; until then the
    /// offset holds back the commit level. If the dead-letter queue is closed
    /// before the hand-off succeeds the offset stays unresolved.
    pub async fn nack(mut self) -> Result<()> {
        let handle = self.take_handle()?;
        self.acker.nack(&handle)?;
        self.dead_letter.add(&self.record).await?;
        self.acker.ack(&handle)?;
        self.metrics.record_dead_lettered();
        Ok(())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("record", &self.record)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(
                topic = %self.record.topic,
                partition = self.record.partition,
                offset = self.record.offset,
                "message dropped without ack or nack"
            );
        }
    }
}
