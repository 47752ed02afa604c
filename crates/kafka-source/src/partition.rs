//! Consumption engine for a single topic-partition.
//!
//! Two tasks run per partition:
//!
//! - the intake loop pulls records from the [`PartitionClient`], registers each
//!   offset with the [`AckManager`] and delivers a [`Message`] on the bounded
//!   output channel
//! - the commit loop periodically checkpoints [`AckManager::commit_level`]
//!   back to the broker
//!
//! Both observe one cancellation token. [`PartitionConsumer::stop`] and
//! [`PartitionConsumer::drain`] cancel it, perform a final checkpoint and close
//! the client exactly once.

use crate::ack::{AckHandle, AckManager};
use crate::config::ConsumerOptions;
use crate::dead_letter::DeadLetter;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleState, RunLifecycle};
use crate::message::Message;
use crate::metrics::{MetricsSnapshot, PartitionMetrics};
use async_trait::async_trait;
use chrono::Utc;
use kafka_types::{Offset, Partition, Record};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Broker-side reader for one topic-partition.
#[async_trait]
pub trait PartitionClient: Send + Sync + 'static {
    fn topic(&self) -> &str;

    fn partition(&self) -> Partition;

    /// Next record in offset order, or `None` once the feed is closed.
    async fn recv(&self) -> Option<Record>;

    /// Offset that will be assigned to the next record produced to the partition.
    fn high_water_mark_offset(&self) -> Offset;

    /// Checkpoint `offset` as the last fully processed offset of the partition.
    async fn mark_partition_offset(
        &self,
        topic: &str,
        partition: Partition,
        offset: Offset,
        metadata: &str,
    ) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Consumer for a specific [ topic, partition ] tuple.
///
/// Cheap to clone; all clones control the same consumer.
pub struct PartitionConsumer<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for PartitionConsumer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    topic: String,
    partition: Partition,
    client: C,
    /// Taken by the intake loop on start; the channel closes once it exits.
    output: std::sync::Mutex<Option<mpsc::Sender<Message>>>,
    ack_mgr: Arc<AckManager>,
    dead_letter: Arc<dyn DeadLetter>,
    options: ConsumerOptions,
    metrics: Arc<PartitionMetrics>,
    shutdown: CancellationToken,
    lifecycle: RunLifecycle,
    /// Last offset pushed to the broker. Serializes checkpoints.
    last_marked: Mutex<Option<Offset>>,
}

impl<C: PartitionClient> PartitionConsumer<C> {
    /// Create a consumer that delivers messages on `output`.
    ///
    /// The ack tracker is sized from the options so that it cannot fill up
    /// while at most `concurrency` workers drain `output`, which should be
    /// created with `output_buffer_capacity` slots.
    pub fn new(
        client: C,
        dead_letter: Arc<dyn DeadLetter>,
        output: mpsc::Sender<Message>,
        options: ConsumerOptions,
    ) -> Result<Self> {
        options.validate()?;

        let topic = client.topic().to_string();
        let partition = client.partition();
        let lifecycle = RunLifecycle::new(format!("{topic}-partition-{partition}"));

        Ok(Self {
            inner: Arc::new(Inner {
                topic,
                partition,
                client,
                output: std::sync::Mutex::new(Some(output)),
                ack_mgr: Arc::new(AckManager::new(options.max_outstanding())),
                dead_letter,
                options,
                metrics: Arc::new(PartitionMetrics::new()),
                shutdown: CancellationToken::new(),
                lifecycle,
                last_marked: Mutex::new(None),
            }),
        })
    }

    /// Spawn the intake and commit loops.
    ///
    /// Fails if the consumer was already started or stopped.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .lifecycle
            .start(|| {
                let output = inner
                    .output
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .ok_or(Error::AlreadyStarted)?;
                tokio::spawn(Arc::clone(inner).intake_loop(output));
                tokio::spawn(Arc::clone(inner).commit_loop());
                inner.metrics.record_started();
                Ok(())
            })
            .await
    }

    /// Stop immediately without waiting for in-flight messages.
    pub async fn stop(&self) {
        self.inner.stop(Duration::ZERO).await;
    }

    /// Stop taking new records, give in-flight messages up to `timeout` to be
    /// resolved, then checkpoint and close.
    pub async fn drain(&self, timeout: Duration) {
        self.inner.stop(timeout).await;
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn partition(&self) -> Partition {
        self.inner.partition
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.inner.options
    }

    /// Current safe commit offset, if any offset has been resolved yet.
    pub fn commit_level(&self) -> Option<Offset> {
        self.inner.ack_mgr.commit_level()
    }

    /// Last offset checkpointed to the broker by this consumer.
    pub async fn last_committed(&self) -> Option<Offset> {
        *self.inner.last_marked.lock().await
    }

    /// Number of offsets delivered but not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.inner.ack_mgr.outstanding()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub async fn is_stopped(&self) -> bool {
        self.inner.lifecycle.state().await == LifecycleState::Stopped
    }

    /// Token cancelled when this consumer begins shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    pub fn client(&self) -> &C {
        &self.inner.client
    }
}

impl<C: PartitionClient> Inner<C> {
    async fn intake_loop(self: Arc<Self>, output: mpsc::Sender<Message>) {
        info!(topic = %self.topic, partition = self.partition, "partition consumer started");

        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                record = self.client.recv() => record,
            };

            let Some(record) = record else {
                info!(topic = %self.topic, partition = self.partition, "partition message feed closed");
                drop(output);
                self.stop(self.options.max_processing_time).await;
                return;
            };

            self.metrics
                .record_read(record.offset, record.lag(Utc::now()));

            if !self.deliver(&output, record).await {
                break;
            }
        }

        info!(topic = %self.topic, partition = self.partition, "partition consumer stopped");
    }

    /// Track the record and hand it to the workers.
    ///
    /// Returns false once the intake loop should exit.
    async fn deliver(&self, output: &mpsc::Sender<Message>, record: Record) -> bool {
        // Reserve the slot first so an offset is only tracked for a message
        // that will actually reach a worker.
        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return false,
            permit = output.reserve() => permit,
        };
        let Ok(permit) = permit else {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                "output channel closed by the workers, stopping"
            );
            self.stop(Duration::ZERO).await;
            return false;
        };

        let handle = match self.track_offset(record.offset).await {
            Ok(handle) => handle,
            Err(Error::Cancelled) => return false,
            Err(e) => {
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset = record.offset,
                    "skipping record: {e}"
                );
                return true;
            }
        };

        permit.send(Message::new(
            record,
            handle,
            Arc::clone(&self.ack_mgr),
            Arc::clone(&self.dead_letter),
            Arc::clone(&self.metrics),
        ));
        true
    }

    /// Register the offset, retrying at a fixed interval while the tracker is full.
    async fn track_offset(&self, offset: Offset) -> Result<AckHandle> {
        loop {
            match self.ack_mgr.track(offset) {
                Err(Error::CapacityExceeded { capacity }) => {
                    self.metrics.record_capacity_exceeded();
                    // Cannot happen while max_outstanding covers the real
                    // in-flight bound; spin until a slot frees up.
                    error!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset,
                        capacity,
                        "ack tracker ran out of capacity"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.options.capacity_retry_interval) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Periodically checkpoint the commit level.
    async fn commit_loop(self: Arc<Self>) {
        let period = self.options.max_processing_time;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.mark_offset().await,
            }
        }
    }

    /// Push the current commit level to the broker if it moved.
    async fn mark_offset(&self) {
        let mut last_marked = self.last_marked.lock().await;
        let Some(offset) = self.ack_mgr.commit_level() else {
            return;
        };
        if *last_marked >= Some(offset) {
            return;
        }

        if let Err(e) = self
            .client
            .mark_partition_offset(&self.topic, self.partition, offset, "")
            .await
        {
            error!(
                topic = %self.topic,
                partition = self.partition,
                offset,
                "failed to checkpoint offset: {e:#}"
            );
            return;
        }
        *last_marked = Some(offset);

        self.metrics
            .record_commit(offset, self.client.high_water_mark_offset());
        debug!(topic = %self.topic, partition = self.partition, offset, "kafka checkpoint");
    }

    async fn stop(&self, drain_timeout: Duration) {
        self.lifecycle
            .stop(|| async {
                self.shutdown.cancel();

                if !drain_timeout.is_zero()
                    && tokio::time::timeout(drain_timeout, self.ack_mgr.wait_idle())
                        .await
                        .is_err()
                {
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        outstanding = self.ack_mgr.outstanding(),
                        "drain timed out with messages still in flight"
                    );
                }

                self.mark_offset().await;
                if let Err(e) = self.client.close().await {
                    error!(
                        topic = %self.topic,
                        partition = self.partition,
                        "failed to close partition client: {e:#}"
                    );
                }
                self.metrics.record_stopped();
            })
            .await;
    }
}
