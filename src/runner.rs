//! Drives one partition consumer with a pool of validating workers.

use anyhow::{Context, Result};
use kafka_source::{
    ConsumerOptions, DeadLetter, DeadLetterProducer, Message, MetricsSnapshot, Offset,
    PartitionClient, PartitionConsumer, RetryingDeadLetter,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides whether a payload is processable.
#[derive(Debug, Clone, Default)]
pub struct PayloadValidator {
    required_fields: Vec<String>,
}

impl PayloadValidator {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    /// Payloads must be JSON; with required fields configured they must be
    /// objects carrying every one of them.
    pub fn check(&self, payload: &[u8]) -> std::result::Result<(), String> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| format!("invalid JSON: {e}"))?;

        if self.required_fields.is_empty() {
            return Ok(());
        }
        let object = value
            .as_object()
            .ok_or_else(|| "payload is not a JSON object".to_string())?;
        match self
            .required_fields
            .iter()
            .find(|field| !object.contains_key(field.as_str()))
        {
            Some(missing) => Err(format!("missing required field '{missing}'")),
            None => Ok(()),
        }
    }
}

/// Outcome of a partition run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub topic: String,
    pub partition: i32,
    pub processed: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    /// Last offset stored as the partition checkpoint
    pub committed_offset: Option<Offset>,
    pub metrics: MetricsSnapshot,
}

/// Consume `client` until its feed closes or `shutdown` fires.
///
/// Runs `options.concurrency` workers. Valid payloads are acked, the rest are
/// nacked into `producer`. On `shutdown` the consumer is drained for
/// `options.max_processing_time`.
pub async fn run_partition<C, P>(
    client: C,
    producer: P,
    options: ConsumerOptions,
    validator: PayloadValidator,
    shutdown: CancellationToken,
) -> Result<RunSummary>
where
    C: PartitionClient,
    P: DeadLetterProducer + 'static,
{
    // mpsc::channel panics on a zero capacity
    options.validate().context("Invalid consumer options")?;

    let dead_letter = Arc::new(RetryingDeadLetter::new(
        producer,
        options.dead_letter_backoff_initial,
        options.dead_letter_backoff_max,
    ));
    let (tx, rx) = mpsc::channel(options.output_buffer_capacity);
    let drain_timeout = options.max_processing_time;
    let concurrency = options.concurrency;

    let consumer = PartitionConsumer::new(
        client,
        Arc::clone(&dead_letter) as Arc<dyn DeadLetter>,
        tx,
        options,
    )?;

    let processed = Arc::new(AtomicU64::new(0));
    let rx = Arc::new(Mutex::new(rx));
    let validator = Arc::new(validator);
    let mut workers = JoinSet::new();
    for worker_id in 0..concurrency {
        workers.spawn(worker(
            worker_id,
            Arc::clone(&rx),
            Arc::clone(&validator),
            Arc::clone(&processed),
        ));
    }

    consumer.start().await?;
    info!(
        topic = consumer.topic(),
        partition = consumer.partition(),
        concurrency,
        "partition run started"
    );

    // Workers exit once the intake loop releases the output channel.
    tokio::select! {
        _ = join_all(&mut workers) => {}
        _ = shutdown.cancelled() => {
            info!(topic = consumer.topic(), partition = consumer.partition(), "shutdown requested, draining");
        }
    }

    // Waits for a stop already in progress, or drains now.
    consumer.drain(drain_timeout).await;
    dead_letter.close().await;
    join_all(&mut workers).await;

    let summary = RunSummary {
        topic: consumer.topic().to_string(),
        partition: consumer.partition(),
        processed: processed.load(Ordering::Relaxed),
        dead_lettered: dead_letter.sent(),
        dead_letter_failures: dead_letter.failures(),
        committed_offset: consumer.last_committed().await,
        metrics: consumer.metrics(),
    };
    info!(
        topic = %summary.topic,
        partition = summary.partition,
        processed = summary.processed,
        dead_lettered = summary.dead_lettered,
        committed_offset = ?summary.committed_offset,
        "partition run finished"
    );
    Ok(summary)
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            warn!("worker task failed: {e}");
        }
    }
}

async fn worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    validator: Arc<PayloadValidator>,
    processed: Arc<AtomicU64>,
) {
    loop {
        let Some(message) = rx.lock().await.recv().await else {
            debug!(worker_id, "output channel closed, worker exiting");
            return;
        };

        let offset = message.offset();
        let result = match validator.check(message.payload()) {
            Ok(()) => message.ack().map(|()| {
                processed.fetch_add(1, Ordering::Relaxed);
            }),
            Err(reason) => {
                debug!(worker_id, offset, "rejecting message: {reason}");
                message.nack().await
            }
        };

        if let Err(e) = result {
            warn!(worker_id, offset, "failed to resolve message: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_accepts_any_json_by_default() {
        let validator = PayloadValidator::default();
        assert!(validator.check(br#"{"id": 1}"#).is_ok());
        assert!(validator.check(b"[1, 2]").is_ok());
        assert!(validator.check(b"42").is_ok());
        assert!(validator.check(b"{oops").is_err());
        assert!(validator.check(b"").is_err());
    }

    #[test]
    fn test_validator_required_fields() {
        let validator = PayloadValidator::new(vec!["id".to_string(), "type".to_string()]);
        assert!(validator.check(br#"{"id": 1, "type": "user"}"#).is_ok());

        let err = validator.check(br#"{"id": 1}"#).unwrap_err();
        assert_eq!(err, "missing required field 'type'");
        assert!(validator.check(b"[1]").is_err());
    }
}
