//! In-memory collaborators for partition consumer tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kafka_source::{DeadLetterProducer, Message, Offset, Partition, PartitionClient, Record};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOPIC: &str = "test-events";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("kafka_source=debug")
        .try_init()
        .ok();
}

/// Partition client fed from a channel; dropping the feed sender closes it.
pub struct MockPartitionClient {
    topic: String,
    partition: Partition,
    feed: tokio::sync::Mutex<mpsc::Receiver<Record>>,
    marked: Mutex<Vec<Offset>>,
    closed: AtomicUsize,
    high_water_mark: AtomicI64,
}

pub struct MockFeed {
    tx: mpsc::Sender<Record>,
    partition: Partition,
}

pub fn mock_partition(partition: Partition) -> (MockPartitionClient, MockFeed) {
    let (tx, rx) = mpsc::channel(1024);
    let client = MockPartitionClient {
        topic: TOPIC.to_string(),
        partition,
        feed: tokio::sync::Mutex::new(rx),
        marked: Mutex::new(Vec::new()),
        closed: AtomicUsize::new(0),
        high_water_mark: AtomicI64::new(0),
    };
    (client, MockFeed { tx, partition })
}

impl MockFeed {
    pub async fn send(&self, offset: Offset) {
        let record = Record::new(TOPIC, self.partition, offset, format!("msg-{offset}"))
            .with_timestamp(chrono::Utc::now());
        self.tx.send(record).await.expect("feed receiver dropped");
    }

    pub async fn send_range(&self, offsets: impl IntoIterator<Item = Offset>) {
        for offset in offsets {
            self.send(offset).await;
        }
    }

    /// Signal end of partition
    pub fn close(self) {}
}

impl MockPartitionClient {
    pub fn marked(&self) -> Vec<Offset> {
        self.marked.lock().unwrap().clone()
    }

    pub fn last_marked(&self) -> Option<Offset> {
        self.marked.lock().unwrap().last().copied()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_high_water_mark(&self, offset: Offset) {
        self.high_water_mark.store(offset, Ordering::SeqCst);
    }
}

#[async_trait]
impl PartitionClient for MockPartitionClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> Partition {
        self.partition
    }

    async fn recv(&self) -> Option<Record> {
        self.feed.lock().await.recv().await
    }

    fn high_water_mark_offset(&self) -> Offset {
        self.high_water_mark.load(Ordering::SeqCst)
    }

    async fn mark_partition_offset(
        &self,
        topic: &str,
        partition: Partition,
        offset: Offset,
        _metadata: &str,
    ) -> anyhow::Result<()> {
        assert_eq!(topic, self.topic);
        assert_eq!(partition, self.partition);
        self.marked.lock().unwrap().push(offset);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dead-letter producer that fails the first attempt for every key.
#[derive(Default)]
pub struct MockDeadLetterProducer {
    seen_keys: Mutex<HashSet<Vec<u8>>>,
    sent: Mutex<Vec<Offset>>,
    closed: AtomicUsize,
}

impl MockDeadLetterProducer {
    pub fn sent(&self) -> Vec<Offset> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort_unstable();
        sent
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeadLetterProducer for MockDeadLetterProducer {
    async fn send_message(&self, record: &Record) -> anyhow::Result<(Partition, Offset)> {
        let key = record.dead_letter_key().to_vec();
        if self.seen_keys.lock().unwrap().insert(key) {
            anyhow::bail!("intermittent error");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(record.offset);
        Ok((0, sent.len() as Offset - 1))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dead-letter producer that fails a fixed number of sends, then succeeds.
pub struct FlakyDeadLetterProducer {
    remaining_failures: AtomicUsize,
    sent: Mutex<Vec<Offset>>,
}

impl FlakyDeadLetterProducer {
    pub fn failing(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Let every following send succeed
    pub fn heal(&self) {
        self.remaining_failures.store(0, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Offset> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterProducer for FlakyDeadLetterProducer {
    async fn send_message(&self, record: &Record) -> anyhow::Result<(Partition, Offset)> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("dead-letter topic unavailable");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(record.offset);
        Ok((0, sent.len() as Offset - 1))
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run `count` workers that resolve every message with `handler`.
///
/// The returned handles finish once the output channel closes.
pub fn spawn_workers<F, Fut>(
    rx: mpsc::Receiver<Message>,
    count: usize,
    handler: F,
) -> Vec<tokio::task::JoinHandle<()>>
where
    F: Fn(Message) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..count)
        .map(|_| {
            let rx = Arc::clone(&rx);
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let message = rx.lock().await.recv().await;
                    match message {
                        Some(message) => handler(message).await,
                        None => return,
                    }
                }
            })
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
