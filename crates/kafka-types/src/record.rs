//! Raw broker records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Position of a record within a partition log.
pub type Offset = i64;

/// Partition number within a topic.
pub type Partition = i32;

/// A record as delivered by the broker for one topic-partition.
///
/// Records arrive in strictly increasing offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: Partition,
    /// Kafka offset within the partition
    pub offset: Offset,
    /// Message key (if any)
    pub key: Option<Bytes>,
    /// Raw message value
    pub payload: Bytes,
    /// Producer or log-append timestamp (if available)
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a keyless record without a timestamp.
    pub fn new(
        topic: impl Into<String>,
        partition: Partition,
        offset: Offset,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
        }
    }

    /// Set the record key (builder pattern)
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the record timestamp (builder pattern)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Time elapsed between the record timestamp and `now`.
    ///
    /// Zero when the record carries no timestamp or the timestamp lies in the
    /// future (producer clock skew).
    pub fn lag(&self, now: DateTime<Utc>) -> Duration {
        self.timestamp
            .and_then(|ts| now.signed_duration_since(ts).to_std().ok())
            .unwrap_or_default()
    }

    /// Key used when routing this record to a dead-letter destination.
    ///
    /// Falls back to the decimal offset so keyless records stay distinguishable.
    pub fn dead_letter_key(&self) -> Bytes {
        match &self.key {
            Some(key) => key.clone(),
            None => Bytes::from(self.offset.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lag_without_timestamp_is_zero() {
        let record = Record::new("events", 0, 7, "payload");
        assert_eq!(record.lag(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_lag_measures_elapsed_time() {
        let now = Utc::now();
        let record = Record::new("events", 0, 7, "payload")
            .with_timestamp(now - chrono::Duration::milliseconds(1500));
        assert_eq!(record.lag(now), Duration::from_millis(1500));
    }

    #[test]
    fn test_lag_ignores_future_timestamps() {
        let now = Utc::now();
        let record = Record::new("events", 0, 7, "payload")
            .with_timestamp(now + chrono::Duration::seconds(30));
        assert_eq!(record.lag(now), Duration::ZERO);
    }

    #[test]
    fn test_dead_letter_key_prefers_record_key() {
        let keyed = Record::new("events", 3, 42, "payload").with_key("user-1");
        assert_eq!(keyed.dead_letter_key(), Bytes::from("user-1"));

        let keyless = Record::new("events", 3, 42, "payload");
        assert_eq!(keyless.dead_letter_key(), Bytes::from("42"));
    }
}
