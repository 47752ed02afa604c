//! Kafka record types shared by the partition consumer crates.
//!
//! The broker-facing client produces [`Record`]s and the consumption core wraps
//! them into acknowledgeable messages. Keeping the raw type here lets the
//! broker adapters and the file-backed collaborators agree on one shape
//! without depending on the core.

pub mod record;

pub use record::{Offset, Partition, Record};
