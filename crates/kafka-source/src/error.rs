use kafka_types::Offset;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Ack tracker is full: {capacity} offsets outstanding")]
    CapacityExceeded { capacity: usize },

    #[error("Offset {offset} tracked out of order (last tracked offset {last})")]
    OutOfOrder { offset: Offset, last: Offset },

    #[error("Stale ack handle for offset {offset}")]
    StaleHandle { offset: Offset },

    #[error("Offset {offset} was already resolved")]
    AlreadyResolved { offset: Offset },

    #[error("Offset {offset} was already routed to the dead-letter queue")]
    AlreadyDeadLettered { offset: Offset },

    #[error("Partition consumer already started")]
    AlreadyStarted,

    #[error("Partition consumer already stopped")]
    AlreadyStopped,

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[cfg(feature = "rdkafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

pub type Result<T> = std::result::Result<T, Error>;
