//! Command-line interface for kafka-partition-consumer
//!
//! # Usage Examples
//!
//! ```bash
//! # Replay a JSONL file as partition 0 of topic "events"
//! kafka-partition-consumer jsonl \
//!   --input events.jsonl \
//!   --topic events \
//!   --checkpoint-dir .kafka-partition-consumer-checkpoints \
//!   --dead-letter-file events-dlq.jsonl \
//!   --required-field id
//!
//! # Consume a Kafka partition (requires the `kafka` feature)
//! kafka-partition-consumer kafka \
//!   --brokers localhost:9092 \
//!   --group-id billing \
//!   --topic events --partition 3 \
//!   --dead-letter-topic events-dlq \
//!   --max-processing-time 30s
//! ```
//!
//! Ctrl-C drains the consumer: in-flight messages get up to
//! `--max-processing-time` to finish before the final checkpoint.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kafka_partition_consumer::{
    run_partition, JsonlDeadLetterProducer, JsonlPartitionClient, OffsetCheckpointStore,
    PayloadValidator, RunSummary,
};
use kafka_source::ConsumerOptions;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kafka-partition-consumer")]
#[command(about = "Consume a single partition with bounded in-flight tracking and dead-letter routing")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume a JSON-lines file as a single partition
    Jsonl(JsonlArgs),

    /// Consume one partition of a Kafka topic
    #[cfg(feature = "kafka")]
    Kafka(KafkaArgs),
}

#[derive(Args)]
struct JsonlArgs {
    /// Input file, one JSON document per line
    #[arg(long)]
    input: PathBuf,

    /// Topic name recorded in checkpoints and dead-letter entries
    #[arg(long, default_value = "jsonl")]
    topic: String,

    /// Partition number recorded in checkpoints and dead-letter entries
    #[arg(long, default_value_t = 0)]
    partition: i32,

    /// Directory holding offset checkpoints
    #[arg(long, default_value = ".kafka-partition-consumer-checkpoints")]
    checkpoint_dir: PathBuf,

    /// File receiving records that failed processing
    #[arg(long)]
    dead_letter_file: PathBuf,

    /// Field every payload must contain (repeatable)
    #[arg(long = "required-field", value_name = "FIELD")]
    required_fields: Vec<String>,

    #[command(flatten)]
    consumer: ConsumerOptions,
}

#[cfg(feature = "kafka")]
#[derive(Args)]
struct KafkaArgs {
    #[command(flatten)]
    kafka: kafka_source::kafka::KafkaConfig,

    /// Field every payload must contain (repeatable)
    #[arg(long = "required-field", value_name = "FIELD")]
    required_fields: Vec<String>,

    #[command(flatten)]
    consumer: ConsumerOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let shutdown = setup_shutdown_handler();

    let summary = match cli.command {
        Commands::Jsonl(args) => run_jsonl(args, shutdown).await?,
        #[cfg(feature = "kafka")]
        Commands::Kafka(args) => run_kafka(args, shutdown).await?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_jsonl(args: JsonlArgs, shutdown: CancellationToken) -> anyhow::Result<RunSummary> {
    args.consumer.validate()?;

    let store = OffsetCheckpointStore::new(&args.checkpoint_dir);
    let client = JsonlPartitionClient::open(&args.input, &args.topic, args.partition, store)
        .await
        .with_context(|| format!("Failed to open input {}", args.input.display()))?;
    let producer = JsonlDeadLetterProducer::create(&args.dead_letter_file).await?;

    run_partition(
        client,
        producer,
        args.consumer,
        PayloadValidator::new(args.required_fields),
        shutdown,
    )
    .await
}

#[cfg(feature = "kafka")]
async fn run_kafka(args: KafkaArgs, shutdown: CancellationToken) -> anyhow::Result<RunSummary> {
    use kafka_source::kafka::{KafkaDeadLetterProducer, KafkaPartitionClient};

    args.consumer.validate()?;

    let client = KafkaPartitionClient::new(&args.kafka)?;
    let producer =
        KafkaDeadLetterProducer::new(&args.kafka.brokers, &args.kafka.dead_letter_topic)?;

    run_partition(
        client,
        producer,
        args.consumer,
        PayloadValidator::new(args.required_fields),
        shutdown,
    )
    .await
}

/// Cancels the returned token on Ctrl-C
fn setup_shutdown_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C)");
                token.cancel();
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {e}"),
        }
    });

    shutdown
}
