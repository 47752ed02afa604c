use crate::error::{Error, Result};
use clap::Args;
use std::time::Duration;

/// Configuration for a partition consumer
#[derive(Debug, Clone, Args)]
pub struct ConsumerOptions {
    /// Number of downstream workers processing messages concurrently
    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    /// Capacity of the bounded channel between the intake loop and the workers
    #[arg(long, default_value_t = 100)]
    pub output_buffer_capacity: usize,

    /// Commit period, and the default time budget given to in-flight messages when draining.
    /// Format: duration with units like "250ms", "10s", "5m" (plain numbers are seconds)
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub max_processing_time: Duration,

    /// Wait between attempts when the ack tracker runs out of capacity
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub capacity_retry_interval: Duration,

    /// First backoff after a failed dead-letter send
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub dead_letter_backoff_initial: Duration,

    /// Upper bound for the dead-letter send backoff
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub dead_letter_backoff_max: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            output_buffer_capacity: 100,
            max_processing_time: Duration::from_secs(10),
            capacity_retry_interval: Duration::from_millis(100),
            dead_letter_backoff_initial: Duration::from_millis(100),
            dead_letter_backoff_max: Duration::from_secs(5),
        }
    }
}

impl ConsumerOptions {
    /// Upper bound on offsets tracked at once.
    ///
    /// Every worker holds at most one message, the output channel holds at most
    /// `output_buffer_capacity`, and the intake loop holds one more while it
    /// waits to deliver.
    pub fn max_outstanding(&self) -> usize {
        self.concurrency + self.output_buffer_capacity + 1
    }

    /// Set the worker concurrency (builder pattern)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the output buffer capacity (builder pattern)
    pub fn with_output_buffer_capacity(mut self, capacity: usize) -> Self {
        self.output_buffer_capacity = capacity;
        self
    }

    /// Set the max processing time (builder pattern)
    pub fn with_max_processing_time(mut self, d: Duration) -> Self {
        self.max_processing_time = d;
        self
    }

    /// Set the capacity retry interval (builder pattern)
    pub fn with_capacity_retry_interval(mut self, d: Duration) -> Self {
        self.capacity_retry_interval = d;
        self
    }

    /// Set the dead-letter backoff bounds (builder pattern)
    pub fn with_dead_letter_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.dead_letter_backoff_initial = initial;
        self.dead_letter_backoff_max = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.output_buffer_capacity == 0 {
            return Err(Error::InvalidConfig(
                "output_buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_processing_time.is_zero() {
            return Err(Error::InvalidConfig(
                "max_processing_time must be greater than zero".to_string(),
            ));
        }
        if self.capacity_retry_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "capacity_retry_interval must be greater than zero".to_string(),
            ));
        }
        if self.dead_letter_backoff_initial > self.dead_letter_backoff_max {
            return Err(Error::InvalidConfig(format!(
                "dead_letter_backoff_initial ({:?}) exceeds dead_letter_backoff_max ({:?})",
                self.dead_letter_backoff_initial, self.dead_letter_backoff_max
            )));
        }
        Ok(())
    }
}

/// Parse a duration string like "250ms", "10s", "5m", "1h" or "30".
/// Plain numbers are interpreted as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration string".to_string()));
    }

    let parse = |num: &str, unit: &str| -> Result<u64> {
        num.trim()
            .parse::<u64>()
            .map_err(|e| Error::InvalidConfig(format!("invalid {unit} value '{num}': {e}")))
    };

    // "ms" must be checked before "m" and "s"
    if let Some(num) = s.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(num, "milliseconds")?));
    }
    if let Some(num) = s.strip_suffix('h') {
        return Ok(Duration::from_secs(parse(num, "hours")? * 3600));
    }
    if let Some(num) = s.strip_suffix('m') {
        return Ok(Duration::from_secs(parse(num, "minutes")? * 60));
    }
    if let Some(num) = s.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(num, "seconds")?));
    }

    Ok(Duration::from_secs(parse(s, "seconds")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_outstanding() {
        let options = ConsumerOptions::default()
            .with_concurrency(4)
            .with_output_buffer_capacity(16);
        assert_eq!(options.max_outstanding(), 21);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 30 ").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ConsumerOptions::default().validate().is_ok());
        assert!(ConsumerOptions::default()
            .with_concurrency(0)
            .validate()
            .is_err());
        assert!(ConsumerOptions::default()
            .with_output_buffer_capacity(0)
            .validate()
            .is_err());
        assert!(ConsumerOptions::default()
            .with_max_processing_time(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ConsumerOptions::default()
            .with_capacity_retry_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ConsumerOptions::default()
            .with_dead_letter_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .is_err());
    }
}
