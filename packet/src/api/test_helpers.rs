//! Test helpers for the Packet API

use super::{Client, RetryConfig};

pub fn create_test_client(url: &str) -> Client {
    Client::with_config(url, "test-token", fast_retries(0)).unwrap()
}

/// Retry settings that keep unit tests fast
pub fn fast_retries(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        timeout_seconds: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.initial_backoff_ms, 1000);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert_eq!(config.timeout_seconds, 30);
    }
}
