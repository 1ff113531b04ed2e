//! Tunables for fetching and extraction.

use std::time::Duration;

/// Transport and retry settings owned by a single [`HttpRangeFetcher`](crate::io::HttpRangeFetcher).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound for one whole request, body included.
    pub timeout: Duration,
    /// Upper bound for establishing a connection.
    pub connect_timeout: Duration,
    /// Attempts after the first before a range read gives up.
    pub max_retries: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    /// Idle keep-alive connections kept in the pool.
    pub pool_max_idle_per_host: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
            pool_max_idle_per_host: 10,
        }
    }
}

impl FetchOptions {
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

/// Settings for reading entries out of an opened archive.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Entries fetched at the same time during a batch.
    pub concurrency: usize,
    /// Check CRC32 and uncompressed length of every extracted entry.
    pub verify_crc: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            verify_crc: false,
        }
    }
}

impl ExtractOptions {
    pub(crate) fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}
