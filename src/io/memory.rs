use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ByteRange, RangeFetcher};
use crate::error::{Error, Result};

/// Archive bytes already held in memory.
pub struct MemoryFetcher {
    data: Bytes,
    requests: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryFetcher {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            requests: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of successful `fetch` calls so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RangeFetcher for MemoryFetcher {
    async fn fetch(&self, range: ByteRange) -> Result<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose);
        }
        if range.end() > self.size() {
            return Err(Error::corrupt(format!(
                "range {range} is beyond the end of a {} byte buffer",
                self.size()
            )));
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.slice(range.start() as usize..range.end() as usize))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
