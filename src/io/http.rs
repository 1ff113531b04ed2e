use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{ByteRange, RangeFetcher};
use crate::error::{Error, Result};
use crate::options::FetchOptions;

/// Byte-range reader for a resource served over HTTP.
///
/// Each fetcher owns its connection pool, so several archives opened by one
/// process never share connection state or retry counters.
pub struct HttpRangeFetcher {
    client: Mutex<Option<Client>>,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    options: FetchOptions,
}

impl HttpRangeFetcher {
    /// Probe `url` with default [`FetchOptions`].
    pub async fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, FetchOptions::default()).await
    }

    /// Probe `url` for range support and total size.
    ///
    /// A HEAD request is tried first; when it is refused or lacks
    /// `Accept-Ranges: bytes` and `Content-Length`, a one-byte ranged GET
    /// decides instead.
    pub async fn with_options(url: impl Into<String>, options: FetchOptions) -> Result<Self> {
        let url = url.into();
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()?;

        let size = probe(&client, &url, &options).await?;
        debug!(%url, size, "remote archive supports byte ranges");

        Ok(Self {
            client: Mutex::new(Some(client)),
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    fn client(&self) -> Result<Client> {
        let guard = self.client.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(Error::UseAfterClose)
    }

    /// One GET for `range`, without retries.
    async fn request(&self, client: &Client, range: ByteRange) -> Result<Bytes> {
        debug!(url = %self.url, %range, "range request");
        let resp = client
            .get(&self.url)
            .header(RANGE, range.header_value())
            .send()
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                let header = resp
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let span = header
                    .as_deref()
                    .and_then(ContentRange::parse)
                    .filter(|cr| cr.total.is_none_or(|total| total == self.size))
                    .and_then(|cr| cr.span)
                    .filter(|&(first, last)| first == range.start() && last < self.size)
                    .ok_or_else(|| {
                        Error::network(format!(
                            "range {range} answered with Content-Range {}",
                            header.as_deref().unwrap_or("<missing>")
                        ))
                    })?;

                let mut body = resp.bytes().await?;
                let declared = span.1 - span.0 + 1;
                if body.len() as u64 > declared {
                    return Err(Error::network(format!(
                        "range {range} body of {} bytes exceeds its Content-Range of {declared}",
                        body.len()
                    )));
                }
                body.truncate(range.len() as usize);
                Ok(body)
            }
            StatusCode::OK if range.start() == 0 && range.end() == self.size => {
                Ok(resp.bytes().await?)
            }
            StatusCode::OK => Err(Error::RangeUnsupported(format!(
                "server answered range {range} with the full resource"
            ))),
            status => Err(Error::network(format!(
                "unexpected status {status} for range {range}"
            ))),
        }
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn fetch(&self, range: ByteRange) -> Result<Bytes> {
        let client = self.client()?;
        if range.end() > self.size {
            return Err(Error::corrupt(format!(
                "range {range} is beyond the end of a {} byte resource",
                self.size
            )));
        }

        let expected = range.len() as usize;
        let mut buf = BytesMut::with_capacity(expected);
        let mut retry_count = 0;

        // Short bodies are resumed from where they stopped.
        while buf.len() < expected {
            let remaining = ByteRange::new(range.start() + buf.len() as u64, range.end(), self.size)?;
            let result = match self.request(&client, remaining).await {
                Ok(chunk) if chunk.is_empty() => Err(Error::network(format!(
                    "empty body for range {remaining}"
                ))),
                other => other,
            };

            match result {
                Ok(chunk) => {
                    self.transferred_bytes
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    buf.extend_from_slice(&chunk);
                }
                Err(e) if e.is_retryable() && retry_count < self.options.max_retries => {
                    retry_count += 1;
                    warn!(
                        url = %self.url,
                        range = %remaining,
                        retry = retry_count,
                        max_retry = self.options.max_retries,
                        error = %e,
                        "range request failed, retrying"
                    );
                    tokio::time::sleep(self.options.backoff_for(retry_count)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&self) {
        let mut guard = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            debug!(url = %self.url, "released connection pool");
        }
    }
}

async fn probe(client: &Client, url: &str, options: &FetchOptions) -> Result<u64> {
    match probe_head(client, url).await {
        Ok(Some(size)) => return Ok(size),
        Ok(None) => debug!(%url, "HEAD did not confirm range support, trying a ranged GET"),
        Err(e) => debug!(%url, error = %e, "HEAD failed, trying a ranged GET"),
    }

    let mut retry_count = 0;
    loop {
        match probe_ranged_get(client, url).await {
            Err(e) if e.is_retryable() && retry_count < options.max_retries => {
                retry_count += 1;
                warn!(%url, retry = retry_count, error = %e, "capability probe failed, retrying");
                tokio::time::sleep(options.backoff_for(retry_count)).await;
            }
            result => return result,
        }
    }
}

/// `Ok(None)` means HEAD was answered but did not establish range support.
async fn probe_head(client: &Client, url: &str) -> Result<Option<u64>> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        return Ok(None);
    }

    let accepts_bytes = resp
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim() == "bytes"));

    let size = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    Ok(size.filter(|_| accepts_bytes))
}

async fn probe_ranged_get(client: &Client, url: &str) -> Result<u64> {
    let resp = client.get(url).header(RANGE, "bytes=0-0").send().await?;
    let content_range = resp
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match resp.status() {
        StatusCode::PARTIAL_CONTENT | StatusCode::RANGE_NOT_SATISFIABLE => content_range
            .as_deref()
            .and_then(content_range_total)
            .ok_or_else(|| {
                Error::RangeUnsupported("range response did not report a total length".into())
            }),
        StatusCode::OK => Err(Error::RangeUnsupported(
            "server ignored the Range header".into(),
        )),
        status => Err(Error::network(format!(
            "unexpected status {status} from capability probe"
        ))),
    }
}

/// A parsed `Content-Range` value such as `bytes 0-9/1234` or `bytes */0`.
#[derive(Debug, PartialEq, Eq)]
struct ContentRange {
    /// Inclusive first and last byte; `None` for `*`.
    span: Option<(u64, u64)>,
    /// Complete length; `None` for `*`.
    total: Option<u64>,
}

impl ContentRange {
    fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;
        let span = match span.trim() {
            "*" => None,
            span => {
                let (first, last) = span.split_once('-')?;
                let first: u64 = first.trim().parse().ok()?;
                let last: u64 = last.trim().parse().ok()?;
                if first > last {
                    return None;
                }
                Some((first, last))
            }
        };
        let total = match total.trim() {
            "*" => None,
            total => Some(total.parse().ok()?),
        };
        Some(Self { span, total })
    }
}

/// Total length from a `Content-Range` value.
fn content_range_total(value: &str) -> Option<u64> {
    ContentRange::parse(value)?.total
}
