//! HTTP data stream for remote file content.
//!
//! This module streams a response body sequentially, in archive order.
//! The URL is produced by a callable evaluated at `open()` time, so a
//! freshly signed URL can be minted at the moment the entry is actually
//! read rather than when the entry list was built.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use reqwest::Client;

use super::DataStream;

/// Callable producing the URL to fetch, evaluated when reading begins.
pub type UrlFactory = Box<dyn Fn() -> String + Send + Sync>;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Data stream over an HTTP response body.
///
/// ## Requirements
///
/// The remote server must answer the GET with a success status; the body
/// is then consumed front to back. There are no retries: a mid-body
/// failure would leave the archive position ambiguous, so the error is
/// surfaced to the consumer instead.
///
/// ## Example
///
/// ```no_run
/// use livezip::HttpStream;
///
/// let stream = HttpStream::new(Box::new(|| {
///     format!("https://cdn.example.com/asset.bin?expires={}", 1_700_000_000)
/// }));
/// ```
pub struct HttpStream {
    /// Produces the URL at `open()` time
    url: UrlFactory,
    /// In-flight response body, present between `open` and `close`
    body: Option<BodyStream>,
    /// Bytes received from the body but not yet handed to `read`
    pending: Bytes,
}

impl HttpStream {
    pub fn new(url: UrlFactory) -> Self {
        Self {
            url,
            body: None,
            pending: Bytes::new(),
        }
    }
}

#[async_trait]
impl DataStream for HttpStream {
    /// Resolve the URL, send the GET, and verify the response status.
    async fn open(&mut self) -> Result<()> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let url = (self.url)();
        let resp = client.get(&url).send().await?;

        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        self.body = Some(Box::pin(resp.bytes_stream()));
        self.pending = Bytes::new();
        Ok(())
    }

    /// Hand out up to `max` bytes of the body, pulling the next network
    /// chunk only when the previous one is exhausted.
    async fn read(&mut self, max: usize) -> Result<Bytes> {
        let Some(body) = self.body.as_mut() else {
            bail!("HTTP stream is not open");
        };

        while self.pending.is_empty() {
            match body.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(Bytes::new()),
            }
        }

        let take = self.pending.len().min(max);
        Ok(self.pending.split_to(take))
    }

    async fn close(&mut self) -> Result<()> {
        self.body = None;
        self.pending = Bytes::new();
        Ok(())
    }
}
