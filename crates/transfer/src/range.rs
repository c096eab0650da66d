//! Seekable view over a remote file using HTTP range requests.
//!
//! Every `read` on a range-capable resource is a fresh ranged GET, so the
//! fetcher never holds more than one read's worth of bytes.

use std::io::SeekFrom;

use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use crate::TransferError;
use crate::headers::{accepts_byte_ranges, content_length, disposition_filename};
use crate::retry::RetryPolicy;
use crate::stream::BodyReader;

/// Byte-oriented, optionally seekable handle on an HTTP resource.
///
/// Seekability is probed once in [`RangeFetcher::open`] and never changes.
/// A handle has a single logical cursor and is not meant to be shared
/// between concurrent readers.
pub struct RangeFetcher {
    client: Client,
    url: String,
    name: Option<String>,
    len: Option<u64>,
    seekable: bool,
    position: u64,
    retry: RetryPolicy,
    /// Unranged body, opened on first read of an unseekable resource.
    sequential: Option<BodyReader>,
}

impl RangeFetcher {
    /// Probes `url` and returns a handle positioned at 0.
    ///
    /// The resource is seekable only if its length is known and the server
    /// either advertises `Accept-Ranges: bytes` or answers a one-byte range
    /// probe with `206 Partial Content`. `name` overrides the file name
    /// from `Content-Disposition`.
    pub async fn open(
        client: Client,
        url: impl Into<String>,
        name: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, TransferError> {
        let url = url.into();
        let head = send_with_retry(&client, Method::HEAD, &url, None, &retry).await?;
        let len = content_length(head.headers());
        let advertised = accepts_byte_ranges(head.headers());
        let name = name.or_else(|| disposition_filename(head.headers()));
        drop(head);

        let seekable = match len {
            None => false,
            Some(_) if advertised => true,
            Some(_) => probe_ranges(&client, &url).await?,
        };
        debug!(url = %url, ?len, seekable, "opened remote file");

        Ok(Self {
            client,
            url,
            name,
            len,
            seekable,
            position: 0,
            retry,
            sequential: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// File name from the caller or from `Content-Disposition`.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Total length, `None` when the server did not report one.
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Current logical position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Moves the cursor without any I/O. Positions past the end are allowed
    /// and read as EOF.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, TransferError> {
        if !self.seekable {
            return Err(TransferError::NotSeekable);
        }
        self.position = resolve_seek(pos, self.position, self.len)?;
        Ok(self.position)
    }

    /// Reads up to `amount` bytes at the cursor.
    ///
    /// Returns fewer bytes near the end and an empty buffer at EOF.
    pub async fn read(&mut self, amount: usize) -> Result<Bytes, TransferError> {
        self.read_inner(Some(amount)).await
    }

    /// Reads from the cursor to the end of the resource.
    pub async fn read_all(&mut self) -> Result<Bytes, TransferError> {
        self.read_inner(None).await
    }

    async fn read_inner(&mut self, amount: Option<usize>) -> Result<Bytes, TransferError> {
        let Some(len) = self.len.filter(|_| self.seekable) else {
            return self.read_sequential(amount).await;
        };
        if self.position >= len || amount == Some(0) {
            return Ok(Bytes::new());
        }
        let end = match amount {
            Some(n) => self.position.saturating_add(n as u64 - 1).min(len - 1),
            None => len - 1,
        };

        let range = format!("bytes={}-{}", self.position, end);
        debug!(url = %self.url, %range, "range read");
        let resp = send_with_retry(
            &self.client,
            Method::GET,
            &self.url,
            Some(&range),
            &self.retry,
        )
        .await?;
        let body = if resp.status() == StatusCode::OK {
            debug!(url = %self.url, %range, "range ignored, skipping to cursor");
            let window = usize::try_from(end + 1 - self.position).unwrap_or(usize::MAX);
            let mut reader = BodyReader::new(resp);
            let skipped = reader.skip(self.position).await?;
            if skipped < self.position {
                return Err(TransferError::Protocol(format!(
                    "full body of {skipped} bytes ends before offset {}",
                    self.position
                )));
            }
            reader.read(Some(window)).await?
        } else {
            resp.bytes().await?
        };

        self.position += body.len() as u64;
        Ok(body)
    }

    async fn read_sequential(&mut self, amount: Option<usize>) -> Result<Bytes, TransferError> {
        if self.sequential.is_none() {
            debug!(url = %self.url, "opening sequential stream");
            let resp =
                send_with_retry(&self.client, Method::GET, &self.url, None, &self.retry).await?;
            self.sequential = Some(BodyReader::new(resp));
        }
        let Some(reader) = self.sequential.as_mut() else {
            return Ok(Bytes::new());
        };
        let data = reader.read(amount).await?;
        self.position += data.len() as u64;
        Ok(data)
    }
}

impl std::fmt::Debug for RangeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeFetcher")
            .field("url", &self.url)
            .field("len", &self.len)
            .field("seekable", &self.seekable)
            .field("position", &self.position)
            .finish()
    }
}

/// Computes an absolute cursor from `pos`; negative results are rejected.
pub(crate) fn resolve_seek(
    pos: SeekFrom,
    current: u64,
    len: Option<u64>,
) -> Result<u64, TransferError> {
    let target = match pos {
        SeekFrom::Start(n) => i128::from(n),
        SeekFrom::Current(d) => i128::from(current) + i128::from(d),
        SeekFrom::End(d) => i128::from(len.unwrap_or(0)) + i128::from(d),
    };
    if target < 0 {
        return Err(TransferError::InvalidSeek(
            target.max(i128::from(i64::MIN)) as i64,
        ));
    }
    Ok(target.min(i128::from(u64::MAX)) as u64)
}

/// Sends a request, retrying non-success statuses according to `retry`.
///
/// Only the status of this one request is retried; transport errors
/// propagate immediately.
pub(crate) async fn send_with_retry(
    client: &Client,
    method: Method,
    url: &str,
    range: Option<&str>,
    retry: &RetryPolicy,
) -> Result<Response, TransferError> {
    let mut retries = 0u32;
    loop {
        let mut req = client.request(method.clone(), url);
        if let Some(range) = range {
            req = req.header(RANGE, range);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if !retry.should_retry(retries) {
            return Err(TransferError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        retries += 1;
        let delay = retry.delay_for_attempt(retries);
        warn!(url, %status, attempt = retries, ?delay, "request failed, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// One-byte ranged HEAD; only a `206` answer proves range support.
async fn probe_ranges(client: &Client, url: &str) -> Result<bool, TransferError> {
    let resp = client
        .head(url)
        .header(RANGE, "bytes=0-0")
        .send()
        .await?;
    debug!(url, status = %resp.status(), "range probe");
    Ok(resp.status() == StatusCode::PARTIAL_CONTENT)
}
