//! Remote file reader that keeps one response open across reads.

use std::io::SeekFrom;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::debug;

use crate::TransferError;
use crate::headers::{content_length, disposition_filename};
use crate::range::{resolve_seek, send_with_retry};
use crate::retry::RetryPolicy;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Pulls bytes from a response body, keeping the unread tail of the last
/// network frame.
///
/// A body that fails midway leaves the reader broken: bytes collected
/// before the failure are still returned, every later read is an error.
pub(crate) struct BodyReader {
    stream: ByteStream,
    leftover: Bytes,
    exhausted: bool,
    broken: bool,
    /// Failure hit after some bytes were collected; reported by the next read.
    pending: Option<TransferError>,
}

impl BodyReader {
    pub(crate) fn new(response: Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            leftover: Bytes::new(),
            exhausted: false,
            broken: false,
            pending: None,
        }
    }

    /// Reads up to `limit` bytes, or everything that is left for `None`.
    pub(crate) async fn read(&mut self, limit: Option<usize>) -> Result<Bytes, TransferError> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        if self.broken {
            return Err(TransferError::Protocol(
                "response body ended before its declared length".into(),
            ));
        }
        let mut out = BytesMut::new();
        loop {
            if !self.leftover.is_empty() {
                let room = limit.map_or(usize::MAX, |l| l - out.len());
                let take = room.min(self.leftover.len());
                out.extend_from_slice(&self.leftover.split_to(take));
            }
            if self.exhausted || limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            match self.stream.next().await {
                Some(Ok(frame)) => self.leftover = frame,
                Some(Err(e)) => {
                    self.broken = true;
                    if out.is_empty() {
                        return Err(e.into());
                    }
                    self.pending = Some(e.into());
                    break;
                }
                None => self.exhausted = true,
            }
        }
        Ok(out.freeze())
    }

    /// Discards the next `n` bytes; returns how many were actually skipped.
    pub(crate) async fn skip(&mut self, n: u64) -> Result<u64, TransferError> {
        let mut skipped = 0;
        while skipped < n {
            let step = (n - skipped).min(64 * 1024) as usize;
            let got = self.read(Some(step)).await?;
            if got.is_empty() {
                break;
            }
            skipped += got.len() as u64;
        }
        Ok(skipped)
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Seekable remote file serving sequential reads from a single GET.
///
/// The response is opened lazily at the cursor and reused while reads stay
/// sequential. Seeking away from the stream's cursor drops it; the next read
/// reopens at the new position.
pub struct StreamingRangeFetcher {
    client: Client,
    url: String,
    name: Option<String>,
    len: Option<u64>,
    seekable: bool,
    position: u64,
    retry: RetryPolicy,
    stream: Option<BodyReader>,
    /// Absolute offset of the open stream's next byte.
    stream_pos: u64,
}

impl StreamingRangeFetcher {
    /// Probes `url` with `HEAD` and `Range: bytes=0-`.
    ///
    /// Seekable iff the answer is `206` with a `Content-Range` header and
    /// the total length is known.
    pub async fn open(
        client: Client,
        url: impl Into<String>,
        name: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, TransferError> {
        let url = url.into();
        let head = send_with_retry(&client, Method::HEAD, &url, Some("bytes=0-"), &retry).await?;
        let content_range = head
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let partial = head.status() == StatusCode::PARTIAL_CONTENT && content_range.is_some();
        let len = content_range
            .as_deref()
            .and_then(content_range_total)
            .or_else(|| content_length(head.headers()));
        let seekable = partial && len.is_some();
        let name = name.or_else(|| disposition_filename(head.headers()));
        debug!(url = %url, ?len, seekable, "opened streaming remote file");

        Ok(Self {
            client,
            url,
            name,
            len,
            seekable,
            position: 0,
            retry,
            stream: None,
            stream_pos: 0,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, TransferError> {
        if !self.seekable {
            return Err(TransferError::NotSeekable);
        }
        self.position = resolve_seek(pos, self.position, self.len)?;
        if self.stream.is_some() && self.position != self.stream_pos {
            debug!(url = %self.url, from = self.stream_pos, to = self.position, "dropping stream after seek");
            self.stream = None;
        }
        Ok(self.position)
    }

    pub async fn read(&mut self, amount: usize) -> Result<Bytes, TransferError> {
        self.read_inner(Some(amount)).await
    }

    pub async fn read_all(&mut self) -> Result<Bytes, TransferError> {
        self.read_inner(None).await
    }

    async fn read_inner(&mut self, amount: Option<usize>) -> Result<Bytes, TransferError> {
        if amount == Some(0) || self.len.is_some_and(|len| self.position >= len) {
            return Ok(Bytes::new());
        }
        if self.stream.is_none() {
            self.open_stream().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Bytes::new());
        };
        match stream.read(amount).await {
            Ok(data) => {
                self.position += data.len() as u64;
                self.stream_pos = self.position;
                Ok(data)
            }
            Err(e) => {
                // A seekable handle reopens at the cursor on the next read.
                if self.seekable && stream.is_broken() {
                    debug!(url = %self.url, position = self.position, error = %e, "dropping broken stream");
                    self.stream = None;
                }
                Err(e)
            }
        }
    }

    async fn open_stream(&mut self) -> Result<(), TransferError> {
        let range = self.seekable.then(|| format!("bytes={}-", self.position));
        debug!(url = %self.url, range = ?range, "opening stream");
        let resp = send_with_retry(
            &self.client,
            Method::GET,
            &self.url,
            range.as_deref(),
            &self.retry,
        )
        .await?;
        if range.is_some() && self.position > 0 && resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(TransferError::Protocol(format!(
                "server ignored range request at offset {}",
                self.position
            )));
        }
        self.stream = Some(BodyReader::new(resp));
        self.stream_pos = self.position;
        Ok(())
    }
}

impl std::fmt::Debug for StreamingRangeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRangeFetcher")
            .field("url", &self.url)
            .field("len", &self.len)
            .field("seekable", &self.seekable)
            .field("position", &self.position)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

/// Total length from `bytes a-b/total`; `*` means unknown.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
