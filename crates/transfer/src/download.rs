//! Resumable streamed download into a caller-owned sink.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::Rechunker;
use crate::config::TransferConfig;
use crate::headers::{content_length, disposition_filename, name_from_url};
use crate::types::{
    ChunkStep, Direction, PauseHandle, Progress, ProgressCallback, TransferOutcome, TransferState,
    notify,
};

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Downloads one URL into `W`, pausable at chunk boundaries.
///
/// Only one response is open at a time. `resume` reopens the GET with
/// `Range: bytes=<downloaded>-` and keeps appending to the same sink.
pub struct Downloader<W> {
    client: Client,
    url: String,
    name: String,
    sink: W,
    /// Size announced by the server, if any.
    size: Option<u64>,
    state: TransferState,
    pause: PauseHandle,
    callback: Option<ProgressCallback>,
    chunk_size: usize,
}

impl<W: AsyncWrite + Unpin + Send> Downloader<W> {
    /// Looks up the download size and name with a `HEAD` request.
    pub async fn new(
        client: Client,
        url: impl Into<String>,
        sink: W,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        let url = url.into();
        let head = client.head(&url).send().await?;
        if !head.status().is_success() {
            return Err(TransferError::DownloadRejected {
                status: head.status().as_u16(),
                message: None,
            });
        }
        let size = content_length(head.headers());
        let name = disposition_filename(head.headers()).unwrap_or_else(|| name_from_url(&url));
        debug!(url = %url, ?size, name = %name, "download prepared");

        Ok(Self {
            client,
            url,
            name,
            sink,
            size,
            state: TransferState::new(size.unwrap_or(0)),
            pause: PauseHandle::default(),
            callback: None,
            chunk_size: config.chunk_size,
        })
    }

    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&Progress<'_>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Requests a pause; checked before each chunk is read.
    pub fn pause(&self) {
        if self.state.started && !self.state.finished {
            self.pause.pause();
        }
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Display name from `Content-Disposition` or the URL.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Size announced by the server; filled in on completion when unknown.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Gives the sink back to the caller.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Swaps the sink, e.g. once the output file is chosen from [`name`].
    ///
    /// Only allowed before `start`.
    ///
    /// [`name`]: Downloader::name
    pub fn with_sink<V>(self, sink: V) -> Result<Downloader<V>, TransferError>
    where
        V: AsyncWrite + Unpin + Send,
    {
        if self.state.started {
            return Err(TransferError::InvalidState("download already started"));
        }
        Ok(Downloader {
            client: self.client,
            url: self.url,
            name: self.name,
            sink,
            size: self.size,
            state: self.state,
            pause: self.pause,
            callback: self.callback,
            chunk_size: self.chunk_size,
        })
    }

    /// Opens an unranged GET and streams it into the sink.
    ///
    /// Returns the number of bytes downloaded, or
    /// [`TransferOutcome::Paused`]. A non-success status yields
    /// [`TransferError::DownloadRejected`] with the download still marked as
    /// started.
    pub async fn start(&mut self) -> Result<TransferOutcome<u64>, TransferError> {
        if self.state.finished {
            return Err(TransferError::InvalidState("download already finished"));
        }
        if self.state.started {
            return Err(TransferError::InvalidState("download already started"));
        }
        self.state.started = true;
        info!(name = %self.name, size = ?self.size, "starting download");
        let resp = self.client.get(&self.url).send().await?;
        self.run(resp).await
    }

    /// Reopens the download at the bytes already written.
    pub async fn resume(&mut self) -> Result<TransferOutcome<u64>, TransferError> {
        if self.state.finished {
            return Err(TransferError::InvalidState("download already finished"));
        }
        if !self.state.started {
            return Err(TransferError::InvalidState("download not started"));
        }
        self.pause.clear();
        self.state.paused = false;
        let offset = self.state.bytes_transferred;
        info!(name = %self.name, offset, "resuming download");
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-"))
            .send()
            .await?;
        if offset > 0 && resp.status() == StatusCode::OK {
            return Err(TransferError::Protocol(format!(
                "server ignored range request at offset {offset}"
            )));
        }
        self.run(resp).await
    }

    async fn run(&mut self, resp: Response) -> Result<TransferOutcome<u64>, TransferError> {
        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            let message = resp
                .text()
                .await
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            info!(name = %self.name, %status, "download rejected");
            return Err(TransferError::DownloadRejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: BodyStream = Box::pin(resp.bytes_stream());
        let mut chunks = Rechunker::new(body, self.chunk_size);
        loop {
            if self.pause.is_paused() && !self.is_complete() {
                return self.paused().await;
            }
            let data = match chunks.next_chunk().await {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => {
                    // Everything written so far stays valid for resume().
                    self.sink.flush().await?;
                    warn!(name = %self.name, bytes = self.state.bytes_transferred, error = %e, "download interrupted");
                    return Err(e.into());
                }
            };
            self.sink.write_all(&data).await?;
            let end = self.state.bytes_transferred + data.len() as u64;
            self.state.advance_to(end);
            let step = notify(
                &mut self.callback,
                &self.name,
                Direction::Download,
                &self.state,
                &self.pause,
            );
            if step == ChunkStep::Pause && !self.is_complete() {
                return self.paused().await;
            }
        }

        self.sink.flush().await?;
        let received = self.state.bytes_transferred;
        match self.size {
            Some(size) if size != received => {
                return Err(TransferError::Protocol(format!(
                    "download ended after {received} of {size} bytes"
                )));
            }
            Some(_) => {}
            None => {
                self.size = Some(received);
                self.state.total_size = received;
            }
        }
        self.state.finish();
        self.pause.clear();
        info!(name = %self.name, bytes = received, "download finished");
        Ok(TransferOutcome::Finished(received))
    }

    async fn paused(&mut self) -> Result<TransferOutcome<u64>, TransferError> {
        self.sink.flush().await?;
        self.state.paused = true;
        info!(name = %self.name, bytes = self.state.bytes_transferred, "download paused");
        Ok(TransferOutcome::Paused)
    }

    /// All announced bytes are in the sink; a pause would only force a
    /// pointless empty range request.
    fn is_complete(&self) -> bool {
        self.size
            .is_some_and(|size| self.state.bytes_transferred >= size)
    }
}

impl<W> std::fmt::Debug for Downloader<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
