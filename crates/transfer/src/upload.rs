//! Resumable multipart upload to a Chomikuj ingest server.
//!
//! The whole source goes out as one multipart POST. Chunks are handed to
//! the request task through a channel of capacity 1, so the progress
//! callback for chunk N runs before chunk N+1 is read. Resuming asks the
//! server how many bytes it already holds and sends only the rest.

use std::io;

use bytes::Bytes;
use futures_util::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::ChunkReader;
use crate::config::TransferConfig;
use crate::control::{UploadTokenSource, resolve_target};
use crate::partial::{ByteSource, PartialView, total_len};
use crate::response::{parse_checkpoint_reply, parse_upload_reply};
use crate::retry::RetryPolicy;
use crate::types::{
    ChunkStep, Direction, PauseHandle, Progress, ProgressCallback, TransferOutcome, TransferState,
    TransferTarget, notify,
};

/// Uploads one [`ByteSource`] to a [`TransferTarget`].
///
/// Lifecycle: created, started, paused and resumed any number of times,
/// then finished. A failed upload (retries exhausted or rejected) may be
/// resumed by the caller.
pub struct Uploader<S> {
    client: Client,
    target: TransferTarget,
    name: String,
    source: S,
    state: TransferState,
    pause: PauseHandle,
    callback: Option<ProgressCallback>,
    chunk_size: usize,
    client_id: String,
    locale: String,
    retry: RetryPolicy,
}

impl<S: ByteSource> Uploader<S> {
    /// Creates an uploader; the source length is measured here.
    pub async fn new(
        client: Client,
        target: TransferTarget,
        name: impl Into<String>,
        mut source: S,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        let total = total_len(&mut source).await?;
        Ok(Self {
            client,
            target,
            name: name.into(),
            source,
            state: TransferState::new(total),
            pause: PauseHandle::default(),
            callback: None,
            chunk_size: config.chunk_size,
            client_id: config.client_id.clone(),
            locale: config.locale.clone(),
            retry: config.upload_retry(),
        })
    }

    /// Asks `tokens` for an upload token and builds the uploader from it.
    pub async fn from_token_source<T: UploadTokenSource + ?Sized>(
        client: Client,
        tokens: &T,
        folder_id: &str,
        name: impl Into<String>,
        source: S,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        let name = name.into();
        let target = resolve_target(tokens, folder_id, &name).await?;
        Self::new(client, target, name, source, config).await
    }

    /// Installs the callback invoked after every chunk.
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&Progress<'_>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Handle for pausing from another task.
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Requests a pause at the next chunk boundary.
    ///
    /// No effect before `start` or after the upload finished.
    pub fn pause(&self) {
        if self.state.started && !self.state.finished {
            self.pause.pause();
        }
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &TransferTarget {
        &self.target
    }

    /// Gives the source back to the caller.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Uploads the whole source.
    ///
    /// Returns the server-assigned file id, or [`TransferOutcome::Paused`]
    /// when a pause was observed at a chunk boundary.
    pub async fn start(&mut self) -> Result<TransferOutcome<u64>, TransferError> {
        if self.state.finished {
            return Err(TransferError::InvalidState("upload already finished"));
        }
        if self.state.started {
            return Err(TransferError::InvalidState("upload already started"));
        }
        self.state.started = true;
        info!(name = %self.name, size = self.state.total_size, server = %self.target.server(), "starting upload");
        self.drive(false).await
    }

    /// Continues from the server's checkpoint.
    pub async fn resume(&mut self) -> Result<TransferOutcome<u64>, TransferError> {
        if self.state.finished {
            return Err(TransferError::InvalidState("upload already finished"));
        }
        if !self.state.started {
            return Err(TransferError::InvalidState("upload not started"));
        }
        self.pause.clear();
        self.state.paused = false;
        self.state.failed = false;
        info!(name = %self.name, "resuming upload");
        self.drive(true).await
    }

    /// Runs attempts until one finishes, pauses or fails for good.
    ///
    /// Every retry re-queries the checkpoint first.
    async fn drive(
        &mut self,
        mut from_checkpoint: bool,
    ) -> Result<TransferOutcome<u64>, TransferError> {
        let mut retries = 0u32;
        loop {
            let result = match self.checkpoint(from_checkpoint).await {
                Ok(offset) => self.attempt(offset, from_checkpoint).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(TransferOutcome::Finished(file_id)) => {
                    self.state.finish();
                    self.pause.clear();
                    info!(name = %self.name, file_id, "upload finished");
                    return Ok(TransferOutcome::Finished(file_id));
                }
                Ok(TransferOutcome::Paused) => {
                    self.state.paused = true;
                    info!(name = %self.name, bytes = self.state.bytes_transferred, "upload paused");
                    return Ok(TransferOutcome::Paused);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(name = %self.name, error = %e, attempt = retries, ?delay, "upload attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    from_checkpoint = true;
                }
                Err(e) => {
                    warn!(name = %self.name, error = %e, "upload failed");
                    self.state.failed = true;
                    return Err(e);
                }
            }
        }
    }

    async fn checkpoint(&mut self, query: bool) -> Result<u64, TransferError> {
        if !query {
            return Ok(0);
        }
        let offset = query_checkpoint(&self.client, &self.target).await?;
        debug!(name = %self.name, offset, "resume checkpoint");
        if offset > self.state.total_size {
            return Err(TransferError::Protocol(format!(
                "checkpoint {offset} beyond source length {}",
                self.state.total_size
            )));
        }
        Ok(offset)
    }

    /// Sends `[offset, total)` as one multipart request.
    async fn attempt(
        &mut self,
        offset: u64,
        resuming: bool,
    ) -> Result<TransferOutcome<u64>, TransferError> {
        let total = self.state.total_size;
        let remaining = total.saturating_sub(offset);

        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(1);
        let body = Body::wrap_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let form = self.form(offset, resuming, body, remaining)?;
        let request = self.client.post(self.target.url()).multipart(form);
        let url = self.target.url().to_string();
        debug!(name = %self.name, offset, remaining, "sending upload request");

        let view = PartialView::new(&mut self.source, offset).await?;
        let mut reader = ChunkReader::new(view, self.chunk_size);

        let task = tokio::spawn(async move {
            let resp = request.send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            Ok::<(StatusCode, String), reqwest::Error>((status, text))
        });

        loop {
            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    task.abort();
                    return Err(e);
                }
            };
            let end = offset + chunk.offset + chunk.data.len() as u64;
            if tx.send(Ok(chunk.data)).await.is_err() {
                // The request ended early; its own result explains why.
                break;
            }
            self.state.advance_to(end);
            let step = notify(
                &mut self.callback,
                &self.name,
                Direction::Upload,
                &self.state,
                &self.pause,
            );
            if step == ChunkStep::Pause && end < total {
                task.abort();
                return Ok(TransferOutcome::Paused);
            }
        }
        drop(tx);

        let (status, text) = match task.await {
            Ok(result) => result?,
            Err(e) => return Err(TransferError::Protocol(format!("upload task failed: {e}"))),
        };
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                url,
            });
        }
        parse_upload_reply(&text).map(TransferOutcome::Finished)
    }

    fn form(
        &self,
        offset: u64,
        resuming: bool,
        body: Body,
        remaining: u64,
    ) -> Result<Form, TransferError> {
        let mut form = self
            .target
            .extra_fields()
            .iter()
            .fold(Form::new(), |form, (k, v)| form.text(k.clone(), v.clone()))
            .text("key", self.target.upload_key().to_string())
            .text("time", self.target.timestamp().to_string())
            .text("client", self.client_id.clone())
            .text("locale", self.locale.clone());
        if resuming {
            form = form.text("resume_from", offset.to_string());
        }
        let file = Part::stream_with_length(body, remaining)
            .file_name(self.name.clone())
            .mime_str("application/octet-stream")?;
        Ok(form.part("file", file))
    }
}

/// Asks the ingest server how many bytes of this upload it already holds.
async fn query_checkpoint(client: &Client, target: &TransferTarget) -> Result<u64, TransferError> {
    let url = target.checkpoint_url();
    let resp = client
        .get(&url)
        .query(&[("key", target.upload_key())])
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status {
            status: status.as_u16(),
            url,
        });
    }
    parse_checkpoint_reply(&resp.text().await?)
}

impl<S> std::fmt::Debug for Uploader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
