use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifies where an upload's bytes go.
///
/// Handed out by the control API; every field is opaque to the transfer
/// core and is only echoed back to the ingest server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    url: String,
    server: String,
    upload_key: String,
    timestamp: String,
    extra_fields: Vec<(String, String)>,
}

impl TransferTarget {
    /// Creates an upload target for the ingest `server` (`host[:port]`).
    pub fn upload(server: &str, upload_key: &str, timestamp: &str) -> Self {
        Self {
            url: format!("http://{server}/file/"),
            server: server.to_string(),
            upload_key: upload_key.to_string(),
            timestamp: timestamp.to_string(),
            extra_fields: Vec::new(),
        }
    }

    /// Adds an opaque form field sent before the standard upload fields.
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.extra_fields.push((name.to_string(), value.to_string()));
        self
    }

    /// Ingest endpoint receiving the multipart POST.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn upload_key(&self) -> &str {
        &self.upload_key
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn extra_fields(&self) -> &[(String, String)] {
        &self.extra_fields
    }

    /// URL of the resume checkpoint query for this upload key.
    pub fn checkpoint_url(&self) -> String {
        format!("http://{}/resume/check/", self.server)
    }
}

/// Lifecycle counters of a single transfer.
///
/// Owned and mutated only by its Uploader/Downloader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    pub(crate) bytes_transferred: u64,
    pub(crate) total_size: u64,
    pub(crate) started: bool,
    pub(crate) paused: bool,
    pub(crate) finished: bool,
    pub(crate) failed: bool,
}

impl TransferState {
    pub(crate) fn new(total_size: u64) -> Self {
        Self {
            total_size,
            ..Default::default()
        }
    }

    /// Bytes accounted so far, as an absolute offset into the source.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// True while the transfer is stopped at a pause, until `resume`.
    ///
    /// A pause that was requested but not yet reached shows up on the
    /// [`PauseHandle`] only.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Advances the counter without ever moving it backwards.
    pub(crate) fn advance_to(&mut self, absolute: u64) {
        self.bytes_transferred = self.bytes_transferred.max(absolute);
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
        self.paused = false;
        self.failed = false;
    }
}

/// Shared cooperative pause flag.
///
/// Cloning yields a handle to the same flag, so another task can request a
/// pause. The flag is only observed at chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of driving a transfer that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome<T> {
    /// The transfer completed.
    Finished(T),
    /// A cooperative pause stopped the transfer at a chunk boundary.
    Paused,
}

impl<T> TransferOutcome<T> {
    pub fn is_paused(&self) -> bool {
        matches!(self, TransferOutcome::Paused)
    }

    /// Returns the completion value, if finished.
    pub fn finished(self) -> Option<T> {
        match self {
            TransferOutcome::Finished(v) => Some(v),
            TransferOutcome::Paused => None,
        }
    }
}

/// Direction of a transfer, as seen by progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// View of a running transfer handed to the progress callback.
///
/// Borrowed from the owning instance for the duration of the callback.
pub struct Progress<'a> {
    name: &'a str,
    direction: Direction,
    state: &'a TransferState,
    pause: &'a PauseHandle,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(
        name: &'a str,
        direction: Direction,
        state: &'a TransferState,
        pause: &'a PauseHandle,
    ) -> Self {
        Self {
            name,
            direction,
            state,
            pause,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.state.bytes_transferred
    }

    pub fn total_size(&self) -> u64 {
        self.state.total_size
    }

    /// Completed fraction in `[0.0, 1.0]`; an empty transfer counts as done.
    pub fn fraction(&self) -> f64 {
        if self.state.total_size == 0 {
            1.0
        } else {
            self.state.bytes_transferred as f64 / self.state.total_size as f64
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Requests a pause; honoured before the next chunk is sent.
    pub fn pause(&self) {
        if !self.state.finished {
            self.pause.pause();
        }
    }
}

/// Callback invoked inline after every chunk.
pub type ProgressCallback = Box<dyn FnMut(&Progress<'_>) + Send>;

/// Returned by a chunk step so the driving loop decides whether to go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkStep {
    Continue,
    Pause,
}

/// Runs the callback (if any) and reports whether a pause was requested.
pub(crate) fn notify(
    callback: &mut Option<ProgressCallback>,
    name: &str,
    direction: Direction,
    state: &TransferState,
    pause: &PauseHandle,
) -> ChunkStep {
    if let Some(cb) = callback.as_mut() {
        cb(&Progress::new(name, direction, state, pause));
    }
    if pause.is_paused() {
        ChunkStep::Pause
    } else {
        ChunkStep::Continue
    }
}
