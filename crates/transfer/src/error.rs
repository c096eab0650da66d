//! Transfer error types.

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("resource does not support seeking")]
    NotSeekable,

    #[error("seek to negative position {0}")]
    InvalidSeek(i64),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("upload rejected (code {code}){}", fmt_message(.message))]
    UploadRejected {
        code: String,
        message: Option<String>,
    },

    #[error("download rejected (HTTP {status}){}", fmt_message(.message))]
    DownloadRejected {
        status: u16,
        message: Option<String>,
    },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl TransferError {
    /// Returns `true` for failures worth retrying from a fresh checkpoint.
    ///
    /// Rejections and protocol errors need caller intervention and are
    /// never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Transport(_) | TransferError::Status { .. } | TransferError::Io(_)
        )
    }
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl From<quick_xml::events::attributes::AttrError> for TransferError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        TransferError::Xml(quick_xml::Error::InvalidAttr(e))
    }
}
