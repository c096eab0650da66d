//! Transfer core of the Chomikuj file-host client.
//!
//! - [`RangeFetcher`] / [`StreamingRangeFetcher`]: seekable remote files
//!   on top of HTTP range requests.
//! - [`Uploader`]: resumable chunked multipart upload with server-side
//!   checkpoints.
//! - [`Downloader`]: resumable streamed download into any `AsyncWrite`.
//!
//! Every component takes an explicit `reqwest::Client`; build one with
//! [`TransferConfig::build_client`]. Pausing is cooperative and only takes
//! effect between chunks.

mod batch;
mod checksum;
mod chunked;
mod config;
mod control;
mod download;
mod error;
mod headers;
mod partial;
mod progress;
mod range;
mod response;
mod retry;
mod stream;
mod types;
mod upload;

#[cfg(test)]
mod test_support;

pub use batch::{HashOptions, HashReport, hash_many};
pub use checksum::{checksum_bytes, checksum_remote};
pub use chunked::{Chunk, ChunkReader, Rechunker};
pub use config::TransferConfig;
pub use control::{UploadToken, UploadTokenSource, resolve_target};
pub use download::Downloader;
pub use error::TransferError;
pub use headers::{name_from_url, parse_disposition_filename};
pub use partial::{ByteSource, PartialView, total_len};
pub use progress::{ProgressLine, SpeedCalculator, format_size};
pub use range::RangeFetcher;
pub use response::{IngestReply, parse_checkpoint_reply, parse_upload_reply};
pub use retry::{Attempts, RetryPolicy};
pub use stream::StreamingRangeFetcher;
pub use types::{
    Direction, PauseHandle, Progress, ProgressCallback, TransferOutcome, TransferState,
    TransferTarget,
};
pub use upload::Uploader;

/// Default chunk size: 64 KiB.
///
/// Progress callbacks and pause checks happen once per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
