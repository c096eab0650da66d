use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A chunk of transfer data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the reader's own frame.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Bytes,
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a source in fixed-size chunks.
///
/// Every chunk except the last is exactly `chunk_size` bytes, even when the
/// underlying reader returns short reads.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    offset: u64,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wraps `reader`. If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
        }
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let chunk = Chunk {
            offset: self.offset,
            data: buf.freeze(),
        };
        self.offset += filled as u64;
        Ok(Some(chunk))
    }

    /// Bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

// ---------------------------------------------------------------------------
// Rechunker
// ---------------------------------------------------------------------------

/// Regroups a byte stream with arbitrary frame sizes into fixed-size chunks.
pub struct Rechunker<St> {
    stream: St,
    chunk_size: usize,
    pending: BytesMut,
    done: bool,
}

impl<St, E> Rechunker<St>
where
    St: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(stream: St, chunk_size: usize) -> Self {
        Self {
            stream,
            chunk_size: effective_chunk_size(chunk_size),
            pending: BytesMut::new(),
            done: false,
        }
    }

    /// Returns the next full chunk, or the remainder once the stream ends.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, E> {
        while !self.done && self.pending.len() < self.chunk_size {
            match self.stream.next().await {
                Some(frame) => self.pending.extend_from_slice(&frame?),
                None => self.done = true,
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.pending.len().min(self.chunk_size);
        Ok(Some(self.pending.split_to(take).freeze()))
    }
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}
