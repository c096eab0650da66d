//! Byte sources and offset windows over them.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

/// A caller-owned, seekable, readable sequence of bytes.
///
/// The transfer core reads from it and seeks it, never writes to it.
pub trait ByteSource: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send + ?Sized> ByteSource for T {}

/// Measures a source by seeking to its end, then restores the position.
pub async fn total_len<S: ByteSource + ?Sized>(source: &mut S) -> io::Result<u64> {
    let current = source.stream_position().await?;
    let len = source.seek(SeekFrom::End(0)).await?;
    source.seek(SeekFrom::Start(current)).await?;
    Ok(len)
}

/// Read-only window over a source, starting at byte `start`.
///
/// Positions are expressed relative to `start`: `SeekFrom::Start(n)` lands
/// on `start + n` of the underlying source. Relative and end seeks pass
/// through unchanged.
pub struct PartialView<'a, S: ?Sized> {
    inner: &'a mut S,
    start: u64,
    len: u64,
}

impl<'a, S: ByteSource + ?Sized> PartialView<'a, S> {
    /// Creates the view and positions it at its own offset 0.
    pub async fn new(inner: &'a mut S, start: u64) -> io::Result<Self> {
        let total = total_len(inner).await?;
        if start > total {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("view start {start} beyond source length {total}"),
            ));
        }
        inner.seek(SeekFrom::Start(start)).await?;
        Ok(Self {
            inner,
            start,
            len: total - start,
        })
    }

    /// Offset of the view within the underlying source.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Bytes visible through the view.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<S: ByteSource + ?Sized> AsyncRead for PartialView<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut *this.inner).poll_read(cx, buf)
    }
}

impl<S: ByteSource + ?Sized> AsyncSeek for PartialView<'_, S> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let translated = match position {
            SeekFrom::Start(n) => SeekFrom::Start(n.saturating_add(this.start)),
            other => other,
        };
        Pin::new(&mut *this.inner).start_seek(translated)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        match Pin::new(&mut *this.inner).poll_complete(cx) {
            Poll::Ready(Ok(pos)) => Poll::Ready(Ok(pos.saturating_sub(this.start))),
            other => other,
        }
    }
}
