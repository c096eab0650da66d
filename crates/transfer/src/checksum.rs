use sha2::{Digest, Sha256};

use crate::range::RangeFetcher;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of a remote file from the fetcher's cursor to the end.
///
/// Reads at most `chunk_size` bytes per request, so the file is never held
/// in memory. If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
pub async fn checksum_remote(
    fetcher: &mut RangeFetcher,
    chunk_size: usize,
) -> Result<String, TransferError> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut hasher = Sha256::new();
    loop {
        let block = fetcher.read(chunk_size).await?;
        if block.is_empty() {
            break;
        }
        hasher.update(&block);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_support::{FileHost, MockServer, payload};

    #[test]
    fn checksum_bytes_known_value() {
        // SHA-256 of "hello"
        assert_eq!(
            checksum_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn remote_checksum_matches_local() {
        let data = payload(10_000);
        let server = MockServer::start(FileHost::new(data.clone())).await;
        let mut f = RangeFetcher::open(
            reqwest::Client::new(),
            server.url("/f"),
            None,
            RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(
            checksum_remote(&mut f, 3000).await.unwrap(),
            checksum_bytes(&data)
        );
        // 4 range reads; the EOF check needs no request.
        assert_eq!(server.requests_with_method("GET").len(), 4);
    }

    #[tokio::test]
    async fn remote_checksum_of_unseekable_file() {
        let data = payload(5_000);
        let mut host = FileHost::new(data.clone());
        host.ranges = false;
        let server = MockServer::start(host).await;
        let mut f = RangeFetcher::open(
            reqwest::Client::new(),
            server.url("/f"),
            None,
            RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(
            checksum_remote(&mut f, 1024).await.unwrap(),
            checksum_bytes(&data)
        );
    }
}
