//! Hashing many remote files with a bounded worker pool.
//!
//! Each URL gets its own [`RangeFetcher`]. A failed URL goes back to the
//! end of the queue until it has failed `max_errors_per_url` times.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::checksum::checksum_remote;
use crate::range::RangeFetcher;
use crate::retry::RetryPolicy;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Tunables for [`hash_many`].
#[derive(Debug, Clone)]
pub struct HashOptions {
    /// Concurrent hashing tasks.
    pub workers: usize,
    /// Bytes per range read.
    pub chunk_size: usize,
    /// Failures after which a URL is given up.
    pub max_errors_per_url: u32,
    /// Retry policy for each single range request.
    pub retry: RetryPolicy,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_errors_per_url: 5,
            retry: RetryPolicy::disabled(),
        }
    }
}

/// Outcome for one URL: hex SHA-256 or the last error.
#[derive(Debug)]
pub struct HashReport {
    pub url: String,
    pub result: Result<String, TransferError>,
}

/// Hashes every URL; reports come back in input order.
pub async fn hash_many(
    client: &Client,
    urls: &[String],
    options: &HashOptions,
) -> Vec<HashReport> {
    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut errors = vec![0u32; urls.len()];
    let mut results: Vec<Option<Result<String, TransferError>>> =
        urls.iter().map(|_| None).collect();

    for (index, url) in urls.iter().enumerate() {
        spawn_hash(&mut tasks, &semaphore, client, index, url, options);
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "hash task failed");
                continue;
            }
        };
        let url = &urls[index];
        match result {
            Ok(hash) => {
                debug!(url = %url, %hash, "hashed");
                results[index] = Some(Ok(hash));
            }
            Err(e) => {
                errors[index] += 1;
                if errors[index] < options.max_errors_per_url {
                    warn!(url = %url, error = %e, failures = errors[index], "hash failed, requeueing");
                    spawn_hash(&mut tasks, &semaphore, client, index, url, options);
                } else {
                    warn!(url = %url, error = %e, failures = errors[index], "giving up");
                    results[index] = Some(Err(e));
                }
            }
        }
    }

    urls.iter()
        .zip(results)
        .map(|(url, result)| HashReport {
            url: url.clone(),
            result: result
                .unwrap_or_else(|| Err(TransferError::Protocol("hash task aborted".into()))),
        })
        .collect()
}

fn spawn_hash(
    tasks: &mut JoinSet<(usize, Result<String, TransferError>)>,
    semaphore: &Arc<Semaphore>,
    client: &Client,
    index: usize,
    url: &str,
    options: &HashOptions,
) {
    let semaphore = Arc::clone(semaphore);
    let client = client.clone();
    let url = url.to_string();
    let retry = options.retry.clone();
    let chunk_size = options.chunk_size;
    tasks.spawn(async move {
        let _permit = semaphore.acquire_owned().await.ok();
        let result = async {
            let mut fetcher = RangeFetcher::open(client, url, None, retry).await?;
            checksum_remote(&mut fetcher, chunk_size).await
        }
        .await;
        (index, result)
    });
}
