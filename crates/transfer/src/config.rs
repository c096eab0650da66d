//! Transfer configuration.
//!
//! Stored as TOML; every field is optional and falls back to its default:
//!
//! ```toml
//! chunk_size = 65536
//! upload_attempts = -1      # unlimited
//! retry_delay_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Attempts, RetryPolicy};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Tunables shared by uploads, downloads and range reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per chunk; 0 selects the default.
    pub chunk_size: usize,
    /// Automatic upload retries after transport failures; negative is unlimited.
    pub upload_attempts: i64,
    /// Delay before a retry; negative disables range retries.
    pub retry_delay_ms: i64,
    /// Multiplier applied to the delay for each further retry.
    pub retry_backoff: f64,
    /// Upper bound for the retry delay.
    pub max_retry_delay_ms: u64,
    /// Retry bound for failed range requests; negative is unlimited.
    pub range_attempts: i64,
    /// Value of the `client` form field.
    pub client_id: String,
    /// Value of the `locale` form field.
    pub locale: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_attempts: 3,
            retry_delay_ms: 1000,
            retry_backoff: 2.0,
            max_retry_delay_ms: 30_000,
            range_attempts: -1,
            client_id: "ChomikBox-2.0.8.1".into(),
            locale: "PL".into(),
            user_agent: "Mozilla/5.0".into(),
            connect_timeout_secs: 30,
        }
    }
}

impl TransferConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TransferError> {
        Ok(toml::from_str(content)?)
    }

    /// Builds the HTTP client shared by every transfer component.
    pub fn build_client(&self) -> Result<reqwest::Client, TransferError> {
        Ok(reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()?)
    }

    /// Retry policy for whole upload attempts.
    ///
    /// Uploads always retry when attempts remain; a negative delay only
    /// removes the wait between attempts.
    pub fn upload_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: Attempts::from_signed(self.upload_attempts),
            delay: Some(Duration::from_millis(self.retry_delay_ms.max(0) as u64)),
            backoff_factor: self.retry_backoff,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    /// Retry policy for single range requests; disabled by a negative delay.
    pub fn range_retry(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_factor: self.retry_backoff,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            ..RetryPolicy::from_millis(Attempts::from_signed(self.range_attempts), self.retry_delay_ms)
        }
    }
}
