//! Seam to the account control API that hands out upload tokens.
//!
//! The control API itself lives outside this crate; anything able to hand
//! out `{key, timestamp, server}` for a folder can drive an [`Uploader`].
//!
//! [`Uploader`]: crate::Uploader

use std::future::Future;
use std::pin::Pin;

use crate::TransferError;
use crate::types::TransferTarget;

/// Opaque upload authorization for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    pub key: String,
    pub timestamp: String,
    /// Ingest server, `host[:port]`.
    pub server: String,
}

/// Source of upload tokens, implemented by the control API client.
pub trait UploadTokenSource: Send + Sync {
    /// Requests a token for uploading `file_name` into `folder_id`.
    fn upload_token<'a>(
        &'a self,
        folder_id: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadToken, TransferError>> + Send + 'a>>;

    /// Extra form fields forwarded verbatim with every upload request.
    fn extra_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Resolves a token and builds the matching upload target.
pub async fn resolve_target<T: UploadTokenSource + ?Sized>(
    tokens: &T,
    folder_id: &str,
    file_name: &str,
) -> Result<TransferTarget, TransferError> {
    let token = tokens.upload_token(folder_id, file_name).await?;
    tracing::debug!(server = %token.server, folder_id, file_name, "got upload token");
    Ok(tokens
        .extra_fields()
        .iter()
        .fold(
            TransferTarget::upload(&token.server, &token.key, &token.timestamp),
            |target, (name, value)| target.with_field(name, value),
        ))
}
