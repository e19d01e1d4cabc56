//! Object-storage collaborator: trait seam plus the S3 implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// The storage operations the pipeline needs.
///
/// Downloads land in a temp file whose path deletes the file when dropped,
/// so a failed job cannot leak its source copy into the next iteration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches `remote_key` into a local temp file.
    async fn download(&self, remote_key: &str) -> Result<TempPath>;

    /// Uploads the file at `local_path` under `remote_key`.
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()>;
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    tmp_prefix: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, tmp_prefix: String) -> Self {
        Self {
            client,
            bucket,
            tmp_prefix,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn download(&self, remote_key: &str) -> Result<TempPath> {
        debug!(key = %remote_key, bucket = %self.bucket, "downloading source image");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(remote_key)
            .send()
            .await
            .with_context(|| format!("failed to fetch {} from storage", remote_key))?;

        // Keep the original extension so the conversion tool can sniff the
        // source format from the name as well as the content.
        let suffix = Path::new(remote_key)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let (path, bytes) = stream_to_temp(response.body, &self.tmp_prefix, &suffix).await?;

        info!(key = %remote_key, bytes = bytes, local = %path.display(), "downloaded source image");
        Ok(path)
    }

    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("failed to open {} for upload", local_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(remote_key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("failed to upload {} to storage", remote_key))?;

        info!(key = %remote_key, "uploaded thumbnail");
        Ok(())
    }
}

/// Streams a response body into a fresh temp file, chunk by chunk, so large
/// source images never sit fully in memory.
async fn stream_to_temp(mut body: ByteStream, tmp_prefix: &str, suffix: &str) -> Result<(TempPath, u64)> {
    let file = tempfile::Builder::new()
        .prefix(tmp_prefix)
        .suffix(suffix)
        .tempfile()
        .context("failed to allocate download temp file")?;
    let path = file.into_temp_path();

    let mut out = tokio::fs::File::create(&path)
        .await
        .context("failed to open download temp file")?;

    let mut written: u64 = 0;
    while let Some(chunk) = body
        .try_next()
        .await
        .context("failed to read storage response body")?
    {
        written += chunk.len() as u64;
        out.write_all(&chunk)
            .await
            .context("failed to write downloaded image")?;
    }
    out.flush()
        .await
        .context("failed to flush downloaded image")?;

    Ok((path, written))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_to_temp_writes_body_and_keeps_suffix() {
        let body = ByteStream::from_static(b"not really a jpeg");
        let (path, written) = stream_to_temp(body, "thumb-test-", ".jpg").await.unwrap();

        assert_eq!(written, 17);
        assert!(path.to_string_lossy().ends_with(".jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a jpeg");

        let local = path.to_path_buf();
        drop(path);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn stream_to_temp_accepts_empty_body() {
        let body = ByteStream::from_static(b"");
        let (path, written) = stream_to_temp(body, "thumb-test-", "").await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
