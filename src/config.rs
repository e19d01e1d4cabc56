//! Worker configuration loaded from environment variables.

use std::time::Duration;

/// Runtime configuration for the thumbnail worker.
///
/// Every value has a default so the worker starts in a development
/// environment with nothing but AWS credentials set.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// URL of the queue jobs are received from.
    pub queue_url: String,
    /// URL of the queue completion replies are sent to.
    pub reply_queue_url: String,
    /// AWS region for the queue and bucket clients.
    pub region: String,
    /// Bucket holding source images and thumbnails.
    pub bucket: String,
    /// Image-conversion tool invoked per job.
    pub convert_command: String,
    /// Prefix for scratch directories and downloaded temp files.
    pub tmp_prefix: String,
    /// Subprocess timeout in seconds; 0 disables the timeout.
    pub convert_timeout_secs: u64,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            queue_url: env_or("THUMBNAIL_QUEUE_URL", ""),
            reply_queue_url: env_or("THUMBNAIL_REPLY_QUEUE_URL", ""),
            region: env_or("AWS_REGION", "us-east-1"),
            bucket: env_or("THUMBNAIL_BUCKET", "thumbnails"),
            convert_command: env_or("CONVERT_COMMAND", "convert"),
            tmp_prefix: env_or("TMP_PREFIX", "thumbnail-"),
            convert_timeout_secs: std::env::var("CONVERT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }

    /// The subprocess timeout, or `None` when disabled.
    pub fn convert_timeout(&self) -> Option<Duration> {
        match self.convert_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
