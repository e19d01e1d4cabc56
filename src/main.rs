//! Thumbnail Worker Service
//!
//! This worker polls an SQS queue for thumbnailing jobs, downloads the
//! source image from S3, runs an ImageMagick-style `convert` under one of
//! four sizing strategies, uploads the produced files, and reports
//! completion on a reply queue.
//!
//! ## Architecture
//!
//! - **Queue**: SQS work queue + separate reply queue; visibility timeout is
//!   the retry mechanism for failed jobs
//! - **Storage**: S3 bucket holding source images and thumbnails
//! - **Converter**: external subprocess per job, writing into a scratch
//!   directory
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! ## Configuration
//!
//! Environment variables:
//! - `THUMBNAIL_QUEUE_URL`: work queue URL
//! - `THUMBNAIL_REPLY_QUEUE_URL`: reply queue URL
//! - `THUMBNAIL_BUCKET`: S3 bucket (default: thumbnails)
//! - `AWS_REGION`: AWS region (default: us-east-1)
//! - `CONVERT_COMMAND`: conversion tool (default: convert)
//! - `TMP_PREFIX`: temp file/directory prefix (default: thumbnail-)
//! - `CONVERT_TIMEOUT_SECS`: subprocess timeout, 0 = none (default: 0)
//! - `RUST_LOG`: log level (default: info)

mod config;
mod converter;
mod job;
mod queue;
mod storage;
mod telemetry;
mod worker;

use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::Region;
use config::WorkerConfig;
use converter::Thumbnailer;
use queue::SqsQueue;
use storage::S3ObjectStore;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize OpenTelemetry
    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting thumbnail worker service");

    // Load configuration
    let config = WorkerConfig::from_env();
    info!(
        "Configuration: queue={}, reply={}, bucket={}, region={}, command={}",
        config.queue_url, config.reply_queue_url, config.bucket, config.region, config.convert_command
    );

    // Build shared AWS clients
    let region_provider =
        RegionProviderChain::first_try(Region::new(config.region.clone())).or_default_provider();
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;

    let queue = SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws_config),
        config.queue_url.clone(),
        config.reply_queue_url.clone(),
    );
    let store = S3ObjectStore::new(
        aws_sdk_s3::Client::new(&aws_config),
        config.bucket.clone(),
        config.tmp_prefix.clone(),
    );
    let thumbnailer = Thumbnailer::new(
        config.convert_command.clone(),
        config.tmp_prefix.clone(),
        config.convert_timeout(),
    );

    // Run the poll loop until the process is told to stop
    let worker = Worker::new(queue, store, thumbnailer);
    let worker_task = tokio::spawn(async move { worker.run().await });

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c().await?;

    info!("Received shutdown signal, stopping worker");
    worker_task.abort();

    info!("Worker service shutdown complete");
    Ok(())
}
