//! Thumbnail Worker Library
//!
//! This library provides the core functionality for the queue-driven
//! image-thumbnailing worker. It exposes modules for job decoding, queue and
//! storage collaborators, conversion, and telemetry.
//!
//! ## Module Overview
//!
//! - `config`: environment-driven worker configuration
//! - `converter`: strategy registry and external conversion-tool execution
//! - `job`: job models, message decoding, remote-key derivation
//! - `queue`: work/reply queue trait and SQS implementation
//! - `storage`: object-store trait and S3 implementation
//! - `worker`: the per-message processing pipeline and poll loop
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use worker_thumbnail::{
//!     converter::Thumbnailer,
//!     job::Job,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let thumbnailer = Thumbnailer::new("convert".to_string(), "thumbnail-".to_string(), None);
//!
//!     let job = Job::decode(
//!         r#"{"id": "1", "original": "img/cat.jpg", "strategy": "bounded",
//!             "width": 64, "height": 64}"#,
//!     )
//!     .unwrap();
//!
//!     let output = thumbnailer
//!         .execute(&job.conversion_request(), std::path::Path::new("/tmp/cat.jpg"))
//!         .await;
//!     assert!(output.is_err() || !output.unwrap().files.is_empty());
//! }
//! ```

pub mod config;
pub mod converter;
pub mod job;
pub mod queue;
pub mod storage;
pub mod telemetry;
pub mod worker;
