//! The job-processing pipeline: poll, decode, download, convert, upload,
//! reply, delete, and loop.

use crate::converter::{ConvertError, Thumbnailer};
use crate::job::{thumbnail_key, DecodeError, Job, Reply};
use crate::queue::{QueueMessage, WorkQueue};
use crate::storage::ObjectStore;
use crate::telemetry;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Why one job failed. Any of these leaves the message undeleted so the
/// queue's visibility timeout redelivers it.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to decode message body: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to download source image: {0:#}")]
    Download(anyhow::Error),
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

impl JobError {
    /// The pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::Decode(_) => "decoding",
            JobError::Download(_) => "downloading",
            JobError::Convert(_) => "converting",
        }
    }
}

/// Per-iteration state threaded through the pipeline stages.
///
/// Each message gets a fresh context; nothing about a job lives on the
/// worker itself, so iterations cannot leak state into each other.
#[derive(Debug)]
pub struct JobContext {
    pub job: Job,
    pub correlation_id: Uuid,
    pub received_at: DateTime<Utc>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            correlation_id: Uuid::new_v4(),
            received_at: Utc::now(),
        }
    }

    /// Milliseconds since the message was received.
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.received_at)
            .num_milliseconds()
    }
}

/// The long-running thumbnail worker.
///
/// Owns the queue and storage collaborators plus the converter; processes
/// one message per iteration and never exits on a per-job error.
pub struct Worker<Q, S> {
    queue: Q,
    store: S,
    thumbnailer: Thumbnailer,
}

impl<Q: WorkQueue, S: ObjectStore> Worker<Q, S> {
    pub fn new(queue: Q, store: S, thumbnailer: Thumbnailer) -> Self {
        Self {
            queue,
            store,
            thumbnailer,
        }
    }

    /// Polls the work queue forever.
    ///
    /// Receive errors and per-job failures are logged and the loop re-polls
    /// immediately; redelivery of undeleted messages is left entirely to the
    /// queue's visibility timeout.
    pub async fn run(&self) {
        info!("thumbnail worker started");
        let mut processed: u64 = 0;

        loop {
            let message = match self.queue.receive_one().await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "failed to receive from queue");
                    continue;
                }
            };

            match self.handle_message(message).await {
                Ok(files) => info!(files = files.len(), "job complete"),
                Err(e) => error!(stage = e.stage(), error = %e, "job failed, message left for redelivery"),
            }

            processed += 1;
            if processed % 10 == 0 {
                telemetry::record_worker_heartbeat(processed);
            }
        }
    }

    /// Processes one queue message end to end.
    ///
    /// On success the message has been deleted and a reply sent; on any
    /// error the message is left in the queue untouched.
    pub async fn handle_message(&self, message: QueueMessage) -> Result<Vec<String>, JobError> {
        let job = Job::decode(&message.body)?;
        let ctx = JobContext::new(job);

        info!(
            correlation_id = %ctx.correlation_id,
            id = %ctx.job.id,
            original = %ctx.job.original,
            strategy = %ctx.job.strategy,
            descriptions = ctx.job.descriptions.len(),
            "processing thumbnail job"
        );

        let result = self.process_job(&ctx, &message.handle).await;
        telemetry::record_job_telemetry(&ctx, &result);
        result
    }

    async fn process_job(
        &self,
        ctx: &JobContext,
        handle: &str,
    ) -> Result<Vec<String>, JobError> {
        // Download. The temp path removes the local copy when it drops, on
        // success and failure alike.
        let source = self
            .store
            .download(&ctx.job.original)
            .await
            .map_err(JobError::Download)?;

        // Convert. One invocation per job, driven by the job's top-level
        // strategy fields.
        let request = ctx.job.conversion_request();
        let output = self.thumbnailer.execute(&request, &source).await?;

        // Upload fan-out is best effort: a failed file is logged and the
        // remaining files are still attempted.
        for name in &output.files {
            let remote = thumbnail_key(&ctx.job.original, name);
            if let Err(e) = self.store.upload(&output.dir.path().join(name), &remote).await {
                error!(
                    correlation_id = %ctx.correlation_id,
                    file = %name,
                    key = %remote,
                    error = %format!("{:#}", e),
                    "failed to upload thumbnail"
                );
            }
        }

        // Reply is fire-and-forget.
        let reply = Reply {
            id: ctx.job.id.clone(),
            files: output.files.clone(),
        };
        if let Err(e) = self.queue.send_reply(&reply).await {
            error!(
                correlation_id = %ctx.correlation_id,
                error = %format!("{:#}", e),
                "failed to send reply"
            );
        }

        // Conversion succeeded, so the message can be acknowledged. A failed
        // delete is logged; the job will simply be redelivered and redone.
        if let Err(e) = self.queue.delete(handle).await {
            error!(
                correlation_id = %ctx.correlation_id,
                error = %format!("{:#}", e),
                "failed to delete message"
            );
        }

        Ok(output.files)
        // `source` and `output.dir` drop here, removing the downloaded copy
        // and the scratch directory.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MockWorkQueue;
    use crate::storage::MockObjectStore;
    use mockall::predicate;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{NamedTempFile, TempDir};

    /// Writes a stand-in conversion tool that touches the requested output
    /// files inside the scratch directory (`count` of them).
    fn fake_convert_tool(count: usize) -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-convert");
        let mut script = String::from("#!/bin/sh\nfor last; do :; done\nd=$(dirname \"$last\")\n");
        for i in 0..count {
            script.push_str(&format!("touch \"$d/{}.png\"\n", i));
        }
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path.display().to_string())
    }

    fn thumbnailer(command: &str) -> Thumbnailer {
        Thumbnailer::new(command.to_string(), "thumb-test-".to_string(), None)
    }

    fn download_ok(store: &mut MockObjectStore) {
        store
            .expect_download()
            .with(predicate::eq("img/cat.jpg"))
            .times(1)
            .returning(|_| Ok(NamedTempFile::new().unwrap().into_temp_path()));
    }

    fn message(body: &str) -> QueueMessage {
        QueueMessage {
            handle: "h1".to_string(),
            body: body.to_string(),
        }
    }

    const BOUNDED_JOB: &str = r#"{
        "id": "1",
        "original": "img/cat.jpg",
        "strategy": "bounded",
        "width": 64,
        "height": 64,
        "descriptions": [{"strategy": "bounded", "width": 64, "height": 64}]
    }"#;

    #[tokio::test]
    async fn successful_job_uploads_replies_and_deletes() {
        let (_tool_dir, tool) = fake_convert_tool(1);

        let mut store = MockObjectStore::new();
        download_ok(&mut store);
        store
            .expect_upload()
            .withf(|_, key| key == "img/cat.0.png")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut queue = MockWorkQueue::new();
        queue
            .expect_send_reply()
            .withf(|reply| reply.id == "1" && reply.files == vec!["0.png".to_string()])
            .times(1)
            .returning(|_| Ok(()));
        queue
            .expect_delete()
            .with(predicate::eq("h1"))
            .times(1)
            .returning(|_| Ok(()));

        let worker = Worker::new(queue, store, thumbnailer(&tool));
        let files = worker.handle_message(message(BOUNDED_JOB)).await.unwrap();
        assert_eq!(files, vec!["0.png".to_string()]);
    }

    #[tokio::test]
    async fn malformed_body_is_left_for_redelivery() {
        let mut queue = MockWorkQueue::new();
        queue.expect_delete().times(0);
        queue.expect_send_reply().times(0);
        let mut store = MockObjectStore::new();
        store.expect_download().times(0);

        let worker = Worker::new(queue, store, thumbnailer("true"));
        let err = worker
            .handle_message(message("{malformed json"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }

    #[tokio::test]
    async fn download_failure_leaves_message_undeleted() {
        let mut store = MockObjectStore::new();
        store
            .expect_download()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("no such key")));
        store.expect_upload().times(0);

        let mut queue = MockWorkQueue::new();
        queue.expect_delete().times(0);
        queue.expect_send_reply().times(0);

        let worker = Worker::new(queue, store, thumbnailer("true"));
        let err = worker
            .handle_message(message(BOUNDED_JOB))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Download(_)));
    }

    #[tokio::test]
    async fn unknown_strategy_fails_without_deleting() {
        let mut store = MockObjectStore::new();
        download_ok(&mut store);
        store.expect_upload().times(0);

        let mut queue = MockWorkQueue::new();
        queue.expect_delete().times(0);
        queue.expect_send_reply().times(0);

        let body = r#"{"id": "1", "original": "img/cat.jpg", "strategy": "octagon"}"#;
        let worker = Worker::new(queue, store, thumbnailer("true"));
        let err = worker.handle_message(message(body)).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Convert(ConvertError::UnknownStrategy(_))
        ));
    }

    #[tokio::test]
    async fn conversion_with_no_output_fails_job() {
        // `true` exits 0 without producing files.
        let mut store = MockObjectStore::new();
        download_ok(&mut store);
        store.expect_upload().times(0);

        let mut queue = MockWorkQueue::new();
        queue.expect_delete().times(0);
        queue.expect_send_reply().times(0);

        let worker = Worker::new(queue, store, thumbnailer("true"));
        let err = worker
            .handle_message(message(BOUNDED_JOB))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Convert(ConvertError::NoOutput)));
    }

    #[tokio::test]
    async fn upload_failure_does_not_block_remaining_files_or_ack() {
        let (_tool_dir, tool) = fake_convert_tool(2);

        let mut store = MockObjectStore::new();
        download_ok(&mut store);
        store
            .expect_upload()
            .withf(|_, key| key == "img/cat.0.png")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("upload refused")));
        store
            .expect_upload()
            .withf(|_, key| key == "img/cat.1.png")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut queue = MockWorkQueue::new();
        queue
            .expect_send_reply()
            .withf(|reply| reply.files == vec!["0.png".to_string(), "1.png".to_string()])
            .times(1)
            .returning(|_| Ok(()));
        queue
            .expect_delete()
            .with(predicate::eq("h1"))
            .times(1)
            .returning(|_| Ok(()));

        let worker = Worker::new(queue, store, thumbnailer(&tool));
        let files = worker.handle_message(message(BOUNDED_JOB)).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn reply_failure_still_acknowledges_message() {
        let (_tool_dir, tool) = fake_convert_tool(1);

        let mut store = MockObjectStore::new();
        download_ok(&mut store);
        store.expect_upload().times(1).returning(|_, _| Ok(()));

        let mut queue = MockWorkQueue::new();
        queue
            .expect_send_reply()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("reply queue down")));
        queue
            .expect_delete()
            .with(predicate::eq("h1"))
            .times(1)
            .returning(|_| Ok(()));

        let worker = Worker::new(queue, store, thumbnailer(&tool));
        assert!(worker.handle_message(message(BOUNDED_JOB)).await.is_ok());
    }
}
